//! Command dispatch and verification for automation channels
//!
//! This module handles:
//! - Publishing commands to channel command topics
//! - Tracking verified commands until their status matches
//! - Retrying unconfirmed commands with a delay
//! - Reporting commands that exhausted their retries

mod controller;
mod dispatcher;
mod reporter;
mod scheduler;
mod tracker;

pub use dispatcher::CommandDispatcher;
