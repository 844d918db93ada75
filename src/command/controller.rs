//! Verification controller - the event loop behind verified channels
//!
//! Dispatches, status observations and timer firings all arrive on one queue
//! and are handled one at a time by a single task, so the tracker is never
//! touched concurrently.

use super::reporter::FailureReporter;
use super::scheduler::{RetryScheduler, TimerKind};
use super::tracker::{CommandKey, PendingCommand, VerificationTracker};
use crate::transport::{PubSub, Subscription};
use bytes::Bytes;
use homy_shared::state_machine::{TransitionResult, VerificationEvent};
use homy_shared::{codec, FailureEvent, VerificationPolicy};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Events processed by the controller loop
#[derive(Debug)]
pub enum ControllerEvent {
    /// A verified command was requested
    Dispatch {
        key: CommandKey,
        expected_state: bool,
        command_topic: String,
        payload: Bytes,
        policy: VerificationPolicy,
    },
    /// A channel reported its state
    StatusObserved { channel_id: String, state: bool },
    /// A scheduler timer elapsed
    TimerFired {
        key: CommandKey,
        generation: u64,
        kind: TimerKind,
    },
    /// Count pending commands, optionally for one channel
    PendingCount {
        channel_id: Option<String>,
        reply: oneshot::Sender<usize>,
    },
}

/// Owns the pending-command map of one automation bot
pub struct VerificationController {
    transport: Arc<dyn PubSub>,
    tracker: VerificationTracker,
    scheduler: RetryScheduler,
    reporter: FailureReporter,
    events: mpsc::UnboundedReceiver<ControllerEvent>,
    forwarders: Vec<JoinHandle<()>>,
}

impl VerificationController {
    /// Create a controller reading from `events`
    ///
    /// `weak_events` must belong to the same channel; it is used for timers.
    pub fn new(
        transport: Arc<dyn PubSub>,
        bot_name: &str,
        events: mpsc::UnboundedReceiver<ControllerEvent>,
        weak_events: mpsc::WeakUnboundedSender<ControllerEvent>,
    ) -> Self {
        Self {
            reporter: FailureReporter::new(transport.clone(), bot_name),
            transport,
            tracker: VerificationTracker::new(),
            scheduler: RetryScheduler::new(weak_events),
            events,
            forwarders: Vec::new(),
        }
    }

    /// Feed status payloads of a channel into the loop
    pub fn attach_status(
        &mut self,
        channel_id: String,
        subscription: Subscription,
        events: mpsc::WeakUnboundedSender<ControllerEvent>,
    ) {
        let handle = tokio::spawn(forward_status(channel_id, subscription, events));
        self.forwarders.push(handle);
    }

    /// Run until every dispatcher handle is dropped
    pub async fn run(mut self) {
        debug!("Verification controller running, failures go to {}", self.reporter.topic());
        while let Some(event) = self.events.recv().await {
            self.handle_event(event).await;
        }

        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }
        info!(
            "Verification controller stopped ({} commands abandoned)",
            self.tracker.len()
        );
    }

    async fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Dispatch {
                key,
                expected_state,
                command_topic,
                payload,
                policy,
            } => {
                self.dispatch(key, expected_state, command_topic, payload, policy)
                    .await
            }
            ControllerEvent::StatusObserved { channel_id, state } => {
                self.on_status_observed(&channel_id, state)
            }
            ControllerEvent::TimerFired {
                key,
                generation,
                kind,
            } => self.on_timer(key, generation, kind).await,
            ControllerEvent::PendingCount { channel_id, reply } => {
                let count = match channel_id {
                    Some(id) => self.tracker.count_for(&id),
                    None => self.tracker.len(),
                };
                let _ = reply.send(count);
            }
        }
    }

    /// Publish, then track the command and arm its verification window
    async fn dispatch(
        &mut self,
        key: CommandKey,
        expected_state: bool,
        command_topic: String,
        payload: Bytes,
        policy: VerificationPolicy,
    ) {
        publish_command(self.transport.as_ref(), &command_topic, payload.clone()).await;

        let mut pending = PendingCommand::new(key, command_topic, payload, expected_state, policy);
        match pending.apply(VerificationEvent::Dispatched) {
            TransitionResult::Publish { .. } => {}
            other => {
                warn!("Unexpected dispatch transition for {}: {:?}", pending.key, other);
                return;
            }
        }

        pending.deadline = Some(Instant::now() + policy.timeout);
        pending.arm(
            self.scheduler
                .arm(pending.key.clone(), TimerKind::Deadline, policy.timeout),
        );

        debug!(
            "Tracking {} (expect {}, verify within {:?})",
            pending.key, expected_state, policy.timeout
        );
        if let Some(replaced) = self.tracker.insert(pending) {
            debug!(
                "Replaced pending {} after {} attempts",
                replaced.key,
                replaced.attempts()
            );
        }
    }

    fn on_status_observed(&mut self, channel_id: &str, state: bool) {
        let keys = self.tracker.keys_for_channel(channel_id);
        if keys.is_empty() {
            debug!("Status {} on {} (no pending command)", state, channel_id);
            return;
        }

        for key in keys {
            let Some(pending) = self.tracker.get_mut(&key) else {
                continue;
            };

            match pending.apply(VerificationEvent::StatusObserved(state)) {
                TransitionResult::Verified { attempts } => {
                    self.tracker.remove(&key);
                    info!("command for {} verified successfully", key.reason);
                    debug!("{} verified after {} attempts", key, attempts);
                }
                TransitionResult::Noted { observed } => {
                    let remaining = pending
                        .deadline
                        .map(|d| d.saturating_duration_since(Instant::now()));
                    debug!(
                        "{} reported {} while expecting {}, deadline in {:?}",
                        key,
                        observed,
                        pending.expected_state(),
                        remaining
                    );
                }
                other => warn!("Ignoring status for {}: {:?}", key, other),
            }
        }
    }

    async fn on_timer(&mut self, key: CommandKey, generation: u64, kind: TimerKind) {
        let Some(pending) = self.tracker.get_mut(&key) else {
            debug!("Stale {:?} timer for {} (already cleared)", kind, key);
            return;
        };
        if !pending.is_current(generation) {
            debug!("Stale {:?} timer for {} (superseded)", kind, key);
            return;
        }

        let event = match kind {
            TimerKind::Deadline => VerificationEvent::DeadlineElapsed,
            TimerKind::RetryDelay => VerificationEvent::RetryDue,
        };

        match pending.apply(event) {
            TransitionResult::ScheduleRetry { attempt } => {
                info!("scheduling retry for {}", key.reason);
                debug!(
                    "{} attempt {}/{} in {:?}",
                    key,
                    attempt,
                    pending.policy.max_retries + 1,
                    pending.policy.retry_delay
                );
                pending.deadline = None;
                let delay = pending.policy.retry_delay;
                pending.arm(self.scheduler.arm(key, TimerKind::RetryDelay, delay));
            }
            TransitionResult::Publish { attempt } => {
                info!(
                    "Retrying {} (attempt {}/{})",
                    key,
                    attempt,
                    pending.policy.max_retries + 1
                );
                publish_command(
                    self.transport.as_ref(),
                    &pending.command_topic,
                    pending.payload.clone(),
                )
                .await;
                let timeout = pending.policy.timeout;
                pending.deadline = Some(Instant::now() + timeout);
                pending.arm(self.scheduler.arm(key, TimerKind::Deadline, timeout));
            }
            TransitionResult::Exhausted {
                attempts,
                actual_state,
            } => {
                let expected_state = pending.expected_state();
                self.tracker.remove(&key);
                let event = FailureEvent::new(&key.reason, attempts, expected_state, actual_state);
                self.reporter.report(&key.channel_id, &event).await;
            }
            other => warn!("Ignoring {:?} timer for {}: {:?}", kind, key, other),
        }
    }
}

/// Fire-and-forget publish; transport errors are logged
async fn publish_command(transport: &dyn PubSub, topic: &str, payload: Bytes) {
    if let Err(e) = transport.publish(topic, payload).await {
        error!("Failed to publish command to {}: {}", topic, e);
    }
}

/// Decode status payloads of one channel and post them to the controller
async fn forward_status(
    channel_id: String,
    mut subscription: Subscription,
    events: mpsc::WeakUnboundedSender<ControllerEvent>,
) {
    while let Some(msg) = subscription.recv().await {
        let state = match codec::decode_state(&msg.payload) {
            Ok(state) => state,
            Err(e) => {
                warn!("Unreadable status on {}: {}", msg.topic, e);
                continue;
            }
        };

        let Some(tx) = events.upgrade() else {
            break;
        };
        let event = ControllerEvent::StatusObserved {
            channel_id: channel_id.clone(),
            state,
        };
        if tx.send(event).is_err() {
            break;
        }
    }
    debug!("Status forwarder for {} stopped", channel_id);
}
