//! Recording transport for controller tests

use crate::transport::memory::MemoryBroker;
use crate::transport::traits::{PubSub, Subscription};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Wraps a `MemoryBroker` and remembers every publish with its offset
#[derive(Clone)]
pub struct RecordingTransport {
    broker: MemoryBroker,
    started: Instant,
    published: Arc<Mutex<Vec<(Duration, String, Bytes)>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            broker: MemoryBroker::new(),
            started: Instant::now(),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Publishes to `topic` as (offset from creation, payload)
    pub fn published_to(&self, topic: &str) -> Vec<(Duration, Bytes)> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, t, _)| t == topic)
            .map(|(at, _, payload)| (*at, payload.clone()))
            .collect()
    }
}

#[async_trait]
impl PubSub for RecordingTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.published
            .lock()
            .unwrap()
            .push((self.started.elapsed(), topic.to_string(), payload.clone()));
        self.broker.publish(topic, payload).await
    }

    async fn subscribe(&self, filter: &str) -> Result<Subscription> {
        self.broker.subscribe(filter).await
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
