//! In-process broker used for local runs and tests

use crate::transport::traits::{Message, PubSub, Subscription};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use homy_shared::topic;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::trace;

struct Subscriber {
    filter: String,
    tx: mpsc::UnboundedSender<Message>,
}

/// Broker that routes messages between tasks of the same process
#[derive(Clone, Default)]
pub struct MemoryBroker {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl MemoryBroker {
    /// Create a new broker with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of live subscriptions
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .await
            .iter()
            .filter(|s| !s.tx.is_closed())
            .count()
    }
}

#[async_trait]
impl PubSub for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        if topic.is_empty() || topic.contains(['+', '#']) {
            return Err(anyhow!("Invalid publish topic: {:?}", topic));
        }

        let mut subscribers = self.subscribers.write().await;
        // Drop subscriptions whose receiver went away
        subscribers.retain(|s| !s.tx.is_closed());

        let mut delivered = 0;
        for sub in subscribers.iter().filter(|s| topic::matches(&s.filter, topic)) {
            let msg = Message {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            if sub.tx.send(msg).is_ok() {
                delivered += 1;
            }
        }

        trace!("Published to {} ({} subscribers)", topic, delivered);
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<Subscription> {
        if filter.is_empty() {
            return Err(anyhow!("Empty subscription filter"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().await.push(Subscriber {
            filter: filter.to_string(),
            tx,
        });
        Ok(rx)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
