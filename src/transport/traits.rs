//! Publish/subscribe abstraction for pluggable broker backends

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// A message delivered to a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
}

/// Stream of messages matching one topic filter
pub type Subscription = mpsc::UnboundedReceiver<Message>;

/// Fire-and-forget publish/subscribe capability
#[async_trait]
pub trait PubSub: Send + Sync + 'static {
    /// Hand a payload to the broker; delivery is not confirmed
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;

    /// Subscribe to a topic filter (`+` and `#` wildcards allowed)
    async fn subscribe(&self, filter: &str) -> Result<Subscription>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
