use async_trait::async_trait;
use tokio::sync::broadcast;

// ============================================================================
// Event Fanout - best-effort broadcast of state changes
// ============================================================================
//
// The coordinator only ever calls publish(topic, key, payload) and never
// blocks on delivery. Publish failures are logged and counted by the
// caller, never propagated as the write operation's failure.
//
// ============================================================================

#[async_trait]
pub trait EventFanout: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct FanoutMessage {
    pub topic: String,
    pub key: String,
    pub payload: serde_json::Value,
}

/// In-process fanout over a broadcast channel. Observers subscribe and
/// receive every message published after they joined; a publish with no
/// observers is not an error.
pub struct BroadcastFanout {
    tx: broadcast::Sender<FanoutMessage>,
}

impl BroadcastFanout {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FanoutMessage> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastFanout {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EventFanout for BroadcastFanout {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        let message = FanoutMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
        };

        // An empty subscriber set is fine; dropped messages only matter to
        // observers, not to the write path.
        let receivers = self.tx.send(message).unwrap_or(0);

        tracing::debug!(topic, key, receivers, "published fanout event");
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
