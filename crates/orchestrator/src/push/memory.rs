//! In-process push channel.
//!
//! A broadcast fan-out with one forwarding task per subscription. Used by
//! the test suite and by embedded deployments where the automation engine
//! runs in the same process.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use super::{PushChannel, PushMessage, PushSubscription};
use crate::error::OrchestratorResult;

/// In-memory broker implementing [`PushChannel`].
#[derive(Clone)]
pub struct MemoryPushChannel {
    sender: broadcast::Sender<PushMessage>,
}

impl MemoryPushChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    /// Publish a message to all matching subscriptions. Messages published
    /// with no subscribers are dropped, matching real push semantics.
    pub fn publish(&self, message: PushMessage) {
        let _ = self.sender.send(message);
    }
}

impl Default for MemoryPushChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushChannel for MemoryPushChannel {
    async fn subscribe(&self, scope: &str, entity_id: &str) -> OrchestratorResult<PushSubscription> {
        let mut source = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(16);
        let scope = scope.to_string();
        let entity_id = entity_id.to_string();

        let forward_task = tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(msg) => {
                        if msg.scope == scope && msg.entity_id == entity_id {
                            if tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Push subscription lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(PushSubscription::new(rx, forward_task))
    }
}
