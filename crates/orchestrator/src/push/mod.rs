//! Push channel abstraction for out-of-band completion signals.
//!
//! The channel is a latency optimization, never a correctness dependency:
//! messages may be duplicated, delayed, or lost, and the watcher's
//! reconciliation poll covers the gaps. Subscriptions are structured
//! handles that own their cancellation, so tearing a session down cannot
//! leak a registered filter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::OrchestratorResult;

pub mod memory;
pub mod nats;

pub use memory::MemoryPushChannel;
pub use nats::NatsPushChannel;

/// Statuses that resolve a watch.
pub const TERMINAL_STATUSES: [&str; 4] = ["completed", "failed", "error", "cancelled"];

/// Message delivered on the push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    /// Entity namespace, e.g. "case_execution".
    pub scope: String,

    /// Identifier of the watched entity within the scope.
    pub entity_id: String,

    /// Status carried by the signal.
    pub status: String,

    /// Optional structured payload (verdict, timings, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl PushMessage {
    /// Whether this message ends the watched entity's active lifecycle.
    pub fn is_terminal(&self) -> bool {
        TERMINAL_STATUSES.contains(&self.status.as_str())
    }
}

/// A live subscription to one scope/entity pair.
///
/// Dropping the handle cancels the subscription; `cancel` may also be
/// called explicitly and is idempotent.
pub struct PushSubscription {
    receiver: mpsc::Receiver<PushMessage>,
    forward_task: Option<JoinHandle<()>>,
}

impl PushSubscription {
    /// Assemble a subscription from its delivery queue and the task that
    /// feeds it. Channel implementations use this; consumers only receive.
    pub fn new(receiver: mpsc::Receiver<PushMessage>, forward_task: JoinHandle<()>) -> Self {
        Self {
            receiver,
            forward_task: Some(forward_task),
        }
    }

    /// Receive the next matching message; `None` once the channel closed
    /// or the subscription was cancelled.
    pub async fn recv(&mut self) -> Option<PushMessage> {
        self.receiver.recv().await
    }

    /// Cancel the subscription. Safe to call any number of times.
    pub fn cancel(&mut self) {
        if let Some(task) = self.forward_task.take() {
            task.abort();
        }
        self.receiver.close();
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A source of push messages.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Subscribe to messages for one scope/entity pair.
    async fn subscribe(&self, scope: &str, entity_id: &str) -> OrchestratorResult<PushSubscription>;
}
