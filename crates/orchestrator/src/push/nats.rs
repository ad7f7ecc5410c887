//! NATS-backed push channel.
//!
//! Subscribes to one subject per scope/entity pair and decodes JSON
//! [`PushMessage`] payloads. Delivery is best effort; the watcher's
//! reconciliation poll covers dropped connections and reconnect races.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::{PushChannel, PushMessage, PushSubscription};
use crate::error::{OrchestratorError, OrchestratorResult};

/// Push channel over a NATS connection.
#[derive(Clone)]
pub struct NatsPushChannel {
    client: async_nats::Client,
    subject_prefix: String,
}

impl NatsPushChannel {
    /// Connect to NATS. Subjects are `<prefix>.<scope>.<entity_id>`.
    pub async fn connect(nats_url: &str, subject_prefix: &str) -> OrchestratorResult<Self> {
        let client = async_nats::connect(nats_url)
            .await
            .map_err(|e| OrchestratorError::Channel(e.to_string()))?;

        tracing::info!(nats_url = %nats_url, "Connected to push channel");

        Ok(Self {
            client,
            subject_prefix: subject_prefix.to_string(),
        })
    }
}

fn subject(prefix: &str, scope: &str, entity_id: &str) -> String {
    format!("{}.{}.{}", prefix, scope, entity_id)
}

#[async_trait]
impl PushChannel for NatsPushChannel {
    async fn subscribe(&self, scope: &str, entity_id: &str) -> OrchestratorResult<PushSubscription> {
        let subject = subject(&self.subject_prefix, scope, entity_id);
        let mut subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| OrchestratorError::Channel(e.to_string()))?;

        let (tx, rx) = mpsc::channel(16);
        let scope = scope.to_string();
        let entity_id = entity_id.to_string();

        let forward_task = tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                let push: PushMessage = match serde_json::from_slice(&msg.payload) {
                    Ok(push) => push,
                    Err(e) => {
                        tracing::warn!(subject = %subject, error = %e, "Undecodable push message");
                        continue;
                    }
                };

                // The subject already narrows delivery; the body check
                // guards against misaddressed publishes.
                if push.scope != scope || push.entity_id != entity_id {
                    continue;
                }

                if tx.send(push).await.is_err() {
                    break;
                }
            }
        });

        Ok(PushSubscription::new(rx, forward_task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_layout() {
        assert_eq!(
            subject("caseflow.push", "case_execution", "run-1"),
            "caseflow.push.case_execution.run-1"
        );
    }
}
