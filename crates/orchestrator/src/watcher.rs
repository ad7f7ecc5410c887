//! Asynchronous completion watching for automated cases.
//!
//! A watch combines two independently cancellable primitives: a push
//! subscription and a timer-driven reconciliation poll. Push delivery is
//! the fast path; the poll against the backend record is the source of
//! truth of last resort, because push messages can be dropped on
//! disconnects and reconnect races. A watch resolves exactly once;
//! terminal messages arriving after resolution are discarded.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::PlanExecutionStore;
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorResult;
use crate::model::{CaseVerdict, SessionStatus, StatusReport};
use crate::push::{PushChannel, PushMessage, PushSubscription};

/// Where a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSource {
    Push,
    Poll,
}

/// Event emitted by a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    /// The watched execution reached a terminal status.
    Resolved {
        verdict: CaseVerdict,
        source: CompletionSource,
    },
    /// No terminal signal arrived within the timeout. Informational: the
    /// underlying execution keeps running and the poll keeps reconciling,
    /// but the operator should no longer be shown a spinner.
    TimedOut,
}

/// Handle to one armed watch.
///
/// Dropping the handle cancels the watch; `cancel` is idempotent and
/// clears the subscription and all pending timers.
pub struct WatchHandle {
    case_id: String,
    events: mpsc::Receiver<WatchEvent>,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn case_id(&self) -> &str {
        &self.case_id
    }

    /// Next event from the watch; `None` once it resolved, exhausted its
    /// poll budget, or was cancelled.
    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    /// Cancel the watch. Safe to call any number of times.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.events.close();
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Factory for watches over one push channel and persistence backend.
pub struct CompletionWatcher {
    config: OrchestratorConfig,
    push: Arc<dyn PushChannel>,
    persistence: Arc<dyn PlanExecutionStore>,
}

impl CompletionWatcher {
    pub fn new(
        config: OrchestratorConfig,
        push: Arc<dyn PushChannel>,
        persistence: Arc<dyn PlanExecutionStore>,
    ) -> Self {
        Self {
            config,
            push,
            persistence,
        }
    }

    /// Arm a watch for one case execution. `entity_id` identifies the
    /// backend record for the poll; push delivery is keyed to the
    /// individual case (`{entity_id}/{case_id}` on the channel), so a
    /// late or duplicated message for another case can never resolve
    /// this watch.
    pub async fn watch(
        &self,
        scope: &str,
        entity_id: &str,
        case_id: &str,
    ) -> OrchestratorResult<WatchHandle> {
        let push_entity = format!("{}/{}", entity_id, case_id);
        let subscription = self.push.subscribe(scope, &push_entity).await?;
        let (tx, rx) = mpsc::channel(4);

        tracing::debug!(case_id = %case_id, entity_id = %entity_id, "Watch armed");

        let task = tokio::spawn(run_watch(
            subscription,
            tx,
            self.persistence.clone(),
            entity_id.to_string(),
            case_id.to_string(),
            self.config.clone(),
        ));

        Ok(WatchHandle {
            case_id: case_id.to_string(),
            events: rx,
            task: Some(task),
        })
    }
}

async fn run_watch(
    mut subscription: PushSubscription,
    events: mpsc::Sender<WatchEvent>,
    persistence: Arc<dyn PlanExecutionStore>,
    entity_id: String,
    case_id: String,
    config: OrchestratorConfig,
) {
    let mut channel_open = true;

    // Fast path: wait on the push channel up to the timeout.
    let deadline = tokio::time::sleep(config.completion_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            msg = subscription.recv(), if channel_open => match msg {
                Some(msg) if msg.is_terminal() => {
                    let verdict = verdict_from_message(&msg);
                    tracing::info!(case_id = %case_id, verdict = %verdict, "Watch resolved by push");
                    let _ = events
                        .send(WatchEvent::Resolved { verdict, source: CompletionSource::Push })
                        .await;
                    return;
                }
                Some(_) => {}
                None => {
                    // Channel lost; the poll is now the sole mechanism.
                    tracing::warn!(case_id = %case_id, "Push channel closed, falling back to poll");
                    channel_open = false;
                    break;
                }
            },
            _ = &mut deadline => {
                tracing::info!(case_id = %case_id, "Watch timed out, scheduling reconciliation poll");
                let _ = events.send(WatchEvent::TimedOut).await;
                break;
            }
        }
    }

    // Reconciliation: bounded authoritative polling, still listening to
    // the push channel in case it recovers first.
    for attempt in 1..=config.max_poll_attempts {
        let interval = tokio::time::sleep(config.poll_interval);
        tokio::pin!(interval);

        loop {
            tokio::select! {
                msg = subscription.recv(), if channel_open => match msg {
                    Some(msg) if msg.is_terminal() => {
                        let verdict = verdict_from_message(&msg);
                        tracing::info!(case_id = %case_id, verdict = %verdict, "Watch resolved by push");
                        let _ = events
                            .send(WatchEvent::Resolved { verdict, source: CompletionSource::Push })
                            .await;
                        return;
                    }
                    Some(_) => {}
                    None => channel_open = false,
                },
                _ = &mut interval => break,
            }
        }

        match persistence.get_status(&entity_id).await {
            Ok(report) if report.status.is_terminal() => {
                let verdict = verdict_from_report(&report);
                tracing::info!(case_id = %case_id, verdict = %verdict, "Watch resolved by poll");
                let _ = events
                    .send(WatchEvent::Resolved { verdict, source: CompletionSource::Poll })
                    .await;
                return;
            }
            Ok(_) => {
                tracing::debug!(case_id = %case_id, attempt, "Poll: execution still running");
            }
            Err(e) => {
                tracing::warn!(case_id = %case_id, attempt, error = %e, "Reconciliation poll failed");
            }
        }
    }

    tracing::warn!(
        case_id = %case_id,
        attempts = config.max_poll_attempts,
        "Watch exhausted its poll budget without resolution"
    );
}

/// Map a terminal push message to a case verdict. An explicit `result`
/// field in the payload wins; otherwise the status decides.
fn verdict_from_message(msg: &PushMessage) -> CaseVerdict {
    if let Some(result) = msg
        .payload
        .as_ref()
        .and_then(|p| p.get("result"))
        .and_then(|v| serde_json::from_value::<CaseVerdict>(v.clone()).ok())
    {
        return result;
    }
    verdict_from_status(&msg.status)
}

fn verdict_from_report(report: &StatusReport) -> CaseVerdict {
    if let Some(result) = report.result {
        return result;
    }
    match report.status {
        SessionStatus::Completed => CaseVerdict::Pass,
        SessionStatus::Failed => CaseVerdict::Fail,
        SessionStatus::Cancelled => CaseVerdict::Skip,
        SessionStatus::Running => CaseVerdict::Block,
    }
}

fn verdict_from_status(status: &str) -> CaseVerdict {
    match status {
        "completed" => CaseVerdict::Pass,
        "failed" | "error" => CaseVerdict::Fail,
        "cancelled" => CaseVerdict::Skip,
        _ => CaseVerdict::Block,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionKind, SessionUpdate};
    use crate::push::MemoryPushChannel;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedStatusStore {
        reports: Mutex<VecDeque<StatusReport>>,
        polls: AtomicUsize,
    }

    impl ScriptedStatusStore {
        fn new(reports: Vec<StatusReport>) -> Arc<Self> {
            Arc::new(Self {
                reports: Mutex::new(reports.into()),
                polls: AtomicUsize::new(0),
            })
        }

        fn running() -> StatusReport {
            StatusReport {
                status: SessionStatus::Running,
                result: None,
            }
        }

        fn completed_pass() -> StatusReport {
            StatusReport {
                status: SessionStatus::Completed,
                result: Some(CaseVerdict::Pass),
            }
        }
    }

    #[async_trait]
    impl PlanExecutionStore for ScriptedStatusStore {
        async fn create(
            &self,
            _plan_id: &str,
            _executor_id: &str,
            _kind: ExecutionKind,
            _case_ids: &[String],
        ) -> OrchestratorResult<String> {
            Ok("session-1".to_string())
        }

        async fn update(
            &self,
            _session_id: &str,
            _update: &SessionUpdate,
        ) -> OrchestratorResult<()> {
            Ok(())
        }

        async fn delete(&self, _session_id: &str) -> OrchestratorResult<()> {
            Ok(())
        }

        async fn get_status(&self, _session_id: &str) -> OrchestratorResult<StatusReport> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let mut reports = self.reports.lock().unwrap();
            let report = reports.pop_front().unwrap_or_else(Self::running);
            Ok(report)
        }
    }

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            completion_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(10),
            max_poll_attempts: 3,
        }
    }

    fn terminal_message(entity_id: &str, status: &str, result: Option<&str>) -> PushMessage {
        PushMessage {
            scope: "case_execution".to_string(),
            entity_id: entity_id.to_string(),
            status: status.to_string(),
            payload: result.map(|r| serde_json::json!({ "result": r })),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_resolution_is_exactly_once() {
        let channel = Arc::new(MemoryPushChannel::new());
        let store = ScriptedStatusStore::new(vec![]);
        let watcher = CompletionWatcher::new(test_config(), channel.clone(), store.clone());

        let mut handle = watcher
            .watch("case_execution", "rec-1", "case-a")
            .await
            .unwrap();

        channel.publish(terminal_message("rec-1/case-a", "progress", None));
        channel.publish(terminal_message("rec-1/case-a", "completed", Some("fail")));
        channel.publish(terminal_message("rec-1/case-a", "completed", Some("pass")));
        channel.publish(terminal_message("rec-1/case-a", "failed", None));

        let event = handle.next_event().await.unwrap();
        assert_eq!(
            event,
            WatchEvent::Resolved {
                verdict: CaseVerdict::Fail,
                source: CompletionSource::Push
            }
        );

        // Duplicate and delayed terminal messages are discarded.
        assert!(handle.next_event().await.is_none());
        assert_eq!(store.polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_poll_resolution() {
        let channel = Arc::new(MemoryPushChannel::new());
        let store = ScriptedStatusStore::new(vec![
            ScriptedStatusStore::running(),
            ScriptedStatusStore::completed_pass(),
        ]);
        let watcher = CompletionWatcher::new(test_config(), channel, store.clone());

        let mut handle = watcher
            .watch("case_execution", "rec-1", "case-a")
            .await
            .unwrap();

        assert_eq!(handle.next_event().await, Some(WatchEvent::TimedOut));
        assert_eq!(
            handle.next_event().await,
            Some(WatchEvent::Resolved {
                verdict: CaseVerdict::Pass,
                source: CompletionSource::Poll
            })
        );
        assert!(handle.next_event().await.is_none());
        assert_eq!(store.polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_wins_during_poll_phase() {
        let channel = Arc::new(MemoryPushChannel::new());
        let store = ScriptedStatusStore::new(vec![]);
        let watcher = CompletionWatcher::new(test_config(), channel.clone(), store.clone());

        let mut handle = watcher
            .watch("case_execution", "rec-1", "case-a")
            .await
            .unwrap();

        assert_eq!(handle.next_event().await, Some(WatchEvent::TimedOut));

        // Channel recovers after the timeout; push still resolves.
        channel.publish(terminal_message("rec-1/case-a", "completed", None));
        assert_eq!(
            handle.next_event().await,
            Some(WatchEvent::Resolved {
                verdict: CaseVerdict::Pass,
                source: CompletionSource::Push
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_ignores_other_cases_messages() {
        let channel = Arc::new(MemoryPushChannel::new());
        let store = ScriptedStatusStore::new(vec![]);
        let watcher = CompletionWatcher::new(test_config(), channel.clone(), store);

        let mut handle = watcher
            .watch("case_execution", "rec-1", "case-b")
            .await
            .unwrap();

        // A delayed duplicate of another case's terminal message must not
        // resolve this watch with that case's verdict.
        channel.publish(terminal_message("rec-1/case-a", "failed", None));
        channel.publish(terminal_message("rec-1/case-a", "failed", None));

        assert_eq!(handle.next_event().await, Some(WatchEvent::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_budget_exhaustion_ends_watch() {
        let channel = Arc::new(MemoryPushChannel::new());
        let store = ScriptedStatusStore::new(vec![]); // always running
        let watcher = CompletionWatcher::new(test_config(), channel, store.clone());

        let mut handle = watcher
            .watch("case_execution", "rec-1", "case-a")
            .await
            .unwrap();

        assert_eq!(handle.next_event().await, Some(WatchEvent::TimedOut));
        assert!(handle.next_event().await.is_none());
        assert_eq!(store.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let channel = Arc::new(MemoryPushChannel::new());
        let store = ScriptedStatusStore::new(vec![]);
        let watcher = CompletionWatcher::new(test_config(), channel, store);

        let mut handle = watcher
            .watch("case_execution", "rec-1", "case-a")
            .await
            .unwrap();

        handle.cancel();
        handle.cancel();
        assert!(handle.next_event().await.is_none());
        assert_eq!(handle.case_id(), "case-a");
    }
}
