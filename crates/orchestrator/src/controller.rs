//! Session lifecycle orchestration.
//!
//! One controller instance owns one execution session end to end: it
//! creates the backend record, routes submissions and skips through the
//! store and aggregator, drives the navigator, arms completion watches
//! for automated cases, and closes the record on teardown.
//!
//! Ordering rule for every completion: recompute the snapshot with the
//! fresh payload, apply it locally, then persist. Local progress is never
//! rolled back when persistence fails; the next successful update carries
//! the full snapshot and catches the backend up.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::aggregator;
use crate::client::{CaseDetailService, CaseStatusSink, PlanExecutionStore};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::model::{
    CaseDefinition, CaseExecutionDetails, CaseExecutionState, CaseResultRecord, CaseVerdict,
    ExecutionKind, ExecutionSession, SessionCounters, SessionStatus, SessionUpdate, StepCounters,
    SubmittedResult, TargetCase,
};
use crate::navigator::CaseNavigator;
use crate::push::PushChannel;
use crate::store::{CaseResultStore, RestoredCase};
use crate::watcher::{CompletionWatcher, WatchEvent, WatchHandle};

/// Push-channel scope for case-execution completion messages.
pub const CASE_EXECUTION_SCOPE: &str = "case_execution";

/// External services a controller depends on.
pub struct Collaborators {
    pub case_details: Arc<dyn CaseDetailService>,
    pub persistence: Arc<dyn PlanExecutionStore>,
    pub case_status: Arc<dyn CaseStatusSink>,
    pub push: Arc<dyn PushChannel>,
}

/// Tracks cases with a submission currently being applied, so a second
/// submission for the same case is rejected instead of interleaved.
#[derive(Default)]
struct InFlightSet {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl InFlightSet {
    fn acquire(&self, case_id: &str) -> OrchestratorResult<InFlightGuard> {
        let mut held = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(case_id.to_string()) {
            return Err(OrchestratorError::SubmissionInFlight {
                case_id: case_id.to_string(),
            });
        }
        Ok(InFlightGuard {
            set: self.inner.clone(),
            case_id: case_id.to_string(),
        })
    }
}

/// Releases the in-flight slot on drop, error paths included.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    case_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut held = self.set.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.case_id);
    }
}

/// Orchestrates one plan execution session.
pub struct ExecutionSessionController {
    session: ExecutionSession,
    store: CaseResultStore,
    navigator: CaseNavigator,
    watcher: CompletionWatcher,
    persistence: Arc<dyn PlanExecutionStore>,
    case_status: Arc<dyn CaseStatusSink>,
    in_flight: InFlightSet,
    active_watch: Option<WatchHandle>,
    error_message: Option<String>,
    closed: bool,
}

impl ExecutionSessionController {
    /// Create the backend execution record and the session around it.
    ///
    /// If record creation fails, no session exists at all; the caller
    /// gets the persistence error and nothing to clean up.
    pub async fn start(
        plan_id: &str,
        executor_id: &str,
        kind: ExecutionKind,
        targets: Vec<TargetCase>,
        collaborators: Collaborators,
        config: OrchestratorConfig,
    ) -> OrchestratorResult<Self> {
        if targets.is_empty() {
            return Err(OrchestratorError::EmptyTargetSet);
        }

        let case_ids: Vec<String> = targets.iter().map(|t| t.case_id.clone()).collect();
        let session_id = collaborators
            .persistence
            .create(plan_id, executor_id, kind, &case_ids)
            .await?;

        tracing::info!(
            session_id = %session_id,
            plan_id = %plan_id,
            cases = targets.len(),
            "Execution session started"
        );

        let store = CaseResultStore::new(&targets);
        let navigator = CaseNavigator::new(targets.clone(), collaborators.case_details.clone());
        let watcher = CompletionWatcher::new(
            config,
            collaborators.push.clone(),
            collaborators.persistence.clone(),
        );

        let session = ExecutionSession {
            id: session_id,
            plan_id: plan_id.to_string(),
            executor_id: executor_id.to_string(),
            execution_kind: kind,
            status: SessionStatus::Running,
            target_cases: targets,
            progress_percent: 0,
            counters: SessionCounters::default(),
            results_snapshot: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
        };

        Ok(Self {
            session,
            store,
            navigator,
            watcher,
            persistence: collaborators.persistence,
            case_status: collaborators.case_status,
            in_flight: InFlightSet::default(),
            active_watch: None,
            error_message: None,
            closed: false,
        })
    }

    pub fn session(&self) -> &ExecutionSession {
        &self.session
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn current_case(&self) -> &TargetCase {
        self.navigator.current()
    }

    pub fn current_index(&self) -> usize {
        self.navigator.index()
    }

    /// Definition of the case under the cursor, fetched on first access
    /// and cached for the session.
    pub async fn current_detail(&mut self) -> OrchestratorResult<&CaseDefinition> {
        self.navigator.current_detail().await
    }

    /// Rebuild the display state of an already-executed case, screenshot
    /// artifacts included. `None` if the case was never visited.
    pub fn restore_case(&self, case_id: &str) -> Option<RestoredCase> {
        self.store.restore(case_id)
    }

    pub async fn next_case(&mut self) -> OrchestratorResult<bool> {
        self.navigator.next().await
    }

    pub async fn prev_case(&mut self) -> OrchestratorResult<bool> {
        self.navigator.prev().await
    }

    pub async fn jump_to(&mut self, index: usize) -> OrchestratorResult<bool> {
        self.navigator.jump_to(index).await
    }

    /// Record a manually submitted result for `case_id`.
    ///
    /// Validation failures mutate nothing. After validation the result is
    /// applied locally first; a persistence failure is returned to the
    /// caller but local progress stands, so a retry or the next update
    /// catches the backend up. Completing the last case finalizes the
    /// session.
    pub async fn submit_result(
        &mut self,
        case_id: &str,
        submitted: SubmittedResult,
    ) -> OrchestratorResult<()> {
        self.ensure_open()?;

        let target = self
            .session
            .target_cases
            .iter()
            .find(|t| t.case_id == case_id)
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::Validation(format!(
                    "case {} is not part of this session",
                    case_id
                ))
            })?;

        if submitted.actual_result_text.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "an actual-result description is required".to_string(),
            ));
        }

        let _guard = self.in_flight.acquire(case_id)?;

        let verdict = submitted.final_result;
        let details = CaseExecutionDetails {
            execution_record_id: Uuid::new_v4().to_string(),
            duration_ms: submitted.duration_ms,
            actual_result_text: submitted.actual_result_text,
            comment_text: submitted.comment_text,
            step_counters: StepCounters::from_steps(&submitted.step_results),
            step_results: submitted.step_results,
            screenshots: submitted.screenshots,
        };

        tracing::info!(case_id = %case_id, verdict = %verdict, "Recording submitted result");
        self.record_completion(&target, CaseExecutionState::submitted(verdict, details));
        self.roll_up_case_status(&target, verdict).await;

        let persisted = self.persist_session().await;
        self.advance_after_completion().await;
        persisted
    }

    /// Mark the case under the cursor as skipped and move on.
    ///
    /// Skipping never blocks the operator: a persistence failure is
    /// logged, local progress stands, and the call still succeeds.
    pub async fn skip_current(&mut self) -> OrchestratorResult<()> {
        self.ensure_open()?;

        let target = self.navigator.current().clone();
        tracing::info!(case_id = %target.case_id, "Skipping case");

        self.record_completion(&target, CaseExecutionState::skipped());
        self.roll_up_case_status(&target, CaseVerdict::Skip).await;

        if let Err(e) = self.persist_session().await {
            tracing::warn!(
                session_id = %self.session.id,
                error = %e,
                "Could not persist skip, local progress retained"
            );
        }
        self.advance_after_completion().await;
        Ok(())
    }

    /// Arm a completion watch for the case under the cursor, replacing
    /// any previously armed watch.
    pub async fn arm_watch(&mut self) -> OrchestratorResult<()> {
        self.ensure_open()?;
        let case_id = self.navigator.current().case_id.clone();
        let handle = self
            .watcher
            .watch(CASE_EXECUTION_SCOPE, &self.session.id, &case_id)
            .await?;
        if let Some(mut previous) = self.active_watch.replace(handle) {
            previous.cancel();
        }
        Ok(())
    }

    /// Next event from the armed watch; `None` when no watch is armed or
    /// the watch ended.
    pub async fn next_watch_event(&mut self) -> Option<WatchEvent> {
        let handle = self.active_watch.as_mut()?;
        let event = handle.next_event().await;
        if event.is_none() {
            self.active_watch = None;
        }
        event
    }

    /// Apply an automated completion for `case_id`.
    ///
    /// Idempotent: a case that already holds a terminal result ignores
    /// further resolutions, so duplicate push and poll deliveries cannot
    /// double-count.
    pub async fn resolve_automated(
        &mut self,
        case_id: &str,
        verdict: CaseVerdict,
    ) -> OrchestratorResult<()> {
        if self.is_case_completed(case_id) {
            tracing::debug!(case_id = %case_id, "Completion already recorded, ignoring duplicate");
            return Ok(());
        }
        self.ensure_open()?;

        let target = self
            .session
            .target_cases
            .iter()
            .find(|t| t.case_id == case_id)
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::Validation(format!(
                    "case {} is not part of this session",
                    case_id
                ))
            })?;

        tracing::info!(case_id = %case_id, verdict = %verdict, "Recording automated result");
        self.record_completion(&target, CaseExecutionState::automated(verdict));
        self.roll_up_case_status(&target, verdict).await;
        self.persist_session().await
    }

    /// Drive an automated session: watch each pending case in order and
    /// apply resolutions as they arrive.
    ///
    /// A watch that ends without resolution (poll budget exhausted)
    /// leaves its case incomplete and moves on. The session finalizes
    /// once the whole target set has been processed, resolved or not.
    pub async fn run_automated(&mut self) -> OrchestratorResult<()> {
        self.ensure_open()?;

        for index in 0..self.session.target_cases.len() {
            let case_id = self.session.target_cases[index].case_id.clone();
            if self.is_case_completed(&case_id) {
                continue;
            }

            self.navigator.jump_to(index).await?;
            self.arm_watch().await?;

            loop {
                match self.next_watch_event().await {
                    Some(WatchEvent::Resolved { verdict, source }) => {
                        tracing::info!(
                            case_id = %case_id,
                            verdict = %verdict,
                            ?source,
                            "Automated case resolved"
                        );
                        self.clear_watch();
                        self.resolve_automated(&case_id, verdict).await?;
                        break;
                    }
                    Some(WatchEvent::TimedOut) => {
                        tracing::info!(
                            case_id = %case_id,
                            "Automated case still running after timeout"
                        );
                    }
                    None => {
                        tracing::warn!(
                            case_id = %case_id,
                            "Watch ended without resolution, case left incomplete"
                        );
                        break;
                    }
                }
            }
        }

        if !self.closed {
            self.finalize_locally();
            self.persist_session().await?;
        }
        Ok(())
    }

    /// Cancel the session explicitly. Idempotent.
    ///
    /// A cancel before any case completed removes the backend record
    /// rather than leaving an empty cancelled run behind; with at least
    /// one completed case the record is kept, partial snapshot intact.
    pub async fn cancel(&mut self) -> OrchestratorResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.clear_watch();

        if self.store.completed_count() == 0 {
            tracing::info!(
                session_id = %self.session.id,
                "Cancelled before any case completed, removing execution record"
            );
            self.session.status = SessionStatus::Cancelled;
            return match self.persistence.delete(&self.session.id).await {
                Ok(()) | Err(OrchestratorError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            };
        }

        self.mark_finished(SessionStatus::Cancelled);
        tracing::info!(
            session_id = %self.session.id,
            completed = self.store.completed_count(),
            "Execution session cancelled"
        );

        match self.persist_session().await {
            Err(OrchestratorError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    /// Close the session after an unrecoverable orchestration error,
    /// unrelated to any single case verdict. The record is marked failed
    /// and carries the error message. Idempotent.
    pub async fn fail(&mut self, message: impl Into<String>) -> OrchestratorResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.clear_watch();
        self.error_message = Some(message.into());
        self.mark_finished(SessionStatus::Failed);

        tracing::error!(
            session_id = %self.session.id,
            error = self.error_message.as_deref().unwrap_or_default(),
            "Execution session failed"
        );

        match self.persist_session().await {
            Err(OrchestratorError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    /// Release the session on executor exit. Idempotent, and a no-op for
    /// a session that already completed or cancelled.
    ///
    /// A session torn down before any case completed leaves no trace: its
    /// backend record is deleted rather than kept as an empty cancelled
    /// run. With at least one completed case the record is closed as
    /// cancelled, partial snapshot intact. A record that is already gone
    /// counts as successfully released.
    pub async fn teardown(&mut self) -> OrchestratorResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.clear_watch();

        if self.store.completed_count() == 0 {
            tracing::info!(
                session_id = %self.session.id,
                "Removing execution record with no completed cases"
            );
            self.session.status = SessionStatus::Cancelled;
            return match self.persistence.delete(&self.session.id).await {
                Ok(()) | Err(OrchestratorError::NotFound(_)) => Ok(()),
                Err(e) => Err(e),
            };
        }

        self.mark_finished(SessionStatus::Cancelled);
        tracing::info!(
            session_id = %self.session.id,
            completed = self.store.completed_count(),
            "Closing session with partial results"
        );

        match self.persist_session().await {
            Err(OrchestratorError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    fn ensure_open(&self) -> OrchestratorResult<()> {
        if self.closed {
            return Err(OrchestratorError::SessionClosed(self.session.id.clone()));
        }
        Ok(())
    }

    fn is_case_completed(&self, case_id: &str) -> bool {
        self.store
            .get(case_id)
            .map(|state| state.completed)
            .unwrap_or(false)
    }

    /// Apply a terminal case state: recompute the snapshot with the fresh
    /// payload in place of any stale store entry, write the store, update
    /// session-level progress, and finalize if this was the last case.
    fn record_completion(&mut self, target: &TargetCase, state: CaseExecutionState) {
        let fresh = CaseResultRecord::from_state(target, &state);
        let snapshot = aggregator::build_snapshot(
            &self.session.target_cases,
            &self.store,
            fresh.as_ref().map(|record| (target.case_id.as_str(), record)),
        );
        let counters = aggregator::compute_counters(&snapshot);

        self.store.put(&target.case_id, state);
        self.session.progress_percent =
            aggregator::progress_percent(counters.completed, self.session.target_cases.len());
        self.session.counters = counters;
        self.session.results_snapshot = snapshot;

        if counters.completed == self.session.target_cases.len() {
            self.finalize_locally();
        }
    }

    /// Record the plan-level rollup. Independent of the snapshot; a
    /// failure here never fails the submission.
    async fn roll_up_case_status(&self, target: &TargetCase, verdict: CaseVerdict) {
        if let Err(e) = self
            .case_status
            .set_case_status(
                &self.session.plan_id,
                &target.case_id,
                target.case_kind,
                verdict,
            )
            .await
        {
            tracing::warn!(case_id = %target.case_id, error = %e, "Case-status rollup failed");
        }
    }

    async fn advance_after_completion(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.navigator.next().await {
            // The cursor moved; the definition will be refetched on access.
            tracing::warn!(error = %e, "Could not prefetch the next case definition");
        }
    }

    async fn persist_session(&self) -> OrchestratorResult<()> {
        let update = SessionUpdate {
            status: self.session.status,
            progress_percent: self.session.progress_percent,
            counters: self.session.counters,
            results_snapshot: self.session.results_snapshot.clone(),
            finished_at: self.session.finished_at,
            duration_ms: self.session.duration_ms,
            error_message: self.error_message.clone(),
        };
        self.persistence.update(&self.session.id, &update).await
    }

    fn finalize_locally(&mut self) {
        self.mark_finished(SessionStatus::Completed);
        self.closed = true;
        tracing::info!(
            session_id = %self.session.id,
            passed = self.session.counters.passed,
            failed = self.session.counters.failed,
            skipped = self.session.counters.skipped,
            blocked = self.session.counters.blocked,
            "Execution session completed"
        );
    }

    fn mark_finished(&mut self, status: SessionStatus) {
        let now = Utc::now();
        self.session.status = status;
        self.session.finished_at = Some(now);
        self.session.duration_ms = Some(elapsed_ms(self.session.started_at, now));
    }

    fn clear_watch(&mut self) {
        if let Some(mut watch) = self.active_watch.take() {
            watch.cancel();
        }
    }
}

fn elapsed_ms(started_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - started_at).num_milliseconds().max(0) as u64
}
