//! Data model for plan execution sessions.
//!
//! Everything the orchestrator persists or exchanges with its
//! collaborators lives here: session and case state, verdicts, step
//! results, screenshot artifacts, and the snapshot DTOs sent to the
//! backend execution record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a session executes its target cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    /// A human executes each case and submits results by hand.
    Functional,
    /// An external engine executes cases; completion arrives out of band.
    Automated,
}

/// Kind of an individual target case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseKind {
    Functional,
    Automated,
}

/// Lifecycle state of an execution session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session accepts submit/skip/navigate operations.
    Running,
    /// Every target case reached a terminal result.
    Completed,
    /// Unrecoverable orchestration error, unrelated to any single verdict.
    Failed,
    /// Explicit cancellation mid-session.
    Cancelled,
}

impl SessionStatus {
    /// Whether the status ends the session's active lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal verdict for a single case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseVerdict {
    Pass,
    Fail,
    Block,
    Skip,
}

impl std::fmt::Display for CaseVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::Block => write!(f, "block"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

/// Status of one executed case step. An unanswered step is `None` at the
/// [`StepResult`] level, not a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pass,
    Fail,
    Block,
}

/// Recorded outcome of a single case step, preserved verbatim so a
/// revisited case restores exactly what was entered, unanswered steps
/// included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,
    pub status: Option<StepStatus>,
    #[serde(default)]
    pub note: String,
}

/// Screenshot evidence attached to a case result.
///
/// Content is immutable once stored for a given case and replaced
/// wholesale when the case is resubmitted. On the wire the bytes travel
/// base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screenshot {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    pub uploaded_at: DateTime<Utc>,
}

/// Serde helper: screenshot bytes as base64 strings in JSON.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// One case in a session's fixed, ordered target set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetCase {
    pub case_id: String,
    pub case_name: String,
    pub case_kind: CaseKind,
}

/// Per-step tallies derived once at submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounters {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub blocked: usize,
}

impl StepCounters {
    /// Tally a recorded step list. Unanswered steps count only in `total`.
    pub fn from_steps(steps: &[StepResult]) -> Self {
        let mut counters = Self {
            total: steps.len(),
            ..Self::default()
        };
        for step in steps {
            match step.status {
                Some(StepStatus::Pass) => counters.passed += 1,
                Some(StepStatus::Fail) => counters.failed += 1,
                Some(StepStatus::Block) => counters.blocked += 1,
                None => {}
            }
        }
        counters
    }
}

/// Everything recorded alongside a functional case's verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseExecutionDetails {
    /// Client-generated id tying the submission to its backend record.
    pub execution_record_id: String,
    pub duration_ms: u64,
    pub actual_result_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_text: Option<String>,
    pub step_results: Vec<StepResult>,
    pub screenshots: Vec<Screenshot>,
    pub step_counters: StepCounters,
}

/// In-memory execution state of one target case.
///
/// Invariant: `completed` implies a verdict is set; functional
/// completions carry details, automated completions may be verdict-only.
/// `recorded_at` is fixed at completion, so snapshot rebuilds never
/// re-stamp an earlier result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseExecutionState {
    pub final_result: Option<CaseVerdict>,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<CaseExecutionDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl CaseExecutionState {
    /// State for an explicitly submitted functional result.
    pub fn submitted(verdict: CaseVerdict, details: CaseExecutionDetails) -> Self {
        Self {
            final_result: Some(verdict),
            completed: true,
            details: Some(details),
            recorded_at: Some(Utc::now()),
        }
    }

    /// State for a skipped case: terminal, no details.
    pub fn skipped() -> Self {
        Self {
            final_result: Some(CaseVerdict::Skip),
            completed: true,
            details: None,
            recorded_at: Some(Utc::now()),
        }
    }

    /// Minimal state for an automated completion: verdict only.
    pub fn automated(verdict: CaseVerdict) -> Self {
        Self {
            final_result: Some(verdict),
            completed: true,
            details: None,
            recorded_at: Some(Utc::now()),
        }
    }
}

/// Session-wide verdict tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub completed: usize,
    pub passed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub skipped: usize,
}

impl SessionCounters {
    pub fn record(&mut self, verdict: CaseVerdict) {
        self.completed += 1;
        match verdict {
            CaseVerdict::Pass => self.passed += 1,
            CaseVerdict::Fail => self.failed += 1,
            CaseVerdict::Block => self.blocked += 1,
            CaseVerdict::Skip => self.skipped += 1,
        }
    }
}

/// Result payload carried by a snapshot entry.
///
/// The shape is decided once at ingestion: automated completions are
/// `simplified` (verdict only), functional submissions are `detailed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultDetail {
    Simplified,
    Detailed {
        execution_record_id: String,
        duration_ms: u64,
        actual_result_text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        comment_text: Option<String>,
        step_results: Vec<StepResult>,
        screenshots: Vec<Screenshot>,
        step_counters: StepCounters,
    },
}

/// One entry of the persisted results snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResultRecord {
    pub case_id: String,
    pub case_name: String,
    pub verdict: CaseVerdict,
    #[serde(flatten)]
    pub detail: ResultDetail,
    pub recorded_at: DateTime<Utc>,
}

impl CaseResultRecord {
    /// Build a snapshot entry from a completed case state. Returns `None`
    /// while the case has no explicitly submitted terminal result.
    pub fn from_state(target: &TargetCase, state: &CaseExecutionState) -> Option<Self> {
        if !state.completed {
            return None;
        }
        let verdict = state.final_result?;
        let detail = match &state.details {
            Some(details) => ResultDetail::Detailed {
                execution_record_id: details.execution_record_id.clone(),
                duration_ms: details.duration_ms,
                actual_result_text: details.actual_result_text.clone(),
                comment_text: details.comment_text.clone(),
                step_results: details.step_results.clone(),
                screenshots: details.screenshots.clone(),
                step_counters: details.step_counters,
            },
            None => ResultDetail::Simplified,
        };
        Some(Self {
            case_id: target.case_id.clone(),
            case_name: target.case_name.clone(),
            verdict,
            detail,
            recorded_at: state.recorded_at.unwrap_or_else(Utc::now),
        })
    }
}

/// Full update DTO for the backend execution record.
///
/// Always carries the complete snapshot, never a delta, so updates are
/// idempotent and order-insensitive at the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub status: SessionStatus,
    pub progress_percent: u8,
    pub counters: SessionCounters,
    pub results_snapshot: Vec<CaseResultRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Authoritative status of a backend execution record, as reported by the
/// reconciliation poll. `result` is present when the backend already knows
/// the case verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CaseVerdict>,
}

/// The execution session owned by one controller instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSession {
    pub id: String,
    pub plan_id: String,
    pub executor_id: String,
    pub execution_kind: ExecutionKind,
    pub status: SessionStatus,
    /// Fixed at creation, never mutated afterwards.
    pub target_cases: Vec<TargetCase>,
    pub progress_percent: u8,
    pub counters: SessionCounters,
    pub results_snapshot: Vec<CaseResultRecord>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// A result as submitted by the functional-case executor UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedResult {
    pub final_result: CaseVerdict,
    pub actual_result_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_text: Option<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    #[serde(default)]
    pub screenshots: Vec<Screenshot>,
}

/// One step of a case definition as served by the case-detail service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseStepDefinition {
    pub index: usize,
    pub action: String,
    pub expected: String,
}

/// Case definition fetched from the external case-detail service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseDefinition {
    pub case_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preconditions: Option<String>,
    #[serde(default)]
    pub steps: Vec<CaseStepDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_status_display_and_terminal() {
        assert_eq!(SessionStatus::Running.to_string(), "running");
        assert_eq!(SessionStatus::Cancelled.to_string(), "cancelled");
        assert!(!SessionStatus::Running.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_step_counters_from_steps() {
        let steps = vec![
            StepResult {
                step_index: 0,
                status: Some(StepStatus::Pass),
                note: String::new(),
            },
            StepResult {
                step_index: 1,
                status: Some(StepStatus::Fail),
                note: "glitch".to_string(),
            },
            StepResult {
                step_index: 2,
                status: None,
                note: String::new(),
            },
        ];

        let counters = StepCounters::from_steps(&steps);
        assert_eq!(counters.total, 3);
        assert_eq!(counters.passed, 1);
        assert_eq!(counters.failed, 1);
        assert_eq!(counters.blocked, 0);
    }

    #[test]
    fn test_screenshot_base64_round_trip() {
        let shot = Screenshot {
            file_name: "evidence.png".to_string(),
            file_size: 4,
            mime_type: "image/png".to_string(),
            content: vec![0x89, 0x50, 0x4e, 0x47],
            uploaded_at: Utc::now(),
        };

        let json = serde_json::to_string(&shot).unwrap();
        assert!(json.contains("iVBORw==")); // base64 of the PNG magic

        let parsed: Screenshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.content, shot.content);
        assert_eq!(parsed.file_name, shot.file_name);
    }

    #[test]
    fn test_result_detail_tagging() {
        let record = CaseResultRecord {
            case_id: "c-1".to_string(),
            case_name: "Login works".to_string(),
            verdict: CaseVerdict::Pass,
            detail: ResultDetail::Simplified,
            recorded_at: Utc::now(),
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"kind\":\"simplified\""));
        assert!(json.contains("\"verdict\":\"pass\""));
    }

    #[test]
    fn test_record_from_incomplete_state_is_none() {
        let target = TargetCase {
            case_id: "c-1".to_string(),
            case_name: "Login works".to_string(),
            case_kind: CaseKind::Functional,
        };
        assert!(CaseResultRecord::from_state(&target, &CaseExecutionState::default()).is_none());

        let record =
            CaseResultRecord::from_state(&target, &CaseExecutionState::skipped()).unwrap();
        assert_eq!(record.verdict, CaseVerdict::Skip);
        assert_eq!(record.detail, ResultDetail::Simplified);
    }

    #[test]
    fn test_recorded_at_is_stable_across_rebuilds() {
        let target = TargetCase {
            case_id: "c-1".to_string(),
            case_name: "Login works".to_string(),
            case_kind: CaseKind::Functional,
        };
        let state = CaseExecutionState::automated(CaseVerdict::Pass);

        let first = CaseResultRecord::from_state(&target, &state).unwrap();
        let second = CaseResultRecord::from_state(&target, &state).unwrap();
        assert_eq!(first.recorded_at, second.recorded_at);
        assert_eq!(Some(first.recorded_at), state.recorded_at);
    }

    #[test]
    fn test_session_counters_record() {
        let mut counters = SessionCounters::default();
        counters.record(CaseVerdict::Pass);
        counters.record(CaseVerdict::Skip);
        counters.record(CaseVerdict::Fail);
        assert_eq!(counters.completed, 3);
        assert_eq!(counters.passed, 1);
        assert_eq!(counters.skipped, 1);
        assert_eq!(counters.failed, 1);
        assert_eq!(counters.blocked, 0);
    }
}
