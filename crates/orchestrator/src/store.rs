//! In-memory store of per-case execution state.
//!
//! Owned exclusively by one session controller. The store is a cache:
//! the backend execution record remains the durable source of truth, and
//! everything here must be rebuildable from it or safely discardable.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::model::{CaseExecutionState, Screenshot, TargetCase};

/// Displayable screenshot rehydrated from its persisted binary form.
///
/// Reconstruction is loss-free: identical bytes, identical file name.
/// Screenshots are evidentiary, so nothing may be recompressed or renamed
/// on the way back to the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotArtifact {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ScreenshotArtifact {
    fn from_screenshot(shot: &Screenshot) -> Self {
        Self {
            file_name: shot.file_name.clone(),
            mime_type: shot.mime_type.clone(),
            bytes: shot.content.clone(),
        }
    }

    /// Render as a `data:` URL for direct display.
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            STANDARD.encode(&self.bytes)
        )
    }
}

/// Everything needed to redisplay a previously executed case.
#[derive(Debug, Clone)]
pub struct RestoredCase {
    pub state: CaseExecutionState,
    pub artifacts: Vec<ScreenshotArtifact>,
}

/// Keyed store of [`CaseExecutionState`], ordered by the session's target
/// list.
pub struct CaseResultStore {
    order: Vec<String>,
    entries: HashMap<String, CaseExecutionState>,
}

impl CaseResultStore {
    /// Create an empty store scoped to the session's target cases.
    pub fn new(targets: &[TargetCase]) -> Self {
        Self {
            order: targets.iter().map(|t| t.case_id.clone()).collect(),
            entries: HashMap::new(),
        }
    }

    /// Record the state for a case, replacing any previous entry
    /// wholesale (screenshots included).
    pub fn put(&mut self, case_id: &str, state: CaseExecutionState) {
        self.entries.insert(case_id.to_string(), state);
    }

    pub fn get(&self, case_id: &str) -> Option<&CaseExecutionState> {
        self.entries.get(case_id)
    }

    /// Completed entries in target-case order.
    pub fn all_completed(&self) -> Vec<(&str, &CaseExecutionState)> {
        self.order
            .iter()
            .filter_map(|case_id| {
                self.entries
                    .get(case_id)
                    .filter(|state| state.completed)
                    .map(|state| (case_id.as_str(), state))
            })
            .collect()
    }

    pub fn completed_count(&self) -> usize {
        self.order
            .iter()
            .filter_map(|case_id| self.entries.get(case_id))
            .filter(|state| state.completed)
            .count()
    }

    /// Rebuild the display state for a revisited case, rehydrating
    /// screenshot artifacts from their stored bytes.
    pub fn restore(&self, case_id: &str) -> Option<RestoredCase> {
        let state = self.entries.get(case_id)?;
        let artifacts = state
            .details
            .as_ref()
            .map(|details| {
                details
                    .screenshots
                    .iter()
                    .map(ScreenshotArtifact::from_screenshot)
                    .collect()
            })
            .unwrap_or_default();

        Some(RestoredCase {
            state: state.clone(),
            artifacts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CaseExecutionDetails, CaseKind, CaseVerdict, StepCounters, StepResult, StepStatus,
    };
    use chrono::Utc;

    fn targets() -> Vec<TargetCase> {
        ["a", "b", "c"]
            .iter()
            .map(|id| TargetCase {
                case_id: id.to_string(),
                case_name: format!("Case {}", id.to_uppercase()),
                case_kind: CaseKind::Functional,
            })
            .collect()
    }

    fn details_with_screenshot(bytes: Vec<u8>) -> CaseExecutionDetails {
        let steps = vec![
            StepResult {
                step_index: 0,
                status: Some(StepStatus::Pass),
                note: "ok".to_string(),
            },
            StepResult {
                step_index: 1,
                status: None,
                note: String::new(),
            },
        ];
        CaseExecutionDetails {
            execution_record_id: "rec-1".to_string(),
            duration_ms: 1200,
            actual_result_text: "as expected".to_string(),
            comment_text: None,
            step_counters: StepCounters::from_steps(&steps),
            step_results: steps,
            screenshots: vec![Screenshot {
                file_name: "proof.png".to_string(),
                file_size: bytes.len() as u64,
                mime_type: "image/png".to_string(),
                content: bytes,
                uploaded_at: Utc::now(),
            }],
        }
    }

    #[test]
    fn test_all_completed_preserves_target_order() {
        let targets = targets();
        let mut store = CaseResultStore::new(&targets);

        // Complete out of order.
        store.put("c", CaseExecutionState::skipped());
        store.put("a", CaseExecutionState::automated(CaseVerdict::Pass));
        store.put("b", CaseExecutionState::default()); // visited, not completed

        let completed = store.all_completed();
        let ids: Vec<&str> = completed.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(store.completed_count(), 2);
    }

    #[test]
    fn test_restore_is_byte_identical() {
        let targets = targets();
        let mut store = CaseResultStore::new(&targets);
        let bytes = vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0xff];
        let details = details_with_screenshot(bytes.clone());
        store.put(
            "a",
            CaseExecutionState::submitted(CaseVerdict::Pass, details.clone()),
        );

        let restored = store.restore("a").unwrap();
        assert_eq!(restored.state.details.as_ref().unwrap(), &details);
        assert_eq!(restored.artifacts.len(), 1);
        assert_eq!(restored.artifacts[0].bytes, bytes);
        assert_eq!(restored.artifacts[0].file_name, "proof.png");

        let url = restored.artifacts[0].data_url();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_resubmission_replaces_entry_wholesale() {
        let targets = targets();
        let mut store = CaseResultStore::new(&targets);
        store.put(
            "a",
            CaseExecutionState::submitted(CaseVerdict::Fail, details_with_screenshot(vec![1])),
        );
        store.put(
            "a",
            CaseExecutionState::submitted(CaseVerdict::Pass, details_with_screenshot(vec![2, 3])),
        );

        let state = store.get("a").unwrap();
        assert_eq!(state.final_result, Some(CaseVerdict::Pass));
        let shots = &state.details.as_ref().unwrap().screenshots;
        assert_eq!(shots.len(), 1);
        assert_eq!(shots[0].content, vec![2, 3]);
        assert_eq!(store.all_completed().len(), 1);
    }

    #[test]
    fn test_restore_unknown_case_is_none() {
        let store = CaseResultStore::new(&targets());
        assert!(store.restore("a").is_none());
        assert!(store.get("zzz").is_none());
    }
}
