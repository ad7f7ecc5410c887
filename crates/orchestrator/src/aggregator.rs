//! Snapshot and counter aggregation.
//!
//! After every mutation the controller recomputes the full snapshot from
//! current state rather than patching deltas. The walk is over the target
//! list in its original order, which makes the snapshot prefix-consistent
//! by construction: every entry is a completed case, order is preserved,
//! and nothing can appear twice.

use crate::model::{CaseResultRecord, SessionCounters, TargetCase};
use crate::store::CaseResultStore;

/// Build the canonical ordered snapshot.
///
/// `just_submitted` carries the freshly submitted record for the case
/// currently being persisted; it is used in place of any store entry for
/// that case, so the snapshot never depends on the store write having
/// landed first.
pub fn build_snapshot(
    targets: &[TargetCase],
    store: &CaseResultStore,
    just_submitted: Option<(&str, &CaseResultRecord)>,
) -> Vec<CaseResultRecord> {
    let mut snapshot = Vec::new();

    for target in targets {
        if let Some((case_id, record)) = just_submitted {
            if case_id == target.case_id {
                snapshot.push(record.clone());
                continue;
            }
        }
        if let Some(state) = store.get(&target.case_id) {
            if let Some(record) = CaseResultRecord::from_state(target, state) {
                snapshot.push(record);
            }
        }
    }

    snapshot
}

/// Recompute session counters from a snapshot.
pub fn compute_counters(snapshot: &[CaseResultRecord]) -> SessionCounters {
    let mut counters = SessionCounters::default();
    for record in snapshot {
        counters.record(record.verdict);
    }
    counters
}

/// Completed-over-total progress, round-half-up, clamped to [0, 100].
pub fn progress_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (completed as f64 / total as f64 * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}
