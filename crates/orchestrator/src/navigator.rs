//! Cursor-based navigation over a session's target cases.
//!
//! The target list is fixed at session creation; the navigator only moves
//! a cursor over it. Every cursor move resolves the current case's
//! definition through the case-detail service, cached for the session's
//! lifetime so revisits never refetch unless explicitly invalidated.

use std::collections::HashMap;
use std::sync::Arc;

use crate::client::CaseDetailService;
use crate::error::OrchestratorResult;
use crate::model::{CaseDefinition, TargetCase};

pub struct CaseNavigator {
    targets: Vec<TargetCase>,
    cursor: usize,
    details: HashMap<String, CaseDefinition>,
    service: Arc<dyn CaseDetailService>,
}

impl CaseNavigator {
    /// Create a navigator positioned at the first target case. The caller
    /// guarantees a non-empty target list.
    pub fn new(targets: Vec<TargetCase>, service: Arc<dyn CaseDetailService>) -> Self {
        debug_assert!(!targets.is_empty());
        Self {
            targets,
            cursor: 0,
            details: HashMap::new(),
            service,
        }
    }

    pub fn current(&self) -> &TargetCase {
        &self.targets[self.cursor]
    }

    pub fn index(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn is_last(&self) -> bool {
        self.cursor + 1 == self.targets.len()
    }

    /// Advance to the next case. No-op at the last index; returns whether
    /// the cursor moved.
    pub async fn next(&mut self) -> OrchestratorResult<bool> {
        if self.is_last() {
            return Ok(false);
        }
        self.cursor += 1;
        self.ensure_detail().await?;
        Ok(true)
    }

    /// Move back one case. No-op at the first index.
    pub async fn prev(&mut self) -> OrchestratorResult<bool> {
        if self.cursor == 0 {
            return Ok(false);
        }
        self.cursor -= 1;
        self.ensure_detail().await?;
        Ok(true)
    }

    /// Jump to an arbitrary index. Out-of-range jumps are ignored.
    pub async fn jump_to(&mut self, index: usize) -> OrchestratorResult<bool> {
        if index >= self.targets.len() {
            return Ok(false);
        }
        self.cursor = index;
        self.ensure_detail().await?;
        Ok(true)
    }

    /// Definition of the case under the cursor, fetched on first access.
    pub async fn current_detail(&mut self) -> OrchestratorResult<&CaseDefinition> {
        self.ensure_detail().await?;
        let case_id = self.current().case_id.clone();
        Ok(&self.details[&case_id])
    }

    /// Drop the cached definition for one case so the next visit
    /// refetches it.
    pub fn invalidate(&mut self, case_id: &str) {
        self.details.remove(case_id);
    }

    async fn ensure_detail(&mut self) -> OrchestratorResult<()> {
        let case_id = self.current().case_id.clone();
        if self.details.contains_key(&case_id) {
            return Ok(());
        }
        let detail = self.service.get(&case_id).await?;
        self.details.insert(case_id, detail);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CaseKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDetailService {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl CaseDetailService for CountingDetailService {
        async fn get(&self, case_id: &str) -> OrchestratorResult<CaseDefinition> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(CaseDefinition {
                case_id: case_id.to_string(),
                name: format!("Case {}", case_id),
                preconditions: None,
                steps: vec![],
            })
        }
    }

    fn navigator() -> (CaseNavigator, Arc<CountingDetailService>) {
        let service = Arc::new(CountingDetailService {
            fetches: AtomicUsize::new(0),
        });
        let targets = ["a", "b", "c"]
            .iter()
            .map(|id| TargetCase {
                case_id: id.to_string(),
                case_name: id.to_uppercase(),
                case_kind: CaseKind::Functional,
            })
            .collect();
        (CaseNavigator::new(targets, service.clone()), service)
    }

    #[tokio::test]
    async fn test_bounds_are_no_ops() {
        let (mut nav, _) = navigator();
        assert!(!nav.prev().await.unwrap());
        assert_eq!(nav.index(), 0);

        assert!(nav.jump_to(2).await.unwrap());
        assert!(!nav.next().await.unwrap());
        assert_eq!(nav.index(), 2);

        assert!(!nav.jump_to(3).await.unwrap());
        assert_eq!(nav.index(), 2);
    }

    #[tokio::test]
    async fn test_revisits_hit_the_cache() {
        let (mut nav, service) = navigator();

        nav.current_detail().await.unwrap();
        nav.next().await.unwrap();
        nav.prev().await.unwrap();
        nav.next().await.unwrap();
        nav.current_detail().await.unwrap();

        // "a" and "b" fetched exactly once each.
        assert_eq!(service.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let (mut nav, service) = navigator();
        nav.current_detail().await.unwrap();
        nav.invalidate("a");
        nav.current_detail().await.unwrap();
        assert_eq!(service.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_detail_matches_cursor() {
        let (mut nav, _) = navigator();
        nav.jump_to(1).await.unwrap();
        let detail = nav.current_detail().await.unwrap();
        assert_eq!(detail.case_id, "b");
        assert_eq!(nav.current().case_id, "b");
        assert!(!nav.is_last());
        assert_eq!(nav.len(), 3);
    }
}
