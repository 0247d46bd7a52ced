//! In-process coordinator used by the `simulate` command and by tests.

use super::{CoordinatorError, SlotCoordinator};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// One call received by [`InMemoryCoordinator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    SlotRange {
        queue: String,
        start_id: u64,
        end_id: u64,
        safe_zone: u64,
    },
    SafeZone(u64),
}

/// Records every submission in arrival order.
///
/// Failure injection: [`set_unreachable`](Self::set_unreachable) fails every
/// call until cleared, [`fail_next`](Self::fail_next) fails the next `n` calls.
/// Failed calls are not recorded.
#[derive(Debug, Default)]
pub struct InMemoryCoordinator {
    submissions: Mutex<Vec<Submission>>,
    unreachable: AtomicBool,
    fail_budget: AtomicUsize,
}

impl InMemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn fail_next(&self, count: usize) {
        self.fail_budget.store(count, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    /// Slot range submissions only, as `(queue, start, end, safe_zone)`.
    pub fn slot_ranges(&self) -> Vec<(String, u64, u64, u64)> {
        self.submissions
            .lock()
            .iter()
            .filter_map(|submission| match submission {
                Submission::SlotRange {
                    queue,
                    start_id,
                    end_id,
                    safe_zone,
                } => Some((queue.clone(), *start_id, *end_id, *safe_zone)),
                Submission::SafeZone(_) => None,
            })
            .collect()
    }

    pub fn safe_zones(&self) -> Vec<u64> {
        self.submissions
            .lock()
            .iter()
            .filter_map(|submission| match submission {
                Submission::SafeZone(value) => Some(*value),
                Submission::SlotRange { .. } => None,
            })
            .collect()
    }

    fn check_reachable(&self) -> Result<(), CoordinatorError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(CoordinatorError::Unreachable(
                "coordinator marked unreachable".into(),
            ));
        }
        let consumed = self
            .fail_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok();
        if consumed {
            return Err(CoordinatorError::Unreachable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SlotCoordinator for InMemoryCoordinator {
    async fn submit_slot_range(
        &self,
        queue: &str,
        start_id: u64,
        end_id: u64,
        safe_zone: u64,
    ) -> Result<(), CoordinatorError> {
        self.check_reachable()?;
        self.submissions.lock().push(Submission::SlotRange {
            queue: queue.to_string(),
            start_id,
            end_id,
            safe_zone,
        });
        Ok(())
    }

    async fn submit_safe_zone(&self, safe_zone: u64) -> Result<(), CoordinatorError> {
        self.check_reachable()?;
        self.submissions.lock().push(Submission::SafeZone(safe_zone));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_submissions_in_order() {
        let coordinator = InMemoryCoordinator::new();
        coordinator.submit_slot_range("q1", 1, 5, 1).await.unwrap();
        coordinator.submit_safe_zone(3).await.unwrap();

        assert_eq!(
            coordinator.submissions(),
            vec![
                Submission::SlotRange {
                    queue: "q1".into(),
                    start_id: 1,
                    end_id: 5,
                    safe_zone: 1,
                },
                Submission::SafeZone(3),
            ]
        );
        assert_eq!(coordinator.slot_ranges().len(), 1);
        assert_eq!(coordinator.safe_zones(), vec![3]);
    }

    #[tokio::test]
    async fn unreachable_fails_without_recording() {
        let coordinator = InMemoryCoordinator::new();
        coordinator.set_unreachable(true);

        let err = coordinator.submit_safe_zone(1).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Unreachable(_)));
        assert!(coordinator.submissions().is_empty());

        coordinator.set_unreachable(false);
        assert!(coordinator.submit_safe_zone(1).await.is_ok());
    }

    #[tokio::test]
    async fn fail_next_consumes_budget() {
        let coordinator = InMemoryCoordinator::new();
        coordinator.fail_next(2);

        assert!(coordinator.submit_safe_zone(1).await.is_err());
        assert!(coordinator.submit_safe_zone(2).await.is_err());
        assert!(coordinator.submit_safe_zone(3).await.is_ok());
        assert_eq!(coordinator.safe_zones(), vec![3]);
    }
}
