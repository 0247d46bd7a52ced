//! Cluster slot coordinator seam.
//!
//! The counter only ever talks to the coordinator through [`SlotCoordinator`]:
//! closed slot ranges go out via [`SlotCoordinator::submit_slot_range`] and the
//! idle safe-zone heartbeat via [`SlotCoordinator::submit_safe_zone`].
//! Assignment of slots to consumers and leader election live on the other side.

pub mod memory;

pub use memory::{InMemoryCoordinator, Submission};

use async_trait::async_trait;
use thiserror::Error;

/// Failures surfaced by a coordinator round-trip.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// Transport or RPC failure; the caller logs and relies on the periodic task.
    #[error("slot coordinator unreachable: {0}")]
    Unreachable(String),
    /// The coordinator answered but refused the update.
    #[error("slot coordinator rejected update: {0}")]
    Rejected(String),
}

/// Remote slot coordinator, as seen from a publishing node.
#[async_trait]
pub trait SlotCoordinator: Send + Sync {
    /// Report a closed slot `[start_id, end_id]` for `queue` together with the
    /// node's local safe zone at close time.
    async fn submit_slot_range(
        &self,
        queue: &str,
        start_id: u64,
        end_id: u64,
        safe_zone: u64,
    ) -> Result<(), CoordinatorError>;

    /// Report the node's current safe zone without a slot range.
    async fn submit_safe_zone(&self, safe_zone: u64) -> Result<(), CoordinatorError>;
}
