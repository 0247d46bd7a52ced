pub mod counter;
pub mod safe_zone;
pub mod slot;

pub use counter::{ClosedSlot, RecoveryOutcome, RecoverySummary, SlotMessageCounter};
pub use slot::Slot;
