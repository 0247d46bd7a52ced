//! Safe-zone evaluation.
//!
//! The safe zone is the message id below which this node no longer holds any
//! open, unsubmitted range. Both evaluations only ever lower their starting
//! candidate, so the result can never overshoot an open slot's start.

use super::slot::Slot;

/// Safe zone at the moment `closing` is handed to the coordinator.
///
/// Starts from the closing slot's end and lowers it to the start of every
/// other slot still open on this node. `others` must not contain `closing`.
pub fn local_safe_zone<'a, I>(closing: &Slot, others: I) -> u64
where
    I: IntoIterator<Item = &'a Slot>,
{
    others
        .into_iter()
        .map(Slot::start_message_id)
        .fold(closing.end_message_id(), u64::min)
}

/// Safe zone for the idle heartbeat.
///
/// Starts from the last known safe zone and lowers it to the start of every
/// open slot that has not reached `window_size` yet. Full slots are about to be
/// closed by the ingestion path and are left out.
pub fn idle_safe_zone<'a, I>(current: u64, open: I, window_size: u64) -> u64
where
    I: IntoIterator<Item = &'a Slot>,
{
    open.into_iter()
        .filter(|slot| !slot.is_full(window_size))
        .map(Slot::start_message_id)
        .fold(current, u64::min)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(start: u64, end: u64) -> Slot {
        let mut slot = Slot::open(start);
        for id in start + 1..=end {
            slot.append(id);
        }
        slot
    }

    #[test]
    fn local_without_other_slots_is_closing_end() {
        assert_eq!(local_safe_zone(&slot(101, 103), std::iter::empty()), 103);
    }

    #[test]
    fn local_lowers_to_other_open_start() {
        let others = [slot(90, 95)];
        assert_eq!(local_safe_zone(&slot(101, 103), &others), 90);
    }

    #[test]
    fn local_ignores_later_open_slots() {
        let others = [slot(200, 210), slot(150, 151)];
        assert_eq!(local_safe_zone(&slot(101, 103), &others), 103);
    }

    #[test]
    fn local_is_bounded_by_every_open_start() {
        let others = [slot(90, 95), slot(50, 52), slot(300, 301)];
        let zone = local_safe_zone(&slot(101, 103), &others);
        assert_eq!(zone, 50);
        assert!(others.iter().all(|s| zone <= s.start_message_id()));
    }

    #[test]
    fn idle_without_open_slots_keeps_current() {
        assert_eq!(idle_safe_zone(500, std::iter::empty(), 10), 500);
    }

    #[test]
    fn idle_lowers_to_partial_slot_start() {
        let open = [slot(120, 121)];
        assert_eq!(idle_safe_zone(500, &open, 10), 120);
    }

    #[test]
    fn idle_skips_full_slots() {
        let open = [slot(100, 102), slot(400, 400)];
        assert_eq!(idle_safe_zone(500, &open, 3), 400);
    }

    #[test]
    fn idle_never_raises_current() {
        let open = [slot(900, 901)];
        assert_eq!(idle_safe_zone(500, &open, 10), 500);
    }
}
