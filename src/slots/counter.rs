//! Per-queue slot accumulation.
//!
//! [`SlotMessageCounter`] owns one open [`Slot`] per queue and closes it when
//! it is full or has been open longer than the accumulation timeout. Closing
//! removes the slot from the table, computes the node's local safe zone and
//! submits the range to the coordinator. A failed submission is logged and the
//! range is not resubmitted.
//!
//! Ingestion for a given queue must come from a single producer with strictly
//! increasing ids. Different queues may be recorded concurrently.

use super::safe_zone;
use super::slot::Slot;
use crate::config::SlotConfig;
use crate::coordinator::{CoordinatorError, SlotCoordinator};
use crate::scheduler::PeriodicTask;
use crate::store::{QueueRegistry, StoreError, StoreHealthListener, StoreHealthMonitor};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

const TIMEOUT_TASK_NAME: &str = "slot-submit-timeout";

#[derive(Debug, Clone, Copy)]
struct OpenSlot {
    slot: Slot,
    opened_at: Instant,
}

impl OpenSlot {
    fn timed_out(&self, config: &SlotConfig, now: Instant) -> bool {
        now.saturating_duration_since(self.opened_at) >= config.accumulation_timeout()
    }

    fn is_due(&self, config: &SlotConfig, now: Instant) -> bool {
        self.slot.is_full(config.window_size) || self.timed_out(config, now)
    }
}

/// A slot that was removed from the table and handed to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedSlot {
    pub slot: Slot,
    pub safe_zone: u64,
}

/// Result of a [`SlotMessageCounter::recover`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The backing store is offline; nothing was submitted.
    Skipped,
    /// The queue registry could not be read; nothing was submitted.
    RegistryFailed(StoreError),
    Completed(RecoverySummary),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverySummary {
    pub submitted: usize,
    /// Queues whose submission failed. Their seed ids are still consumed.
    pub failed: Vec<String>,
    /// First id not handed to any queue.
    pub next_seed: u64,
}

pub struct SlotMessageCounter {
    config: SlotConfig,
    coordinator: Arc<dyn SlotCoordinator>,
    registry: Arc<dyn QueueRegistry>,
    open_slots: DashMap<String, OpenSlot>,
    /// Serializes close-and-submit between the ingestion and timeout paths.
    close_lock: tokio::sync::Mutex<()>,
    safe_zone: AtomicU64,
    stores_unavailable: AtomicBool,
    timeout_task: parking_lot::Mutex<Option<PeriodicTask>>,
}

impl SlotMessageCounter {
    /// Build a counter and register it for store health notifications.
    pub fn new(
        config: SlotConfig,
        coordinator: Arc<dyn SlotCoordinator>,
        registry: Arc<dyn QueueRegistry>,
        health: &StoreHealthMonitor,
    ) -> Arc<Self> {
        let counter = Arc::new(Self {
            config,
            coordinator,
            registry,
            open_slots: DashMap::new(),
            close_lock: tokio::sync::Mutex::new(()),
            safe_zone: AtomicU64::new(0),
            stores_unavailable: AtomicBool::new(false),
            timeout_task: parking_lot::Mutex::new(None),
        });
        health.register(Arc::clone(&counter) as Arc<dyn StoreHealthListener>);
        counter
    }

    // ── Ingestion ───────────────────────────────────────────────

    /// Count `message_id` into the open slot for `queue`, closing the slot
    /// once it reaches the window size. Coordinator failures are logged only.
    pub async fn record(&self, queue: &str, message_id: u64) {
        if !self.append(queue, message_id) {
            return;
        }
        if let Err(e) = self.close_if_due(queue).await {
            tracing::error!(
                queue,
                "Error occurred while submitting full slot to the coordinator: {e}"
            );
        }
    }

    /// Record every `(queue, message_id)` pair in order.
    pub async fn record_batch<I, Q>(&self, messages: I)
    where
        I: IntoIterator<Item = (Q, u64)>,
        Q: AsRef<str>,
    {
        for (queue, message_id) in messages {
            self.record(queue.as_ref(), message_id).await;
        }
    }

    /// Returns whether the slot is now full.
    fn append(&self, queue: &str, message_id: u64) -> bool {
        let window_size = self.config.window_size;

        if let Some(mut open) = self.open_slots.get_mut(queue) {
            if !open.slot.append(message_id) {
                tracing::warn!(
                    queue,
                    message_id,
                    end = open.slot.end_message_id(),
                    "Message id does not advance the open slot"
                );
            }
            return open.slot.is_full(window_size);
        }

        match self.open_slots.entry(queue.to_string()) {
            Entry::Occupied(mut occupied) => {
                let open = occupied.get_mut();
                open.slot.append(message_id);
                open.slot.is_full(window_size)
            }
            Entry::Vacant(vacant) => {
                let slot = Slot::open(message_id);
                vacant.insert(OpenSlot {
                    slot,
                    opened_at: Instant::now(),
                });
                slot.is_full(window_size)
            }
        }
    }

    // ── Closing ─────────────────────────────────────────────────

    /// Close the slot for `queue` if it is full or timed out. Returns
    /// `Ok(None)` when there is no open slot or neither trigger holds.
    pub async fn close_if_due(
        &self,
        queue: &str,
    ) -> Result<Option<ClosedSlot>, CoordinatorError> {
        self.close(queue, false).await
    }

    /// Close the slot for `queue` regardless of size or age.
    pub async fn force_close(&self, queue: &str) -> Result<Option<ClosedSlot>, CoordinatorError> {
        self.close(queue, true).await
    }

    async fn close(
        &self,
        queue: &str,
        force: bool,
    ) -> Result<Option<ClosedSlot>, CoordinatorError> {
        let _guard = self.close_lock.lock().await;

        // Re-check under the lock: a racing caller may already have closed it.
        let now = Instant::now();
        let Some((queue, open)) = self
            .open_slots
            .remove_if(queue, |_, open| force || open.is_due(&self.config, now))
        else {
            return Ok(None);
        };

        let others: Vec<Slot> = self.open_slots.iter().map(|entry| entry.slot).collect();
        let safe_zone = safe_zone::local_safe_zone(&open.slot, &others);
        let slot = open.slot;

        self.coordinator
            .submit_slot_range(
                &queue,
                slot.start_message_id(),
                slot.end_message_id(),
                safe_zone,
            )
            .await?;

        tracing::debug!(
            queue = %queue,
            start = slot.start_message_id(),
            end = slot.end_message_id(),
            count = slot.message_count(),
            safe_zone,
            "Slot submitted to coordinator"
        );
        Ok(Some(ClosedSlot { slot, safe_zone }))
    }

    // ── Periodic task ───────────────────────────────────────────

    /// One firing of the periodic task: close timed-out slots, or push the
    /// idle safe zone when nothing is open.
    pub async fn run_timeout_tick(&self) {
        if self.open_slots.is_empty() {
            if let Err(e) = self.advance_idle_safe_zone().await {
                tracing::error!("Error while sending slot deletion safe zone update: {e}");
            }
            return;
        }

        let now = Instant::now();
        let timed_out: Vec<String> = self
            .open_slots
            .iter()
            .filter(|entry| entry.timed_out(&self.config, now))
            .map(|entry| entry.key().clone())
            .collect();

        for queue in timed_out {
            if let Err(e) = self.close_if_due(&queue).await {
                tracing::error!(
                    queue = %queue,
                    "Error occurred while submitting timed-out slot to the coordinator: {e}"
                );
            }
        }
    }

    /// Submit the current safe zone, lowered to the start of any open slot
    /// that is not yet full, and store it once the coordinator accepts it.
    pub async fn advance_idle_safe_zone(&self) -> Result<u64, CoordinatorError> {
        let current = self.current_safe_zone();
        let open: Vec<Slot> = self.open_slots.iter().map(|entry| entry.slot).collect();
        let evaluated = safe_zone::idle_safe_zone(current, &open, self.config.window_size);

        tracing::debug!(safe_zone = evaluated, "Updating coordinator with local safe zone");
        self.coordinator.submit_safe_zone(evaluated).await?;
        self.safe_zone.store(evaluated, Ordering::SeqCst);
        Ok(evaluated)
    }

    /// Start the periodic timeout task. Returns `false` if it is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = self.timeout_task.lock();
        if task.is_some() {
            return false;
        }

        let counter = Arc::downgrade(self);
        *task = Some(PeriodicTask::spawn(
            TIMEOUT_TASK_NAME,
            self.config.initial_delay(),
            self.config.submit_timeout(),
            move || {
                let counter = counter.upgrade()?;
                Some(async move {
                    counter.run_timeout_tick().await;
                    Ok(())
                })
            },
        ));
        tracing::info!(
            initial_delay_ms = u64::try_from(self.config.initial_delay().as_millis())
                .unwrap_or(u64::MAX),
            delay_ms = self.config.submit_timeout_ms,
            "Slot timeout task scheduled"
        );
        true
    }

    pub fn is_running(&self) -> bool {
        self.timeout_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop the periodic task. Open slots are not flushed; the next recovery
    /// run re-anchors their queues.
    pub async fn shutdown(&self) {
        let task = self.timeout_task.lock().take();
        if let Some(task) = task {
            tracing::info!(
                open_slots = self.open_slots.len(),
                "Stopping slot timeout task executor"
            );
            task.shutdown(self.config.shutdown_grace()).await;
        }
    }

    // ── Safe zone ───────────────────────────────────────────────

    pub fn current_safe_zone(&self) -> u64 {
        self.safe_zone.load(Ordering::SeqCst)
    }

    /// Store a safe zone handed down by the coordinator.
    pub fn update_safe_zone(&self, safe_zone: u64) {
        self.safe_zone.store(safe_zone, Ordering::SeqCst);
    }

    // ── Recovery ────────────────────────────────────────────────

    /// Anchor every known queue at a fresh, distinct id after failover:
    /// queue `i` gets the degenerate range `[seed + i, seed + i]`.
    pub async fn recover(&self, seed: u64) -> RecoveryOutcome {
        if !self.stores_available() {
            tracing::info!(
                seed,
                "Message stores unavailable; skipping publisher slot recovery"
            );
            return RecoveryOutcome::Skipped;
        }

        tracing::info!(seed, "Starting publisher slot recovery event");
        let queues = match self.registry.list_queues().await {
            Ok(queues) => queues,
            Err(e) => {
                tracing::error!("Error occurred while listing queues for slot recovery: {e}");
                return RecoveryOutcome::RegistryFailed(e);
            }
        };

        let safe_zone = self.current_safe_zone();
        let mut next_seed = seed;
        let mut submitted = 0;
        let mut failed = Vec::new();

        for queue in queues {
            match self
                .coordinator
                .submit_slot_range(&queue, next_seed, next_seed, safe_zone)
                .await
            {
                Ok(()) => {
                    submitted += 1;
                    tracing::info!(
                        queue = %queue,
                        message_id = next_seed,
                        "Moved last published message id of queue"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        queue = %queue,
                        message_id = next_seed,
                        "Recovery slot submit failed: {e}"
                    );
                    failed.push(queue);
                }
            }
            // Two queues may never share a last-message id on the coordinator.
            next_seed = next_seed.saturating_add(1);
        }

        tracing::info!(
            submitted,
            failed = failed.len(),
            next_seed,
            "Publisher slot recovery event completed"
        );
        RecoveryOutcome::Completed(RecoverySummary {
            submitted,
            failed,
            next_seed,
        })
    }

    pub fn stores_available(&self) -> bool {
        !self.stores_unavailable.load(Ordering::SeqCst)
    }

    // ── Introspection ───────────────────────────────────────────

    pub fn open_slot(&self, queue: &str) -> Option<Slot> {
        self.open_slots.get(queue).map(|entry| entry.slot)
    }

    /// Snapshot of every open slot, sorted by queue name.
    pub fn open_slots(&self) -> Vec<(String, Slot)> {
        let mut slots: Vec<(String, Slot)> = self
            .open_slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.slot))
            .collect();
        slots.sort_by(|a, b| a.0.cmp(&b.0));
        slots
    }

    pub fn open_slot_count(&self) -> usize {
        self.open_slots.len()
    }
}

impl StoreHealthListener for SlotMessageCounter {
    fn store_non_operational(&self, store: &str, error: &str) {
        tracing::info!(
            store,
            error,
            "Message store became non-operational. Slot message counter paused."
        );
        self.stores_unavailable.store(true, Ordering::SeqCst);
    }

    fn store_operational(&self, store: &str) {
        tracing::info!(
            store,
            "Message store became operational. Slot message counter resumed."
        );
        self.stores_unavailable.store(false, Ordering::SeqCst);
    }
}
