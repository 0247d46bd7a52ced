//! Store health publishing.
//!
//! A storage-health monitor owns a [`StoreHealthMonitor`] and reports
//! operational/non-operational transitions per store. Registered listeners
//! are notified only when a store's state actually changes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Receives backing-store availability transitions.
pub trait StoreHealthListener: Send + Sync {
    fn store_non_operational(&self, store: &str, error: &str);
    fn store_operational(&self, store: &str);
}

/// Last reported health of one store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreHealthState {
    pub operational: bool,
    pub last_error: Option<String>,
    pub transitions: u32,
}

/// Thread-safe store health publisher.
#[derive(Default)]
pub struct StoreHealthMonitor {
    listeners: Mutex<Vec<Arc<dyn StoreHealthListener>>>,
    states: Mutex<HashMap<String, StoreHealthState>>,
}

impl StoreHealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn StoreHealthListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Report that `store` failed. Listeners hear about it on the first
    /// failure after an operational period; repeats only refresh `last_error`.
    pub fn report_failure(&self, store: &str, error: &str) {
        let mut states = self.states.lock();
        let state = states
            .entry(store.to_string())
            .or_insert_with(|| StoreHealthState {
                operational: true,
                ..StoreHealthState::default()
            });
        state.last_error = Some(error.to_string());
        if !state.operational {
            return;
        }
        state.operational = false;
        state.transitions += 1;
        drop(states);

        tracing::warn!(store, error, "Store became non-operational");
        for listener in self.listeners_snapshot() {
            listener.store_non_operational(store, error);
        }
    }

    /// Report that `store` is healthy. Stores never seen before are assumed
    /// operational and produce no notification.
    pub fn report_recovered(&self, store: &str) {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(store) else {
            return;
        };
        if state.operational {
            return;
        }
        state.operational = true;
        state.last_error = None;
        state.transitions += 1;
        drop(states);

        tracing::info!(store, "Store became operational");
        for listener in self.listeners_snapshot() {
            listener.store_operational(store);
        }
    }

    pub fn get_state(&self, store: &str) -> StoreHealthState {
        self.states
            .lock()
            .get(store)
            .cloned()
            .unwrap_or(StoreHealthState {
                operational: true,
                ..StoreHealthState::default()
            })
    }

    // Listeners run outside the lock so they may call back into the monitor.
    fn listeners_snapshot(&self) -> Vec<Arc<dyn StoreHealthListener>> {
        self.listeners.lock().clone()
    }
}
