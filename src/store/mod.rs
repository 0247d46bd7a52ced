//! Backing-store collaborators: the durable queue registry and store health
//! notifications.

pub mod health;

pub use health::{StoreHealthListener, StoreHealthMonitor};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store '{0}' is unavailable")]
    Unavailable(String),
    #[error("store query failed: {0}")]
    Query(String),
}

/// Durable registry of every queue known to the cluster.
#[async_trait]
pub trait QueueRegistry: Send + Sync {
    async fn list_queues(&self) -> Result<Vec<String>, StoreError>;
}

/// Fixed queue list, optionally failing every lookup.
#[derive(Debug, Default)]
pub struct InMemoryQueueRegistry {
    queues: Mutex<Vec<String>>,
    failure: Mutex<Option<StoreError>>,
}

impl InMemoryQueueRegistry {
    pub fn new<I, S>(queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queues: Mutex::new(queues.into_iter().map(Into::into).collect()),
            failure: Mutex::new(None),
        }
    }

    pub fn add_queue(&self, queue: impl Into<String>) {
        self.queues.lock().push(queue.into());
    }

    pub fn set_failure(&self, failure: Option<StoreError>) {
        *self.failure.lock() = failure;
    }
}

#[async_trait]
impl QueueRegistry for InMemoryQueueRegistry {
    async fn list_queues(&self) -> Result<Vec<String>, StoreError> {
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        Ok(self.queues.lock().clone())
    }
}
