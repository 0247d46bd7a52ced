//! Asynchronous message tracing to a rolling CSV file.
//!
//! Rows are `timestamp,message_id,destination,user,properties,status`; absent
//! optional fields are written as empty columns.
//!
//! Producers call [`MessageTracer::trace`], which never blocks: events go onto
//! a bounded channel and are dropped when it is full. A writer task drains the
//! channel into the trace file on a fixed delay, and a roller task moves the
//! file aside as `<stem>-<timestamp>.csv` so it never grows without bound.

use crate::config::TracerConfig;
use crate::scheduler::PeriodicTask;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv_async::AsyncWriterBuilder;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::sync::mpsc::{self, error::TrySendError};

const ROW_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const ROLLED_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S%.3f";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle point a traced message has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceStatus {
    Published,
    SlotRecorded,
    SlotSubmitted,
    Delivered,
    Acknowledged,
    Rejected,
    DeliveryRuleEvaluated,
    DeliveryLimitReached,
}

impl TraceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Published => "PUBLISHED",
            Self::SlotRecorded => "SLOT_RECORDED",
            Self::SlotSubmitted => "SLOT_SUBMITTED",
            Self::Delivered => "DELIVERED",
            Self::Acknowledged => "ACKNOWLEDGED",
            Self::Rejected => "REJECTED",
            Self::DeliveryRuleEvaluated => "DELIVERY_RULE_EVALUATED",
            Self::DeliveryLimitReached => "DELIVERY_LIMIT_REACHED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub timestamp: DateTime<Utc>,
    pub message_id: String,
    pub destination: Option<String>,
    pub user: Option<String>,
    pub properties: Option<String>,
    pub status: TraceStatus,
}

impl TraceEvent {
    pub fn new(message_id: impl Into<String>, status: TraceStatus) -> Self {
        Self {
            timestamp: Utc::now(),
            message_id: message_id.into(),
            destination: None,
            user: None,
            properties: None,
            status,
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_properties(mut self, properties: impl Into<String>) -> Self {
        self.properties = Some(properties.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Owns the receiving end and the trace file. The receiver mutex also
/// serializes writes against rolls.
struct TraceSink {
    path: PathBuf,
    receiver: tokio::sync::Mutex<mpsc::Receiver<TraceEvent>>,
}

impl TraceSink {
    async fn flush(&self) -> Result<usize> {
        let mut receiver = self.receiver.lock().await;
        let mut batch = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            batch.push(event);
        }
        if batch.is_empty() {
            return Ok(0);
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Couldn't open trace file {}", self.path.display()))?;

        let mut writer = AsyncWriterBuilder::new()
            .has_headers(false)
            .create_writer(file);
        for event in &batch {
            let timestamp = event.timestamp.format(ROW_TIMESTAMP_FORMAT).to_string();
            writer
                .write_record([
                    timestamp.as_str(),
                    event.message_id.as_str(),
                    event.destination.as_deref().unwrap_or_default(),
                    event.user.as_deref().unwrap_or_default(),
                    event.properties.as_deref().unwrap_or_default(),
                    event.status.as_str(),
                ])
                .await?;
        }
        writer.flush().await?;
        Ok(batch.len())
    }

    async fn roll(&self, now: DateTime<Utc>) -> Result<Option<PathBuf>> {
        let _receiver = self.receiver.lock().await;
        if !fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        let rolled = rolled_path(&self.path, now);
        fs::rename(&self.path, &rolled)
            .await
            .with_context(|| format!("Couldn't roll trace file to {}", rolled.display()))?;
        Ok(Some(rolled))
    }
}

fn rolled_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("msg");
    let name = format!("{stem}-{}.csv", now.format(ROLLED_TIMESTAMP_FORMAT));
    path.with_file_name(name)
}

pub struct MessageTracer {
    sender: mpsc::Sender<TraceEvent>,
    sink: Arc<TraceSink>,
    closed: AtomicBool,
    dropped: AtomicU64,
    tasks: parking_lot::Mutex<Vec<PeriodicTask>>,
}

impl MessageTracer {
    /// Build a tracer from config, or `None` when tracing is disabled.
    pub fn from_config(config: &TracerConfig, base_dir: &Path) -> Option<Arc<Self>> {
        if !config.enabled {
            return None;
        }
        let tracer = Arc::new(Self::new(
            config.resolve_path(base_dir),
            config.channel_capacity,
        ));
        tracer.start(
            Duration::from_secs(config.flush_interval_secs),
            Duration::from_secs(config.roll_interval_secs),
        );
        Some(tracer)
    }

    /// A tracer with no background tasks; call [`start`](Self::start) to
    /// schedule them or drive [`flush`](Self::flush) and [`roll`](Self::roll)
    /// directly.
    pub fn new(path: PathBuf, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            sink: Arc::new(TraceSink {
                path,
                receiver: tokio::sync::Mutex::new(receiver),
            }),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Schedule the writer and roller. Both fire immediately, then on their delays.
    pub fn start(&self, flush_interval: Duration, roll_interval: Duration) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let sink = Arc::downgrade(&self.sink);
        tasks.push(PeriodicTask::spawn(
            "trace-file-writer",
            Duration::ZERO,
            flush_interval,
            move || {
                let sink = sink.upgrade()?;
                Some(async move { sink.flush().await.map(|_| ()) })
            },
        ));

        let sink = Arc::downgrade(&self.sink);
        tasks.push(PeriodicTask::spawn(
            "trace-file-roller",
            Duration::ZERO,
            roll_interval,
            move || {
                let sink = sink.upgrade()?;
                Some(async move { sink.roll(Utc::now()).await.map(|_| ()) })
            },
        ));
    }

    /// Queue an event without blocking. Dropped when the buffer is full or the
    /// tracer has shut down.
    pub fn trace(&self, event: TraceEvent) {
        if self.closed.load(Ordering::SeqCst) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(message_id = %event.message_id, "Couldn't add trace event to queue");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.sink.path
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Write every queued event now. Returns the number written.
    pub async fn flush(&self) -> Result<usize> {
        self.sink.flush().await
    }

    /// Move the current trace file aside. Returns the rolled path, if a file existed.
    pub async fn roll(&self) -> Result<Option<PathBuf>> {
        self.sink.roll(Utc::now()).await
    }

    /// Stop the background tasks and write whatever is still queued.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let tasks: Vec<PeriodicTask> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.shutdown(SHUTDOWN_GRACE).await;
        }
        if let Err(e) = self.sink.flush().await {
            tracing::warn!("Couldn't write trace events during shutdown: {e:#}");
        }
    }
}
