//! Fixed-delay background tasks.
//!
//! Each firing runs inside a catch-all boundary: an error or a panic in one
//! tick is logged and the next tick is still scheduled. The task stops when
//! cancelled or when its tick factory returns `None` (owner dropped).

use anyhow::Result;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct PeriodicTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn a task that first fires after `initial_delay`, then waits `delay`
    /// after each firing completes before firing again.
    pub fn spawn<F, Fut>(
        name: &'static str,
        initial_delay: Duration,
        delay: Duration,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Option<Fut> + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => return,
                () = tokio::time::sleep(initial_delay) => {}
            }

            loop {
                let Some(firing) = tick() else {
                    tracing::debug!(task = name, "Periodic task owner dropped; stopping");
                    break;
                };

                match AssertUnwindSafe(firing).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::error!(task = name, "Error occurred while executing periodic task: {e:#}");
                    }
                    Err(panic) => {
                        tracing::error!(
                            task = name,
                            panic = panic_message(panic.as_ref()),
                            "Periodic task panicked; continuing"
                        );
                    }
                }

                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        });

        Self {
            name,
            cancel,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop scheduling new firings and wait up to `grace` for an in-flight
    /// firing to finish. The task is aborted if it overruns.
    pub async fn shutdown(mut self, grace: Duration) {
        self.cancel.cancel();
        match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(Ok(())) => tracing::debug!(task = self.name, "Periodic task stopped"),
            Ok(Err(e)) => tracing::warn!(task = self.name, "Periodic task ended abnormally: {e}"),
            Err(_) => {
                tracing::warn!(
                    task = self.name,
                    grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                    "Periodic task did not stop in time; aborting"
                );
                self.handle.abort();
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
