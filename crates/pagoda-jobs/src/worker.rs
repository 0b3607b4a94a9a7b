//! Ingestion worker pool.
//!
//! Parallel consumers over the ingest queue: each loop iteration claims up
//! to `max_concurrent` tasks and processes them concurrently. The queue's
//! SKIP LOCKED claim guarantees a task is handled by exactly one worker at
//! a time; failures are reported back so the queue redelivers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use pagoda_core::defaults::{WORKER_MAX_CONCURRENT, WORKER_POLL_INTERVAL_MS};
use pagoda_core::{Error, IngestQueue, IngestTask};
use pagoda_db::PgIngestQueue;

use crate::handler::IngestHandler;

/// Configuration for the ingestion worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds when the queue is empty.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrently processed tasks.
    pub max_concurrent: usize,
    /// Whether to process tasks at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: WORKER_POLL_INTERVAL_MS,
            max_concurrent: WORKER_MAX_CONCURRENT,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_ENABLED` | `true` | Enable/disable task processing |
    /// | `WORKER_MAX_CONCURRENT` | `4` | Max concurrent tasks |
    /// | `WORKER_POLL_INTERVAL_MS` | `500` | Polling interval when idle |
    pub fn from_env() -> Self {
        let enabled = std::env::var("WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent = std::env::var("WORKER_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(WORKER_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("WORKER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(WORKER_POLL_INTERVAL_MS);

        Self {
            poll_interval_ms,
            max_concurrent,
            enabled,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    TaskStarted { task_id: i64, file_md5: String },
    TaskCompleted { task_id: i64, file_md5: String },
    TaskFailed {
        task_id: i64,
        file_md5: String,
        error: String,
    },
    WorkerStarted,
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> pagoda_core::Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// The ingestion worker.
pub struct IngestWorker {
    queue: PgIngestQueue,
    handler: Arc<IngestHandler>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl IngestWorker {
    pub fn new(queue: PgIngestQueue, handler: IngestHandler, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            queue,
            handler: Arc::new(handler),
            config,
            event_tx,
        }
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker"))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Ingestion worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent,
            "Ingestion worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let notify = self.queue.task_notify();

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Ingestion worker received shutdown signal");
                break;
            }

            let mut claimed = 0;
            let mut tasks = tokio::task::JoinSet::new();

            for _ in 0..self.config.max_concurrent {
                match self.queue.claim().await {
                    Ok(Some(task)) => {
                        claimed += 1;
                        let handler = self.handler.clone();
                        let queue = self.queue.clone();
                        let event_tx = self.event_tx.clone();
                        tasks.spawn(async move {
                            execute_task(handler, queue, event_tx, task).await;
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Failed to claim task");
                        break;
                    }
                }
            }

            if claimed == 0 {
                // Queue empty — wait for a notification or the poll timer.
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Ingestion worker received shutdown signal");
                        break;
                    }
                    _ = notify.notified() => {}
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(claimed, "Processing task batch");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, "Task panicked");
                    }
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Ingestion worker stopped");
    }
}

/// Execute one claimed task and report the outcome to the queue.
async fn execute_task(
    handler: Arc<IngestHandler>,
    queue: PgIngestQueue,
    event_tx: broadcast::Sender<WorkerEvent>,
    task: IngestTask,
) {
    let start = Instant::now();
    let task_id = task.id;
    let file_md5 = task.payload.file_md5.clone();

    info!(task_id, file_md5 = %file_md5, "Processing ingest task");
    let _ = event_tx.send(WorkerEvent::TaskStarted {
        task_id,
        file_md5: file_md5.clone(),
    });

    match handler.process(&task).await {
        Ok(()) => {
            if let Err(e) = queue.complete(task_id).await {
                error!(error = %e, task_id, "Failed to mark task completed");
            } else {
                info!(
                    task_id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Task completed"
                );
                let _ = event_tx.send(WorkerEvent::TaskCompleted { task_id, file_md5 });
            }
        }
        Err(e) => {
            let error = e.to_string();
            if let Err(e) = queue.fail(task_id, &error).await {
                error!(error = %e, task_id, "Failed to record task failure");
            } else {
                warn!(
                    task_id,
                    error = %error,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Task failed; queue will redeliver while retries remain"
                );
                let _ = event_tx.send(WorkerEvent::TaskFailed {
                    task_id,
                    file_md5,
                    error,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, WORKER_POLL_INTERVAL_MS);
        assert_eq!(config.max_concurrent, 4);
        assert!(config.enabled);
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_poll_interval(1000)
            .with_max_concurrent(8)
            .with_enabled(false);

        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.max_concurrent, 8);
        assert!(!config.enabled);
    }

    #[test]
    fn test_worker_event_clone_and_debug() {
        let event = WorkerEvent::TaskFailed {
            task_id: 9,
            file_md5: "d41d8cd98f00b204e9800998ecf8427e".into(),
            error: "boom".into(),
        };
        let cloned = event.clone();
        let debug_str = format!("{cloned:?}");
        assert!(debug_str.contains("TaskFailed"));
        assert!(debug_str.contains("boom"));
    }
}
