use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{JobRunner, RunOutcome};
use crate::blob::BlobStore;
use crate::catalog::CatalogStore;
use crate::queue::{JobQueue, ReservedJob};

/// Worker loop configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long one `reserve` call may wait for a message
    pub reserve_timeout: Duration,
    /// Pause after a queue error before polling again
    pub error_backoff: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            reserve_timeout: Duration::from_millis(500),
            error_backoff: Duration::from_secs(1),
            name: "settlement-worker".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_reserve_timeout(mut self, timeout: Duration) -> Self {
        self.reserve_timeout = timeout;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub messages_received: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_skipped: u64,
    pub messages_dead_lettered: u64,
    pub messages_left_for_redelivery: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Stop after the message in hand (if any) and wait for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "worker task ended abnormally");
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Background job consumer.
pub struct WorkerRuntime;

impl WorkerRuntime {
    /// Spawn the worker loop on the current tokio runtime.
    ///
    /// Dropping the returned handle also stops the loop.
    pub fn spawn<C, B, Q>(runner: Arc<JobRunner<C, B>>, queue: Q, config: WorkerConfig) -> WorkerHandle
    where
        C: CatalogStore + 'static,
        B: BlobStore + 'static,
        Q: JobQueue + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let join = tokio::spawn(worker_loop(runner, queue, config, shutdown_rx, stats.clone()));
        WorkerHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }
}

struct StatsRecorder {
    stats: Arc<Mutex<WorkerStats>>,
    started: Instant,
}

impl StatsRecorder {
    fn record(&self, f: impl FnOnce(&mut WorkerStats)) {
        let mut s = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        s.uptime_secs = self.started.elapsed().as_secs();
        f(&mut s);
    }
}

async fn worker_loop<C, B, Q>(
    runner: Arc<JobRunner<C, B>>,
    queue: Q,
    config: WorkerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
    stats: Arc<Mutex<WorkerStats>>,
) where
    C: CatalogStore,
    B: BlobStore,
    Q: JobQueue,
{
    info!(worker = %config.name, "worker started");
    let stats = StatsRecorder {
        stats,
        started: Instant::now(),
    };

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let reserved = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            reserved = queue.reserve(config.reserve_timeout) => reserved,
        };

        let message = match reserved {
            Ok(Some(message)) => message,
            Ok(None) => {
                stats.record(|_| {});
                continue;
            }
            Err(e) => {
                error!(worker = %config.name, error = %e, "failed to reserve message");
                tokio::time::sleep(config.error_backoff).await;
                continue;
            }
        };

        stats.record(|s| {
            s.messages_received += 1;
            s.current_running += 1;
        });
        handle_message(&runner, &queue, &config, message, &stats).await;
        stats.record(|s| s.current_running = s.current_running.saturating_sub(1));
    }

    info!(worker = %config.name, "worker stopped");
}

async fn handle_message<C, B, Q>(
    runner: &JobRunner<C, B>,
    queue: &Q,
    config: &WorkerConfig,
    message: ReservedJob,
    stats: &StatsRecorder,
) where
    C: CatalogStore,
    B: BlobStore,
    Q: JobQueue,
{
    let ReservedJob {
        message_id,
        payload,
        deliveries,
    } = message;
    debug!(worker = %config.name, message_id = %message_id, job_id = %payload.job_id, deliveries, "message reserved");

    let settled = match runner.run(&payload).await {
        Ok(RunOutcome::Completed { .. }) => {
            stats.record(|s| s.jobs_completed += 1);
            queue.ack(&message_id).await
        }
        Ok(RunOutcome::Skipped { .. }) => {
            stats.record(|s| s.jobs_skipped += 1);
            queue.ack(&message_id).await
        }
        Ok(RunOutcome::Failed { error }) => {
            stats.record(|s| {
                s.jobs_failed += 1;
                s.messages_dead_lettered += 1;
            });
            queue.fail(&message_id, &error).await
        }
        Err(e) if e.is_permanent() => {
            stats.record(|s| s.messages_dead_lettered += 1);
            queue.fail(&message_id, &e.to_string()).await
        }
        Err(e) => {
            // Left unacknowledged; the queue hands it out again later.
            warn!(worker = %config.name, message_id = %message_id, error = %e, "job interrupted");
            stats.record(|s| s.messages_left_for_redelivery += 1);
            Ok(())
        }
    };

    if let Err(e) = settled {
        error!(worker = %config.name, message_id = %message_id, error = %e, "failed to settle message");
    }
}
