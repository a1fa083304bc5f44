//! Fixed-size worker pool draining the job queue.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use placetime_core::defaults::{EVENT_BUS_CAPACITY, JOB_TIMEOUT_SECS, WORKER_COUNT};
use placetime_core::Error;

use crate::job::{Job, JobContext, JobKind, JobResult};
use crate::queue::JobReceiver;
use crate::shutdown::Shutdown;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of workers. Values below one are raised to one.
    pub workers: usize,
    /// Upper bound on a single job's run time, in seconds.
    pub job_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: WORKER_COUNT,
            job_timeout_secs: JOB_TIMEOUT_SECS,
        }
    }
}

impl WorkerConfig {
    /// Set the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the per-job timeout.
    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    fn effective_workers(&self) -> usize {
        self.workers.max(1)
    }
}

/// Event emitted by the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A worker entered its loop.
    WorkerStarted { worker: usize },
    /// A worker took a job off the queue.
    JobStarted { worker: usize, kind: JobKind },
    /// A job finished successfully.
    JobCompleted { worker: usize, kind: JobKind },
    /// A job failed, timed out or panicked.
    JobFailed {
        worker: usize,
        kind: JobKind,
        error: String,
    },
    /// A worker left its loop.
    WorkerStopped { worker: usize },
}

/// Pool of workers sharing one job queue.
pub struct WorkerPool {
    config: WorkerConfig,
    receiver: JobReceiver,
    ctx: JobContext,
    shutdown: Shutdown,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        receiver: JobReceiver,
        ctx: JobContext,
        shutdown: Shutdown,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            config,
            receiver,
            ctx,
            shutdown,
            event_tx,
        }
    }

    /// Subscribe to pool events before starting, so no event is missed.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Spawn every worker and return a handle to the running pool.
    pub fn start(self) -> WorkerPoolHandle {
        let workers = self.config.effective_workers();
        let job_timeout = Duration::from_secs(self.config.job_timeout_secs);

        info!(
            subsystem = "workers",
            workers,
            job_timeout_secs = self.config.job_timeout_secs,
            "Starting worker pool"
        );

        let handles = (0..workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    receiver: self.receiver.clone(),
                    ctx: self.ctx.clone(),
                    shutdown: self.shutdown.clone(),
                    event_tx: self.event_tx.clone(),
                    job_timeout,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        WorkerPoolHandle {
            handles,
            event_tx: self.event_tx,
        }
    }
}

/// Handle to a running worker pool.
pub struct WorkerPoolHandle {
    handles: Vec<JoinHandle<()>>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl WorkerPoolHandle {
    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit.
    ///
    /// Workers exit when shutdown is triggered or the queue is closed and
    /// drained; a job in flight always runs to completion first.
    pub async fn join(self) {
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                error!(subsystem = "workers", error = ?e, "Worker task failed");
            }
        }
        info!(subsystem = "workers", "Worker pool stopped");
    }

    /// Like [`join`](Self::join), but give up after `grace`.
    ///
    /// Returns `false` if workers were still busy when the grace period ran
    /// out; those workers are aborted.
    pub async fn join_with_timeout(self, grace: Duration) -> bool {
        let aborts: Vec<_> = self.handles.iter().map(|h| h.abort_handle()).collect();
        match tokio::time::timeout(grace, self.join()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    subsystem = "workers",
                    grace_secs = grace.as_secs(),
                    "Workers still busy after grace period, aborting"
                );
                for abort in aborts {
                    abort.abort();
                }
                false
            }
        }
    }
}

struct Worker {
    id: usize,
    receiver: JobReceiver,
    ctx: JobContext,
    shutdown: Shutdown,
    event_tx: broadcast::Sender<WorkerEvent>,
    job_timeout: Duration,
}

impl Worker {
    async fn run(self) {
        debug!(subsystem = "workers", worker = self.id, "Worker started");
        let _ = self
            .event_tx
            .send(WorkerEvent::WorkerStarted { worker: self.id });

        loop {
            let job = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!(subsystem = "workers", worker = self.id, "Worker received shutdown signal");
                    break;
                }
                job = self.receiver.recv() => match job {
                    Some(job) => job,
                    None => {
                        debug!(subsystem = "workers", worker = self.id, "Job queue closed");
                        break;
                    }
                },
            };
            self.execute(job).await;
        }

        let _ = self
            .event_tx
            .send(WorkerEvent::WorkerStopped { worker: self.id });
        debug!(subsystem = "workers", worker = self.id, "Worker stopped");
    }

    async fn execute(&self, job: Job) {
        let start = Instant::now();
        let kind = job.kind();
        let worker = self.id;

        debug!(subsystem = "workers", worker, job_kind = %kind, "Processing job");
        let _ = self.event_tx.send(WorkerEvent::JobStarted { worker, kind });

        let run = AssertUnwindSafe(job.execute(&self.ctx)).catch_unwind();
        let result = match tokio::time::timeout(self.job_timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                error!(subsystem = "workers", worker, job_kind = %kind, "Job panicked");
                JobResult::Failed(Error::Internal("job panicked".into()))
            }
            Err(_) => {
                warn!(
                    subsystem = "workers",
                    worker,
                    job_kind = %kind,
                    "Job exceeded timeout of {}s",
                    self.job_timeout.as_secs()
                );
                JobResult::Failed(Error::Internal(format!(
                    "job exceeded timeout of {}s",
                    self.job_timeout.as_secs()
                )))
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            JobResult::Success(_) => {
                debug!(subsystem = "workers", worker, job_kind = %kind, duration_ms, "Job completed");
                let _ = self
                    .event_tx
                    .send(WorkerEvent::JobCompleted { worker, kind });
            }
            JobResult::Failed(e) => {
                debug!(
                    subsystem = "workers",
                    worker,
                    job_kind = %kind,
                    duration_ms,
                    error = %e,
                    "Job failed"
                );
                let _ = self.event_tx.send(WorkerEvent::JobFailed {
                    worker,
                    kind,
                    error: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{FeedFetchJob, ImageFetchJob};
    use crate::queue::job_queue;
    use placetime_core::mock::{MockCropper, MockDatastore, MockFeedSource, MockImagePicker};
    use std::sync::Arc;

    fn context(feeds: &MockFeedSource) -> JobContext {
        JobContext::new(
            Arc::new(MockDatastore::new()),
            Arc::new(feeds.clone()),
            Arc::new(MockImagePicker::new()),
            Arc::new(MockCropper::new()),
        )
    }

    #[test]
    fn test_worker_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.workers, 5);
        assert_eq!(config.job_timeout_secs, 300);
    }

    #[test]
    fn test_worker_config_builders() {
        let config = WorkerConfig::default().with_workers(0).with_job_timeout(9);
        assert_eq!(config.effective_workers(), 1);
        assert_eq!(config.job_timeout_secs, 9);
    }

    #[tokio::test]
    async fn test_zero_workers_still_starts_one() {
        let (_tx, rx) = job_queue(0);
        let shutdown = Shutdown::new();
        let pool = WorkerPool::new(
            WorkerConfig::default().with_workers(0),
            rx,
            context(&MockFeedSource::new()),
            shutdown.clone(),
        );
        let handle = pool.start();
        assert_eq!(handle.worker_count(), 1);
        shutdown.trigger();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_events_for_success_and_failure() {
        let feeds = MockFeedSource::new().with_entries("https://ok", &[("a", "A")]);
        let (tx, rx) = job_queue(4);
        let pool = WorkerPool::new(
            WorkerConfig::default().with_workers(1),
            rx,
            context(&feeds),
            Shutdown::new(),
        );
        let mut events = pool.events();
        let handle = pool.start();

        tx.send(FeedFetchJob::new("https://ok", "p").into())
            .await
            .unwrap();
        tx.send(ImageFetchJob::new("https://page", "x").into())
            .await
            .unwrap();
        drop(tx);
        handle.join().await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.first(), Some(&WorkerEvent::WorkerStarted { worker: 0 }));
        assert!(seen.contains(&WorkerEvent::JobCompleted {
            worker: 0,
            kind: JobKind::FeedFetch
        }));
        assert!(seen.iter().any(|e| matches!(
            e,
            WorkerEvent::JobFailed {
                kind: JobKind::ImageFetch,
                ..
            }
        )));
        assert_eq!(seen.last(), Some(&WorkerEvent::WorkerStopped { worker: 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_timeout_frees_worker() {
        let feeds = MockFeedSource::new()
            .with_entries("https://slow", &[("a", "A")])
            .with_latency(Duration::from_secs(600));
        let (tx, rx) = job_queue(1);
        let pool = WorkerPool::new(
            WorkerConfig::default().with_workers(1).with_job_timeout(5),
            rx,
            context(&feeds),
            Shutdown::new(),
        );
        let mut events = pool.events();
        let handle = pool.start();

        tx.send(FeedFetchJob::new("https://slow", "p").into())
            .await
            .unwrap();
        drop(tx);
        handle.join().await;

        let mut timed_out = false;
        while let Ok(event) = events.try_recv() {
            if let WorkerEvent::JobFailed { error, .. } = event {
                timed_out = error.contains("timeout");
            }
        }
        assert!(timed_out);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_with_timeout_reports_busy_workers() {
        let feeds = MockFeedSource::new()
            .with_entries("https://slow", &[("a", "A")])
            .with_latency(Duration::from_secs(120));
        let (tx, rx) = job_queue(1);
        let shutdown = Shutdown::new();
        let pool = WorkerPool::new(
            WorkerConfig::default().with_workers(1),
            rx,
            context(&feeds),
            shutdown.clone(),
        );
        let handle = pool.start();

        tx.send(FeedFetchJob::new("https://slow", "p").into())
            .await
            .unwrap();
        while feeds.probe().in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        shutdown.trigger();

        assert!(!handle.join_with_timeout(Duration::from_secs(10)).await);
    }
}
