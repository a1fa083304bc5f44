//! Periodic work generation.
//!
//! The scheduler owns two independent timers. A feed tick turns every
//! feed-driven profile into a [`FeedFetchJob`]; an image tick drains the
//! backlog of items lacking an image into [`ImageFetchJob`]s, one batch at a
//! time.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info, warn};

use placetime_core::defaults::{
    FEED_INTERVAL_SECS, IMAGE_BATCH_SIZE, IMAGE_INTERVAL_SECS, MAX_INTERVAL_SECS,
};
use placetime_core::{Datastore, Error, Result};

use crate::job::{FeedFetchJob, ImageFetchJob, Job};
use crate::queue::JobSender;
use crate::shutdown::Shutdown;

/// When an image pump stops issuing batch queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DrainPolicy {
    /// Stop when a query returns no items.
    #[default]
    UntilEmpty,
    /// Stop after a batch smaller than the batch size.
    UntilShort,
}

impl DrainPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrainPolicy::UntilEmpty => "until_empty",
            DrainPolicy::UntilShort => "until_short",
        }
    }

    fn should_stop(&self, batch_len: usize, batch_size: usize) -> bool {
        match self {
            DrainPolicy::UntilEmpty => batch_len == 0,
            DrainPolicy::UntilShort => batch_len < batch_size,
        }
    }
}

impl fmt::Display for DrainPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DrainPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "until_empty" => Ok(DrainPolicy::UntilEmpty),
            "until_short" => Ok(DrainPolicy::UntilShort),
            other => Err(Error::Config(format!("unknown drain policy: {}", other))),
        }
    }
}

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Seconds between feed pumps.
    pub feed_interval_secs: u64,
    /// Seconds between image pumps.
    pub image_interval_secs: u64,
    /// Items requested per batch query.
    pub image_batch_size: usize,
    pub drain_policy: DrainPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            feed_interval_secs: FEED_INTERVAL_SECS,
            image_interval_secs: IMAGE_INTERVAL_SECS,
            image_batch_size: IMAGE_BATCH_SIZE,
            drain_policy: DrainPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_feed_interval(mut self, secs: u64) -> Self {
        self.feed_interval_secs = secs;
        self
    }

    pub fn with_image_interval(mut self, secs: u64) -> Self {
        self.image_interval_secs = secs;
        self
    }

    pub fn with_image_batch_size(mut self, size: usize) -> Self {
        self.image_batch_size = size;
        self
    }

    pub fn with_drain_policy(mut self, policy: DrainPolicy) -> Self {
        self.drain_policy = policy;
        self
    }

    fn validate(&self) -> Result<()> {
        for (name, secs) in [
            ("feed", self.feed_interval_secs),
            ("image", self.image_interval_secs),
        ] {
            if secs == 0 {
                return Err(Error::Config(format!("{} interval must be at least 1s", name)));
            }
            if secs > MAX_INTERVAL_SECS {
                return Err(Error::Config(format!(
                    "{} interval must be at most {}s",
                    name, MAX_INTERVAL_SECS
                )));
            }
        }
        if self.image_batch_size == 0 {
            return Err(Error::Config("image batch size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Outcome of one image pump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImagePump {
    /// Image jobs enqueued.
    pub enqueued: usize,
    /// Batch queries issued.
    pub batches: usize,
}

/// Outcome of a single pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub feed_jobs: usize,
    pub image_jobs: usize,
    pub image_batches: usize,
}

/// Turns outstanding work into jobs on the queue.
///
/// Dropping the scheduler drops its queue sender; once no sender remains the
/// workers drain what is left and exit.
pub struct Scheduler {
    config: SchedulerConfig,
    datastore: Arc<dyn Datastore>,
    sender: JobSender,
    shutdown: Shutdown,
}

impl Scheduler {
    /// Create a scheduler. Zero intervals or a zero batch size are rejected.
    pub fn new(
        config: SchedulerConfig,
        datastore: Arc<dyn Datastore>,
        sender: JobSender,
        shutdown: Shutdown,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            datastore,
            sender,
            shutdown,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Pump on both timers until shutdown is triggered.
    ///
    /// Each timer first fires one full interval after start. Ticks missed
    /// while a pump is blocked on a full queue are delayed, not burst.
    pub async fn run(&self) {
        let feed_period = Duration::from_secs(self.config.feed_interval_secs);
        let image_period = Duration::from_secs(self.config.image_interval_secs);
        let now = tokio::time::Instant::now();

        let mut feed_tick = interval_at(now + feed_period, feed_period);
        feed_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut image_tick = interval_at(now + image_period, image_period);
        image_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            subsystem = "scheduler",
            feed_interval_secs = self.config.feed_interval_secs,
            image_interval_secs = self.config.image_interval_secs,
            image_batch_size = self.config.image_batch_size,
            drain_policy = %self.config.drain_policy,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = feed_tick.tick() => {
                    self.pump_feeds().await;
                }
                _ = image_tick.tick() => {
                    self.pump_images().await;
                }
            }
        }

        info!(subsystem = "scheduler", "Scheduler stopped");
    }

    /// One feed pump followed by one image pump, with no timers.
    pub async fn run_once(&self) -> PumpReport {
        info!(subsystem = "scheduler", "Running single pass");
        let feed_jobs = self.pump_feeds().await;
        let images = self.pump_images().await;
        let report = PumpReport {
            feed_jobs,
            image_jobs: images.enqueued,
            image_batches: images.batches,
        };
        info!(
            subsystem = "scheduler",
            feed_jobs = report.feed_jobs,
            image_jobs = report.image_jobs,
            image_batches = report.image_batches,
            "Single pass complete"
        );
        report
    }

    /// Enqueue one feed job per feed-driven profile. Returns jobs enqueued.
    pub async fn pump_feeds(&self) -> usize {
        if self.shutdown.is_triggered() {
            return 0;
        }
        let start = Instant::now();

        let profiles = match self.datastore.feed_driven_profiles().await {
            Ok(profiles) => profiles,
            Err(e) => {
                warn!(
                    subsystem = "scheduler",
                    error_kind = e.kind(),
                    error = %e,
                    "Failed to list feed-driven profiles"
                );
                return 0;
            }
        };

        let mut enqueued = 0;
        for profile in profiles {
            let job = FeedFetchJob::new(profile.feed_url, profile.pid);
            if !self.enqueue(job.into()).await {
                break;
            }
            enqueued += 1;
        }

        info!(
            subsystem = "scheduler",
            jobs = enqueued,
            duration_ms = start.elapsed().as_millis() as u64,
            "Feed pump complete"
        );
        enqueued
    }

    /// Drain items lacking an image into image jobs, batch by batch.
    pub async fn pump_images(&self) -> ImagePump {
        let mut pump = ImagePump::default();
        if self.shutdown.is_triggered() {
            return pump;
        }
        let start = Instant::now();
        let batch_size = self.config.image_batch_size;

        'drain: loop {
            let batch = match self.datastore.grab_items_needing_images(batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(
                        subsystem = "scheduler",
                        error_kind = e.kind(),
                        error = %e,
                        "Failed to grab items needing images"
                    );
                    break;
                }
            };
            pump.batches += 1;
            let batch_len = batch.len();
            debug!(subsystem = "scheduler", batch_len, "Grabbed image batch");

            let mut pending = batch.into_iter();
            while let Some(item) = pending.next() {
                let id = item.id.clone();
                let job = ImageFetchJob::new(item.link, item.id);
                if !self.enqueue(job.into()).await {
                    // Claimed but never handed to a worker.
                    let unqueued: Vec<String> = std::iter::once(id)
                        .chain(pending.by_ref().map(|item| item.id))
                        .collect();
                    self.release(&unqueued).await;
                    break 'drain;
                }
                pump.enqueued += 1;
            }

            if self.config.drain_policy.should_stop(batch_len, batch_size) {
                break;
            }
        }

        info!(
            subsystem = "scheduler",
            jobs = pump.enqueued,
            batches = pump.batches,
            duration_ms = start.elapsed().as_millis() as u64,
            "Image pump complete"
        );
        pump
    }

    /// Return claimed items to the "needs image" set.
    async fn release(&self, ids: &[String]) {
        match self.datastore.release_items(ids).await {
            Ok(()) => info!(
                subsystem = "scheduler",
                released = ids.len(),
                "Released items left unqueued"
            ),
            Err(e) => warn!(
                subsystem = "scheduler",
                released = ids.len(),
                error_kind = e.kind(),
                error = %e,
                "Failed to release unqueued items"
            ),
        }
    }

    /// Hand a job to the queue. Returns `false` if shutdown won the race or
    /// the queue is closed; no further jobs should be enqueued then.
    async fn enqueue(&self, job: Job) -> bool {
        if self.shutdown.is_triggered() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                debug!(subsystem = "scheduler", "Enqueue abandoned on shutdown");
                false
            }
            sent = self.sender.send(job) => match sent {
                Ok(()) => true,
                Err(job) => {
                    warn!(
                        subsystem = "scheduler",
                        job_kind = %job.kind(),
                        "Job queue closed"
                    );
                    false
                }
            },
        }
    }
}
