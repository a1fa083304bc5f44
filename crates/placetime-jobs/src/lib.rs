//! # placetime-jobs
//!
//! Job dispatch engine for the placetime fetcher.
//!
//! This crate provides:
//! - The closed set of jobs ([`Job`]) and what executing each one means
//! - A bounded job queue with synchronous hand-off at capacity zero
//! - A fixed-size worker pool with cooperative shutdown
//! - A scheduler with independent feed and image timers
//! - HTTP feed, image picking and saliency cropping adapters
//!
//! ## Example
//!
//! ```ignore
//! use placetime_jobs::{job_queue, JobContext, Scheduler, SchedulerConfig, Shutdown, WorkerConfig, WorkerPool};
//!
//! let shutdown = Shutdown::new();
//! let (sender, receiver) = job_queue(0);
//!
//! let pool = WorkerPool::new(WorkerConfig::default(), receiver, ctx, shutdown.clone());
//! let handle = pool.start();
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default(), datastore, sender, shutdown.clone())?;
//! tokio::spawn(async move { scheduler.run().await });
//!
//! // Later: stop generating work and let in-flight jobs finish
//! shutdown.trigger();
//! handle.join().await;
//! ```

pub mod adapters;
pub mod job;
pub mod queue;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

// Re-export core types
pub use placetime_core::*;

pub use job::{
    preview_feed, FeedFetchJob, ImageFetchJob, Job, JobContext, JobKind, JobOutput, JobResult,
};
pub use queue::{job_queue, JobReceiver, JobSender};
pub use scheduler::{DrainPolicy, ImagePump, PumpReport, Scheduler, SchedulerConfig};
pub use shutdown::Shutdown;
pub use worker::{WorkerConfig, WorkerEvent, WorkerPool, WorkerPoolHandle};

pub use adapters::{HttpFeedSource, HttpImagePicker, SalienceCropper};
