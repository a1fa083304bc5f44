//! Integration tests for the scheduler driving a live worker pool.
//!
//! This test suite validates:
//! - Single pass: one feed pump, one image pump, no timers
//! - Image pumps drain the backlog under both drain policies
//! - Timer cadence in continuous mode
//! - Cancellation abandons a blocked enqueue
//! - End to end: feed entries become items, items get images

use std::sync::Arc;
use std::time::Duration;

use placetime_core::mock::{
    sample_item, solid_image, MockCropper, MockDatastore, MockFeedSource, MockImagePicker,
};
use placetime_jobs::{
    content_id, job_queue, DrainPolicy, JobContext, MediaKind, Profile, PumpReport, Scheduler,
    SchedulerConfig, Shutdown, WorkerConfig, WorkerPool, WorkerPoolHandle,
};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn profile(n: usize) -> Profile {
    Profile {
        pid: format!("p{}", n),
        feed_url: format!("https://feeds.example/{}", n),
        follower_count: 0,
    }
}

struct Harness {
    scheduler: Scheduler,
    pool: WorkerPoolHandle,
    shutdown: Shutdown,
}

fn harness(
    config: SchedulerConfig,
    store: &MockDatastore,
    feeds: &MockFeedSource,
    picker: &MockImagePicker,
    image_dir: &std::path::Path,
) -> Harness {
    let shutdown = Shutdown::new();
    let (tx, rx) = job_queue(0);
    let ctx = JobContext::new(
        Arc::new(store.clone()),
        Arc::new(feeds.clone()),
        Arc::new(picker.clone()),
        Arc::new(MockCropper::new()),
    )
    .with_image_dir(image_dir);
    let pool = WorkerPool::new(
        WorkerConfig::default().with_workers(5),
        rx,
        ctx,
        shutdown.clone(),
    )
    .start();
    let scheduler = Scheduler::new(config, Arc::new(store.clone()), tx, shutdown.clone()).unwrap();
    Harness {
        scheduler,
        pool,
        shutdown,
    }
}

impl Harness {
    /// One pass, then close the queue and wait for the workers to drain it.
    async fn run_once(self) -> PumpReport {
        let report = self.scheduler.run_once().await;
        drop(self.scheduler);
        self.pool.join().await;
        report
    }
}

// ============================================================================
// SINGLE PASS
// ============================================================================

#[tokio::test]
async fn test_single_pass_with_one_profile_and_no_items() {
    let dir = tempfile::tempdir().unwrap();
    let store = MockDatastore::new().with_profile(profile(1));
    let feeds = MockFeedSource::new();
    let picker = MockImagePicker::new();

    let report = harness(SchedulerConfig::default(), &store, &feeds, &picker, dir.path())
        .run_once()
        .await;

    assert_eq!(
        report,
        PumpReport {
            feed_jobs: 1,
            image_jobs: 0,
            image_batches: 1,
        }
    );
    assert_eq!(feeds.calls(), vec!["https://feeds.example/1".to_string()]);
    assert_eq!(store.grab_sizes(), vec![0]);
    assert!(picker.calls().is_empty());
}

#[tokio::test]
async fn test_drain_until_empty_with_25_items() {
    let dir = tempfile::tempdir().unwrap();
    let store = MockDatastore::new().with_items_needing_images("p", 25);
    let picker = MockImagePicker::new();
    let config = SchedulerConfig::default()
        .with_image_batch_size(10)
        .with_drain_policy(DrainPolicy::UntilEmpty);

    let report = harness(config, &store, &MockFeedSource::new(), &picker, dir.path())
        .run_once()
        .await;

    assert_eq!(report.image_jobs, 25);
    assert_eq!(report.image_batches, 4);
    assert_eq!(store.grab_sizes(), vec![10, 10, 5, 0]);
    assert_eq!(picker.calls().len(), 25);
}

#[tokio::test]
async fn test_drain_until_short_with_25_items() {
    let dir = tempfile::tempdir().unwrap();
    let store = MockDatastore::new().with_items_needing_images("p", 25);
    let picker = MockImagePicker::new();
    let config = SchedulerConfig::default()
        .with_image_batch_size(10)
        .with_drain_policy(DrainPolicy::UntilShort);

    let report = harness(config, &store, &MockFeedSource::new(), &picker, dir.path())
        .run_once()
        .await;

    assert_eq!(report.image_jobs, 25);
    assert_eq!(report.image_batches, 3);
    assert_eq!(store.grab_sizes(), vec![10, 10, 5]);
    assert_eq!(picker.calls().len(), 25);
}

#[tokio::test]
async fn test_picker_without_candidate_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = MockDatastore::new().with_items_needing_images("p", 3);
    let picker = MockImagePicker::new();

    harness(SchedulerConfig::default(), &store, &MockFeedSource::new(), &picker, dir.path())
        .run_once()
        .await;

    assert_eq!(picker.calls().len(), 3);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    assert!(store.updates().is_empty());
}

#[tokio::test]
async fn test_end_to_end_feed_then_images() {
    let dir = tempfile::tempdir().unwrap();
    let existing = sample_item("p1", 1);
    let store = MockDatastore::new()
        .with_profile(profile(1))
        .with_item(existing.clone());
    let feeds =
        MockFeedSource::new().with_entries("https://feeds.example/1", &[("a", "A"), ("b", "B")]);
    let picker = MockImagePicker::new().with_image(&existing.link, solid_image(600, 400, [1, 2, 3]));

    let report = harness(SchedulerConfig::default(), &store, &feeds, &picker, dir.path())
        .run_once()
        .await;

    assert_eq!(report.feed_jobs, 1);
    assert!(report.image_jobs >= 1);
    let upserts = store.upserts();
    assert_eq!(upserts.len(), 2);
    assert_eq!(upserts[0].id, content_id("a"));
    assert_eq!(upserts[1].id, content_id("b"));

    let updated = store.item(&existing.id).unwrap();
    assert_eq!(updated.image.as_deref(), Some("item-1.png"));
    assert_eq!(updated.media, Some(MediaKind::Image));
    assert!(dir.path().join("item-1.png").is_file());
}

// ============================================================================
// CONTINUOUS MODE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_timers_fire_after_one_interval() {
    let dir = tempfile::tempdir().unwrap();
    let store = MockDatastore::new().with_profile(profile(1));
    let feeds = MockFeedSource::new().with_entries("https://feeds.example/1", &[("a", "A")]);
    let picker = MockImagePicker::new();
    let config = SchedulerConfig::default()
        .with_feed_interval(30)
        .with_image_interval(60);
    let Harness {
        scheduler,
        pool,
        shutdown,
    } = harness(config, &store, &feeds, &picker, dir.path());

    let running = tokio::spawn(async move { scheduler.run().await });

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(feeds.calls().is_empty());
    assert!(store.grab_sizes().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(feeds.calls().len(), 1);
    assert!(store.grab_sizes().is_empty());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(feeds.calls().len(), 2);
    assert_eq!(store.grab_sizes(), vec![0]);

    shutdown.trigger();
    running.await.unwrap();
    pool.join().await;

    // Nothing is pumped after shutdown.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(feeds.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_abandons_blocked_enqueue() {
    let store = MockDatastore::new()
        .with_profile(profile(1))
        .with_profile(profile(2))
        .with_items_needing_images("p", 5);
    let shutdown = Shutdown::new();
    // No workers: a rendezvous send can never complete.
    let (tx, _rx) = job_queue(0);
    let scheduler = Scheduler::new(
        SchedulerConfig::default(),
        Arc::new(store.clone()),
        tx,
        shutdown.clone(),
    )
    .unwrap();

    let pass = tokio::spawn(async move { scheduler.run_once().await });
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!pass.is_finished());

    shutdown.trigger();
    let report = pass.await.unwrap();

    assert_eq!(report, PumpReport::default());
    assert!(store.grab_sizes().is_empty());
}
