//! Integration tests for the worker pool and job queue.
//!
//! This test suite validates:
//! - Never more than W jobs execute at once
//! - Every dequeued job executes exactly once
//! - Cancellation lets in-flight jobs finish and stops idle workers
//! - Synchronous hand-off at queue capacity zero

use std::sync::Arc;
use std::time::Duration;

use placetime_core::mock::{MockCropper, MockDatastore, MockFeedSource, MockImagePicker};
use placetime_jobs::{
    job_queue, FeedFetchJob, JobContext, JobKind, Shutdown, WorkerConfig, WorkerEvent, WorkerPool,
};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn context(store: &MockDatastore, feeds: &MockFeedSource) -> JobContext {
    JobContext::new(
        Arc::new(store.clone()),
        Arc::new(feeds.clone()),
        Arc::new(MockImagePicker::new()),
        Arc::new(MockCropper::new()),
    )
}

fn feed_url(n: usize) -> String {
    format!("https://feeds.example/{}", n)
}

/// Feed source serving `count` single-entry feeds, each taking `latency`.
fn feeds(count: usize, latency: Duration) -> MockFeedSource {
    (0..count)
        .fold(MockFeedSource::new(), |source, n| {
            let native_id = format!("entry-{}", n);
            source.with_entries(&feed_url(n), &[(native_id.as_str(), "title")])
        })
        .with_latency(latency)
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_never_more_than_w_jobs_in_flight() {
    const WORKERS: usize = 3;
    const JOBS: usize = 30;

    let store = MockDatastore::new();
    let feeds = feeds(JOBS, Duration::from_millis(250));
    let (tx, rx) = job_queue(0);
    let pool = WorkerPool::new(
        WorkerConfig::default().with_workers(WORKERS),
        rx,
        context(&store, &feeds),
        Shutdown::new(),
    );
    let handle = pool.start();

    for n in 0..JOBS {
        tx.send(FeedFetchJob::new(feed_url(n), "p").into())
            .await
            .unwrap();
    }
    drop(tx);
    handle.join().await;

    assert_eq!(feeds.probe().total(), JOBS);
    assert!(feeds.probe().max_in_flight() <= WORKERS);
    assert_eq!(feeds.probe().max_in_flight(), WORKERS);
    assert_eq!(store.item_count(), JOBS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_bound_under_parallel_runtime() {
    const WORKERS: usize = 2;
    const JOBS: usize = 40;

    let store = MockDatastore::new();
    let feeds = feeds(JOBS, Duration::from_millis(5));
    let (tx, rx) = job_queue(4);
    let handle = WorkerPool::new(
        WorkerConfig::default().with_workers(WORKERS),
        rx,
        context(&store, &feeds),
        Shutdown::new(),
    )
    .start();

    for n in 0..JOBS {
        tx.send(FeedFetchJob::new(feed_url(n), "p").into())
            .await
            .unwrap();
    }
    drop(tx);
    handle.join().await;

    assert_eq!(feeds.probe().total(), JOBS);
    assert!(feeds.probe().max_in_flight() <= WORKERS);
}

#[tokio::test]
async fn test_every_job_executes_exactly_once() {
    const JOBS: usize = 50;

    let store = MockDatastore::new();
    let feeds = feeds(JOBS, Duration::ZERO);
    let (tx, rx) = job_queue(8);
    let handle = WorkerPool::new(
        WorkerConfig::default().with_workers(4),
        rx,
        context(&store, &feeds),
        Shutdown::new(),
    )
    .start();

    for n in 0..JOBS {
        tx.send(FeedFetchJob::new(feed_url(n), "p").into())
            .await
            .unwrap();
    }
    drop(tx);
    handle.join().await;

    let mut calls = feeds.calls();
    calls.sort();
    let mut expected: Vec<String> = (0..JOBS).map(feed_url).collect();
    expected.sort();
    assert_eq!(calls, expected);
    assert_eq!(store.upserts().len(), JOBS);
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[tokio::test]
async fn test_idle_workers_exit_on_shutdown_without_executing() {
    let store = MockDatastore::new();
    let feeds = feeds(4, Duration::ZERO);
    let (tx, rx) = job_queue(4);

    // Jobs are already queued, but shutdown wins the race.
    for n in 0..4 {
        tx.send(FeedFetchJob::new(feed_url(n), "p").into())
            .await
            .unwrap();
    }
    let shutdown = Shutdown::new();
    shutdown.trigger();

    let handle = WorkerPool::new(
        WorkerConfig::default().with_workers(2),
        rx,
        context(&store, &feeds),
        shutdown,
    )
    .start();
    handle.join().await;

    assert!(feeds.calls().is_empty());
    assert!(store.upserts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_job_finishes_after_shutdown() {
    let store = MockDatastore::new();
    let feeds = feeds(1, Duration::from_secs(10));
    let (tx, rx) = job_queue(0);
    let shutdown = Shutdown::new();
    let pool = WorkerPool::new(
        WorkerConfig::default().with_workers(2),
        rx,
        context(&store, &feeds),
        shutdown.clone(),
    );
    let mut events = pool.events();
    let handle = pool.start();

    tx.send(FeedFetchJob::new(feed_url(0), "p").into())
        .await
        .unwrap();
    while feeds.probe().in_flight() == 0 {
        tokio::task::yield_now().await;
    }
    shutdown.trigger();

    assert!(handle.join_with_timeout(Duration::from_secs(30)).await);
    assert_eq!(store.upserts().len(), 1);

    let mut completed = 0;
    let mut stopped = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            WorkerEvent::JobCompleted { kind, .. } => {
                assert_eq!(kind, JobKind::FeedFetch);
                completed += 1;
            }
            WorkerEvent::WorkerStopped { .. } => stopped += 1,
            _ => {}
        }
    }
    assert_eq!(completed, 1);
    assert_eq!(stopped, 2);
}

// ============================================================================
// HAND-OFF
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rendezvous_send_waits_for_free_worker() {
    let store = MockDatastore::new();
    let feeds = feeds(2, Duration::from_secs(60));
    let (tx, rx) = job_queue(0);
    let handle = WorkerPool::new(
        WorkerConfig::default().with_workers(1),
        rx,
        context(&store, &feeds),
        Shutdown::new(),
    )
    .start();

    tx.send(FeedFetchJob::new(feed_url(0), "p").into())
        .await
        .unwrap();

    // The only worker is busy for a minute; the second send must wait.
    let second = tokio::spawn({
        let tx = tx.clone();
        async move { tx.send(FeedFetchJob::new(feed_url(1), "p").into()).await }
    });
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!second.is_finished());

    assert!(second.await.unwrap().is_ok());
    drop(tx);
    handle.join().await;
    assert_eq!(feeds.probe().total(), 2);
}
