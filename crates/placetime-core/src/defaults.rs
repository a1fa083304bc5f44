//! Centralized default constants for the fetcher.
//!
//! **This module is the single source of truth** for shared default values.
//! Configuration structs in the other crates start from these and are
//! overridden from the environment at startup.

// =============================================================================
// WORKER POOL
// =============================================================================

/// Number of concurrent job workers.
pub const WORKER_COUNT: usize = 5;

/// Job queue capacity. Zero means synchronous hand-off: a producer waits
/// until a worker has taken the job.
pub const QUEUE_CAPACITY: usize = 0;

/// Upper bound on a single job's execution time in seconds.
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// Worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// SCHEDULER
// =============================================================================

/// Seconds between feed pumps.
pub const FEED_INTERVAL_SECS: u64 = 30;

/// Seconds between image pumps.
pub const IMAGE_INTERVAL_SECS: u64 = 30;

/// Items requested per `grab_items_needing_images` call.
pub const IMAGE_BATCH_SIZE: usize = 10;

/// Longest accepted pump interval (one year).
pub const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

// =============================================================================
// IMAGES
// =============================================================================

/// Target crop width in pixels.
pub const CROP_WIDTH: u32 = 460;

/// Target crop height in pixels.
pub const CROP_HEIGHT: u32 = 160;

/// File extension of stored crops (PNG, lossless).
pub const IMAGE_EXTENSION: &str = "png";

/// Directory cropped images are written to.
pub const IMAGE_DIR: &str = "/var/opt/timescroll/img";

/// Smallest side length an image candidate may have.
pub const IMAGE_MIN_DIMENSION: u32 = 100;

/// Maximum number of candidate images fetched per page.
pub const IMAGE_MAX_CANDIDATES: usize = 8;

// =============================================================================
// NETWORK
// =============================================================================

/// Deadline for each outbound HTTP request in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// User agent sent with feed and image requests.
pub const USER_AGENT: &str = concat!("placetime-fetcher/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Seconds the orchestrator waits for in-flight jobs after a stop request.
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

/// Default database URL.
pub const DATABASE_URL: &str = "postgres://localhost/placetime";
