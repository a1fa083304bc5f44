//! Jobs and what executing each one means.
//!
//! A [`Job`] is a closed sum over the units of work the fetcher knows how to
//! perform. Variants are immutable once built and carry only the parameters
//! one unit of work needs; everything else comes from the [`JobContext`].

use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::ImageFormat;
use tracing::{debug, info, trace, warn};

use placetime_core::defaults::{CROP_HEIGHT, CROP_WIDTH, IMAGE_DIR, IMAGE_EXTENSION};
use placetime_core::{
    content_id, Datastore, Error, FeedEntry, FeedSource, ImageCropper, ImagePicker, MediaKind,
    Result, UpsertItem,
};

// =============================================================================
// CONTEXT
// =============================================================================

/// Collaborators shared by every job a worker executes.
///
/// Cloning is cheap; all collaborators are reference counted.
#[derive(Clone)]
pub struct JobContext {
    datastore: Arc<dyn Datastore>,
    feeds: Arc<dyn FeedSource>,
    picker: Arc<dyn ImagePicker>,
    cropper: Arc<dyn ImageCropper>,
    image_dir: PathBuf,
    crop_size: (u32, u32),
}

impl JobContext {
    /// Create a context writing images to the default image directory.
    pub fn new(
        datastore: Arc<dyn Datastore>,
        feeds: Arc<dyn FeedSource>,
        picker: Arc<dyn ImagePicker>,
        cropper: Arc<dyn ImageCropper>,
    ) -> Self {
        Self {
            datastore,
            feeds,
            picker,
            cropper,
            image_dir: PathBuf::from(IMAGE_DIR),
            crop_size: (CROP_WIDTH, CROP_HEIGHT),
        }
    }

    /// Set the directory cropped images are written to.
    pub fn with_image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.image_dir = dir.into();
        self
    }

    /// Override the crop size.
    pub fn with_crop_size(mut self, width: u32, height: u32) -> Self {
        self.crop_size = (width, height);
        self
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    /// File name an item's image is stored under.
    pub fn image_file_name(item_id: &str) -> String {
        format!("{}.{}", item_id, IMAGE_EXTENSION)
    }

    /// Full path an item's image is stored under.
    pub fn image_path(&self, item_id: &str) -> PathBuf {
        self.image_dir.join(Self::image_file_name(item_id))
    }
}

// =============================================================================
// JOBS
// =============================================================================

/// Kind of a job, for logging and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    FeedFetch,
    ImageFetch,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::FeedFetch => "feed_fetch",
            JobKind::ImageFetch => "image_fetch",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fetch one profile's feed and upsert its entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFetchJob {
    feed_url: String,
    profile_id: String,
}

impl FeedFetchJob {
    pub fn new(feed_url: impl Into<String>, profile_id: impl Into<String>) -> Self {
        Self {
            feed_url: feed_url.into(),
            profile_id: profile_id.into(),
        }
    }

    pub fn feed_url(&self) -> &str {
        &self.feed_url
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }
}

/// Find, crop and store the image for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFetchJob {
    source_url: String,
    item_id: String,
}

impl ImageFetchJob {
    pub fn new(source_url: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            item_id: item_id.into(),
        }
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }
}

/// A unit of work handed from the scheduler to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    FeedFetch(FeedFetchJob),
    ImageFetch(ImageFetchJob),
}

impl From<FeedFetchJob> for Job {
    fn from(job: FeedFetchJob) -> Self {
        Job::FeedFetch(job)
    }
}

impl From<ImageFetchJob> for Job {
    fn from(job: ImageFetchJob) -> Self {
        Job::ImageFetch(job)
    }
}

/// What a successful job produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutput {
    /// Entries upserted and entries whose upsert failed.
    Feed { upserted: usize, failed: usize },
    /// Path of the written image.
    Image { path: PathBuf },
}

/// Result of job execution.
///
/// Failure is terminal for the job: nothing retries it.
#[derive(Debug)]
pub enum JobResult {
    Success(JobOutput),
    Failed(Error),
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success(_))
    }
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Job::FeedFetch(_) => JobKind::FeedFetch,
            Job::ImageFetch(_) => JobKind::ImageFetch,
        }
    }

    /// Execute the job to completion.
    ///
    /// Never returns an error to the caller; failures are logged here and
    /// reported as [`JobResult::Failed`].
    pub async fn execute(&self, ctx: &JobContext) -> JobResult {
        match self {
            Job::FeedFetch(job) => job.execute(ctx).await,
            Job::ImageFetch(job) => job.execute(ctx).await,
        }
    }
}

impl FeedFetchJob {
    async fn execute(&self, ctx: &JobContext) -> JobResult {
        debug!(
            subsystem = "jobs",
            job_kind = "feed_fetch",
            profile_id = %self.profile_id,
            url = %self.feed_url,
            "Fetching feed"
        );

        let feed = match ctx.feeds.fetch(&self.feed_url).await {
            Ok(feed) => feed,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    job_kind = "feed_fetch",
                    profile_id = %self.profile_id,
                    url = %self.feed_url,
                    error_kind = e.kind(),
                    error = %e,
                    "Feed fetch failed"
                );
                return JobResult::Failed(e);
            }
        };

        let mut upserted = 0;
        let mut failed = 0;
        for entry in &feed.entries {
            let request = upsert_request(&self.profile_id, entry);
            trace!(
                item_id = %request.id,
                native_id = %entry.native_id,
                "Upserting feed entry"
            );
            match ctx.datastore.upsert_item(request).await {
                Ok(()) => upserted += 1,
                Err(e) => {
                    failed += 1;
                    warn!(
                        subsystem = "jobs",
                        job_kind = "feed_fetch",
                        profile_id = %self.profile_id,
                        native_id = %entry.native_id,
                        error = %e,
                        "Failed to upsert feed entry"
                    );
                }
            }
        }

        info!(
            subsystem = "jobs",
            job_kind = "feed_fetch",
            profile_id = %self.profile_id,
            upserted,
            failed,
            "Found {} items in feed",
            feed.entries.len()
        );
        JobResult::Success(JobOutput::Feed { upserted, failed })
    }
}

impl ImageFetchJob {
    async fn execute(&self, ctx: &JobContext) -> JobResult {
        match self.fetch_and_store(ctx).await {
            Ok(path) => {
                info!(
                    subsystem = "jobs",
                    job_kind = "image_fetch",
                    item_id = %self.item_id,
                    path = %path.display(),
                    "Stored image"
                );
                JobResult::Success(JobOutput::Image { path })
            }
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    job_kind = "image_fetch",
                    item_id = %self.item_id,
                    url = %self.source_url,
                    error_kind = e.kind(),
                    error = %e,
                    "Image fetch failed"
                );
                JobResult::Failed(e)
            }
        }
    }

    async fn fetch_and_store(&self, ctx: &JobContext) -> Result<PathBuf> {
        let candidate = ctx
            .picker
            .pick(&self.source_url)
            .await?
            .ok_or_else(|| Error::NoImage(format!("no candidate at {}", self.source_url)))?;

        let cropper = ctx.cropper.clone();
        let (width, height) = ctx.crop_size;
        let encoded = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let cropped = cropper.crop(&candidate, width, height);
            let mut buf = Vec::new();
            cropped.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
            Ok(buf)
        })
        .await
        .map_err(|e| Error::Internal(format!("crop task failed: {}", e)))??;

        let path = ctx.image_path(&self.item_id);
        write_atomically(&path, &encoded).await?;

        // The file stays on disk if the record update below fails.
        let mut item = ctx.datastore.get_item(&self.item_id).await?;
        item.image = Some(JobContext::image_file_name(&self.item_id));
        item.media = Some(MediaKind::Image);
        ctx.datastore.update_item(&item).await?;

        Ok(path)
    }
}

/// Write through a sibling temp file so `path` never holds a partial image.
async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let written = match tokio::fs::write(&tmp, bytes).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

fn upsert_request(profile_id: &str, entry: &FeedEntry) -> UpsertItem {
    UpsertItem {
        pid: profile_id.to_string(),
        id: content_id(&entry.native_id),
        text: entry.title.clone(),
        link: entry.link.clone(),
        image: None,
        event: entry.published,
    }
}

/// Fetch a feed and pair each entry with the item id it would be stored
/// under, without touching the datastore.
pub async fn preview_feed(
    feeds: &dyn FeedSource,
    url: &str,
) -> Result<Vec<(String, FeedEntry)>> {
    let feed = feeds.fetch(url).await?;
    Ok(feed
        .entries
        .into_iter()
        .map(|entry| (content_id(&entry.native_id), entry))
        .collect())
}
