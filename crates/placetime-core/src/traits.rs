//! Collaborator traits the job engine is written against.
//!
//! The scheduler and the jobs only ever see these traits; the HTTP, image
//! and PostgreSQL implementations live in `placetime-jobs::adapters` and
//! `placetime-db`, and in-memory versions live in [`crate::mock`].

use async_trait::async_trait;
use image::DynamicImage;

use crate::error::Result;
use crate::models::*;

/// Retrieves and parses a feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the feed at `url`.
    ///
    /// Fails with `Error::Transport` when the document cannot be retrieved
    /// and `Error::Parse` when it is not a feed.
    async fn fetch(&self, url: &str) -> Result<ParsedFeed>;
}

/// Selects a representative image for a web page.
#[async_trait]
pub trait ImagePicker: Send + Sync {
    /// Pick a candidate image for `url`, or `None` if the page has none.
    async fn pick(&self, url: &str) -> Result<Option<DynamicImage>>;
}

/// Crops an image to an exact size.
pub trait ImageCropper: Send + Sync {
    /// Return an image of exactly `width` x `height`.
    ///
    /// Must be deterministic: the same input always yields the same crop.
    fn crop(&self, image: &DynamicImage, width: u32, height: u32) -> DynamicImage;
}

/// Profile and item storage.
///
/// Implementations acquire whatever connection they need per call and
/// release it before returning, on success and on error.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// All profiles whose content comes from a feed.
    async fn feed_driven_profiles(&self) -> Result<Vec<Profile>>;

    /// Claim up to `limit` items that still lack an image.
    ///
    /// Claimed items leave the "needs image" set, so repeated calls
    /// eventually return an empty batch. Returns fewer than `limit` items
    /// only when the set is exhausted.
    async fn grab_items_needing_images(&self, limit: usize) -> Result<Vec<Item>>;

    /// Put claimed items that never got a job back into the "needs image"
    /// set. Items that have an image by now stay out of it.
    async fn release_items(&self, ids: &[String]) -> Result<()>;

    /// Insert an item or refresh an existing one with the same id.
    async fn upsert_item(&self, item: UpsertItem) -> Result<()>;

    /// Fetch an item by id; `Error::NotFound` if absent.
    async fn get_item(&self, id: &str) -> Result<Item>;

    /// Persist changes to an existing item.
    async fn update_item(&self, item: &Item) -> Result<()>;
}
