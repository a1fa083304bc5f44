//! In-memory collaborators for deterministic testing.
//!
//! Every mock is cheap to clone and clones share state, so a test can hand
//! one copy to the job engine and keep another to inspect what happened.
//!
//! ## Usage
//!
//! ```rust
//! use placetime_core::mock::{MockDatastore, MockFeedSource};
//! use placetime_core::{ParsedFeed, Profile};
//!
//! let store = MockDatastore::new().with_profile(Profile {
//!     pid: "bbc".into(),
//!     feed_url: "https://feeds.example/bbc".into(),
//!     follower_count: 0,
//! });
//! let feeds = MockFeedSource::new().with_feed("https://feeds.example/bbc", ParsedFeed::default());
//! assert!(store.upserts().is_empty());
//! assert!(feeds.calls().is_empty());
//! ```

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use image::{DynamicImage, Rgb, RgbImage};

use crate::error::{Error, Result};
use crate::models::*;
use crate::traits::*;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// CONCURRENCY PROBE
// =============================================================================

/// Tracks how many calls are in flight and the highest count observed.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
}

/// Decrements the in-flight count when dropped.
pub struct ProbeGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a call.
    pub fn enter(&self) -> ProbeGuard {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        ProbeGuard {
            in_flight: self.in_flight.clone(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of calls that have started.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

// =============================================================================
// DATASTORE
// =============================================================================

#[derive(Debug, Default)]
struct StoreState {
    profiles: Vec<Profile>,
    items: BTreeMap<String, Item>,
    needs_image: VecDeque<String>,
    upserts: Vec<UpsertItem>,
    updates: Vec<Item>,
    grab_sizes: Vec<usize>,
    released: Vec<String>,
    fail_profiles: bool,
    fail_grabs: bool,
    fail_updates: bool,
    fail_upsert_ids: HashSet<String>,
}

/// In-memory [`Datastore`] that records every call.
#[derive(Debug, Clone, Default)]
pub struct MockDatastore {
    state: Arc<Mutex<StoreState>>,
}

impl MockDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a feed-driven profile.
    pub fn with_profile(self, profile: Profile) -> Self {
        lock(&self.state).profiles.push(profile);
        self
    }

    /// Add an item. Items without an image join the "needs image" set.
    pub fn with_item(self, item: Item) -> Self {
        {
            let mut state = lock(&self.state);
            if item.image.is_none() {
                state.needs_image.push_back(item.id.clone());
            }
            state.items.insert(item.id.clone(), item);
        }
        self
    }

    /// Add `count` items for `pid` that all still need an image.
    pub fn with_items_needing_images(mut self, pid: &str, count: usize) -> Self {
        for n in 0..count {
            self = self.with_item(sample_item(pid, n));
        }
        self
    }

    pub fn failing_profiles(self) -> Self {
        lock(&self.state).fail_profiles = true;
        self
    }

    pub fn failing_grabs(self) -> Self {
        lock(&self.state).fail_grabs = true;
        self
    }

    pub fn failing_updates(self) -> Self {
        lock(&self.state).fail_updates = true;
        self
    }

    /// Make `upsert_item` fail for one specific item id.
    pub fn failing_upsert_for(self, id: &str) -> Self {
        lock(&self.state).fail_upsert_ids.insert(id.to_string());
        self
    }

    /// Every upsert attempted, including failed ones, in call order.
    pub fn upserts(&self) -> Vec<UpsertItem> {
        lock(&self.state).upserts.clone()
    }

    /// Every successful `update_item`, in call order.
    pub fn updates(&self) -> Vec<Item> {
        lock(&self.state).updates.clone()
    }

    /// Size of each batch returned by `grab_items_needing_images`.
    pub fn grab_sizes(&self) -> Vec<usize> {
        lock(&self.state).grab_sizes.clone()
    }

    /// Every id passed to `release_items`, in call order.
    pub fn released(&self) -> Vec<String> {
        lock(&self.state).released.clone()
    }

    pub fn item(&self, id: &str) -> Option<Item> {
        lock(&self.state).items.get(id).cloned()
    }

    pub fn item_count(&self) -> usize {
        lock(&self.state).items.len()
    }
}

#[async_trait]
impl Datastore for MockDatastore {
    async fn feed_driven_profiles(&self) -> Result<Vec<Profile>> {
        let state = lock(&self.state);
        if state.fail_profiles {
            return Err(Error::Internal("profile listing unavailable".into()));
        }
        Ok(state.profiles.clone())
    }

    async fn grab_items_needing_images(&self, limit: usize) -> Result<Vec<Item>> {
        let mut state = lock(&self.state);
        if state.fail_grabs {
            return Err(Error::Internal("item listing unavailable".into()));
        }
        let mut batch = Vec::with_capacity(limit);
        while batch.len() < limit {
            let Some(id) = state.needs_image.pop_front() else {
                break;
            };
            if let Some(item) = state.items.get(&id) {
                batch.push(item.clone());
            }
        }
        state.grab_sizes.push(batch.len());
        Ok(batch)
    }

    async fn release_items(&self, ids: &[String]) -> Result<()> {
        let mut state = lock(&self.state);
        state.released.extend(ids.iter().cloned());
        // Released items go back to the front, in their original order.
        for id in ids.iter().rev() {
            let waiting = state
                .items
                .get(id)
                .is_some_and(|item| item.image.is_none());
            if waiting && !state.needs_image.contains(id) {
                state.needs_image.push_front(id.clone());
            }
        }
        Ok(())
    }

    async fn upsert_item(&self, item: UpsertItem) -> Result<()> {
        let mut state = lock(&self.state);
        state.upserts.push(item.clone());
        if state.fail_upsert_ids.contains(&item.id) {
            return Err(Error::Internal(format!("upsert rejected for {}", item.id)));
        }
        match state.items.get_mut(&item.id) {
            Some(existing) => {
                existing.text = item.text;
                existing.link = item.link;
                existing.event = item.event;
            }
            None => {
                if item.image.is_none() {
                    state.needs_image.push_back(item.id.clone());
                }
                state.items.insert(
                    item.id.clone(),
                    Item {
                        id: item.id,
                        pid: item.pid,
                        event: item.event,
                        text: item.text,
                        link: item.link,
                        image: item.image,
                        media: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn get_item(&self, id: &str) -> Result<Item> {
        lock(&self.state)
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("item {}", id)))
    }

    async fn update_item(&self, item: &Item) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_updates {
            return Err(Error::Internal("item update rejected".into()));
        }
        if !state.items.contains_key(&item.id) {
            return Err(Error::NotFound(format!("item {}", item.id)));
        }
        state.items.insert(item.id.clone(), item.clone());
        state.updates.push(item.clone());
        Ok(())
    }
}

/// Deterministic item used by fixtures: id `item-<n>`, link on example.com.
pub fn sample_item(pid: &str, n: usize) -> Item {
    Item {
        id: format!("item-{}", n),
        pid: pid.to_string(),
        event: Utc.timestamp_opt(1_700_000_000 + n as i64, 0).single().unwrap_or_default(),
        text: format!("Item {}", n),
        link: format!("https://example.com/{}/{}", pid, n),
        image: None,
        media: None,
    }
}

// =============================================================================
// FEED SOURCE
// =============================================================================

#[derive(Debug, Clone)]
enum FeedResponse {
    Feed(ParsedFeed),
    TransportError,
    ParseError,
}

/// [`FeedSource`] answering from a fixed URL table.
///
/// Unknown URLs fail with a transport error.
#[derive(Debug, Clone, Default)]
pub struct MockFeedSource {
    responses: Arc<Mutex<HashMap<String, FeedResponse>>>,
    calls: Arc<Mutex<Vec<String>>>,
    latency: Duration,
    probe: ConcurrencyProbe,
}

impl MockFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(self, url: &str, feed: ParsedFeed) -> Self {
        lock(&self.responses).insert(url.to_string(), FeedResponse::Feed(feed));
        self
    }

    /// Serve a feed built from `(native_id, title)` pairs.
    pub fn with_entries(self, url: &str, entries: &[(&str, &str)]) -> Self {
        let entries = entries
            .iter()
            .enumerate()
            .map(|(n, (native_id, title))| FeedEntry {
                native_id: native_id.to_string(),
                title: title.to_string(),
                link: format!("{}/{}", url, native_id),
                published: Utc.timestamp_opt(1_700_000_000 + n as i64, 0).single().unwrap_or_default(),
            })
            .collect();
        self.with_feed(
            url,
            ParsedFeed {
                title: None,
                entries,
            },
        )
    }

    pub fn with_transport_error(self, url: &str) -> Self {
        lock(&self.responses).insert(url.to_string(), FeedResponse::TransportError);
        self
    }

    pub fn with_parse_error(self, url: &str) -> Self {
        lock(&self.responses).insert(url.to_string(), FeedResponse::ParseError);
        self
    }

    /// Delay every fetch, holding the caller for `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn probe(&self) -> &ConcurrencyProbe {
        &self.probe
    }
}

#[async_trait]
impl FeedSource for MockFeedSource {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed> {
        let _guard = self.probe.enter();
        lock(&self.calls).push(url.to_string());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let response = lock(&self.responses).get(url).cloned();
        match response {
            Some(FeedResponse::Feed(feed)) => Ok(feed),
            Some(FeedResponse::ParseError) => Err(Error::Parse(format!("{} is not a feed", url))),
            Some(FeedResponse::TransportError) | None => {
                Err(Error::Transport(format!("{} unreachable", url)))
            }
        }
    }
}

// =============================================================================
// IMAGE PICKER AND CROPPER
// =============================================================================

/// [`ImagePicker`] answering from a fixed URL table.
///
/// Unknown URLs have no candidate.
#[derive(Debug, Clone, Default)]
pub struct MockImagePicker {
    images: Arc<Mutex<HashMap<String, DynamicImage>>>,
    errors: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
    latency: Duration,
    probe: ConcurrencyProbe,
}

impl MockImagePicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, url: &str, image: DynamicImage) -> Self {
        lock(&self.images).insert(url.to_string(), image);
        self
    }

    pub fn with_error(self, url: &str) -> Self {
        lock(&self.errors).insert(url.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn probe(&self) -> &ConcurrencyProbe {
        &self.probe
    }
}

#[async_trait]
impl ImagePicker for MockImagePicker {
    async fn pick(&self, url: &str) -> Result<Option<DynamicImage>> {
        let _guard = self.probe.enter();
        lock(&self.calls).push(url.to_string());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if lock(&self.errors).contains(url) {
            return Err(Error::Transport(format!("{} unreachable", url)));
        }
        Ok(lock(&self.images).get(url).cloned())
    }
}

/// [`ImageCropper`] that stretches to the target size and counts calls.
#[derive(Debug, Clone, Default)]
pub struct MockCropper {
    calls: Arc<AtomicUsize>,
}

impl MockCropper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageCropper for MockCropper {
    fn crop(&self, image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
        self.calls.fetch_add(1, Ordering::SeqCst);
        image.resize_exact(width, height, image::imageops::FilterType::Nearest)
    }
}

/// A single-colour RGB image.
pub fn solid_image(width: u32, height: u32, rgb: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(rgb)))
}
