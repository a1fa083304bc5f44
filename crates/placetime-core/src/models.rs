//! Data model shared by the scheduler, the jobs and the datastore.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// =============================================================================
// PROFILES AND ITEMS
// =============================================================================

/// An entity that owns a feed and accumulates items derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Stable profile identifier.
    pub pid: String,
    /// URL of the profile's feed.
    pub feed_url: String,
    /// Number of followers, maintained by the datastore.
    pub follower_count: i64,
}

/// Kind of media an item represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Text,
    Image,
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Text => "text",
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MediaKind::Text),
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            other => Err(Error::Internal(format!("unknown media kind: {}", other))),
        }
    }
}

/// One unit of content ingested from a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Content-addressed id (see [`crate::content_id`]).
    pub id: String,
    /// Owning profile.
    pub pid: String,
    /// Publication time of the entry.
    pub event: DateTime<Utc>,
    /// Entry title.
    pub text: String,
    /// Entry link; also the page searched for an image.
    pub link: String,
    /// File name of the cropped image, relative to the image directory.
    pub image: Option<String>,
    /// Media kind, set once an image has been attached.
    pub media: Option<MediaKind>,
}

/// Parameters for inserting or refreshing an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertItem {
    pub pid: String,
    pub id: String,
    pub text: String,
    pub link: String,
    pub image: Option<String>,
    pub event: DateTime<Utc>,
}

// =============================================================================
// FEEDS
// =============================================================================

/// One entry as reported by a feed source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// Identifier assigned by the feed itself (guid, atom id, ...).
    pub native_id: String,
    pub title: String,
    pub link: String,
    pub published: DateTime<Utc>,
}

/// A fetched and parsed feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    /// Entries in document order.
    pub entries: Vec<FeedEntry>,
}
