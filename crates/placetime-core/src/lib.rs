//! # placetime-core
//!
//! Core types, traits, and abstractions for the placetime fetcher.
//!
//! This crate provides the data model shared by the scheduler, the worker
//! pool and the datastore, plus the collaborator traits the job engine is
//! written against.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | A job or pump step failed and was abandoned |
//! | INFO  | Lifecycle events (startup, shutdown), pump summaries |
//! | DEBUG | Per-job decisions, enqueue/dequeue |
//! | TRACE | Per-entry iteration inside a feed |

pub mod content_id;
pub mod defaults;
pub mod error;
pub mod mock;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use content_id::content_id;
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;

/// Re-exported so downstream crates name the same image type as the traits.
pub use image::DynamicImage;
