//! Network and image implementations of the collaborator traits.

mod crop;
mod feed;
mod picker;

use std::time::Duration;

use placetime_core::defaults::USER_AGENT;
use placetime_core::{Error, Result};

pub use crop::SalienceCropper;
pub use feed::{parse_feed, HttpFeedSource};
pub use picker::{extract_candidates, HttpImagePicker};

/// Build the HTTP client shared by the adapters.
pub fn http_client(request_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(request_timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))
}
