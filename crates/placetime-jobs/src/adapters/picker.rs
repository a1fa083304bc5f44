//! Representative image selection for web pages.

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView};
use reqwest::header::CONTENT_TYPE;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use placetime_core::defaults::{IMAGE_MAX_CANDIDATES, IMAGE_MIN_DIMENSION};
use placetime_core::{Error, ImagePicker, Result};

/// Selectors tried in order, paired with the attribute holding the URL.
const CANDIDATE_SOURCES: &[(&str, &str)] = &[
    (r#"meta[property="og:image"]"#, "content"),
    (r#"meta[property="og:image:url"]"#, "content"),
    (r#"meta[name="twitter:image"]"#, "content"),
    (r#"meta[property="twitter:image"]"#, "content"),
    (r#"link[rel="image_src"]"#, "href"),
    ("img[src]", "src"),
];

/// [`ImagePicker`] that inspects a page over HTTP.
///
/// A URL serving an image is taken as the only candidate. An HTML page is
/// scanned for declared preview images and inline images; the largest
/// candidate with both sides at least `min_dimension` wins.
#[derive(Clone)]
pub struct HttpImagePicker {
    client: reqwest::Client,
    min_dimension: u32,
    max_candidates: usize,
}

impl HttpImagePicker {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            min_dimension: IMAGE_MIN_DIMENSION,
            max_candidates: IMAGE_MAX_CANDIDATES,
        }
    }

    /// Smallest accepted width and height.
    pub fn with_min_dimension(mut self, min: u32) -> Self {
        self.min_dimension = min;
        self
    }

    /// Upper bound on candidate images downloaded per page.
    pub fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max;
        self
    }

    fn qualifies(&self, image: &DynamicImage) -> bool {
        let (w, h) = image.dimensions();
        w >= self.min_dimension && h >= self.min_dimension
    }

    async fn fetch_image(&self, url: &str) -> Result<DynamicImage> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        let bytes = response.bytes().await?;
        Ok(image::load_from_memory(&bytes)?)
    }
}

#[async_trait]
impl ImagePicker for HttpImagePicker {
    async fn pick(&self, url: &str) -> Result<Option<DynamicImage>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("{} returned {}", url, status)));
        }
        let page_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("image/") {
            let bytes = response.bytes().await?;
            let image = image::load_from_memory(&bytes)?;
            return Ok(self.qualifies(&image).then_some(image));
        }

        let html = response.text().await?;
        let candidates = extract_candidates(&html, &page_url);
        debug!(
            subsystem = "images",
            url,
            candidates = candidates.len(),
            "Scanned page for images"
        );

        let mut best: Option<DynamicImage> = None;
        for candidate in candidates.iter().take(self.max_candidates) {
            let image = match self.fetch_image(candidate.as_str()).await {
                Ok(image) => image,
                Err(e) => {
                    debug!(subsystem = "images", url = %candidate, error = %e, "Skipping candidate");
                    continue;
                }
            };
            if !self.qualifies(&image) {
                continue;
            }
            let area = u64::from(image.width()) * u64::from(image.height());
            let best_area = best
                .as_ref()
                .map_or(0, |b| u64::from(b.width()) * u64::from(b.height()));
            if area > best_area {
                best = Some(image);
            }
        }
        Ok(best)
    }
}

/// Candidate image URLs declared by an HTML page, resolved against
/// `base` and deduplicated, in preference order.
pub fn extract_candidates(html: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let mut candidates: Vec<Url> = Vec::new();

    for (selector, attr) in CANDIDATE_SOURCES {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        for element in document.select(&selector) {
            let Some(raw) = element.value().attr(attr) else {
                continue;
            };
            let raw = raw.trim();
            if raw.is_empty() || raw.starts_with("data:") {
                continue;
            }
            let Ok(resolved) = base.join(raw) else {
                continue;
            };
            if !matches!(resolved.scheme(), "http" | "https") {
                continue;
            }
            if !candidates.contains(&resolved) {
                candidates.push(resolved);
            }
        }
    }
    candidates
}
