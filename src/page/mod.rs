//! Document-page fetching and image extraction.
//!
//! One GET per page; every `<img src>` is extracted in document order so
//! ordinal-based output filenames are stable across re-fetches of unchanged
//! markup.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use tracing::{debug, instrument};

use crate::download::{FetchError, HttpClient, ImageRef};
use crate::parser::PageTarget;

#[allow(clippy::expect_used)]
static IMG_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img").expect("img selector is valid"));

/// Raw markup plus the images discovered on it, in document order.
#[derive(Debug)]
pub struct PageContent {
    /// Raw fetched markup, persisted alongside the images.
    pub html: String,
    /// Discovered images with 1-based ordinals.
    pub images: Vec<ImageRef>,
}

/// Fetches document pages and extracts their embedded images.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    http: HttpClient,
}

impl PageFetcher {
    /// Creates a fetcher sharing the run's HTTP client.
    #[must_use]
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Issues one GET to the canonical page URL.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::HttpStatus` on non-2xx responses and transport
    /// errors otherwise. The caller treats all of these as
    /// skip-and-continue, never fatal.
    #[instrument(skip(self), fields(url = %target.url))]
    pub async fn fetch(&self, target: &PageTarget) -> Result<PageContent, FetchError> {
        let html = self.http.get_text(&target.url).await?;
        let images = extract_images(&html, target.host.base_url());
        debug!(images = images.len(), "page fetched");
        Ok(PageContent { html, images })
    }
}

/// Extracts every `<img src>` in document order.
///
/// Ordinals are 1-based positions among images that carry a source, so a
/// given page always yields the same filenames. Root-relative sources
/// resolve against the page host; protocol-relative sources get `https`.
#[must_use]
pub fn extract_images(html: &str, base: &str) -> Vec<ImageRef> {
    let document = Html::parse_document(html);
    let mut images = Vec::new();

    for element in document.select(&IMG_SELECTOR) {
        let Some(src) = element.value().attr("src") else {
            continue;
        };
        if src.is_empty() {
            continue;
        }
        let url = if src.starts_with("//") {
            format!("https:{src}")
        } else if src.starts_with('/') {
            format!("{base}{src}")
        } else {
            src.to_string()
        };
        images.push(ImageRef::Url {
            url,
            ordinal: images.len() + 1,
        });
    }

    images
}
