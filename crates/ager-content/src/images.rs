//! Image URL heuristics, placeholders and optional image search.

use crate::error::ServiceError;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(8);

const DIRECT_IMAGE_EXTENSIONS: [&str; 4] = [".jpg", ".jpeg", ".png", ".webp"];
const DIRECT_IMAGE_HOSTS: [&str; 4] = [
    "images.unsplash.com",
    "source.unsplash.com",
    "picsum.photos",
    "i.imgur.com",
];
/// Paths that point at HTML pages rather than image files.
const NON_IMAGE_PAGE_PATTERNS: [&str; 11] = [
    "unsplash.com/photos/",
    "/dp/",
    "/gp/product/",
    "/product/",
    "/products/",
    "/item/",
    "/itm/",
    ".html",
    ".htm",
    ".php",
    ".aspx",
];

const UNSPLASH_SEARCH_URL: &str = "https://api.unsplash.com/search/photos";
const GOOGLE_CSE_URL: &str = "https://www.googleapis.com/customsearch/v1";

/// Whether `url` plausibly serves an image directly.
///
/// Known image extensions and hosts are accepted; known page patterns are
/// rejected; anything else over http(s) is given the benefit of the doubt.
pub fn is_likely_image_url(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    if !lower.starts_with("http") {
        return false;
    }
    let path = lower.split(['?', '#']).next().unwrap_or(&lower);

    if DIRECT_IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return true;
    }
    if DIRECT_IMAGE_HOSTS.iter().any(|host| lower.contains(host)) {
        return true;
    }
    if NON_IMAGE_PAGE_PATTERNS.iter().any(|pat| path.contains(pat)) {
        return false;
    }
    true
}

/// Deterministic placeholder image for a seed string.
pub fn placeholder_image(seed: &str) -> String {
    let seed: String = seed
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    format!("https://picsum.photos/seed/{seed}/800/600")
}

/// Wide banner placeholder for an age band's lower bound.
pub fn banner_image(band_lower: u32) -> String {
    format!("https://picsum.photos/seed/wellness-{band_lower}/1200/400")
}

/// Best-effort image lookup by free-text query.
#[async_trait]
pub trait ImageSearch: Send + Sync {
    fn name(&self) -> &str;
    async fn first_image(&self, query: &str) -> Result<Option<String>, ServiceError>;
}

pub struct UnsplashSearch {
    http: HttpClient,
    access_key: String,
    width: u32,
}

impl UnsplashSearch {
    pub fn new(access_key: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            access_key: access_key.into(),
            width: 800,
        }
    }

    fn first_url(body: &Value, width: u32) -> Option<String> {
        let urls = body.get("results")?.get(0)?.get("urls")?;
        let url = urls
            .get("regular")
            .or_else(|| urls.get("small"))?
            .as_str()
            .filter(|u| !u.is_empty())?;
        let sep = if url.contains('?') { '&' } else { '?' };
        Some(format!("{url}{sep}w={width}&auto=format&fit=crop"))
    }
}

#[async_trait]
impl ImageSearch for UnsplashSearch {
    fn name(&self) -> &str {
        "unsplash"
    }

    async fn first_image(&self, query: &str) -> Result<Option<String>, ServiceError> {
        let query = if query.trim().is_empty() { "wellness product" } else { query };
        let response = self
            .http
            .get(UNSPLASH_SEARCH_URL)
            .query(&[("query", query), ("per_page", "1"), ("orientation", "landscape")])
            .header(AUTHORIZATION, format!("Client-ID {}", self.access_key))
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ServiceError::Status {
                status: response.status().as_u16(),
                body: String::new(),
            });
        }
        let body: Value = response.json().await?;
        Ok(Self::first_url(&body, self.width))
    }
}

pub struct GoogleCseSearch {
    http: HttpClient,
    key: String,
    cx: String,
}

impl GoogleCseSearch {
    pub fn new(key: impl Into<String>, cx: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            key: key.into(),
            cx: cx.into(),
        }
    }

    fn first_link(body: &Value) -> Option<String> {
        let item = body.get("items")?.get(0)?;
        item.get("link")
            .or_else(|| item.get("linkUrl"))?
            .as_str()
            .filter(|u| !u.is_empty())
            .map(str::to_string)
    }
}

#[async_trait]
impl ImageSearch for GoogleCseSearch {
    fn name(&self) -> &str {
        "google_cse"
    }

    async fn first_image(&self, query: &str) -> Result<Option<String>, ServiceError> {
        if query.trim().is_empty() {
            return Ok(None);
        }
        let response = self
            .http
            .get(GOOGLE_CSE_URL)
            .query(&[
                ("key", self.key.as_str()),
                ("cx", self.cx.as_str()),
                ("q", query),
                ("searchType", "image"),
                ("num", "1"),
                ("safe", "active"),
            ])
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ServiceError::Status {
                status: response.status().as_u16(),
                body: String::new(),
            });
        }
        let body: Value = response.json().await?;
        Ok(Self::first_link(&body))
    }
}

/// Picks a fetchable image for a list entry.
#[derive(Clone, Default)]
pub struct ImageResolver {
    search: Option<Arc<dyn ImageSearch>>,
}

impl ImageResolver {
    pub fn new(search: Option<Arc<dyn ImageSearch>>) -> Self {
        Self { search }
    }

    /// Keep `current` if it looks like an image; otherwise try the search
    /// provider, then fall back to a placeholder keyed by `seed`.
    pub async fn resolve(&self, current: Option<&str>, query: &str, seed: &str) -> String {
        if let Some(url) = current.map(str::trim).filter(|u| is_likely_image_url(u)) {
            return url.to_string();
        }

        if let Some(search) = &self.search {
            match search.first_image(query).await {
                Ok(Some(found)) if found.starts_with("http") => return found,
                Ok(_) => tracing::debug!(provider = search.name(), query, "image search returned nothing"),
                Err(e) => tracing::warn!(provider = search.name(), query, error = %e, "image search failed"),
            }
        }

        placeholder_image(seed)
    }
}
