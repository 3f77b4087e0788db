//! Wellness content pipeline.
//!
//! prompt -> service -> extract -> dedup check -> repair. A reply that
//! repeats the previous payload for the same `(bucket, age)` is regenerated
//! with a fresh nonce up to [`MAX_DEDUP_RETRIES`] times; the final attempt
//! is accepted even if it repeats. Service failures and unparseable replies
//! end the request immediately.

use crate::cache::{fingerprint, CacheKey, DedupCache};
use crate::error::ContentError;
use crate::extract::parse_json_object;
use crate::images::ImageResolver;
use crate::prompt::{sample_style, Nonce, WellnessPrompt};
use crate::service::{GenerationConfig, GenerationRequest, GenerativeService, WELLNESS_TIMEOUT};
use ager_core::{AgeBucket, FeatureDescriptor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

pub const MAX_DEDUP_RETRIES: usize = 2;
pub const LIST_LEN: usize = 3;

const DEFAULT_TIPS_TITLE: &str = "Health Tips for Your Age";
const DEFAULT_PRODUCTS_TITLE: &str = "Recommended Products";
const DEFAULT_ARTICLES_TITLE: &str = "Health Articles";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub title: String,
    pub subtitle: String,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub summary: String,
    pub image: String,
}

/// Validated payload returned to clients. Both lists hold exactly
/// [`LIST_LEN`] entries and every entry has a non-empty image URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WellnessContent {
    pub profile_title: String,
    pub intro: String,
    pub tips_title: String,
    pub tips: String,
    pub products_title: String,
    pub products: Vec<Product>,
    pub articles_title: String,
    pub articles: Vec<Article>,
}

/// Reply as the service sent it. Fields of the wrong type read as absent
/// so they get the same repair as missing ones.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawWellness {
    #[serde(deserialize_with = "lenient_string")]
    profile_title: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    intro: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    tips_title: Option<String>,
    tips: Option<Value>,
    #[serde(deserialize_with = "lenient_string")]
    products_title: Option<String>,
    #[serde(deserialize_with = "lenient_entries")]
    products: Vec<RawEntry>,
    #[serde(deserialize_with = "lenient_string")]
    articles_title: Option<String>,
    #[serde(deserialize_with = "lenient_entries")]
    articles: Vec<RawEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawEntry {
    #[serde(deserialize_with = "lenient_string")]
    title: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    subtitle: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    summary: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    image: Option<String>,
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// Non-object list items are dropped; a non-list reads as empty.
fn lenient_entries<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<RawEntry>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter(Value::is_object)
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

impl RawEntry {
    fn title(&self) -> Option<&str> {
        self.title.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Tips arrive as a paragraph or, sometimes, as a list of sentences.
fn tips_text(value: Option<Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s,
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        _ => return None,
    };
    non_empty(Some(text))
}

fn titled(entries: Vec<RawEntry>, kind: &str) -> Result<Vec<RawEntry>, ContentError> {
    let kept: Vec<RawEntry> = entries
        .into_iter()
        .filter(|e| e.title().is_some())
        .take(LIST_LEN)
        .collect();
    if kept.len() < LIST_LEN {
        return Err(ContentError::Schema(format!(
            "expected {LIST_LEN} titled {kind}, got {}",
            kept.len()
        )));
    }
    Ok(kept)
}

/// Validate a parsed payload and fill in titles and images.
///
/// `freshness` goes into placeholder seeds so that each generation gets
/// its own placeholder set.
pub async fn repair(
    value: Value,
    bucket: AgeBucket,
    images: &ImageResolver,
    freshness: &str,
) -> Result<WellnessContent, ContentError> {
    let raw: RawWellness = serde_json::from_value(value).map_err(|e| ContentError::Schema(e.to_string()))?;

    let intro = non_empty(raw.intro).ok_or_else(|| ContentError::Schema("missing intro".into()))?;
    let tips = tips_text(raw.tips).ok_or_else(|| ContentError::Schema("missing tips".into()))?;
    let raw_products = titled(raw.products, "products")?;
    let raw_articles = titled(raw.articles, "articles")?;

    let mut products = Vec::with_capacity(LIST_LEN);
    for (idx, entry) in raw_products.iter().enumerate() {
        let title = entry.title().unwrap_or_default().to_string();
        let seed = format!("prod-{bucket}-{idx}-{freshness}");
        let image = images
            .resolve(entry.image.as_deref(), &format!("{title} health"), &seed)
            .await;
        products.push(Product {
            subtitle: entry.subtitle.clone().unwrap_or_default().trim().to_string(),
            title,
            image,
        });
    }

    let mut articles = Vec::with_capacity(LIST_LEN);
    for (idx, entry) in raw_articles.iter().enumerate() {
        let title = entry.title().unwrap_or_default().to_string();
        let seed = format!("art-{bucket}-{idx}-{freshness}");
        let image = images.resolve(entry.image.as_deref(), &title, &seed).await;
        articles.push(Article {
            summary: entry.summary.clone().unwrap_or_default().trim().to_string(),
            title,
            image,
        });
    }

    Ok(WellnessContent {
        profile_title: non_empty(raw.profile_title).unwrap_or_else(|| format!("Health Profile ({bucket})")),
        intro,
        tips_title: non_empty(raw.tips_title).unwrap_or_else(|| DEFAULT_TIPS_TITLE.to_string()),
        tips,
        products_title: non_empty(raw.products_title).unwrap_or_else(|| DEFAULT_PRODUCTS_TITLE.to_string()),
        products,
        articles_title: non_empty(raw.articles_title).unwrap_or_else(|| DEFAULT_ARTICLES_TITLE.to_string()),
        articles,
    })
}

/// Generates deduplicated, repaired wellness content.
#[derive(Clone)]
pub struct WellnessGenerator {
    service: Arc<dyn GenerativeService>,
    cache: Arc<DedupCache>,
    images: ImageResolver,
}

impl WellnessGenerator {
    pub fn new(service: Arc<dyn GenerativeService>, cache: Arc<DedupCache>, images: ImageResolver) -> Self {
        Self { service, cache, images }
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    /// `age` must already be validated to lie in [0, 120].
    pub async fn generate(
        &self,
        age: f64,
        features: Option<&FeatureDescriptor>,
    ) -> Result<WellnessContent, ContentError> {
        let bucket = AgeBucket::from_age(age);
        let key = CacheKey::new(bucket, age);
        let style = {
            let mut rng = rand::thread_rng();
            sample_style(&mut rng)
        };
        let prompt = WellnessPrompt { age, bucket, features, style };

        let mut retries = 0;
        loop {
            let nonce = Nonce::fresh();
            let request = GenerationRequest::text(prompt.render(&nonce), GenerationConfig::wellness(), WELLNESS_TIMEOUT);

            let raw = self.service.generate(&request).await.map_err(|e| {
                tracing::error!(age, %bucket, attempt = retries + 1, error = %e, "wellness generation failed");
                ContentError::from(e)
            })?;

            let value = parse_json_object(&raw).map_err(|e| {
                tracing::error!(age, %bucket, error = %e, reply_len = raw.len(), "wellness reply not parseable");
                e
            })?;

            let print = fingerprint(&value);
            if self.cache.is_repeat(&key, &print) && retries < MAX_DEDUP_RETRIES {
                retries += 1;
                tracing::info!(age, %bucket, retry = retries, "repeated wellness payload, regenerating");
                continue;
            }

            let freshness = Uuid::new_v4().simple().to_string();
            let content = repair(value, bucket, &self.images, &freshness).await?;
            self.cache.record(key, print);
            tracing::info!(age, %bucket, retries, "wellness content generated");
            return Ok(content);
        }
    }
}
