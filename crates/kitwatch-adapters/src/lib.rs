//! Collaborator contracts (search, images, OCR) + the concrete adapters kitwatch ships with.

use std::path::PathBuf;

use async_trait::async_trait;
use kitwatch_core::RawListing;
use kitwatch_storage::{FetchError, HttpFetcher, RetryDisposition};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

pub mod ocr;

pub use ocr::{BoundingBox, OcrEngine, OcrError, OcrSpan, TesseractOcr};

pub const CRATE_NAME: &str = "kitwatch-adapters";

const CATALOG_API_PATH: &str = "/api/v2/catalog/items";
const DEFAULT_PER_PAGE: u32 = 96;

#[derive(Debug, Error)]
pub enum SearchError {
    /// Network or service-level failure worth retrying.
    #[error("transient search failure: {0}")]
    Transient(String),
    #[error("search failed: {0}")]
    Fatal(String),
}

impl SearchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SearchError::Transient(_))
    }
}

impl From<FetchError> for SearchError {
    fn from(err: FetchError) -> Self {
        match err.disposition() {
            RetryDisposition::Retryable => SearchError::Transient(err.to_string()),
            RetryDisposition::NonRetryable => SearchError::Fatal(err.to_string()),
        }
    }
}

/// Marketplace search capability: one query URL in, listings out.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query_url: &str) -> Result<Vec<RawListing>, SearchError>;
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("retrieving image {url}: {reason}")]
    Retrieval { url: String, reason: String },
    #[error("decoding image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Source of raw image bytes for listing photos.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, ImageError>;
}

#[async_trait]
impl ImageSource for HttpFetcher {
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        self.fetch_bytes(url)
            .await
            .map(|resp| resp.body)
            .map_err(|err| ImageError::Retrieval {
                url: url.to_string(),
                reason: err.to_string(),
            })
    }
}

pub fn decode_image(bytes: &[u8]) -> Result<image::DynamicImage, ImageError> {
    Ok(image::load_from_memory(bytes)?)
}

/// `base` + form-encoded `search_text` and `order` (spaces become `+`).
pub fn catalog_search_url(base: &str, search_text: &str, order: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("search_text", search_text)
        .append_pair("order", order)
        .finish();
    format!("{base}{query}")
}

/// Map a public catalog URL onto the JSON endpoint serving the same search.
pub fn catalog_api_url(catalog_url: &str, per_page: u32) -> Result<Url, SearchError> {
    let catalog = Url::parse(catalog_url)
        .map_err(|e| SearchError::Fatal(format!("invalid catalog url {catalog_url}: {e}")))?;
    let mut api = catalog.clone();
    api.set_path(CATALOG_API_PATH);
    api.set_query(None);
    {
        let mut pairs = api.query_pairs_mut();
        for (key, value) in catalog.query_pairs() {
            pairs.append_pair(&key, &value);
        }
        pairs.append_pair("page", "1");
        pairs.append_pair("per_page", &per_page.to_string());
    }
    Ok(api)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogResponse {
    #[serde(default)]
    pub items: Vec<CatalogItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogItem {
    #[serde(default)]
    pub id: JsonValue,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub brand_title: Option<String>,
    #[serde(default)]
    pub size_title: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub price: Option<CatalogPrice>,
    #[serde(default)]
    pub photo: Option<CatalogPhoto>,
    #[serde(default)]
    pub photos: Vec<CatalogPhoto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CatalogPrice {
    Amount { amount: JsonValue },
    Plain(JsonValue),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogPhoto {
    #[serde(default)]
    pub full_size_url: Option<String>,
}

fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => text_or_none(s),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl CatalogItem {
    /// `None` when the record has no usable identifier.
    pub fn into_listing(self) -> Option<RawListing> {
        let id = scalar_to_string(&self.id)?;
        let mut photo_urls: Vec<String> = self
            .photos
            .iter()
            .filter_map(|p| p.full_size_url.as_deref().and_then(text_or_none))
            .collect();
        if photo_urls.is_empty() {
            if let Some(url) = self.photo.as_ref().and_then(|p| p.full_size_url.as_deref()).and_then(text_or_none) {
                photo_urls.push(url);
            }
        }
        let price = self.price.as_ref().and_then(|p| match p {
            CatalogPrice::Amount { amount } => scalar_to_string(amount),
            CatalogPrice::Plain(value) => scalar_to_string(value),
        });

        Some(RawListing {
            id,
            title: self.title.as_deref().map(str::trim).unwrap_or_default().to_string(),
            brand: self.brand_title.as_deref().and_then(text_or_none).map(|b| b.to_lowercase()),
            size: self.size_title.as_deref().and_then(text_or_none),
            status: self.status.as_deref().and_then(text_or_none),
            url: self.url.as_deref().and_then(text_or_none),
            price,
            photo_urls,
        })
    }
}

impl CatalogResponse {
    pub fn into_listings(self) -> Vec<RawListing> {
        self.items
            .into_iter()
            .filter_map(|item| {
                let listing = item.into_listing();
                if listing.is_none() {
                    debug!("skipping catalog record without id");
                }
                listing
            })
            .collect()
    }
}

pub fn parse_catalog_response(bytes: &[u8]) -> Result<Vec<RawListing>, SearchError> {
    let payload: CatalogResponse = serde_json::from_slice(bytes)
        .map_err(|e| SearchError::Fatal(format!("parsing catalog response: {e}")))?;
    Ok(payload.into_listings())
}

/// Live marketplace client. Primes session cookies from the site root once, then
/// queries the catalog JSON endpoint.
#[derive(Debug)]
pub struct MarketplaceClient {
    http: HttpFetcher,
    session: OnceCell<()>,
}

impl MarketplaceClient {
    pub fn new(http: HttpFetcher) -> Self {
        Self {
            http,
            session: OnceCell::new(),
        }
    }

    async fn ensure_session(&self, api_url: &Url) -> Result<(), SearchError> {
        self.session
            .get_or_try_init(|| async {
                let root = format!("{}/", api_url.origin().ascii_serialization());
                info!(%root, "priming marketplace session");
                self.http.fetch_bytes(&root).await?;
                Ok::<(), SearchError>(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SearchClient for MarketplaceClient {
    async fn search(&self, query_url: &str) -> Result<Vec<RawListing>, SearchError> {
        let api_url = catalog_api_url(query_url, DEFAULT_PER_PAGE)?;
        self.ensure_session(&api_url).await?;
        let resp = self.http.fetch_bytes(api_url.as_str()).await?;
        debug!(final_url = %resp.final_url, bytes = resp.body.len(), "catalog page received");
        parse_catalog_response(&resp.body)
    }
}

/// Offline client answering every query with the catalog response stored at `path`.
#[derive(Debug, Clone)]
pub struct FixtureSearchClient {
    path: PathBuf,
}

impl FixtureSearchClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SearchClient for FixtureSearchClient {
    async fn search(&self, query_url: &str) -> Result<Vec<RawListing>, SearchError> {
        debug!(query_url, fixture = %self.path.display(), "serving search from fixture");
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| SearchError::Fatal(format!("reading fixture {}: {e}", self.path.display())))?;
        parse_catalog_response(&bytes)
    }
}
