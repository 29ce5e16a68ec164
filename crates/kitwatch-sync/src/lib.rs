//! Watch pipeline orchestration: query variants → listings → classified, deduped, persisted items.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use kitwatch_adapters::{FixtureSearchClient, ImageSource, MarketplaceClient, OcrEngine, SearchClient, TesseractOcr};
use kitwatch_core::{extract_season, ClassifiedCandidate, KitVariantClassifier, PersistedItem, PlayerMatcher, RawListing};
use kitwatch_storage::{HttpClientConfig, HttpFetcher, ItemStore};
use serde::Serialize;
use tokio::fs;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod config;
pub mod fetcher;
pub mod filter;
pub mod player;

pub use config::{RuntimeConfig, SearchMode, WatchConfig};
pub use fetcher::{BackoffPolicy, FetchOutcome, ResilientFetcher};
pub use filter::{DedupFilter, OwnershipCatalog, Rejection, RelevanceFilter, SeenSet};
pub use player::PlayerResolver;

pub const CRATE_NAME: &str = "kitwatch-sync";

#[derive(Debug, Clone, Serialize)]
pub struct VariantReport {
    pub search_text: String,
    pub query_url: String,
    pub outcome: String,
    pub attempts: u32,
    pub listings: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: String,
    pub variants: Vec<VariantReport>,
    pub listings_fetched: usize,
    pub rejected: BTreeMap<String, usize>,
    pub accepted: Vec<PersistedItem>,
    pub error: Option<String>,
    pub reports_dir: Option<String>,
}

impl RunSummary {
    fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            status: "running".to_string(),
            variants: Vec::new(),
            listings_fetched: 0,
            rejected: BTreeMap::new(),
            accepted: Vec::new(),
            error: None,
            reports_dir: None,
        }
    }

    fn reject(&mut self, reason: Rejection) {
        *self.rejected.entry(reason.as_str().to_string()).or_default() += 1;
    }

    pub fn rejected_for(&self, reason: Rejection) -> usize {
        self.rejected.get(reason.as_str()).copied().unwrap_or(0)
    }

    /// Variants whose fetch did not produce listings.
    pub fn variants_failed(&self) -> usize {
        self.variants.iter().filter(|v| v.error.is_some()).count()
    }
}

pub struct KitPipeline {
    watch: WatchConfig,
    search: Box<dyn SearchClient>,
    resolver: PlayerResolver,
    kit: KitVariantClassifier,
    relevance: RelevanceFilter,
    owned: OwnershipCatalog,
    policy: BackoffPolicy,
    store: ItemStore,
    reports_dir: Option<PathBuf>,
}

impl KitPipeline {
    pub fn new(
        watch: WatchConfig,
        search: Box<dyn SearchClient>,
        images: Arc<dyn ImageSource>,
        ocr: Arc<dyn OcrEngine>,
        store: ItemStore,
    ) -> Result<Self> {
        watch.validate().context("validating watch configuration")?;
        let matcher = PlayerMatcher::new(
            &watch.players,
            &watch.exclusion_words,
            watch.matching.player_threshold,
            watch.matching.max_length_delta,
        );
        Ok(Self {
            resolver: PlayerResolver::new(images, ocr, matcher),
            kit: KitVariantClassifier::new(&watch.kit_keywords, watch.matching.kit_variant_threshold),
            relevance: RelevanceFilter::new(&watch.search),
            owned: OwnershipCatalog::new(watch.owned.iter().cloned()),
            policy: BackoffPolicy::from(&watch.retry),
            search,
            store,
            reports_dir: None,
            watch,
        })
    }

    pub fn with_reports_dir(mut self, reports_dir: Option<PathBuf>) -> Self {
        self.reports_dir = reports_dir;
        self
    }

    pub fn store(&self) -> &ItemStore {
        &self.store
    }

    /// One pass over every query variant. Accepted items are inserted as they are
    /// found, so a failure part-way keeps what was already stored. The run report
    /// is written whether or not the pass succeeded.
    pub async fn run_once(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::start();
        info!(run_id = %summary.run_id, owned = self.owned.len(), "starting watch run");

        let outcome = self.run_variants(&mut summary).await;
        summary.finished_at = Some(Utc::now());
        summary.status = if outcome.is_ok() { "completed" } else { "failed" }.to_string();
        if let Err(err) = &outcome {
            error!(run_id = %summary.run_id, error = %format!("{err:#}"), "watch run failed");
            summary.error = Some(format!("{err:#}"));
        }

        if let Some(root) = &self.reports_dir {
            match write_reports(root, &summary).await {
                Ok(dir) => summary.reports_dir = Some(dir.display().to_string()),
                Err(err) if outcome.is_err() => warn!(error = %format!("{err:#}"), "could not write report for failed run"),
                Err(err) => return Err(err),
            }
        }

        outcome.with_context(|| format!("watch run {}", summary.run_id))?;
        info!(
            run_id = %summary.run_id,
            fetched = summary.listings_fetched,
            accepted = summary.accepted.len(),
            failed_variants = summary.variants_failed(),
            "watch run complete"
        );
        Ok(summary)
    }

    async fn run_variants(&self, summary: &mut RunSummary) -> Result<()> {
        let seen: SeenSet = self.store.known_ids()?.into_iter().collect();
        debug!(known = seen.len(), "seeded seen-set from store");
        let mut dedup = DedupFilter::new(seen, self.owned.clone());

        for (search_text, query_url) in self.watch.query_urls() {
            let span = info_span!("query_variant", search_text = %search_text);
            self.run_variant(&mut dedup, search_text, query_url, summary)
                .instrument(span)
                .await?;
        }
        Ok(())
    }

    async fn run_variant(
        &self,
        dedup: &mut DedupFilter,
        search_text: String,
        query_url: String,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let delay = fetcher::random_delay(&self.watch.retry.inter_query_delay);
        debug!(delay_secs = delay.as_secs_f64(), "pausing before query");
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        let outcome = ResilientFetcher::new(self.search.as_ref(), self.policy)
            .fetch(&query_url)
            .await;
        let mut report = VariantReport {
            search_text,
            query_url,
            outcome: outcome.label().to_string(),
            attempts: outcome.attempts(),
            listings: 0,
            error: outcome.error().map(ToString::to_string),
        };
        let listings = outcome.into_listings();
        report.listings = listings.len();
        summary.listings_fetched += listings.len();
        summary.variants.push(report);

        for listing in listings {
            self.process_listing(dedup, listing, summary).await?;
        }
        Ok(())
    }

    async fn process_listing(&self, dedup: &mut DedupFilter, listing: RawListing, summary: &mut RunSummary) -> Result<()> {
        if !self.relevance.is_relevant(&listing) {
            debug!(id = %listing.id, title = %listing.title, "irrelevant listing");
            summary.reject(Rejection::Irrelevant);
            return Ok(());
        }

        let season = extract_season(&listing.title);
        let kit_variant = self.kit.classify(&listing.title);
        if let Err(reason) = dedup.precheck(&listing.id, season.as_deref(), kit_variant) {
            debug!(id = %listing.id, %reason, "rejected before photo analysis");
            summary.reject(reason);
            return Ok(());
        }

        let player = self.resolver.resolve(&listing.photo_urls).await;
        let candidate = ClassifiedCandidate {
            listing,
            season,
            kit_variant,
            player_name: player.map(|p| p.name),
        };
        if let Err(reason) = dedup.admit(&candidate) {
            debug!(id = %candidate.id(), %reason, "candidate rejected");
            summary.reject(reason);
            return Ok(());
        }

        let item = PersistedItem::from_candidate(candidate, Utc::now());
        if self.store.insert_item(&item)? {
            info!(
                id = %item.id,
                season = item.season.as_deref().unwrap_or("-"),
                kit_variant = item.kit_variant.map(|v| v.as_str()).unwrap_or("-"),
                player = item.player_name.as_deref().unwrap_or("-"),
                "new item saved"
            );
            summary.accepted.push(item);
        } else {
            warn!(id = %item.id, "item already present in store");
        }
        Ok(())
    }
}

async fn write_reports(root: &Path, summary: &RunSummary) -> Result<PathBuf> {
    let reports_dir = root.join(summary.run_id.to_string());
    fs::create_dir_all(&reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    let json = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(reports_dir.join("run_summary.json"), json)
        .await
        .context("writing run_summary.json")?;

    let brief = format!(
        "# Kit Watch Run\n\n- Run ID: `{}`\n- Status: {}\n- Started: {}\n- Finished: {}\n- Listings fetched: {}\n- New items: {}\n\n## Query Variants\n{}\n\n## Rejections\n{}\n\n## New Items\n{}\n",
        summary.run_id,
        summary.status,
        summary.started_at,
        summary
            .finished_at
            .map(|ts| ts.to_string())
            .unwrap_or_else(|| "-".to_string()),
        summary.listings_fetched,
        summary.accepted.len(),
        summary
            .variants
            .iter()
            .map(|v| format!("- {}: {} after {} attempt(s), {} listings", v.search_text, v.outcome, v.attempts, v.listings))
            .collect::<Vec<_>>()
            .join("\n"),
        summary
            .rejected
            .iter()
            .map(|(k, v)| format!("- {}: {}", k, v))
            .collect::<Vec<_>>()
            .join("\n"),
        summary
            .accepted
            .iter()
            .map(|item| {
                format!(
                    "- {} ({} / {} / {}) {}",
                    item.title,
                    item.season.as_deref().unwrap_or("?"),
                    item.kit_variant.map(|v| v.as_str()).unwrap_or("?"),
                    item.player_name.as_deref().unwrap_or("?"),
                    item.url.as_deref().unwrap_or("")
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
    );
    fs::write(reports_dir.join("run_brief.md"), brief)
        .await
        .context("writing run_brief.md")?;

    Ok(reports_dir)
}

pub fn open_store_from_env() -> Result<ItemStore> {
    let runtime = RuntimeConfig::from_env();
    ItemStore::open(&runtime.db_path)
}

fn load_watch_config(path: &Path) -> Result<WatchConfig> {
    if path.exists() {
        WatchConfig::load(path)
    } else {
        warn!(path = %path.display(), "watch file not found, using built-in defaults");
        Ok(WatchConfig::default())
    }
}

pub async fn run_once_from_env() -> Result<RunSummary> {
    let runtime = RuntimeConfig::from_env();
    let watch = load_watch_config(&runtime.watch_file)?;
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(runtime.http_timeout_secs),
        user_agent: Some(runtime.user_agent.clone()),
        ..Default::default()
    })?;
    let search: Box<dyn SearchClient> = match runtime.search_mode {
        SearchMode::Live => Box::new(MarketplaceClient::new(http.clone())),
        SearchMode::Fixture => Box::new(FixtureSearchClient::new(&runtime.fixture_path)),
    };
    let ocr = Arc::new(TesseractOcr::new(&runtime.tesseract_bin, &runtime.ocr_lang));
    let store = ItemStore::open(&runtime.db_path)?;

    let mut pipeline = KitPipeline::new(watch, search, Arc::new(http), ocr, store)?
        .with_reports_dir(runtime.reports_dir.clone());
    pipeline.run_once().await
}
