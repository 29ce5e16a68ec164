//! Runtime settings from the environment plus the watch definition from `watch.yaml`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use kitwatch_adapters::catalog_search_url;
use kitwatch_core::kit::DEFAULT_KIT_VARIANT_THRESHOLD;
use kitwatch_core::player::{DEFAULT_MAX_LENGTH_DELTA, DEFAULT_PLAYER_THRESHOLD};
use kitwatch_core::{KitKeywords, OwnershipKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Live,
    Fixture,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub db_path: PathBuf,
    pub watch_file: PathBuf,
    pub reports_dir: Option<PathBuf>,
    pub search_mode: SearchMode,
    pub fixture_path: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub tesseract_bin: PathBuf,
    pub ocr_lang: String,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("KITWATCH_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/kitwatch.sqlite3")),
            watch_file: std::env::var("KITWATCH_WATCH_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./watch.yaml")),
            reports_dir: match std::env::var("KITWATCH_REPORTS_DIR") {
                Ok(v) if v.trim().is_empty() => None,
                Ok(v) => Some(PathBuf::from(v)),
                Err(_) => Some(PathBuf::from("./reports")),
            },
            search_mode: std::env::var("KITWATCH_SEARCH_MODE")
                .map(|v| {
                    if v.trim().eq_ignore_ascii_case("fixture") {
                        SearchMode::Fixture
                    } else {
                        SearchMode::Live
                    }
                })
                .unwrap_or(SearchMode::Live),
            fixture_path: std::env::var("KITWATCH_FIXTURE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./fixtures/catalog/sample.json")),
            user_agent: std::env::var("KITWATCH_USER_AGENT").unwrap_or_else(|_| {
                "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0".to_string()
            }),
            http_timeout_secs: std::env::var("KITWATCH_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),
            tesseract_bin: std::env::var("KITWATCH_TESSERACT_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("tesseract")),
            ocr_lang: std::env::var("KITWATCH_OCR_LANG").unwrap_or_else(|_| "eng".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub base_url: String,
    pub search_text: String,
    pub order: String,
    /// Each brand adds a `"{search_text} {brand}"` query variant and feeds the brand allow-list.
    pub brands: Vec<String>,
    pub sizes: Vec<String>,
    pub required_terms: Vec<String>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.vinted.fr/catalog?".to_string(),
            search_text: "maillot arsenal".to_string(),
            order: "newest_first".to_string(),
            brands: vec!["nike".to_string(), "adidas".to_string()],
            sizes: vec![
                "XS".to_string(),
                "S".to_string(),
                "M".to_string(),
                "16 ans / 176cm".to_string(),
            ],
            required_terms: vec!["maillot".to_string(), "arsenal".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_secs: f64,
    pub max_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub backoff_base: f64,
    pub inter_query_delay: DelayRange,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2.0,
            inter_query_delay: DelayRange {
                min_secs: 1.5,
                max_secs: 3.0,
            },
        }
    }
}

/// Empirically tuned; treat changes as tuning, not fixes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingSettings {
    pub kit_variant_threshold: f64,
    pub player_threshold: f64,
    pub max_length_delta: usize,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            kit_variant_threshold: DEFAULT_KIT_VARIANT_THRESHOLD,
            player_threshold: DEFAULT_PLAYER_THRESHOLD,
            max_length_delta: DEFAULT_MAX_LENGTH_DELTA,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub search: SearchSettings,
    pub retry: RetrySettings,
    pub matching: MatchingSettings,
    pub kit_keywords: KitKeywords,
    pub exclusion_words: Vec<String>,
    pub players: Vec<String>,
    pub owned: Vec<OwnershipKey>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            search: SearchSettings::default(),
            retry: RetrySettings::default(),
            matching: MatchingSettings::default(),
            kit_keywords: KitKeywords::default(),
            exclusion_words: [
                "fly", "emirates", "better", "visit", "rwanda", "adidas", "nike", "arsenal",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            players: [
                "saka", "odegaard", "rice", "saliba", "gabriel", "white", "havertz",
                "martinelli", "trossard", "jesus", "partey", "timber", "raya", "kiwior",
                "calafiori", "merino", "nwaneri", "henry", "bergkamp", "vieira", "pires",
                "ljungberg", "fabregas", "van persie", "wright", "adams", "cazorla", "ozil",
                "aubameyang", "lacazette",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            owned: Vec::new(),
        }
    }
}

impl WatchConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: WatchConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.search.search_text.trim().is_empty() {
            bail!("search.search_text must not be empty");
        }
        if self.retry.max_retries == 0 {
            bail!("retry.max_retries must be at least 1");
        }
        if !self.retry.backoff_base.is_finite() || self.retry.backoff_base < 0.0 {
            bail!("retry.backoff_base must be a non-negative number");
        }
        let delay = self.retry.inter_query_delay;
        if !(delay.min_secs.is_finite() && delay.max_secs.is_finite())
            || delay.min_secs < 0.0
            || delay.min_secs > delay.max_secs
        {
            bail!("retry.inter_query_delay must satisfy 0 <= min_secs <= max_secs");
        }
        for (name, value) in [
            ("matching.kit_variant_threshold", self.matching.kit_variant_threshold),
            ("matching.player_threshold", self.matching.player_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                bail!("{name} must be within 0..=100, got {value}");
            }
        }
        Ok(())
    }

    /// The phrase alone, then the phrase suffixed with each brand.
    pub fn query_variants(&self) -> Vec<String> {
        let phrase = self.search.search_text.trim();
        std::iter::once(phrase.to_string())
            .chain(
                self.search
                    .brands
                    .iter()
                    .map(|b| b.trim())
                    .filter(|b| !b.is_empty())
                    .map(|b| format!("{phrase} {b}")),
            )
            .collect()
    }

    /// `(search_text, url)` per query variant.
    pub fn query_urls(&self) -> Vec<(String, String)> {
        self.query_variants()
            .into_iter()
            .map(|variant| {
                let url = catalog_search_url(&self.search.base_url, &variant, &self.search.order);
                (variant, url)
            })
            .collect()
    }
}
