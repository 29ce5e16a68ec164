//! SQLite item store + HTTP fetch utilities for kitwatch.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use kitwatch_core::{KitVariant, PersistedItem};
use reqwest::StatusCode;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "kitwatch-storage";

const LAST_NOTIFIED_KEY: &str = "last_notified_at";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS saved_items (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    brand TEXT,
    status TEXT,
    size TEXT,
    season TEXT,
    kit_variant TEXT,
    player_name TEXT,
    url TEXT,
    price TEXT,
    photo_urls TEXT NOT NULL DEFAULT '[]',
    added_at TEXT NOT NULL,
    notified INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_saved_items_notified ON saved_items (notified);
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const SELECT_COLUMNS: &str = "id, title, brand, status, size, season, kit_variant, player_name, url, price, photo_urls, added_at, notified";

/// Persistent record of accepted listings. Owned by one writer at a time.
#[derive(Debug)]
pub struct ItemStore {
    conn: Connection,
}

impl ItemStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating store directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening item store {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory item store")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA).context("applying item store schema")?;
        Ok(Self { conn })
    }

    /// Insert unless the id already exists. Returns whether a row was written.
    pub fn insert_item(&self, item: &PersistedItem) -> anyhow::Result<bool> {
        let photo_urls =
            serde_json::to_string(&item.photo_urls).context("serializing photo urls")?;
        let written = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO saved_items (
                    id, title, brand, status, size, season, kit_variant,
                    player_name, url, price, photo_urls, added_at, notified
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    item.id,
                    item.title,
                    item.brand,
                    item.status,
                    item.size,
                    item.season,
                    item.kit_variant.map(|v| v.as_str()),
                    item.player_name,
                    item.url,
                    item.price,
                    photo_urls,
                    format_timestamp(item.added_at),
                    item.notified,
                ],
            )
            .with_context(|| format!("inserting item {}", item.id))?;
        Ok(written > 0)
    }

    pub fn known_ids(&self) -> anyhow::Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM saved_items")
            .context("preparing id query")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("querying saved ids")?
            .collect::<Result<HashSet<_>, _>>()
            .context("reading saved ids")?;
        Ok(ids)
    }

    pub fn all_items(&self) -> anyhow::Result<Vec<PersistedItem>> {
        self.query_items("", [])
    }

    pub fn unsent_items(&self) -> anyhow::Result<Vec<PersistedItem>> {
        self.query_items("WHERE notified = 0", [])
    }

    /// Items added strictly after `since`; every item when `since` is `None`.
    pub fn items_added_since(&self, since: Option<DateTime<Utc>>) -> anyhow::Result<Vec<PersistedItem>> {
        match since {
            Some(ts) => self.query_items("WHERE added_at > ?1", [format_timestamp(ts)]),
            None => self.all_items(),
        }
    }

    /// Flag every unsent item and remember when the notification went out.
    pub fn mark_all_sent(&mut self, at: DateTime<Utc>) -> anyhow::Result<usize> {
        let tx = self.conn.transaction().context("starting mark-sent transaction")?;
        let updated = tx
            .execute("UPDATE saved_items SET notified = 1 WHERE notified = 0", [])
            .context("marking items as notified")?;
        tx.execute(
            "INSERT INTO store_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![LAST_NOTIFIED_KEY, format_timestamp(at)],
        )
        .context("recording notification timestamp")?;
        tx.commit().context("committing mark-sent transaction")?;
        Ok(updated)
    }

    pub fn last_notified_at(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = ?1",
                [LAST_NOTIFIED_KEY],
                |row| row.get(0),
            )
            .optional()
            .context("reading notification timestamp")?;
        value
            .map(|v| {
                DateTime::parse_from_rfc3339(&v)
                    .map(|ts| ts.with_timezone(&Utc))
                    .with_context(|| format!("parsing notification timestamp `{v}`"))
            })
            .transpose()
    }

    fn query_items<P: rusqlite::Params>(&self, filter: &str, params: P) -> anyhow::Result<Vec<PersistedItem>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM saved_items {filter} ORDER BY added_at, id");
        let mut stmt = self.conn.prepare(&sql).context("preparing item query")?;
        let items = stmt
            .query_map(params, item_from_row)
            .context("querying items")?
            .collect::<Result<Vec<_>, _>>()
            .context("reading items")?;
        Ok(items)
    }
}

/// Fixed-width UTC timestamps so lexical order in SQLite matches time order.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(col: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, Type::Text, Box::new(err))
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<PersistedItem> {
    let kit_variant = row
        .get::<_, Option<String>>(6)?
        .map(|v| v.parse::<KitVariant>().map_err(|e| conversion_error(6, e)))
        .transpose()?;
    let photo_urls: Vec<String> =
        serde_json::from_str(&row.get::<_, String>(10)?).map_err(|e| conversion_error(10, e))?;
    let added_at = DateTime::parse_from_rfc3339(&row.get::<_, String>(11)?)
        .map_err(|e| conversion_error(11, e))?
        .with_timezone(&Utc);

    Ok(PersistedItem {
        id: row.get(0)?,
        title: row.get(1)?,
        brand: row.get(2)?,
        status: row.get(3)?,
        size: row.get(4)?,
        season: row.get(5)?,
        kit_variant,
        player_name: row.get(7)?,
        url: row.get(8)?,
        price: row.get(9)?,
        photo_urls,
        added_at,
        notified: row.get(12)?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Connection-level failures, including a body cut off mid-stream, are retryable.
pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() || err.is_decode() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Keep cookies between requests (marketplace sessions need this).
    pub cookie_store: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: None,
            cookie_store: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl FetchError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            FetchError::Request(err) => classify_reqwest_error(err),
            FetchError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(RetryDisposition::NonRetryable),
        }
    }
}

/// Single-shot HTTP GET. Retry policy belongs to the caller.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .cookie_store(config.cookie_store)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        self.get(url).instrument(span).await
    }

    async fn get(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        debug!(status = status.as_u16(), "response received");

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = resp.bytes().await?.to_vec();
        Ok(FetchedResponse {
            final_url,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 24, hour, 0, 0).single().unwrap()
    }

    fn item(id: &str, hour: u32) -> PersistedItem {
        PersistedItem {
            id: id.to_string(),
            title: format!("Maillot domicile Arsenal 23/24 #{id}"),
            brand: Some("adidas".into()),
            status: Some("Très bon état".into()),
            size: Some("M".into()),
            season: Some("2023-2024".into()),
            kit_variant: Some(KitVariant::Home),
            player_name: Some("saka".into()),
            url: Some(format!("https://www.vinted.fr/items/{id}")),
            price: Some("35.0".into()),
            photo_urls: vec!["https://images.example/a.jpg".into(), "https://images.example/b.jpg".into()],
            added_at: ts(hour),
            notified: false,
        }
    }

    #[test]
    fn insert_ignores_conflicting_ids() {
        let store = ItemStore::open_in_memory().unwrap();
        assert!(store.insert_item(&item("1", 10)).unwrap());

        let mut changed = item("1", 11);
        changed.title = "something else".into();
        assert!(!store.insert_item(&changed).unwrap());

        let all = store.all_items().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], item("1", 10));
    }

    #[test]
    fn absent_fields_round_trip_as_none() {
        let store = ItemStore::open_in_memory().unwrap();
        let mut sparse = item("2", 10);
        sparse.brand = None;
        sparse.season = None;
        sparse.kit_variant = None;
        sparse.photo_urls.clear();
        store.insert_item(&sparse).unwrap();
        assert_eq!(store.all_items().unwrap(), vec![sparse]);
    }

    #[test]
    fn mark_all_sent_flags_unsent_and_records_timestamp() {
        let mut store = ItemStore::open_in_memory().unwrap();
        store.insert_item(&item("1", 10)).unwrap();
        store.insert_item(&item("2", 11)).unwrap();
        assert_eq!(store.unsent_items().unwrap().len(), 2);
        assert_eq!(store.last_notified_at().unwrap(), None);

        assert_eq!(store.mark_all_sent(ts(12)).unwrap(), 2);
        assert!(store.unsent_items().unwrap().is_empty());
        assert_eq!(store.last_notified_at().unwrap(), Some(ts(12)));

        store.insert_item(&item("3", 13)).unwrap();
        let unsent = store.unsent_items().unwrap();
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].id, "3");
        assert_eq!(store.mark_all_sent(ts(14)).unwrap(), 1);
        assert_eq!(store.last_notified_at().unwrap(), Some(ts(14)));
    }

    #[test]
    fn items_added_since_is_strict() {
        let store = ItemStore::open_in_memory().unwrap();
        store.insert_item(&item("1", 9)).unwrap();
        store.insert_item(&item("2", 10)).unwrap();
        store.insert_item(&item("3", 11)).unwrap();

        let since = store.items_added_since(Some(ts(10))).unwrap();
        assert_eq!(since.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["3"]);
        assert_eq!(store.items_added_since(None).unwrap().len(), 3);
    }

    #[test]
    fn on_disk_store_survives_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("kitwatch.sqlite3");
        {
            let store = ItemStore::open(&path).unwrap();
            store.insert_item(&item("7", 10)).unwrap();
        }
        let store = ItemStore::open(&path).unwrap();
        let ids = store.known_ids().unwrap();
        assert!(ids.contains("7"));
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn status_classification_retries_server_side_failures() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), RetryDisposition::NonRetryable);

        let err = FetchError::HttpStatus {
            status: 503,
            url: "https://www.vinted.fr/api/v2/catalog/items".into(),
        };
        assert_eq!(err.disposition(), RetryDisposition::Retryable);
    }
}
