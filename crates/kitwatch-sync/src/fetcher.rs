//! Bounded retry loop around the search client.

use std::time::Duration;

use kitwatch_adapters::{SearchClient, SearchError};
use kitwatch_core::RawListing;
use rand::Rng;
use tracing::{info, warn};

use crate::config::{DelayRange, RetrySettings};

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub backoff_base: f64,
    pub max_jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2.0,
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl From<&RetrySettings> for BackoffPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            backoff_base: settings.backoff_base,
            ..Default::default()
        }
    }
}

impl BackoffPolicy {
    /// `backoff_base ^ attempt` seconds, jitter excluded.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        secs(self.backoff_base.powi(exponent))
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay_for_attempt(attempt) + uniform(0.0, self.max_jitter.as_secs_f64())
    }

    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Uniform delay drawn from `range`, used between query variants.
pub fn random_delay(range: &DelayRange) -> Duration {
    uniform(range.min_secs, range.max_secs)
}

fn uniform(min_secs: f64, max_secs: f64) -> Duration {
    if !min_secs.is_finite() || !max_secs.is_finite() || min_secs >= max_secs {
        return secs(min_secs);
    }
    secs(rand::thread_rng().gen_range(min_secs..=max_secs))
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    Fetched {
        listings: Vec<RawListing>,
        attempts: u32,
    },
    /// Every attempt failed transiently.
    Exhausted { attempts: u32, last_error: SearchError },
    /// A non-transient failure stopped the variant without retrying.
    Aborted { attempts: u32, error: SearchError },
}

impl FetchOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            FetchOutcome::Fetched { attempts, .. }
            | FetchOutcome::Exhausted { attempts, .. }
            | FetchOutcome::Aborted { attempts, .. } => *attempts,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Fetched { .. } => "fetched",
            FetchOutcome::Exhausted { .. } => "exhausted",
            FetchOutcome::Aborted { .. } => "aborted",
        }
    }

    pub fn error(&self) -> Option<&SearchError> {
        match self {
            FetchOutcome::Fetched { .. } => None,
            FetchOutcome::Exhausted { last_error, .. } => Some(last_error),
            FetchOutcome::Aborted { error, .. } => Some(error),
        }
    }

    /// Listings on success, nothing otherwise.
    pub fn into_listings(self) -> Vec<RawListing> {
        match self {
            FetchOutcome::Fetched { listings, .. } => listings,
            _ => Vec::new(),
        }
    }
}

pub struct ResilientFetcher<'a> {
    client: &'a dyn SearchClient,
    policy: BackoffPolicy,
}

impl<'a> ResilientFetcher<'a> {
    pub fn new(client: &'a dyn SearchClient, policy: BackoffPolicy) -> Self {
        Self { client, policy }
    }

    pub async fn fetch(&self, query_url: &str) -> FetchOutcome {
        let max_attempts = self.policy.attempts();
        let mut attempt = 1;
        loop {
            info!(query_url, attempt, "sending search request");
            match self.client.search(query_url).await {
                Ok(listings) => {
                    info!(count = listings.len(), "listings fetched");
                    return FetchOutcome::Fetched {
                        listings,
                        attempts: attempt,
                    };
                }
                Err(err) if err.is_transient() => {
                    if attempt >= max_attempts {
                        warn!(error = %err, attempt, "retries exhausted for query variant");
                        return FetchOutcome::Exhausted {
                            attempts: attempt,
                            last_error: err,
                        };
                    }
                    let backoff = self.policy.delay_for_attempt(attempt);
                    warn!(error = %err, attempt, backoff_secs = backoff.as_secs_f64(), "transient search failure, backing off");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(error = %err, attempt, "search failed, abandoning query variant");
                    return FetchOutcome::Aborted {
                        attempts: attempt,
                        error: err,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    struct ScriptedClient {
        calls: AtomicU32,
        script: Mutex<VecDeque<Result<Vec<RawListing>, SearchError>>>,
        fallback_transient: bool,
    }

    impl ScriptedClient {
        fn always_transient() -> Self {
            Self {
                calls: AtomicU32::new(0),
                script: Mutex::new(VecDeque::new()),
                fallback_transient: true,
            }
        }

        fn scripted(steps: Vec<Result<Vec<RawListing>, SearchError>>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                script: Mutex::new(steps.into()),
                fallback_transient: false,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SearchClient for ScriptedClient {
        async fn search(&self, _query_url: &str) -> Result<Vec<RawListing>, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(step) => step,
                None if self.fallback_transient => Err(SearchError::Transient("connection reset".into())),
                None => Err(SearchError::Fatal("script exhausted".into())),
            }
        }
    }

    fn listing(id: &str) -> RawListing {
        RawListing {
            id: id.into(),
            title: "Maillot Arsenal".into(),
            brand: None,
            size: None,
            status: None,
            url: None,
            price: None,
            photo_urls: vec![],
        }
    }

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            max_retries: 3,
            backoff_base: 2.0,
            max_jitter: Duration::from_secs(1),
        }
    }

    #[test]
    fn base_delay_is_exponential_in_attempt() {
        let p = policy();
        assert_eq!(p.base_delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(p.base_delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(p.base_delay_for_attempt(3), Duration::from_secs(8));
        let d = p.delay_for_attempt(1);
        assert!(d >= Duration::from_secs(2) && d <= Duration::from_secs(3));
    }

    #[test]
    fn random_delay_stays_in_range() {
        let range = DelayRange {
            min_secs: 1.5,
            max_secs: 3.0,
        };
        for _ in 0..50 {
            let d = random_delay(&range);
            assert!(d >= Duration::from_millis(1500) && d <= Duration::from_secs(3));
        }
        let fixed = DelayRange {
            min_secs: 0.0,
            max_secs: 0.0,
        };
        assert_eq!(random_delay(&fixed), Duration::ZERO);

        let inverted = DelayRange {
            min_secs: 2.0,
            max_secs: 1.0,
        };
        assert_eq!(random_delay(&inverted), Duration::from_secs(2));
        let unbounded = DelayRange {
            min_secs: 1.0,
            max_secs: f64::INFINITY,
        };
        assert_eq!(random_delay(&unbounded), Duration::from_secs(1));
        let nan = DelayRange {
            min_secs: f64::NAN,
            max_secs: 1.0,
        };
        assert_eq!(random_delay(&nan), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_transient_failure_stops_after_max_retries() {
        let client = ScriptedClient::always_transient();
        let fetcher = ResilientFetcher::new(&client, policy());

        let started = Instant::now();
        let outcome = fetcher.fetch("https://www.vinted.fr/catalog?search_text=x").await;
        let slept = started.elapsed();

        assert_eq!(client.calls(), 3);
        assert!(matches!(outcome, FetchOutcome::Exhausted { attempts: 3, .. }));
        assert!(slept >= Duration::from_secs(2 + 4), "slept {slept:?}");
        assert!(slept <= Duration::from_secs(2 + 4 + 2), "slept {slept:?}");
        assert!(outcome.into_listings().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_failure_is_never_retried() {
        let client = ScriptedClient::scripted(vec![Err(SearchError::Fatal("401 unauthorized".into()))]);
        let fetcher = ResilientFetcher::new(&client, policy());

        let started = Instant::now();
        let outcome = fetcher.fetch("https://www.vinted.fr/catalog?search_text=x").await;

        assert_eq!(client.calls(), 1);
        assert!(matches!(outcome, FetchOutcome::Aborted { attempts: 1, .. }));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success_returns_listings() {
        let client = ScriptedClient::scripted(vec![
            Err(SearchError::Transient("timeout".into())),
            Ok(vec![listing("1"), listing("2")]),
        ]);
        let fetcher = ResilientFetcher::new(&client, policy());
        let outcome = fetcher.fetch("https://www.vinted.fr/catalog?search_text=x").await;

        assert_eq!(client.calls(), 2);
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(outcome.label(), "fetched");
        assert_eq!(outcome.into_listings().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_fatal_aborts_without_further_retries() {
        let client = ScriptedClient::scripted(vec![
            Err(SearchError::Transient("502".into())),
            Err(SearchError::Fatal("bad json".into())),
            Ok(vec![listing("never")]),
        ]);
        let fetcher = ResilientFetcher::new(&client, policy());
        let outcome = fetcher.fetch("https://www.vinted.fr/catalog?search_text=x").await;

        assert_eq!(client.calls(), 2);
        assert!(matches!(outcome, FetchOutcome::Aborted { attempts: 2, .. }));
    }
}
