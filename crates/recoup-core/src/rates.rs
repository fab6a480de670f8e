//! Exchange rates for payments settled in a different currency

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use recoup_common::config::RatesConfig;
use recoup_common::{Clock, Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Map with a fixed time-to-live per entry.
///
/// Expired entries are evicted lazily when read. Time comes from the
/// injected [`Clock`], so expiry is deterministic in tests.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<K, (V, DateTime<Utc>)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh value for `key`, if any
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > now => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let expires_at = self.clock.now() + self.ttl;
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, (value, expires_at));
    }

    /// Number of stored entries, expired ones included until they are read
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source of exchange rates
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Units of `to` per one unit of `from`
    async fn rate(&self, from: &str, to: &str) -> Result<f64>;
}

/// Converted amount attached to a payment request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateQuote {
    pub from_currency: String,
    pub to_currency: String,
    pub rate: f64,
    pub converted_amount_cents: i64,
}

impl RateQuote {
    pub fn new(amount_cents: i64, from: &str, to: &str, rate: f64) -> Self {
        Self {
            from_currency: from.to_uppercase(),
            to_currency: to.to_uppercase(),
            rate,
            converted_amount_cents: (amount_cents as f64 * rate).round() as i64,
        }
    }
}

/// Rate source that reuses upstream rates for the cache TTL
pub struct CachedRateSource {
    inner: Arc<dyn RateSource>,
    cache: TtlCache<(String, String), f64>,
}

impl CachedRateSource {
    pub fn new(inner: Arc<dyn RateSource>, cache: TtlCache<(String, String), f64>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl RateSource for CachedRateSource {
    async fn rate(&self, from: &str, to: &str) -> Result<f64> {
        let key = (from.to_uppercase(), to.to_uppercase());
        if key.0 == key.1 {
            return Ok(1.0);
        }

        if let Some(rate) = self.cache.get(&key) {
            return Ok(rate);
        }

        // The cache lock is released while the upstream call runs
        let rate = self.inner.rate(&key.0, &key.1).await?;
        debug!(from = %key.0, to = %key.1, rate, "Cached exchange rate");
        self.cache.insert(key, rate);
        Ok(rate)
    }
}

#[derive(Debug, Deserialize)]
struct RateResponse {
    rate: f64,
}

/// Rate source backed by an HTTP endpoint answering
/// `GET {endpoint}?from=XXX&to=YYY` with `{"rate": 1.23}`
pub struct HttpRateSource {
    client: Client,
    endpoint: String,
}

impl HttpRateSource {
    pub fn new(config: &RatesConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Rate(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn rate(&self, from: &str, to: &str) -> Result<f64> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("from", from), ("to", to)])
            .send()
            .await
            .map_err(|e| Error::Rate(format!("Rate request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Rate(format!(
                "Rate endpoint returned {} for {}/{}",
                status, from, to
            )));
        }

        let body: RateResponse = response
            .json()
            .await
            .map_err(|e| Error::Rate(format!("Invalid rate response: {}", e)))?;

        if !body.rate.is_finite() || body.rate <= 0.0 {
            return Err(Error::Rate(format!(
                "Rate endpoint returned unusable rate {} for {}/{}",
                body.rate, from, to
            )));
        }

        Ok(body.rate)
    }
}
