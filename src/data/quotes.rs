//! HTTP quotes client.
//!
//! Fetches instrument snapshots in symbol batches from the configured
//! quotes service. Every request first acquires a token from the shared
//! rate limiter so background fetches and the scan cycle draw from the
//! same budget.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::MarketDataProvider;
use crate::rate_limit::TokenBucketRateLimiter;
use crate::types::{d, InstrumentSnapshot};

/// Symbols per request — keeps URLs short and responses bounded.
const BATCH_SIZE: usize = 50;

// ---------------------------------------------------------------------------
// API response types (quotes JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    #[serde(default)]
    snapshots: Vec<QuoteRow>,
}

/// One instrument row. We only deserialize the fields we need.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteRow {
    symbol: String,
    last_price: f64,
    #[serde(default)]
    open: f64,
    #[serde(default)]
    high: f64,
    #[serde(default)]
    low: f64,
    #[serde(default)]
    prev_close: f64,
    #[serde(default)]
    vwap: f64,
    #[serde(default)]
    volume: u64,
    #[serde(default)]
    avg_volume: u64,
    #[serde(default)]
    or_high: Option<f64>,
    #[serde(default)]
    or_low: Option<f64>,
}

impl QuoteRow {
    fn into_snapshot(self) -> InstrumentSnapshot {
        InstrumentSnapshot {
            symbol: self.symbol,
            last_price: d(self.last_price),
            day_open: d(self.open),
            day_high: d(self.high),
            day_low: d(self.low),
            prev_close: d(self.prev_close),
            vwap: d(self.vwap),
            volume: self.volume,
            avg_volume: self.avg_volume,
            opening_range_high: self.or_high.map(d),
            opening_range_low: self.or_low.map(d),
            fetched_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Quotes service client.
pub struct QuotesClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    limiter: Arc<TokenBucketRateLimiter>,
}

impl QuotesClient {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        limiter: Arc<TokenBucketRateLimiter>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("Failed to build quotes HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            limiter,
        })
    }

    async fn fetch_batch(&self, symbols: &[String]) -> Result<Vec<InstrumentSnapshot>> {
        self.limiter.acquire().await;

        let url = format!("{}/v1/snapshots", self.base_url);
        let mut request = self
            .http
            .get(&url)
            .query(&[("symbols", symbols.join(","))]);
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = request
            .send()
            .await
            .context("Quotes request failed")?
            .error_for_status()
            .context("Quotes service returned an error status")?;

        let body: SnapshotResponse = response
            .json()
            .await
            .context("Failed to parse quotes response")?;

        debug!(
            requested = symbols.len(),
            received = body.snapshots.len(),
            "Quote batch fetched"
        );

        Ok(body
            .snapshots
            .into_iter()
            .map(QuoteRow::into_snapshot)
            .collect())
    }
}

#[async_trait]
impl MarketDataProvider for QuotesClient {
    async fn fetch_snapshots(&self, symbols: &[String]) -> Result<Vec<InstrumentSnapshot>> {
        let mut out = Vec::with_capacity(symbols.len());
        for batch in symbols.chunks(BATCH_SIZE) {
            match self.fetch_batch(batch).await {
                Ok(snaps) => out.extend(snaps),
                Err(e) => {
                    // A failed batch degrades coverage for this cycle; the
                    // remaining batches are still worth fetching.
                    warn!(error = %e, batch_len = batch.len(), "Quote batch failed — skipping");
                }
            }
        }
        if out.is_empty() && !symbols.is_empty() {
            anyhow::bail!("All quote batches failed for {} symbols", symbols.len());
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
