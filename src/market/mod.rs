pub mod http;
pub mod nasdaq;
pub mod yahoo;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Raw row of an exchange symbol directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListingRow {
    pub symbol: Option<String>,
    pub security_name: Option<String>,
    pub market_category: String,
    pub etf: bool,
    pub test_issue: bool,
    pub financially_distressed: bool,
}

impl ListingRow {
    pub fn equity(symbol: &str, name: &str, category: &str) -> Self {
        Self {
            symbol: Some(symbol.to_string()),
            security_name: Some(name.to_string()),
            market_category: category.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub close: f64,
    pub volume: f64,
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_listing(&self, exchange: &str) -> Result<Vec<ListingRow>>;
    /// `Ok(None)` means the provider answered but had no bar for that date.
    async fn fetch_quote(&self, symbol: &str, date: NaiveDate) -> Result<Option<Quote>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO)
    }

    /// Runs `op` until it succeeds or the attempt budget is spent; returns the last error.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!("{label}: attempt {attempt}/{attempts} failed: {err:#}");
                    last_err = Some(err);
                    if attempt < attempts && !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("{label}: no attempts made")))
    }
}

/// Fixed in-memory provider, used for offline runs and tests.
#[derive(Debug, Default)]
pub struct StaticMarketData {
    listing: Mutex<Vec<ListingRow>>,
    quotes: Mutex<HashMap<(String, NaiveDate), Quote>>,
    failing_symbols: Mutex<Vec<String>>,
    quote_failures: Mutex<HashMap<String, u32>>,
    listing_failures: Mutex<u32>,
}

impl StaticMarketData {
    pub fn new(listing: Vec<ListingRow>) -> Self {
        Self {
            listing: Mutex::new(listing),
            ..Self::default()
        }
    }

    pub fn with_quote(self, symbol: &str, date: NaiveDate, close: f64, volume: f64) -> Self {
        self.insert_quote(symbol, date, close, volume);
        self
    }

    pub fn insert_quote(&self, symbol: &str, date: NaiveDate, close: f64, volume: f64) {
        if let Ok(mut guard) = self.quotes.lock() {
            guard.insert((symbol.to_string(), date), Quote { close, volume });
        }
    }

    /// Quote fetches for `symbol` error instead of answering.
    pub fn fail_symbol(&self, symbol: &str) {
        if let Ok(mut guard) = self.failing_symbols.lock() {
            guard.push(symbol.to_string());
        }
    }

    /// The next `count` quote fetches for `symbol` error, later ones answer normally.
    pub fn fail_symbol_times(&self, symbol: &str, count: u32) {
        if let Ok(mut guard) = self.quote_failures.lock() {
            guard.insert(symbol.to_string(), count);
        }
    }

    /// The next `count` listing fetches error.
    pub fn fail_listing(&self, count: u32) {
        if let Ok(mut guard) = self.listing_failures.lock() {
            *guard = count;
        }
    }
}

#[async_trait]
impl MarketDataProvider for StaticMarketData {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_listing(&self, exchange: &str) -> Result<Vec<ListingRow>> {
        {
            let mut failures = self
                .listing_failures
                .lock()
                .map_err(|_| anyhow!("listing failure counter poisoned"))?;
            if *failures > 0 {
                *failures -= 1;
                return Err(anyhow!("{exchange} listing unavailable"));
            }
        }
        let guard = self
            .listing
            .lock()
            .map_err(|_| anyhow!("listing mutex poisoned"))?;
        Ok(guard.clone())
    }

    async fn fetch_quote(&self, symbol: &str, date: NaiveDate) -> Result<Option<Quote>> {
        let failing = self
            .failing_symbols
            .lock()
            .map_err(|_| anyhow!("failing symbol list poisoned"))?
            .iter()
            .any(|s| s == symbol);
        if failing {
            return Err(anyhow!("quote request for {symbol} timed out"));
        }
        {
            let mut transient = self
                .quote_failures
                .lock()
                .map_err(|_| anyhow!("quote failure counter poisoned"))?;
            if let Some(remaining) = transient.get_mut(symbol).filter(|n| **n > 0) {
                *remaining -= 1;
                return Err(anyhow!("quote request for {symbol} returned 503"));
            }
        }
        let guard = self
            .quotes
            .lock()
            .map_err(|_| anyhow!("quote mutex poisoned"))?;
        Ok(guard.get(&(symbol.to_string(), date)).copied())
    }
}
