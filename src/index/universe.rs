use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::error::IndexError;
use crate::index::outcome::OutcomeReport;
use crate::market::{ListingRow, MarketDataProvider, Quote, RetryPolicy};
use crate::types::{Constituent, DailyObservation};

pub const DEFAULT_COHORT_SIZE: usize = 100;

/// Listing row that passed the static filters and is worth a quote request.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub symbol: String,
    pub name: String,
    pub category: String,
}

#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Ranked by proxy cap, largest first.
    pub constituents: Vec<Constituent>,
    /// Observations for yesterday's members that fell out of today's cohort.
    pub survivors: Vec<DailyObservation>,
    pub report: OutcomeReport,
}

impl Selection {
    pub fn symbols(&self) -> BTreeSet<String> {
        self.constituents.iter().map(|c| c.symbol.clone()).collect()
    }
}

#[derive(Clone)]
pub struct UniverseSelector {
    provider: Arc<dyn MarketDataProvider>,
    exchange: String,
    cohort_size: usize,
    concurrency: usize,
    listing_retry: RetryPolicy,
    quote_retry: RetryPolicy,
}

impl UniverseSelector {
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self {
            provider,
            exchange: "NASDAQ".to_string(),
            cohort_size: DEFAULT_COHORT_SIZE,
            concurrency: 8,
            listing_retry: RetryPolicy::default(),
            quote_retry: RetryPolicy::new(2, Duration::from_millis(500)),
        }
    }

    pub fn with_cohort_size(mut self, cohort_size: usize) -> Self {
        self.cohort_size = cohort_size.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, listing: RetryPolicy, quote: RetryPolicy) -> Self {
        self.listing_retry = listing;
        self.quote_retry = quote;
        self
    }

    /// Today's cohort. Never fails: an unreachable listing yields an empty selection.
    pub async fn select_top100(&self, date: NaiveDate) -> Selection {
        let mut report = OutcomeReport::new();
        let label = format!("{} listing", self.exchange);
        let listing = self
            .listing_retry
            .run(&label, || self.provider.fetch_listing(&self.exchange))
            .await;
        let rows = match listing {
            Ok(rows) => rows,
            Err(err) => {
                let err = IndexError::fetch(label.as_str(), format!("{err:#}"));
                warn!("{date}: {err}; continuing with an empty selection");
                report.failed(label, err.to_string());
                return Selection {
                    report,
                    ..Selection::default()
                };
            }
        };

        let candidates = filter_candidates(&rows);
        info!(
            "{date}: {} listing rows, {} candidates after filtering",
            rows.len(),
            candidates.len()
        );

        let fetched = stream::iter(candidates)
            .map(|candidate| async move {
                let outcome = self.quote(&candidate.symbol, date).await;
                (candidate, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut priced = Vec::new();
        for (candidate, outcome) in fetched {
            match outcome {
                Ok(Some(quote)) if is_valid_quote(&quote) => {
                    report.success(candidate.symbol.as_str());
                    priced.push(Constituent {
                        symbol: candidate.symbol,
                        name: candidate.name,
                        sector: candidate.category,
                        price: quote.close,
                        market_cap: quote.close * quote.volume,
                        volume: quote.volume,
                    });
                }
                Ok(Some(_)) => report.skipped(candidate.symbol, "non-positive price or volume"),
                Ok(None) => report.skipped(candidate.symbol, "no bar for date"),
                Err(err) => report.failed(candidate.symbol, format!("{err:#}")),
            }
        }

        let constituents = rank_by_cap(priced, self.cohort_size);
        info!(
            "{date}: selected {} constituents ({report})",
            constituents.len()
        );
        Selection {
            constituents,
            survivors: Vec::new(),
            report,
        }
    }

    /// Today's cohort plus carry-over observations for yesterday's members that dropped out.
    pub async fn select_with_survivors(
        &self,
        date: NaiveDate,
        previous: &BTreeSet<String>,
    ) -> Selection {
        let mut selection = self.select_top100(date).await;
        let current = selection.symbols();
        let (survivors, report) = self.carry_over(date, previous, &current).await;
        selection.survivors = survivors;
        selection.report.merge(report);
        selection
    }

    pub async fn carry_over(
        &self,
        date: NaiveDate,
        previous: &BTreeSet<String>,
        current: &BTreeSet<String>,
    ) -> (Vec<DailyObservation>, OutcomeReport) {
        let mut report = OutcomeReport::new();
        let mut survivors = Vec::new();
        for symbol in previous.difference(current) {
            debug!("{date}: fetching dropped constituent {symbol}");
            match self.quote(symbol, date).await {
                Ok(Some(quote)) if is_valid_quote(&quote) => {
                    survivors.push(DailyObservation::new(
                        symbol.as_str(),
                        date,
                        quote.close,
                        quote.volume,
                    ));
                    report.success(symbol.as_str());
                }
                Ok(_) => report.skipped(symbol.as_str(), "dropped symbol has no data"),
                Err(err) => report.failed(symbol.as_str(), format!("{err:#}")),
            }
        }
        (survivors, report)
    }

    async fn quote(&self, symbol: &str, date: NaiveDate) -> anyhow::Result<Option<Quote>> {
        let label = format!("quote {symbol} {date}");
        self.quote_retry
            .run(&label, || self.provider.fetch_quote(symbol, date))
            .await
    }
}

pub fn is_valid_quote(quote: &Quote) -> bool {
    quote.close.is_finite() && quote.volume.is_finite() && quote.close > 0.0 && quote.volume > 0.0
}

pub fn filter_candidates(rows: &[ListingRow]) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        let Some(symbol) = row.symbol.as_deref().map(str::trim) else {
            continue;
        };
        if symbol.is_empty() || symbol.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        if row.etf || row.test_issue || row.financially_distressed {
            continue;
        }
        let Some(name) = row.security_name.as_deref().map(str::trim) else {
            continue;
        };
        if name.is_empty() || !seen.insert(symbol.to_string()) {
            continue;
        }
        out.push(Candidate {
            symbol: symbol.to_string(),
            name: name.to_string(),
            category: row.market_category.trim().to_string(),
        });
    }
    out
}

/// Largest proxy cap first, ties broken by symbol, truncated to `limit`.
pub fn rank_by_cap(mut priced: Vec<Constituent>, limit: usize) -> Vec<Constituent> {
    priced.sort_by(|a, b| {
        b.market_cap
            .total_cmp(&a.market_cap)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    priced.truncate(limit);
    priced
}
