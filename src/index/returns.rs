use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::cache::{date_key, CacheRead, CacheStore, ONE_DAY_SECS};
use crate::db::IndexStore;
use crate::error::IndexError;
use crate::index::calendar::is_trading_day;
use crate::index::universe::DEFAULT_COHORT_SIZE;
use crate::types::IndexPerformance;

pub const DAILY_RETURN_PREFIX: &str = "daily_return";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DayReturn {
    Value(f64),
    /// Saturday or Sunday; nothing computed or cached.
    NonTradingDay,
    /// No cohort member had a price on both endpoints; the day is skipped.
    Insufficient,
}

impl DayReturn {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            Self::NonTradingDay | Self::Insufficient => None,
        }
    }
}

/// Equal-weighted daily return over a cohort fixed on the prior trading day.
#[derive(Clone)]
pub struct ReturnEngine {
    store: Arc<IndexStore>,
    cache: Arc<CacheStore>,
    cohort_size: usize,
}

impl ReturnEngine {
    pub fn new(store: Arc<IndexStore>, cache: Arc<CacheStore>) -> Self {
        Self {
            store,
            cache,
            cohort_size: DEFAULT_COHORT_SIZE,
        }
    }

    pub fn with_cohort_size(mut self, cohort_size: usize) -> Self {
        self.cohort_size = cohort_size.max(1);
        self
    }

    pub async fn daily_return(&self, date: NaiveDate) -> Result<DayReturn, IndexError> {
        if !is_trading_day(date) {
            return Ok(DayReturn::NonTradingDay);
        }

        let key = date_key(DAILY_RETURN_PREFIX, date);
        if let CacheRead::Found(value) = self.cache.get_f64(&key).await {
            debug!("{date}: daily return served from cache: {value}");
            return Ok(DayReturn::Value(value));
        }

        let Some(value) = self.compute(date)? else {
            let err = IndexError::DataInsufficiency { date };
            warn!("{err}; skipping day");
            return Ok(DayReturn::Insufficient);
        };

        self.cache.set_f64(&key, value, ONE_DAY_SECS).await;
        self.store
            .upsert_performance(&[IndexPerformance {
                date,
                daily_return: value,
                cumulative_return: None,
            }])
            .map_err(IndexError::query)?;
        debug!("{date}: computed daily return {value}");
        Ok(DayReturn::Value(value))
    }

    /// Recomputes from the store only; the cache is neither read nor written.
    pub fn compute(&self, date: NaiveDate) -> Result<Option<f64>, IndexError> {
        let Some(previous) = self
            .store
            .previous_observation_date(date)
            .map_err(IndexError::query)?
        else {
            return Ok(None);
        };
        let cohort = self
            .store
            .top_symbols_by_cap(previous, self.cohort_size)
            .map_err(IndexError::query)?;
        let before = self.store.prices_on(previous).map_err(IndexError::query)?;
        let after = self.store.prices_on(date).map_err(IndexError::query)?;
        let returns = cohort_returns(&cohort, &before, &after);
        debug!(
            "{date}: {} of {} cohort members from {previous} comparable",
            returns.len(),
            cohort.len()
        );
        Ok(equal_weighted_mean(returns.values().copied()))
    }
}

/// Simple return per cohort member priced on both days. Members missing either price are left out.
pub fn cohort_returns(
    cohort: &[String],
    before: &HashMap<String, f64>,
    after: &HashMap<String, f64>,
) -> BTreeMap<String, f64> {
    cohort
        .iter()
        .filter_map(|symbol| {
            let p0 = *before.get(symbol)?;
            let p1 = *after.get(symbol)?;
            if p0 <= 0.0 || !p0.is_finite() || !p1.is_finite() {
                return None;
            }
            Some((symbol.clone(), p1 / p0 - 1.0))
        })
        .collect()
}

pub fn equal_weighted_mean(returns: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = returns
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), r| (sum + r, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Π(1 + rᵢ) − 1, folded in the iterator's order.
pub fn compound(returns: impl IntoIterator<Item = f64>) -> f64 {
    returns.into_iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
}

/// Compounds in ascending date order whatever order the returns were gathered in.
pub fn compound_by_date(daily: &BTreeMap<NaiveDate, f64>) -> f64 {
    compound(daily.values().copied())
}

/// Running cumulative return per day, ascending.
pub fn running_cumulative(daily: &BTreeMap<NaiveDate, f64>) -> Vec<(NaiveDate, f64, f64)> {
    let mut growth = 1.0;
    daily
        .iter()
        .map(|(date, r)| {
            growth *= 1.0 + r;
            (*date, *r, growth - 1.0)
        })
        .collect()
}
