use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::cache::{date_key, range_key, CacheRead, CacheStore, ONE_DAY_SECS, THIRTY_DAYS_SECS};
use crate::db::IndexStore;
use crate::error::Lookup;
use crate::index::calendar::{days_inclusive, trading_days};
use crate::index::composition::CompositionDiffEngine;
use crate::index::returns::{compound_by_date, DayReturn, ReturnEngine};
use crate::types::{
    BuildResult, CompositionChanges, CompositionSnapshotRow, IndexPerformance, PerformanceReport,
};

pub const CUMULATIVE_RETURN_PREFIX: &str = "cumulative_return";
pub const PERFORMANCE_RANGE_PREFIX: &str = "index_perf:range";
pub const PERFORMANCE_DAILY_PREFIX: &str = "index_perf:daily";
pub const COMPOSITION_SNAPSHOT_PREFIX: &str = "top100_stocks";

/// Serves build/performance/composition queries on top of the store and cache.
#[derive(Clone)]
pub struct IndexCalculator {
    store: Arc<IndexStore>,
    cache: Arc<CacheStore>,
    returns: ReturnEngine,
    composition: CompositionDiffEngine,
}

impl IndexCalculator {
    pub fn new(store: Arc<IndexStore>, cache: Arc<CacheStore>) -> Self {
        Self {
            returns: ReturnEngine::new(store.clone(), cache.clone()),
            composition: CompositionDiffEngine::new(store.clone(), cache.clone()),
            store,
            cache,
        }
    }

    pub fn with_cohort_size(mut self, cohort_size: usize) -> Self {
        self.returns = self.returns.with_cohort_size(cohort_size);
        self
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Computes every trading day in `[start, end]`, persists the daily returns and refreshes the
    /// stored cumulative series from inception. Days that fail or lack data are logged and left out.
    pub async fn build_index(&self, start: NaiveDate, end: NaiveDate) -> Result<BuildResult> {
        let mut daily = BTreeMap::new();
        for date in trading_days(start, end) {
            match self.returns.daily_return(date).await {
                Ok(DayReturn::Value(value)) => {
                    daily.insert(date, value);
                }
                Ok(DayReturn::Insufficient) => debug!("{date}: no return, skipped"),
                Ok(DayReturn::NonTradingDay) => {}
                Err(err) => warn!("{date}: daily return failed: {err}"),
            }
        }

        let rows: Vec<IndexPerformance> = daily
            .iter()
            .map(|(date, daily_return)| IndexPerformance {
                date: *date,
                daily_return: *daily_return,
                cumulative_return: None,
            })
            .collect();
        self.store
            .upsert_performance(&rows)
            .context("persisting index performance")?;
        self.store
            .refresh_cumulative_returns()
            .context("refreshing cumulative returns")?;

        let cumulative = compound_by_date(&daily);
        self.cache
            .set_f64(
                &range_key(CUMULATIVE_RETURN_PREFIX, start, end),
                cumulative,
                ONE_DAY_SECS,
            )
            .await;
        info!(
            "built index {start}..{end}: {} days, cumulative {cumulative:.6}",
            daily.len()
        );
        Ok(BuildResult {
            daily_index_returns: daily,
            cumulative_index_returns: cumulative,
        })
    }

    pub async fn get_performance(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Lookup<PerformanceReport>> {
        let range = range_key(PERFORMANCE_RANGE_PREFIX, start, end);
        if let CacheRead::Found(report) = self.cache.get_json::<PerformanceReport>(&range).await {
            debug!("performance {start}..{end} served from range cache");
            return Ok(Lookup::Found(report));
        }

        let mut daily = BTreeMap::new();
        let mut missing = Vec::new();
        for date in trading_days(start, end) {
            match self
                .cache
                .get_f64(&date_key(PERFORMANCE_DAILY_PREFIX, date))
                .await
            {
                CacheRead::Found(value) => {
                    daily.insert(date, value);
                }
                CacheRead::Empty | CacheRead::Error(_) => missing.push(date),
            }
        }

        if !missing.is_empty() {
            let rows = match self.store.performance_for_dates(&missing) {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(
                        "performance {start}..{end}: store lookup failed, \
                         using cached days only: {err:#}"
                    );
                    Vec::new()
                }
            };
            debug!(
                "performance {start}..{end}: {} cached, {} of {} missing found in store",
                daily.len(),
                rows.len(),
                missing.len()
            );
            for row in rows {
                self.cache
                    .set_f64(
                        &date_key(PERFORMANCE_DAILY_PREFIX, row.date),
                        row.daily_return,
                        THIRTY_DAYS_SECS,
                    )
                    .await;
                daily.insert(row.date, row.daily_return);
            }
        }

        if daily.is_empty() {
            return Ok(Lookup::NotFound);
        }
        let report = PerformanceReport {
            cumulative_return: compound_by_date(&daily),
            daily_returns: daily,
        };
        self.cache.set_json(&range, &report, ONE_DAY_SECS).await;
        Ok(Lookup::Found(report))
    }

    /// Only days whose membership actually changed make it into the map.
    pub async fn get_composition_changes(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<CompositionChanges> {
        let mut changes = CompositionChanges::new();
        for date in days_inclusive(start, end) {
            match self.composition.changes(date).await {
                Ok(diff) if !diff.is_empty() => {
                    changes.insert(date, diff);
                }
                Ok(_) => {}
                Err(err) => warn!("{date}: composition changes failed: {err}"),
            }
        }
        Ok(changes)
    }

    pub async fn get_composition_for_date(
        &self,
        date: NaiveDate,
    ) -> Result<Lookup<Vec<CompositionSnapshotRow>>> {
        let key = date_key(COMPOSITION_SNAPSHOT_PREFIX, date);
        if let CacheRead::Found(rows) = self.cache.get_json::<Vec<CompositionSnapshotRow>>(&key).await
        {
            if !rows.is_empty() {
                return Ok(Lookup::Found(rows));
            }
        }

        let rows = self
            .store
            .composition_snapshot(date)
            .with_context(|| format!("loading composition for {date}"))?;
        if !rows.is_empty() {
            self.cache.set_json(&key, &rows, THIRTY_DAYS_SECS).await;
        }
        Ok(Lookup::from_vec(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompositionEntry, DailyObservation, Stock};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).expect("valid ymd")
    }

    fn seeded_store() -> Arc<IndexStore> {
        let store = Arc::new(IndexStore::open_in_memory().expect("open store"));
        store
            .upsert_stocks(&[
                Stock {
                    symbol: "X".into(),
                    company_name: "X Corp".into(),
                    sector: "Q".into(),
                },
                Stock {
                    symbol: "Y".into(),
                    company_name: "Y Corp".into(),
                    sector: "G".into(),
                },
            ])
            .expect("stocks");
        store
            .upsert_observations(&[
                DailyObservation::new("X", day(2), 100.0, 1_000.0),
                DailyObservation::new("Y", day(2), 50.0, 1_000.0),
                DailyObservation::new("X", day(3), 110.0, 1_000.0),
                DailyObservation::new("Y", day(3), 55.0, 1_000.0),
                DailyObservation::new("X", day(4), 99.0, 1_000.0),
                DailyObservation::new("Y", day(4), 55.0, 1_000.0),
            ])
            .expect("observations");
        for d in [2, 3, 4] {
            store
                .replace_composition(
                    day(d),
                    &[
                        CompositionEntry {
                            date: day(d),
                            symbol: "X".into(),
                            weight: 66.0,
                            rank: 1,
                        },
                        CompositionEntry {
                            date: day(d),
                            symbol: "Y".into(),
                            weight: 34.0,
                            rank: 2,
                        },
                    ],
                )
                .expect("composition");
        }
        store
    }

    #[tokio::test]
    async fn build_index_compounds_and_persists_running_cumulative() {
        let store = seeded_store();
        let calculator = IndexCalculator::new(store.clone(), Arc::new(CacheStore::memory()));
        let result = calculator.build_index(day(2), day(4)).await.expect("build");

        // Day 2 has no prior observations; day 4 is X -10%, Y flat.
        assert_eq!(result.daily_index_returns.len(), 2);
        assert!((result.daily_index_returns[&day(3)] - 0.10).abs() < 1e-12);
        assert!((result.daily_index_returns[&day(4)] + 0.05).abs() < 1e-12);
        let expected = 1.10 * 0.95 - 1.0;
        assert!((result.cumulative_index_returns - expected).abs() < 1e-12);

        let rows = store.performance_rows().expect("rows");
        assert_eq!(rows.len(), 2);
        let last = rows.last().and_then(|r| r.cumulative_return).expect("cumulative");
        assert!((last - expected).abs() < 1e-12);
    }

    #[tokio::test]
    async fn performance_matches_with_and_without_cache() {
        let cached = IndexCalculator::new(seeded_store(), Arc::new(CacheStore::memory()));
        let uncached = IndexCalculator::new(seeded_store(), Arc::new(CacheStore::disabled()));
        cached.build_index(day(2), day(4)).await.expect("build");
        uncached.build_index(day(2), day(4)).await.expect("build");

        let a = cached.get_performance(day(1), day(5)).await.expect("perf");
        let again = cached.get_performance(day(1), day(5)).await.expect("perf");
        let b = uncached.get_performance(day(1), day(5)).await.expect("perf");
        assert_eq!(a, b);
        assert_eq!(a, again);
        let report = a.found().expect("found");
        assert_eq!(report.daily_returns.len(), 2);
    }

    #[tokio::test]
    async fn empty_performance_range_is_not_found() {
        let calculator = IndexCalculator::new(seeded_store(), Arc::new(CacheStore::memory()));
        let lookup = calculator
            .get_performance(day(15), day(19))
            .await
            .expect("perf");
        assert_eq!(lookup, Lookup::NotFound);
    }

    #[tokio::test]
    async fn composition_snapshot_is_ordered_and_cached() {
        let cache = Arc::new(CacheStore::memory());
        let calculator = IndexCalculator::new(seeded_store(), cache.clone());
        let rows = calculator
            .get_composition_for_date(day(3))
            .await
            .expect("snapshot")
            .found()
            .expect("found");
        assert_eq!(rows[0].symbol, "X");
        assert_eq!(rows[0].name, "X Corp");
        assert!(cache.get_raw("top100_stocks:2024-01-03").await.hit().is_some());

        let missing = calculator
            .get_composition_for_date(day(20))
            .await
            .expect("snapshot");
        assert_eq!(missing, Lookup::NotFound);
        assert_eq!(cache.get_raw("top100_stocks:2024-01-20").await, CacheRead::Empty);
    }

    #[tokio::test]
    async fn unchanged_days_are_left_out_of_changes() {
        let calculator = IndexCalculator::new(seeded_store(), Arc::new(CacheStore::memory()));
        let changes = calculator
            .get_composition_changes(day(2), day(4))
            .await
            .expect("changes");
        // Only day 2 differs from the (empty) day before it.
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[&day(2)].added, vec!["X".to_string(), "Y".to_string()]);
    }

    #[tokio::test]
    async fn stored_cumulative_does_not_depend_on_build_window() {
        let store = seeded_store();
        let calculator = IndexCalculator::new(store.clone(), Arc::new(CacheStore::memory()));
        calculator.build_index(day(2), day(4)).await.expect("build");
        calculator.build_index(day(4), day(4)).await.expect("rebuild");

        let rows = store.performance_rows().expect("rows");
        let day4 = rows.iter().find(|r| r.date == day(4)).expect("day 4 row");
        let expected = 1.10 * 0.95 - 1.0;
        assert!((day4.cumulative_return.expect("cumulative") - expected).abs() < 1e-12);
    }

    #[tokio::test]
    async fn failing_day_does_not_abort_build() {
        let store = seeded_store();
        store
            .execute_sql("UPDATE daily_data SET price = 'bad' WHERE date = '2024-01-04' AND symbol = 'X'")
            .expect("corrupt day 4");
        let calculator = IndexCalculator::new(store, Arc::new(CacheStore::disabled()));
        let result = calculator.build_index(day(2), day(4)).await.expect("build");
        assert_eq!(result.daily_index_returns.len(), 1);
        assert!((result.cumulative_index_returns - 0.10).abs() < 1e-12);
    }

    #[tokio::test]
    async fn failing_day_does_not_abort_composition_changes() {
        let store = seeded_store();
        store
            .execute_sql(
                "INSERT INTO index_composition(date, symbol, weight, rank) \
                 VALUES ('2024-01-05', x'00ff', 1.0, 3)",
            )
            .expect("corrupt day 5");
        let calculator = IndexCalculator::new(store, Arc::new(CacheStore::disabled()));
        let changes = calculator
            .get_composition_changes(day(2), day(5))
            .await
            .expect("changes");
        assert_eq!(changes.len(), 1);
        assert!(changes.contains_key(&day(2)));
    }

    #[tokio::test]
    async fn failed_store_lookup_keeps_cached_days() {
        let store = seeded_store();
        let cache = Arc::new(CacheStore::memory());
        let calculator = IndexCalculator::new(store.clone(), cache.clone());
        calculator.build_index(day(2), day(4)).await.expect("build");
        cache
            .set_f64("index_perf:daily:2024-01-03", 0.10, ONE_DAY_SECS)
            .await;
        store
            .execute_sql("UPDATE index_performance SET daily_return = 'bad' WHERE date = '2024-01-04'")
            .expect("corrupt day 4");

        let report = calculator
            .get_performance(day(3), day(4))
            .await
            .expect("perf")
            .found()
            .expect("cached day survives");
        assert_eq!(report.daily_returns.len(), 1);
        assert!((report.cumulative_return - 0.10).abs() < 1e-12);
    }
}
