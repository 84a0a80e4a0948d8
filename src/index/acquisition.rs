use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tracing::{info, warn};

use crate::cache::{date_key, CacheStore, THIRTY_DAYS_SECS};
use crate::db::{DayBatch, IndexStore};
use crate::index::calculator::COMPOSITION_SNAPSHOT_PREFIX;
use crate::index::calendar::trading_days;
use crate::index::composition::diff_symbols;
use crate::index::outcome::OutcomeReport;
use crate::index::universe::{Selection, UniverseSelector};
use crate::types::{CompositionEntry, CompositionSnapshotRow, Constituent, DailyObservation};

/// Per-day result of a backfill run.
#[derive(Debug, Clone)]
pub struct DayOutcome {
    pub date: NaiveDate,
    pub constituents: usize,
    pub survivors: usize,
    pub symbols: OutcomeReport,
}

#[derive(Debug, Clone, Default)]
pub struct AcquisitionSummary {
    pub days: OutcomeReport,
    pub per_day: Vec<DayOutcome>,
}

/// Day-by-day backfill: select the cohort, then write stocks, observations, composition
/// and the change log in one transaction per day.
pub struct AcquisitionPipeline {
    selector: UniverseSelector,
    store: Arc<IndexStore>,
    cache: Arc<CacheStore>,
}

impl AcquisitionPipeline {
    pub fn new(selector: UniverseSelector, store: Arc<IndexStore>, cache: Arc<CacheStore>) -> Self {
        Self {
            selector,
            store,
            cache,
        }
    }

    /// The `days` calendar days ending yesterday.
    pub async fn run_recent(&self, today: NaiveDate, days: u32) -> AcquisitionSummary {
        if days == 0 {
            return AcquisitionSummary::default();
        }
        let start = today - Duration::days(i64::from(days));
        self.run(start, today - Duration::days(1)).await
    }

    /// Processes the weekdays of `[start, end]` strictly in order. A failed day is rolled back
    /// and skipped; the run always continues with the next day.
    pub async fn run(&self, start: NaiveDate, end: NaiveDate) -> AcquisitionSummary {
        info!("acquisition {start}..{end} starting");
        let mut summary = AcquisitionSummary::default();
        let mut previous = self.stored_previous_set(start);

        for date in trading_days(start, end) {
            let selection = self.selector.select_with_survivors(date, &previous).await;
            let mut outcome = DayOutcome {
                date,
                constituents: selection.constituents.len(),
                survivors: selection.survivors.len(),
                symbols: OutcomeReport::new(),
            };
            if selection.constituents.is_empty() {
                // Holidays have no bars; keep the last stored set for survivorship.
                info!("{date}: no constituents selected ({})", selection.report);
                summary.days.skipped(date.to_string(), "no constituents");
                outcome.symbols = selection.report;
                summary.per_day.push(outcome);
                continue;
            }

            let current = selection.symbols();
            let batch = day_batch(date, &selection, &previous);
            match self.store.write_day(&batch) {
                Ok(()) => {
                    self.cache_snapshot(date, &selection.constituents).await;
                    info!(
                        "{date}: stored {} constituents, {} survivors, {} changes",
                        batch.composition.len(),
                        selection.survivors.len(),
                        batch.changes.len()
                    );
                    summary.days.success(date.to_string());
                    previous = current;
                }
                Err(err) => {
                    warn!("{date}: write failed, day rolled back: {err:#}");
                    summary.days.failed(date.to_string(), format!("{err:#}"));
                }
            }
            for (symbol, reason) in selection.report.failures() {
                warn!("{date}: {symbol}: {reason}");
            }
            outcome.symbols = selection.report;
            summary.per_day.push(outcome);
        }

        info!("acquisition {start}..{end} finished: {}", summary.days);
        summary
    }

    /// The composition of the last stored day before `start`, so survivorship and the change
    /// log carry across separate runs.
    fn stored_previous_set(&self, start: NaiveDate) -> BTreeSet<String> {
        let symbols = self
            .store
            .latest_composition_date_before(start)
            .and_then(|date| match date {
                Some(date) => self.store.composition_symbols(date),
                None => Ok(BTreeSet::new()),
            });
        match symbols {
            Ok(symbols) => symbols,
            Err(err) => {
                warn!("{start}: could not load the previous composition: {err:#}");
                BTreeSet::new()
            }
        }
    }

    async fn cache_snapshot(&self, date: NaiveDate, constituents: &[Constituent]) {
        let rows: Vec<CompositionSnapshotRow> = constituents
            .iter()
            .map(|c| CompositionSnapshotRow {
                symbol: c.symbol.clone(),
                name: c.name.clone(),
                category: c.sector.clone(),
                price: c.price,
                market_cap: c.market_cap,
            })
            .collect();
        self.cache
            .set_json(
                &date_key(COMPOSITION_SNAPSHOT_PREFIX, date),
                &rows,
                THIRTY_DAYS_SECS,
            )
            .await;
    }
}

/// Builds the rows written for one day. The change log is only recorded against a known
/// previous set so the first day of a run does not log the whole cohort as added.
pub fn day_batch(date: NaiveDate, selection: &Selection, previous: &BTreeSet<String>) -> DayBatch {
    let observations: Vec<_> = selection
        .constituents
        .iter()
        .map(|c| c.observation(date))
        .chain(selection.survivors.iter().cloned())
        .filter(DailyObservation::is_valid)
        .collect();

    let changes = if previous.is_empty() {
        Vec::new()
    } else {
        diff_symbols(previous, &selection.symbols()).changes(date)
    };

    DayBatch {
        date,
        stocks: selection.constituents.iter().map(Constituent::stock).collect(),
        observations,
        composition: composition_entries(date, &selection.constituents),
        changes,
    }
}

/// Cap-proportional weights in percent with 1-based ranks in selection order.
pub fn composition_entries(date: NaiveDate, constituents: &[Constituent]) -> Vec<CompositionEntry> {
    let total: f64 = constituents.iter().map(|c| c.market_cap).sum();
    constituents
        .iter()
        .enumerate()
        .map(|(i, c)| CompositionEntry {
            date,
            symbol: c.symbol.clone(),
            weight: if total > 0.0 {
                c.market_cap / total * 100.0
            } else {
                0.0
            },
            rank: i as u32 + 1,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{ListingRow, RetryPolicy, StaticMarketData};
    use crate::types::ChangeType;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).expect("valid ymd")
    }

    fn constituent(symbol: &str, cap: f64) -> Constituent {
        Constituent {
            symbol: symbol.to_string(),
            name: format!("{symbol} Corp"),
            sector: "Q".to_string(),
            price: cap / 100.0,
            market_cap: cap,
            volume: 100.0,
        }
    }

    #[test]
    fn weights_sum_to_one_hundred_with_dense_ranks() {
        let entries = composition_entries(
            day(2),
            &[constituent("A", 300.0), constituent("B", 100.0)],
        );
        assert_eq!(entries[0].rank, 1);
        assert_eq!(entries[1].rank, 2);
        assert!((entries[0].weight - 75.0).abs() < 1e-9);
        let total: f64 = entries.iter().map(|e| e.weight).sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn batch_records_changes_against_previous_set() {
        let selection = Selection {
            constituents: vec![constituent("B", 2.0), constituent("D", 1.0)],
            ..Selection::default()
        };
        let previous: BTreeSet<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();
        let batch = day_batch(day(3), &selection, &previous);
        assert_eq!(batch.changes.len(), 2);
        assert!(batch
            .changes
            .iter()
            .any(|c| c.symbol == "D" && c.change_type == ChangeType::Added));
        assert!(batch
            .changes
            .iter()
            .any(|c| c.symbol == "A" && c.change_type == ChangeType::Removed));

        let first = day_batch(day(2), &selection, &BTreeSet::new());
        assert!(first.changes.is_empty());
    }

    #[tokio::test]
    async fn backfill_writes_days_and_carries_dropped_symbols() {
        // Day 2 cohort {A, B}; on day 3 C overtakes A, which is still priced.
        let provider = StaticMarketData::new(vec![
            ListingRow::equity("A", "A Corp", "Q"),
            ListingRow::equity("B", "B Corp", "Q"),
            ListingRow::equity("C", "C Corp", "Q"),
        ])
        .with_quote("A", day(2), 30.0, 100.0)
        .with_quote("B", day(2), 20.0, 100.0)
        .with_quote("A", day(3), 5.0, 100.0)
        .with_quote("B", day(3), 20.0, 100.0)
        .with_quote("C", day(3), 40.0, 100.0);
        let selector = UniverseSelector::new(Arc::new(provider))
            .with_cohort_size(2)
            .with_retry(RetryPolicy::immediate(1), RetryPolicy::immediate(1));
        let store = Arc::new(IndexStore::open_in_memory().expect("open store"));
        let cache = Arc::new(CacheStore::memory());
        let pipeline = AcquisitionPipeline::new(selector, store.clone(), cache.clone());

        let summary = pipeline.run(day(2), day(3)).await;
        assert_eq!(summary.days.succeeded(), 2);

        let day3: Vec<_> = store
            .composition_symbols(day(3))
            .expect("composition")
            .into_iter()
            .collect();
        assert_eq!(day3, vec!["B".to_string(), "C".to_string()]);
        let survivor = store.observation("A", day(3)).expect("query");
        assert!(survivor.is_some_and(|o| (o.price - 5.0).abs() < 1e-9));
        let changes = store.changes_between(day(3), day(3)).expect("changes");
        assert_eq!(changes.len(), 2);
        assert!(cache
            .get_raw("top100_stocks:2024-01-03")
            .await
            .hit()
            .is_some());
    }

    #[tokio::test]
    async fn consecutive_single_day_runs_keep_survivorship() {
        let provider = StaticMarketData::new(vec![
            ListingRow::equity("A", "A Corp", "Q"),
            ListingRow::equity("B", "B Corp", "Q"),
            ListingRow::equity("C", "C Corp", "Q"),
        ])
        .with_quote("A", day(2), 30.0, 100.0)
        .with_quote("B", day(2), 20.0, 100.0)
        .with_quote("C", day(2), 10.0, 100.0)
        .with_quote("A", day(3), 3.0, 100.0)
        .with_quote("B", day(3), 20.0, 100.0)
        .with_quote("C", day(3), 40.0, 100.0);
        let selector = UniverseSelector::new(Arc::new(provider))
            .with_cohort_size(2)
            .with_retry(RetryPolicy::immediate(1), RetryPolicy::immediate(1));
        let store = Arc::new(IndexStore::open_in_memory().expect("open store"));
        let pipeline = AcquisitionPipeline::new(selector, store.clone(), Arc::new(CacheStore::memory()));

        assert_eq!(pipeline.run(day(2), day(2)).await.days.succeeded(), 1);
        assert_eq!(pipeline.run(day(3), day(3)).await.days.succeeded(), 1);

        let survivor = store.observation("A", day(3)).expect("query");
        assert!(survivor.is_some_and(|o| (o.price - 3.0).abs() < 1e-9));
        let changes = store.changes_between(day(3), day(3)).expect("changes");
        assert_eq!(changes.len(), 2);
    }

    #[tokio::test]
    async fn empty_days_are_skipped_without_resetting_previous_set() {
        // 2024-01-05 is a Friday; Monday 01-08 has no bars at all.
        let provider = StaticMarketData::new(vec![
            ListingRow::equity("A", "A Corp", "Q"),
            ListingRow::equity("B", "B Corp", "Q"),
        ])
        .with_quote("A", day(5), 30.0, 100.0)
        .with_quote("A", day(9), 30.0, 100.0)
        .with_quote("B", day(9), 40.0, 100.0);
        let selector = UniverseSelector::new(Arc::new(provider))
            .with_retry(RetryPolicy::immediate(1), RetryPolicy::immediate(1));
        let store = Arc::new(IndexStore::open_in_memory().expect("open store"));
        let pipeline = AcquisitionPipeline::new(selector, store.clone(), Arc::new(CacheStore::memory()));

        let summary = pipeline.run(day(5), day(9)).await;
        assert_eq!(summary.days.succeeded(), 2);
        assert_eq!(summary.days.skipped_count(), 1);
        assert_eq!(summary.per_day.len(), 3);
        let changes = store.changes_between(day(9), day(9)).expect("changes");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].symbol, "B");
    }

    #[tokio::test]
    async fn rerunning_a_window_converges() {
        let provider = StaticMarketData::new(vec![ListingRow::equity("A", "A Corp", "Q")])
            .with_quote("A", day(2), 30.0, 100.0);
        let selector = UniverseSelector::new(Arc::new(provider))
            .with_retry(RetryPolicy::immediate(1), RetryPolicy::immediate(1));
        let store = Arc::new(IndexStore::open_in_memory().expect("open store"));
        let pipeline = AcquisitionPipeline::new(selector, store.clone(), Arc::new(CacheStore::memory()));
        pipeline.run(day(2), day(2)).await;
        pipeline.run(day(2), day(2)).await;
        assert_eq!(store.composition_entries(day(2)).expect("entries").len(), 1);
    }
}
