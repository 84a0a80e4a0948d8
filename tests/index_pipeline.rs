use std::sync::Arc;

use chrono::NaiveDate;
use tokio_test::assert_ok;
use top100_index::cache::CacheStore;
use top100_index::db::IndexStore;
use top100_index::error::Lookup;
use top100_index::index::{AcquisitionPipeline, IndexCalculator, UniverseSelector};
use top100_index::market::{ListingRow, RetryPolicy, StaticMarketData};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).expect("valid ymd")
}

/// X 100 -> 110 and Y 50 -> 55 between Tuesday 01-02 and Wednesday 01-03.
fn provider() -> StaticMarketData {
    StaticMarketData::new(vec![
        ListingRow::equity("X", "X Holdings", "Q"),
        ListingRow::equity("Y", "Y Industries", "G"),
    ])
    .with_quote("X", day(2), 100.0, 1_000.0)
    .with_quote("Y", day(2), 50.0, 1_000.0)
    .with_quote("X", day(3), 110.0, 1_000.0)
    .with_quote("Y", day(3), 55.0, 1_000.0)
}

async fn acquired(cache: CacheStore) -> IndexCalculator {
    let store = Arc::new(IndexStore::open_in_memory().expect("open store"));
    let cache = Arc::new(cache);
    let selector = UniverseSelector::new(Arc::new(provider()))
        .with_retry(RetryPolicy::immediate(1), RetryPolicy::immediate(1));
    let pipeline = AcquisitionPipeline::new(selector, store.clone(), cache.clone());
    let summary = pipeline.run(day(2), day(3)).await;
    assert_eq!(summary.days.succeeded(), 2, "acquisition: {}", summary.days);
    IndexCalculator::new(store, cache)
}

#[tokio::test]
async fn end_to_end_daily_and_cumulative_return() {
    let calculator = acquired(CacheStore::memory()).await;
    let result = calculator.build_index(day(2), day(3)).await.expect("build");

    assert_eq!(result.daily_index_returns.len(), 1);
    assert!((result.daily_index_returns[&day(3)] - 0.10).abs() < 1e-9);
    assert!((result.cumulative_index_returns - 0.10).abs() < 1e-9);

    let report = calculator
        .get_performance(day(2), day(3))
        .await
        .expect("performance")
        .found()
        .expect("performance rows");
    assert!((report.cumulative_return - 0.10).abs() < 1e-9);
}

#[tokio::test]
async fn build_index_is_idempotent() {
    let calculator = acquired(CacheStore::memory()).await;
    let first = assert_ok!(calculator.build_index(day(1), day(5)).await);
    let rows_first = calculator.store().performance_rows().expect("rows");
    let second = assert_ok!(calculator.build_index(day(1), day(5)).await);
    let rows_second = calculator.store().performance_rows().expect("rows");

    assert_eq!(first, second);
    assert_eq!(rows_first, rows_second);
}

#[tokio::test]
async fn results_do_not_depend_on_the_cache() {
    let cached = acquired(CacheStore::memory()).await;
    let uncached = acquired(CacheStore::disabled()).await;

    assert_eq!(
        cached.build_index(day(2), day(3)).await.expect("build"),
        uncached.build_index(day(2), day(3)).await.expect("build")
    );
    assert_eq!(
        cached.get_performance(day(2), day(3)).await.expect("perf"),
        uncached.get_performance(day(2), day(3)).await.expect("perf")
    );
    assert_eq!(
        cached.get_composition_for_date(day(3)).await.expect("composition"),
        uncached.get_composition_for_date(day(3)).await.expect("composition")
    );
    assert_eq!(
        cached.get_composition_changes(day(2), day(3)).await.expect("changes"),
        uncached.get_composition_changes(day(2), day(3)).await.expect("changes")
    );
}

#[tokio::test]
async fn composition_snapshot_and_missing_ranges() {
    let calculator = acquired(CacheStore::memory()).await;

    let rows = calculator
        .get_composition_for_date(day(3))
        .await
        .expect("composition")
        .found()
        .expect("rows");
    let symbols: Vec<_> = rows.iter().map(|r| r.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["X", "Y"]);
    assert_eq!(rows[0].name, "X Holdings");

    assert_eq!(
        calculator.get_performance(day(22), day(26)).await.expect("perf"),
        Lookup::NotFound
    );
    assert_eq!(
        calculator
            .get_composition_for_date(day(22))
            .await
            .expect("composition"),
        Lookup::NotFound
    );
}

/// A 30 -> 3 falls out of a two-name cohort on 01-03 while C overtakes it.
fn shifting_provider() -> StaticMarketData {
    StaticMarketData::new(vec![
        ListingRow::equity("A", "A Corp", "Q"),
        ListingRow::equity("B", "B Corp", "Q"),
        ListingRow::equity("C", "C Corp", "Q"),
    ])
    .with_quote("A", day(2), 30.0, 100.0)
    .with_quote("B", day(2), 20.0, 100.0)
    .with_quote("C", day(2), 10.0, 100.0)
    .with_quote("A", day(3), 3.0, 100.0)
    .with_quote("B", day(3), 20.0, 100.0)
    .with_quote("C", day(3), 40.0, 100.0)
}

async fn daily_return_after(windows: &[(NaiveDate, NaiveDate)]) -> f64 {
    let store = Arc::new(IndexStore::open_in_memory().expect("open store"));
    let cache = Arc::new(CacheStore::memory());
    let selector = UniverseSelector::new(Arc::new(shifting_provider()))
        .with_cohort_size(2)
        .with_retry(RetryPolicy::immediate(1), RetryPolicy::immediate(1));
    let pipeline = AcquisitionPipeline::new(selector, store.clone(), cache.clone());
    for (start, end) in windows {
        pipeline.run(*start, *end).await;
    }
    let calculator = IndexCalculator::new(store, cache).with_cohort_size(2);
    let result = calculator.build_index(day(2), day(3)).await.expect("build");
    result.daily_index_returns[&day(3)]
}

#[tokio::test]
async fn chunked_acquisition_matches_a_single_run() {
    let single = daily_return_after(&[(day(2), day(3))]).await;
    let chunked = daily_return_after(&[(day(2), day(2)), (day(3), day(3))]).await;

    assert!((single + 0.45).abs() < 1e-9);
    assert!((single - chunked).abs() < 1e-12);
}
