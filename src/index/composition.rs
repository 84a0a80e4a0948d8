use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tracing::debug;

use crate::cache::{date_key, CacheRead, CacheStore, THIRTY_DAYS_SECS};
use crate::db::IndexStore;
use crate::error::IndexError;
use crate::types::CompositionDiff;

pub const COMPOSITION_CHANGES_PREFIX: &str = "composition_changes";

/// Added/removed constituents between `date - 1` and `date`.
#[derive(Clone)]
pub struct CompositionDiffEngine {
    store: Arc<IndexStore>,
    cache: Arc<CacheStore>,
}

impl CompositionDiffEngine {
    pub fn new(store: Arc<IndexStore>, cache: Arc<CacheStore>) -> Self {
        Self { store, cache }
    }

    pub async fn changes(&self, date: NaiveDate) -> Result<CompositionDiff, IndexError> {
        let key = date_key(COMPOSITION_CHANGES_PREFIX, date);
        if let CacheRead::Found(diff) = self.cache.get_json::<CompositionDiff>(&key).await {
            return Ok(diff);
        }

        let previous_date = date - Duration::days(1);
        let current = self
            .store
            .composition_symbols(date)
            .map_err(IndexError::query)?;
        let previous = self
            .store
            .composition_symbols(previous_date)
            .map_err(IndexError::query)?;
        let diff = diff_symbols(&previous, &current);

        // Empty diffs are cached too so quiet days are not recomputed.
        self.cache.set_json(&key, &diff, THIRTY_DAYS_SECS).await;
        debug!(
            "{date}: {} added, {} removed",
            diff.added.len(),
            diff.removed.len()
        );
        Ok(diff)
    }
}

pub fn diff_symbols(previous: &BTreeSet<String>, current: &BTreeSet<String>) -> CompositionDiff {
    CompositionDiff {
        added: current.difference(previous).cloned().collect(),
        removed: previous.difference(current).cloned().collect(),
    }
}
