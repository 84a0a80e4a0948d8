pub mod migrations;
pub mod store;

use chrono::NaiveDate;

use crate::types::{CompositionChange, CompositionEntry, DailyObservation, Stock};

pub use store::IndexStore;

/// Everything the acquisition pipeline writes for one calendar day.
#[derive(Debug, Clone)]
pub struct DayBatch {
    pub date: NaiveDate,
    pub stocks: Vec<Stock>,
    pub observations: Vec<DailyObservation>,
    pub composition: Vec<CompositionEntry>,
    pub changes: Vec<CompositionChange>,
}
