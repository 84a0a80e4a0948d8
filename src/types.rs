use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stock {
    pub symbol: String,
    pub company_name: String,
    pub sector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyObservation {
    pub symbol: String,
    pub date: NaiveDate,
    pub price: f64,
    /// price × volume; stands in for market capitalization.
    pub market_cap: f64,
    pub volume: f64,
}

impl DailyObservation {
    pub fn new(symbol: impl Into<String>, date: NaiveDate, price: f64, volume: f64) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            price,
            market_cap: price * volume,
            volume,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.price > 0.0 && self.volume > 0.0 && self.price.is_finite()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompositionEntry {
    pub date: NaiveDate,
    pub symbol: String,
    /// Percent of the day's total proxy cap.
    pub weight: f64,
    pub rank: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Removed,
}

impl ChangeType {
    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Removed => "removed",
        }
    }
}

impl Display for ChangeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_slug())
    }
}

#[derive(Debug, Error)]
#[error("unknown change type: {0}")]
pub struct ChangeTypeParseError(pub String);

impl FromStr for ChangeType {
    type Err = ChangeTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "added" | "add" => Ok(Self::Added),
            "removed" | "remove" => Ok(Self::Removed),
            _ => Err(ChangeTypeParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompositionChange {
    pub date: NaiveDate,
    pub symbol: String,
    pub change_type: ChangeType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexPerformance {
    pub date: NaiveDate,
    pub daily_return: f64,
    pub cumulative_return: Option<f64>,
}

/// One member of a selected cohort, as produced by the universe selector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Constituent {
    pub symbol: String,
    pub name: String,
    pub sector: String,
    pub price: f64,
    pub market_cap: f64,
    pub volume: f64,
}

impl Constituent {
    pub fn observation(&self, date: NaiveDate) -> DailyObservation {
        DailyObservation {
            symbol: self.symbol.clone(),
            date,
            price: self.price,
            market_cap: self.market_cap,
            volume: self.volume,
        }
    }

    pub fn stock(&self) -> Stock {
        Stock {
            symbol: self.symbol.clone(),
            company_name: self.name.clone(),
            sector: self.sector.clone(),
        }
    }
}

/// Row of the per-date composition snapshot served to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompositionSnapshotRow {
    pub symbol: String,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub market_cap: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompositionDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl CompositionDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn changes(&self, date: NaiveDate) -> Vec<CompositionChange> {
        let added = self.added.iter().map(|symbol| CompositionChange {
            date,
            symbol: symbol.clone(),
            change_type: ChangeType::Added,
        });
        let removed = self.removed.iter().map(|symbol| CompositionChange {
            date,
            symbol: symbol.clone(),
            change_type: ChangeType::Removed,
        });
        added.chain(removed).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildResult {
    pub daily_index_returns: BTreeMap<NaiveDate, f64>,
    pub cumulative_index_returns: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceReport {
    pub daily_returns: BTreeMap<NaiveDate, f64>,
    pub cumulative_return: f64,
}

pub type CompositionChanges = BTreeMap<NaiveDate, CompositionDiff>;
