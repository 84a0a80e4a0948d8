use std::fmt::{Display, Formatter};

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Never surfaced to callers; cache operations degrade to miss/no-op.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),
    #[error("store query failed: {0}")]
    QueryFailure(String),
    #[error("market data fetch failed for {unit}: {message}")]
    FetchFailure { unit: String, message: String },
    #[error("no comparable symbols for {date}")]
    DataInsufficiency { date: NaiveDate },
}

impl IndexError {
    pub fn query(error: impl Display) -> Self {
        Self::QueryFailure(error.to_string())
    }

    pub fn fetch(unit: impl Into<String>, error: impl Display) -> Self {
        Self::FetchFailure {
            unit: unit.into(),
            message: error.to_string(),
        }
    }
}

/// Result of a query that may legitimately have nothing to return.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<Vec<T>> {
    pub fn from_vec(value: Vec<T>) -> Self {
        if value.is_empty() {
            Self::NotFound
        } else {
            Self::Found(value)
        }
    }
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound => None,
        }
    }
}

#[derive(Debug, Error)]
#[error("invalid date '{0}', expected YYYY-MM-DD")]
pub struct DateParseError(pub String);

pub fn parse_date(raw: &str) -> Result<NaiveDate, DateParseError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| DateParseError(raw.to_string()))
}

#[derive(Debug, Error)]
pub struct RangeError {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Display for RangeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "start date {} is after end date {}", self.start, self.end)
    }
}

pub fn check_range(start: NaiveDate, end: NaiveDate) -> Result<(), RangeError> {
    if start > end {
        return Err(RangeError { start, end });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_from_vec_distinguishes_empty() {
        let empty: Lookup<Vec<u8>> = Lookup::from_vec(Vec::new());
        assert_eq!(empty, Lookup::NotFound);
        let full = Lookup::from_vec(vec![1u8]);
        assert!(full.is_found());
    }

    #[test]
    fn parses_iso_dates_and_rejects_garbage() {
        assert_eq!(
            parse_date(" 2024-01-02 ").expect("valid date"),
            NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid ymd")
        );
        assert!(parse_date("01/02/2024").is_err());
    }

    #[test]
    fn rejects_inverted_range() {
        let a = NaiveDate::from_ymd_opt(2024, 1, 5).expect("valid ymd");
        let b = NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid ymd");
        assert!(check_range(b, a).is_ok());
        assert!(check_range(a, b).is_err());
    }
}
