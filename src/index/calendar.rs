use chrono::{Datelike, NaiveDate, Weekday};

pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Every calendar day in `[start, end]`, ascending. Empty when `start > end`.
pub fn days_inclusive(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start
        .iter_days()
        .take_while(move |day| *day <= end)
}

pub fn trading_days(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    days_inclusive(start, end).filter(|day| is_trading_day(*day))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).expect("valid ymd")
    }

    #[test]
    fn weekends_are_not_trading_days() {
        // 2024-01-06 is a Saturday.
        assert!(is_trading_day(day(5)));
        assert!(!is_trading_day(day(6)));
        assert!(!is_trading_day(day(7)));
        assert!(is_trading_day(day(8)));
    }

    #[test]
    fn trading_days_skip_weekend() {
        let days: Vec<_> = trading_days(day(5), day(9)).collect();
        assert_eq!(days, vec![day(5), day(8), day(9)]);
        assert_eq!(days_inclusive(day(9), day(5)).count(), 0);
    }
}
