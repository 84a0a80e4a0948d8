use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveTime};
use serde_json::Value;

use crate::market::http::{fetch_json_optional, fetch_text, to_f64};
use crate::market::nasdaq::parse_symbol_directory;
use crate::market::{ListingRow, MarketDataProvider, Quote};

pub const YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Listing from the NASDAQ symbol directory, daily bars from the Yahoo chart API.
#[derive(Debug, Clone)]
pub struct HttpMarketData {
    listing_url: String,
    chart_url: String,
}

impl HttpMarketData {
    pub fn new(listing_url: impl Into<String>, chart_url: impl Into<String>) -> Self {
        Self {
            listing_url: listing_url.into(),
            chart_url: chart_url.into(),
        }
    }

    fn chart_request_url(&self, symbol: &str, date: NaiveDate) -> String {
        let start = date.and_time(NaiveTime::MIN).and_utc().timestamp();
        let end = (date + ChronoDuration::days(1))
            .and_time(NaiveTime::MIN)
            .and_utc()
            .timestamp();
        format!(
            "{}/{}?period1={start}&period2={end}&interval=1d&events=history",
            self.chart_url.trim_end_matches('/'),
            symbol.trim()
        )
    }
}

#[async_trait]
impl MarketDataProvider for HttpMarketData {
    fn name(&self) -> &str {
        "nasdaq+yahoo"
    }

    async fn fetch_listing(&self, exchange: &str) -> Result<Vec<ListingRow>> {
        if !exchange.eq_ignore_ascii_case("NASDAQ") {
            return Err(anyhow!("no listing source configured for exchange {exchange}"));
        }
        let text = fetch_text(&self.listing_url).await?;
        parse_symbol_directory(&text)
    }

    async fn fetch_quote(&self, symbol: &str, date: NaiveDate) -> Result<Option<Quote>> {
        let url = self.chart_request_url(symbol, date);
        match fetch_json_optional(&url).await? {
            Some(payload) => Ok(parse_chart_quote(&payload, date)),
            None => Ok(None),
        }
    }
}

/// Picks the bar whose timestamp falls on `date` out of a chart payload.
pub fn parse_chart_quote(payload: &Value, date: NaiveDate) -> Option<Quote> {
    let result = payload.get("chart")?.get("result")?.as_array()?.first()?;
    let timestamps = result.get("timestamp")?.as_array()?;
    let quote = result
        .get("indicators")?
        .get("quote")?
        .as_array()?
        .first()?;
    let closes = quote.get("close")?.as_array()?;
    let volumes = quote.get("volume")?.as_array()?;

    for (idx, ts) in timestamps.iter().enumerate() {
        let Some(ts) = ts.as_i64() else {
            continue;
        };
        let Some(bar_time) = chrono::DateTime::from_timestamp(ts, 0) else {
            continue;
        };
        // Bars are stamped at the session open in exchange time; the UTC date matches for US listings.
        if bar_time.date_naive() != date {
            continue;
        }
        let close = closes.get(idx).and_then(to_f64)?;
        let volume = volumes.get(idx).and_then(to_f64)?;
        return Some(Quote { close, volume });
    }
    None
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn picks_bar_for_requested_date() {
        // 2024-01-02 14:30:00 UTC and 2024-01-03 14:30:00 UTC
        let payload = json!({
            "chart": {
                "result": [{
                    "timestamp": [1704205800, 1704292200],
                    "indicators": {
                        "quote": [{
                            "close": [185.64, 184.25],
                            "volume": [82488700, 58414500]
                        }]
                    }
                }],
                "error": null
            }
        });
        let day = NaiveDate::from_ymd_opt(2024, 1, 3).expect("valid ymd");
        let quote = parse_chart_quote(&payload, day).expect("quote present");
        assert!((quote.close - 184.25).abs() < 1e-9);
        assert!((quote.volume - 58_414_500.0).abs() < 1e-6);
    }

    #[test]
    fn missing_bar_or_null_close_is_no_data() {
        let payload = json!({
            "chart": {
                "result": [{
                    "timestamp": [1704205800],
                    "indicators": { "quote": [{ "close": [null], "volume": [100] }] }
                }]
            }
        });
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid ymd");
        assert!(parse_chart_quote(&payload, day).is_none());
        let other = NaiveDate::from_ymd_opt(2024, 1, 5).expect("valid ymd");
        assert!(parse_chart_quote(&payload, other).is_none());
        assert!(parse_chart_quote(&json!({"chart": {"result": null}}), day).is_none());
    }

    #[test]
    fn builds_day_window_url() {
        let provider = HttpMarketData::new("http://listing", "http://chart/");
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).expect("valid ymd");
        assert_eq!(
            provider.chart_request_url("AAPL", day),
            "http://chart/AAPL?period1=1704153600&period2=1704240000&interval=1d&events=history"
        );
    }
}
