//! Parser for the NASDAQ trader symbol directory (`nasdaqtraded.txt`).
//!
//! The file is pipe-delimited with a header row and a trailing
//! `File Creation Time` line.

use anyhow::{anyhow, Result};

use crate::market::ListingRow;

pub const NASDAQ_TRADED_URL: &str = "https://www.nasdaqtrader.com/dynamic/SymDir/nasdaqtraded.txt";

pub fn parse_symbol_directory(text: &str) -> Result<Vec<ListingRow>> {
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| anyhow!("symbol directory is empty"))?;
    let columns: Vec<&str> = header.split('|').map(str::trim).collect();
    let index_of = |name: &str| columns.iter().position(|c| c.eq_ignore_ascii_case(name));

    let symbol_idx = index_of("Symbol").ok_or_else(|| anyhow!("missing Symbol column"))?;
    let name_idx = index_of("Security Name");
    let category_idx = index_of("Market Category");
    let etf_idx = index_of("ETF");
    let test_idx = index_of("Test Issue");
    let status_idx = index_of("Financial Status");

    let mut out = Vec::new();
    for line in lines {
        if line.starts_with("File Creation Time") {
            continue;
        }
        let fields: Vec<&str> = line.split('|').collect();
        let field = |idx: Option<usize>| {
            idx.and_then(|i| fields.get(i))
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };
        out.push(ListingRow {
            symbol: field(Some(symbol_idx)).map(str::to_string),
            security_name: field(name_idx).map(str::to_string),
            market_category: field(category_idx).unwrap_or_default().to_string(),
            etf: field(etf_idx).map(is_yes).unwrap_or(false),
            test_issue: field(test_idx).map(is_yes).unwrap_or(false),
            // Anything other than N (normal) marks a deficient/delinquent/bankrupt issuer.
            financially_distressed: field(status_idx)
                .map(|v| !v.eq_ignore_ascii_case("N"))
                .unwrap_or(false),
        });
    }
    Ok(out)
}

fn is_yes(value: &str) -> bool {
    value.eq_ignore_ascii_case("Y")
}

#[cfg(test)]
mod tests {
    use super::parse_symbol_directory;

    const SAMPLE: &str = "\
Nasdaq Traded|Symbol|Security Name|Listing Exchange|Market Category|ETF|Round Lot Size|Test Issue|Financial Status|CQS Symbol|NASDAQ Symbol|NextShares
Y|AAPL|Apple Inc. - Common Stock|Q|Q|N|100|N|N||AAPL|N
Y|SPY|SPDR S&P 500 ETF Trust|P| |Y|100|N||SPY|SPY|N
Y|ZXZZT|NASDAQ TEST STOCK|Q|G|N|100|Y|N||ZXZZT|N
Y|BADC|Bad Co - Common Stock|Q|S|N|100|N|D||BADC|N
Y|IBM|International Business Machines|N| |N|100|N||IBM|IBM|N
File Creation Time: 0102202422:01|||||||||||
";

    #[test]
    fn parses_flags_and_skips_footer() {
        let rows = parse_symbol_directory(SAMPLE).expect("parse");
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].symbol.as_deref(), Some("AAPL"));
        assert_eq!(rows[0].market_category, "Q");
        assert!(rows[1].etf);
        assert!(rows[2].test_issue);
        assert!(rows[3].financially_distressed);
        assert!(!rows[4].financially_distressed);
        assert_eq!(rows[4].market_category, "");
    }

    #[test]
    fn rejects_missing_symbol_column() {
        assert!(parse_symbol_directory("Foo|Bar\n1|2\n").is_err());
        assert!(parse_symbol_directory("").is_err());
    }
}
