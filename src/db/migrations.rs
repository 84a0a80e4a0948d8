pub const BASE_MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS stocks (
    symbol TEXT PRIMARY KEY,
    company_name TEXT NOT NULL,
    sector TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS daily_data (
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    price REAL NOT NULL,
    market_cap REAL NOT NULL,
    volume REAL,
    PRIMARY KEY (symbol, date)
);
CREATE INDEX IF NOT EXISTS idx_daily_data_date_cap
    ON daily_data(date, market_cap DESC);

CREATE TABLE IF NOT EXISTS index_composition (
    date TEXT NOT NULL,
    symbol TEXT NOT NULL,
    weight REAL NOT NULL,
    rank INTEGER,
    PRIMARY KEY (date, symbol)
);

CREATE TABLE IF NOT EXISTS composition_changes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    symbol TEXT NOT NULL,
    change_type TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_composition_changes_date
    ON composition_changes(date);

CREATE TABLE IF NOT EXISTS index_performance (
    date TEXT PRIMARY KEY,
    daily_return REAL,
    cumulative_return REAL
);
"#;
