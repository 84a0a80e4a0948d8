use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};

use crate::db::migrations::BASE_MIGRATION;
use crate::db::DayBatch;
use crate::types::{
    CompositionChange, CompositionEntry, CompositionSnapshotRow, DailyObservation,
    IndexPerformance, Stock,
};

/// Canonical store. Every write is an upsert on the natural key.
pub struct IndexStore {
    conn: Mutex<Connection>,
}

impl IndexStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("store connection mutex poisoned"))
    }

    #[cfg(test)]
    pub(crate) fn execute_sql(&self, sql: &str) -> Result<()> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn()?.execute_batch(BASE_MIGRATION)?;
        Ok(())
    }

    /// Writes one acquisition day atomically. On error nothing from the batch is kept.
    pub fn write_day(&self, batch: &DayBatch) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for stock in &batch.stocks {
            upsert_stock(&tx, stock)?;
        }
        for obs in &batch.observations {
            upsert_observation(&tx, obs)?;
        }
        tx.execute(
            "DELETE FROM index_composition WHERE date = ?1",
            params![batch.date],
        )?;
        for entry in &batch.composition {
            upsert_composition_entry(&tx, entry)?;
        }
        replace_changes(&tx, batch.date, &batch.changes)?;
        tx.commit()?;
        Ok(())
    }

    pub fn upsert_stocks(&self, stocks: &[Stock]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for stock in stocks {
            upsert_stock(&tx, stock)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn upsert_observations(&self, observations: &[DailyObservation]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for obs in observations {
            upsert_observation(&tx, obs)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn replace_composition(&self, date: NaiveDate, entries: &[CompositionEntry]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM index_composition WHERE date = ?1",
            params![date],
        )?;
        for entry in entries {
            upsert_composition_entry(&tx, entry)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn upsert_performance(&self, rows: &[IndexPerformance]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for row in rows {
            tx.execute(
                r#"
INSERT INTO index_performance(date, daily_return, cumulative_return)
VALUES (?1, ?2, ?3)
ON CONFLICT(date) DO UPDATE SET
    daily_return = excluded.daily_return,
    cumulative_return = COALESCE(excluded.cumulative_return, index_performance.cumulative_return)
"#,
                params![row.date, row.daily_return, row.cumulative_return],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Rewrites every stored cumulative return as Π(1 + rᵢ) − 1 from the first stored day, so a
    /// row's value does not depend on which build window wrote it.
    pub fn refresh_cumulative_returns(&self) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let daily = {
            let mut stmt = tx.prepare(
                r#"
SELECT date, daily_return
FROM index_performance
WHERE daily_return IS NOT NULL
ORDER BY date
"#,
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, NaiveDate>(0)?, row.get::<_, f64>(1)?))
            })?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        let mut growth = 1.0;
        for (date, daily_return) in &daily {
            growth *= 1.0 + daily_return;
            tx.execute(
                "UPDATE index_performance SET cumulative_return = ?2 WHERE date = ?1",
                params![date, growth - 1.0],
            )?;
        }
        tx.commit()?;
        Ok(daily.len())
    }

    /// Most recent date strictly before `date` that has any observation.
    pub fn previous_observation_date(&self, date: NaiveDate) -> Result<Option<NaiveDate>> {
        let conn = self.conn()?;
        let value: Option<NaiveDate> = conn.query_row(
            "SELECT MAX(date) FROM daily_data WHERE date < ?1",
            params![date],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    /// Most recent date strictly before `date` with a stored composition.
    pub fn latest_composition_date_before(&self, date: NaiveDate) -> Result<Option<NaiveDate>> {
        let conn = self.conn()?;
        let value: Option<NaiveDate> = conn.query_row(
            "SELECT MAX(date) FROM index_composition WHERE date < ?1",
            params![date],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    pub fn top_symbols_by_cap(&self, date: NaiveDate, limit: usize) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
SELECT symbol
FROM daily_data
WHERE date = ?1
ORDER BY market_cap DESC, symbol ASC
LIMIT ?2
"#,
        )?;
        let rows = stmt
            .query_map(params![date, limit as i64], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn prices_on(&self, date: NaiveDate) -> Result<HashMap<String, f64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT symbol, price FROM daily_data WHERE date = ?1")?;
        let rows = stmt
            .query_map(params![date], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    pub fn observation(&self, symbol: &str, date: NaiveDate) -> Result<Option<DailyObservation>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                r#"
SELECT symbol, date, price, market_cap, COALESCE(volume, 0)
FROM daily_data
WHERE symbol = ?1 AND date = ?2
"#,
                params![symbol, date],
                |row| {
                    Ok(DailyObservation {
                        symbol: row.get(0)?,
                        date: row.get(1)?,
                        price: row.get(2)?,
                        market_cap: row.get(3)?,
                        volume: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// One batched lookup for the given dates, ascending.
    pub fn performance_for_dates(&self, dates: &[NaiveDate]) -> Result<Vec<IndexPerformance>> {
        if dates.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=dates.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            r#"
SELECT date, daily_return, cumulative_return
FROM index_performance
WHERE daily_return IS NOT NULL AND date IN ({placeholders})
ORDER BY date
"#
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(dates.iter()), |row| {
                Ok(IndexPerformance {
                    date: row.get(0)?,
                    daily_return: row.get(1)?,
                    cumulative_return: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn performance_rows(&self) -> Result<Vec<IndexPerformance>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
SELECT date, daily_return, cumulative_return
FROM index_performance
WHERE daily_return IS NOT NULL
ORDER BY date
"#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(IndexPerformance {
                    date: row.get(0)?,
                    daily_return: row.get(1)?,
                    cumulative_return: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn composition_symbols(&self, date: NaiveDate) -> Result<BTreeSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT symbol FROM index_composition WHERE date = ?1")?;
        let rows = stmt
            .query_map(params![date], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;
        Ok(rows)
    }

    pub fn composition_entries(&self, date: NaiveDate) -> Result<Vec<CompositionEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
SELECT date, symbol, weight, COALESCE(rank, 0)
FROM index_composition
WHERE date = ?1
ORDER BY rank ASC, symbol ASC
"#,
        )?;
        let rows = stmt
            .query_map(params![date], |row| {
                Ok(CompositionEntry {
                    date: row.get(0)?,
                    symbol: row.get(1)?,
                    weight: row.get(2)?,
                    rank: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Composition joined with stock metadata and that day's observation, largest cap first.
    pub fn composition_snapshot(&self, date: NaiveDate) -> Result<Vec<CompositionSnapshotRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
SELECT ic.symbol, s.company_name, s.sector, dd.price, dd.market_cap
FROM index_composition ic
LEFT JOIN stocks s ON ic.symbol = s.symbol
LEFT JOIN daily_data dd ON ic.symbol = dd.symbol AND ic.date = dd.date
WHERE ic.date = ?1
ORDER BY dd.market_cap DESC, ic.symbol ASC
"#,
        )?;
        let rows = stmt
            .query_map(params![date], |row| {
                Ok(CompositionSnapshotRow {
                    symbol: row.get(0)?,
                    name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    category: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    price: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                    market_cap: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn changes_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CompositionChange>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
SELECT date, symbol, change_type
FROM composition_changes
WHERE date BETWEEN ?1 AND ?2
ORDER BY date ASC, change_type ASC, symbol ASC
"#,
        )?;
        let rows = stmt
            .query_map(params![start, end], |row| {
                let raw: String = row.get(2)?;
                let change_type = raw.parse().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
                Ok(CompositionChange {
                    date: row.get(0)?,
                    symbol: row.get(1)?,
                    change_type,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn upsert_stock(tx: &Transaction<'_>, stock: &Stock) -> rusqlite::Result<usize> {
    tx.execute(
        r#"
INSERT INTO stocks(symbol, company_name, sector, created_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(symbol) DO UPDATE SET
    company_name = excluded.company_name,
    sector = excluded.sector
"#,
        params![
            stock.symbol,
            stock.company_name,
            stock.sector,
            Utc::now().to_rfc3339()
        ],
    )
}

fn upsert_observation(tx: &Transaction<'_>, obs: &DailyObservation) -> rusqlite::Result<usize> {
    tx.execute(
        r#"
INSERT OR REPLACE INTO daily_data(symbol, date, price, market_cap, volume)
VALUES (?1, ?2, ?3, ?4, ?5)
"#,
        params![obs.symbol, obs.date, obs.price, obs.market_cap, obs.volume],
    )
}

fn upsert_composition_entry(
    tx: &Transaction<'_>,
    entry: &CompositionEntry,
) -> rusqlite::Result<usize> {
    tx.execute(
        r#"
INSERT OR REPLACE INTO index_composition(date, symbol, weight, rank)
VALUES (?1, ?2, ?3, ?4)
"#,
        params![entry.date, entry.symbol, entry.weight, entry.rank],
    )
}

fn replace_changes(
    tx: &Transaction<'_>,
    date: NaiveDate,
    changes: &[CompositionChange],
) -> rusqlite::Result<()> {
    tx.execute(
        "DELETE FROM composition_changes WHERE date = ?1",
        params![date],
    )?;
    for change in changes {
        tx.execute(
            r#"
INSERT INTO composition_changes(date, symbol, change_type)
VALUES (?1, ?2, ?3)
"#,
            params![change.date, change.symbol, change.change_type.as_slug()],
        )?;
    }
    Ok(())
}
