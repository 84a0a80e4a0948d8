use anyhow::Result;

use crate::index::outcome::UnitOutcome;
use crate::index::returns::running_cumulative;
use crate::index::AcquisitionSummary;
use crate::types::{
    BuildResult, CompositionChange, CompositionChanges, CompositionSnapshotRow, PerformanceReport,
};

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String> {
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn build_to_csv(result: &BuildResult) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["date", "daily_return"])?;
    for (date, value) in &result.daily_index_returns {
        writer.write_record([date.to_string(), format!("{value:.8}")])?;
    }
    finish(writer)
}

/// One row per day with the running cumulative return.
pub fn performance_to_csv(report: &PerformanceReport) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["date", "daily_return", "cumulative_return"])?;
    for (date, value, cumulative) in running_cumulative(&report.daily_returns) {
        writer.write_record([
            date.to_string(),
            format!("{value:.8}"),
            format!("{cumulative:.8}"),
        ])?;
    }
    finish(writer)
}

pub fn composition_to_csv(rows: &[CompositionSnapshotRow]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["symbol", "name", "category", "price", "market_cap"])?;
    for row in rows {
        writer.write_record([
            row.symbol.clone(),
            row.name.clone(),
            row.category.clone(),
            format!("{:.4}", row.price),
            format!("{:.2}", row.market_cap),
        ])?;
    }
    finish(writer)
}

pub fn changes_to_csv(changes: &CompositionChanges) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["date", "added", "removed"])?;
    for (date, diff) in changes {
        writer.write_record([date.to_string(), diff.added.join(","), diff.removed.join(",")])?;
    }
    finish(writer)
}

pub fn change_log_to_csv(log: &[CompositionChange]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["date", "symbol", "change_type"])?;
    for change in log {
        writer.write_record([
            change.date.to_string(),
            change.symbol.clone(),
            change.change_type.to_string(),
        ])?;
    }
    finish(writer)
}

pub fn acquisition_to_csv(summary: &AcquisitionSummary) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "date",
        "status",
        "reason",
        "constituents",
        "survivors",
        "symbols_ok",
        "symbols_skipped",
        "symbols_failed",
    ])?;
    for (day, (_, outcome)) in summary.per_day.iter().zip(&summary.days.entries) {
        let (status, reason) = match outcome {
            UnitOutcome::Success => ("stored", ""),
            UnitOutcome::Skipped(reason) => ("skipped", reason.as_str()),
            UnitOutcome::Failed(reason) => ("failed", reason.as_str()),
        };
        writer.write_record([
            day.date.to_string(),
            status.to_string(),
            reason.to_string(),
            day.constituents.to_string(),
            day.survivors.to_string(),
            day.symbols.succeeded().to_string(),
            day.symbols.skipped_count().to_string(),
            day.symbols.failed_count().to_string(),
        ])?;
    }
    finish(writer)
}
