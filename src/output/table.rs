use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::index::outcome::UnitOutcome;
use crate::index::returns::running_cumulative;
use crate::index::AcquisitionSummary;
use crate::types::{
    BuildResult, ChangeType, CompositionChange, CompositionChanges, CompositionSnapshotRow,
    PerformanceReport,
};

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn return_cell(value: f64) -> Cell {
    let label = format!("{:+.4}%", value * 100.0);
    if value >= 0.0 {
        Cell::new(label).fg(Color::Green)
    } else {
        Cell::new(label).fg(Color::Red)
    }
}

pub fn render_build_table(result: &BuildResult) -> String {
    let mut table = new_table();
    table.set_header(vec!["Date", "Daily Return"]);
    for (date, value) in &result.daily_index_returns {
        table.add_row(Row::from(vec![Cell::new(date.to_string()), return_cell(*value)]));
    }
    format!(
        "{table}\nCumulative return: {:+.4}% over {} trading days",
        result.cumulative_index_returns * 100.0,
        result.daily_index_returns.len()
    )
}

pub fn render_performance_table(report: &PerformanceReport) -> String {
    let mut table = new_table();
    table.set_header(vec!["Date", "Daily Return", "Cumulative"]);
    for (date, value, cumulative) in running_cumulative(&report.daily_returns) {
        table.add_row(Row::from(vec![
            Cell::new(date.to_string()),
            return_cell(value),
            return_cell(cumulative),
        ]));
    }
    format!(
        "{table}\nCumulative return: {:+.4}%",
        report.cumulative_return * 100.0
    )
}

pub fn render_composition_table(rows: &[CompositionSnapshotRow]) -> String {
    let mut table = new_table();
    table.set_header(vec!["Rank", "Symbol", "Name", "Category", "Price", "Market Cap"]);
    for (idx, row) in rows.iter().enumerate() {
        table.add_row(vec![
            (idx + 1).to_string(),
            row.symbol.clone(),
            row.name.clone(),
            row.category.clone(),
            format!("{:.2}", row.price),
            format!("{:.0}", row.market_cap),
        ]);
    }
    table.to_string()
}

pub fn render_changes_table(changes: &CompositionChanges) -> String {
    let mut table = new_table();
    table.set_header(vec!["Date", "Added", "Removed"]);
    for (date, diff) in changes {
        table.add_row(Row::from(vec![
            Cell::new(date.to_string()),
            Cell::new(diff.added.join(", ")).fg(Color::Green),
            Cell::new(diff.removed.join(", ")).fg(Color::Red),
        ]));
    }
    table.to_string()
}

pub fn render_change_log_table(log: &[CompositionChange]) -> String {
    let mut table = new_table();
    table.set_header(vec!["Date", "Symbol", "Change"]);
    for change in log {
        let color = match change.change_type {
            ChangeType::Added => Color::Green,
            ChangeType::Removed => Color::Red,
        };
        table.add_row(Row::from(vec![
            Cell::new(change.date.to_string()),
            Cell::new(&change.symbol),
            Cell::new(change.change_type.to_string()).fg(color),
        ]));
    }
    table.to_string()
}

pub fn render_acquisition_table(summary: &AcquisitionSummary) -> String {
    let mut table = new_table();
    table.set_header(vec![
        "Date",
        "Status",
        "Constituents",
        "Survivors",
        "Symbols ok/skipped/failed",
    ]);
    for (day, (_, outcome)) in summary.per_day.iter().zip(&summary.days.entries) {
        let status = match outcome {
            UnitOutcome::Success => Cell::new("stored").fg(Color::Green),
            UnitOutcome::Skipped(reason) => Cell::new(format!("skipped: {reason}")),
            UnitOutcome::Failed(reason) => Cell::new(format!("failed: {reason}")).fg(Color::Red),
        };
        table.add_row(Row::from(vec![
            Cell::new(day.date.to_string()),
            status,
            Cell::new(day.constituents.to_string()),
            Cell::new(day.survivors.to_string()),
            Cell::new(format!(
                "{}/{}/{}",
                day.symbols.succeeded(),
                day.symbols.skipped_count(),
                day.symbols.failed_count()
            )),
        ]));
    }
    format!("{table}\nDays: {}", summary.days)
}
