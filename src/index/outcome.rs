use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// What happened to one unit of work (a symbol or a day) in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum UnitOutcome {
    Success,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub entries: Vec<(String, UnitOutcome)>,
}

impl OutcomeReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, unit: impl Into<String>, outcome: UnitOutcome) {
        self.entries.push((unit.into(), outcome));
    }

    pub fn success(&mut self, unit: impl Into<String>) {
        self.push(unit, UnitOutcome::Success);
    }

    pub fn skipped(&mut self, unit: impl Into<String>, reason: impl Into<String>) {
        self.push(unit, UnitOutcome::Skipped(reason.into()));
    }

    pub fn failed(&mut self, unit: impl Into<String>, reason: impl Into<String>) {
        self.push(unit, UnitOutcome::Failed(reason.into()));
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Success))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Skipped(_)))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, UnitOutcome::Failed(_)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|(unit, outcome)| match outcome {
            UnitOutcome::Failed(reason) => Some((unit.as_str(), reason.as_str())),
            _ => None,
        })
    }

    pub fn merge(&mut self, other: OutcomeReport) {
        self.entries.extend(other.entries);
    }

    fn count(&self, pred: impl Fn(&UnitOutcome) -> bool) -> usize {
        self.entries.iter().filter(|(_, o)| pred(o)).count()
    }
}

impl Display for OutcomeReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ok, {} skipped, {} failed",
            self.succeeded(),
            self.skipped_count(),
            self.failed_count()
        )
    }
}
