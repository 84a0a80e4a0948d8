pub mod acquisition;
pub mod calculator;
pub mod calendar;
pub mod composition;
pub mod outcome;
pub mod returns;
pub mod universe;

pub use acquisition::{AcquisitionPipeline, AcquisitionSummary};
pub use calculator::IndexCalculator;
pub use composition::CompositionDiffEngine;
pub use outcome::{OutcomeReport, UnitOutcome};
pub use returns::{DayReturn, ReturnEngine};
pub use universe::{Selection, UniverseSelector};
