mod action;
mod metrics;
mod outcome;
mod report;
mod update;

pub use action::{CandidateAction, Category, SafetyTier};
pub use metrics::{Probe, SystemMetrics};
pub use outcome::{ExecutionResult, ExecutionStatus, Mode, RunReport, RunSummary, StepOutcome, StepRecord};
pub use report::{HealthReport, OsInfo};
pub use update::{UpdateSource, UpdateSourceCount, UpdateTally};
