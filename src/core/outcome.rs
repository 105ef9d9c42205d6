use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    DryRun,
    Live,
}

impl Mode {
    pub const fn is_dry_run(self) -> bool {
        matches!(self, Mode::DryRun)
    }
}

/// Two-valued result of one sub-step. Nothing is silently upgraded to `Ok`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum StepOutcome {
    Ok,
    Failed(String),
}

impl StepOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        StepOutcome::Failed(reason.into())
    }

    pub const fn is_ok(&self) -> bool {
        matches!(self, StepOutcome::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub label: String,
    pub required: bool,
    pub outcome: StepOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Succeeded,
    SkippedWhitelisted,
    SkippedThreshold,
    Failed,
    TimedOut,
    Cancelled,
}

impl ExecutionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::SkippedWhitelisted => "skipped_whitelisted",
            ExecutionStatus::SkippedThreshold => "skipped_threshold",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::TimedOut => "timed_out",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub action: String,
    pub status: ExecutionStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_freed: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepRecord>,
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    pub fn skipped(action: &str, status: ExecutionStatus, message: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            status,
            message: message.into(),
            bytes_freed: None,
            steps: vec![],
            elapsed_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    pub bytes_freed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub mode: Mode,
    pub started_at: String,
    pub finished_at: String,
    pub summary: RunSummary,
    pub results: Vec<ExecutionResult>,
}

impl RunReport {
    pub fn new(mode: Mode, started_at: String, finished_at: String, results: Vec<ExecutionResult>) -> Self {
        let mut summary = RunSummary::default();
        for r in &results {
            match r.status {
                ExecutionStatus::Succeeded => summary.succeeded += 1,
                ExecutionStatus::SkippedWhitelisted | ExecutionStatus::SkippedThreshold => {
                    summary.skipped += 1
                }
                ExecutionStatus::Failed => summary.failed += 1,
                ExecutionStatus::TimedOut => summary.timed_out += 1,
                ExecutionStatus::Cancelled => summary.cancelled += 1,
            }
            summary.bytes_freed = summary
                .bytes_freed
                .saturating_add(r.bytes_freed.unwrap_or(0));
        }
        Self {
            mode,
            started_at,
            finished_at,
            summary,
            results,
        }
    }

    /// True when the user declined every item, which is the one batch outcome that
    /// maps to a non-zero exit.
    pub fn all_cancelled(&self) -> bool {
        !self.results.is_empty()
            && self
                .results
                .iter()
                .all(|r| r.status == ExecutionStatus::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: ExecutionStatus, bytes: Option<u64>) -> ExecutionResult {
        ExecutionResult {
            action: "a".to_string(),
            status,
            message: String::new(),
            bytes_freed: bytes,
            steps: vec![],
            elapsed_ms: 0,
        }
    }

    #[test]
    fn summary_counts_each_status() {
        let report = RunReport::new(
            Mode::Live,
            "s".to_string(),
            "f".to_string(),
            vec![
                result(ExecutionStatus::Succeeded, Some(10)),
                result(ExecutionStatus::Failed, None),
                result(ExecutionStatus::SkippedWhitelisted, None),
                result(ExecutionStatus::SkippedThreshold, None),
                result(ExecutionStatus::TimedOut, None),
                result(ExecutionStatus::Succeeded, Some(5)),
            ],
        );
        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.skipped, 2);
        assert_eq!(report.summary.timed_out, 1);
        assert_eq!(report.summary.bytes_freed, 15);
        assert!(!report.all_cancelled());
    }

    #[test]
    fn all_cancelled_requires_every_item_cancelled() {
        let mixed = RunReport::new(
            Mode::Live,
            "s".to_string(),
            "f".to_string(),
            vec![
                result(ExecutionStatus::Cancelled, None),
                result(ExecutionStatus::Succeeded, None),
            ],
        );
        assert!(!mixed.all_cancelled());

        let cancelled = RunReport::new(
            Mode::Live,
            "s".to_string(),
            "f".to_string(),
            vec![result(ExecutionStatus::Cancelled, None)],
        );
        assert!(cancelled.all_cancelled());

        let empty = RunReport::new(Mode::Live, "s".to_string(), "f".to_string(), vec![]);
        assert!(!empty.all_cancelled());
    }
}
