use crate::core::{CandidateAction, SystemMetrics};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    pub name: String,
    pub version: String,
}

/// Health record handed to the menu layer: measurements plus the ordered catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub schema_version: String,
    pub tool_version: String,
    pub os: OsInfo,
    pub generated_at: String,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    pub disk_used_percent: f64,
    pub uptime_days: f64,
    pub optimizations: Vec<CandidateAction>,
    #[serde(skip)]
    pub metrics: SystemMetrics,
}
