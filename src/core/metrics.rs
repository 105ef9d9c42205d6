use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Named measurements beyond memory/disk/uptime. Sizes are bytes, the rest are counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Probe {
    UserCacheBytes,
    MailDownloadsBytes,
    SavedStateBytes,
    SwapBytes,
    DeveloperBytes,
    LaunchAgents,
    LocalSnapshots,
    LoginItems,
}

impl Probe {
    pub const ALL: [Probe; 8] = [
        Probe::UserCacheBytes,
        Probe::MailDownloadsBytes,
        Probe::SavedStateBytes,
        Probe::SwapBytes,
        Probe::DeveloperBytes,
        Probe::LaunchAgents,
        Probe::LocalSnapshots,
        Probe::LoginItems,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Probe::UserCacheBytes => "user_cache_bytes",
            Probe::MailDownloadsBytes => "mail_downloads_bytes",
            Probe::SavedStateBytes => "saved_state_bytes",
            Probe::SwapBytes => "swap_bytes",
            Probe::DeveloperBytes => "developer_bytes",
            Probe::LaunchAgents => "launch_agents",
            Probe::LocalSnapshots => "local_snapshots",
            Probe::LoginItems => "login_items",
        }
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    pub disk_used_percent: f64,
    pub uptime_days: f64,
    pub probes: BTreeMap<Probe, u64>,
}

impl SystemMetrics {
    /// Missing probes read as zero so every gate keyed on them stays closed.
    pub fn probe(&self, probe: Probe) -> u64 {
        self.probes.get(&probe).copied().unwrap_or(0)
    }

    pub fn with_probe(mut self, probe: Probe, value: u64) -> Self {
        self.probes.insert(probe, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_probe_reads_as_zero() {
        let metrics = SystemMetrics::default().with_probe(Probe::SwapBytes, 42);
        assert_eq!(metrics.probe(Probe::SwapBytes), 42);
        assert_eq!(metrics.probe(Probe::LaunchAgents), 0);
    }
}
