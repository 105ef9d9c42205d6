//! Point-in-time measurements. Every probe fails soft: a missing tool, a timeout
//! or unparseable output yields zero and a debug log line, never an error.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::core::{Probe, SystemMetrics};
use crate::platform::{self, DiskUsage, macos};
use crate::scan;

mod layout;

pub use layout::Layout;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryInfo {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountKind {
    LaunchAgents,
    LocalSnapshots,
    LoginItems,
}

/// One read-only probe per measurement kind.
pub trait SystemProbe {
    fn memory(&self) -> MemoryInfo;
    fn disk(&self) -> DiskUsage;
    fn uptime_days(&self) -> f64;
    fn dir_size(&self, path: &Path) -> u64;
    fn count(&self, kind: CountKind) -> u64;
}

pub struct MetricsCollector<'a, P: SystemProbe + ?Sized> {
    probe: &'a P,
    layout: &'a Layout,
}

impl<'a, P: SystemProbe + ?Sized> MetricsCollector<'a, P> {
    pub fn new(probe: &'a P, layout: &'a Layout) -> Self {
        Self { probe, layout }
    }

    /// Runs every probe once, in a fixed order.
    pub fn collect(&self) -> SystemMetrics {
        let memory = self.probe.memory();
        let disk = self.probe.disk();
        let mut metrics = SystemMetrics {
            memory_used_bytes: memory.used_bytes,
            memory_total_bytes: memory.total_bytes,
            disk_used_bytes: disk.used_bytes,
            disk_total_bytes: disk.total_bytes,
            disk_used_percent: disk.used_percent(),
            uptime_days: self.probe.uptime_days(),
            probes: Default::default(),
        };

        for probe in Probe::ALL {
            let value = self.measure(probe);
            debug!(probe = probe.as_str(), value, "probe measured");
            metrics.probes.insert(probe, value);
        }
        metrics
    }

    fn measure(&self, probe: Probe) -> u64 {
        match probe {
            Probe::UserCacheBytes => self.probe.dir_size(&self.layout.user_caches()),
            Probe::MailDownloadsBytes => self.sum_sizes(&self.layout.mail_download_dirs()),
            Probe::SavedStateBytes => self.probe.dir_size(&self.layout.saved_state_dir()),
            Probe::SwapBytes => self.sum_sizes(&self.layout.swap_files()),
            Probe::DeveloperBytes => self.sum_sizes(&self.layout.developer_dirs()),
            Probe::LaunchAgents => self.probe.count(CountKind::LaunchAgents),
            Probe::LocalSnapshots => self.probe.count(CountKind::LocalSnapshots),
            Probe::LoginItems => self.probe.count(CountKind::LoginItems),
        }
    }

    fn sum_sizes(&self, paths: &[std::path::PathBuf]) -> u64 {
        paths
            .iter()
            .fold(0u64, |acc, p| acc.saturating_add(self.probe.dir_size(p)))
    }
}

/// Probes the running machine through sysctl/vm_stat/tmutil/osascript and the filesystem.
#[derive(Debug, Clone)]
pub struct HostProbe {
    layout: Layout,
    timeout: Duration,
}

impl HostProbe {
    pub fn new(layout: Layout, timeout: Duration) -> Self {
        Self { layout, timeout }
    }

    fn launch_agent_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for dir in self.layout.launch_agent_dirs() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    debug!(dir = %dir.display(), %err, "launch agent directory unreadable");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                names.insert(name);
            }
        }
        names
    }

    fn tool_output(&self, tool: &str, run: impl FnOnce(Duration) -> anyhow::Result<platform::CommandOutput>) -> Option<String> {
        if !platform::capability(tool).is_available() {
            debug!(tool, "tool unavailable");
            return None;
        }
        match run(self.timeout) {
            Ok(out) if out.success() => Some(out.stdout),
            Ok(out) => {
                debug!(tool, exit_code = out.exit_code, "tool exited non-zero");
                None
            }
            Err(err) => {
                debug!(tool, err = %format!("{err:#}"), "tool failed");
                None
            }
        }
    }
}

impl SystemProbe for HostProbe {
    fn memory(&self) -> MemoryInfo {
        let Some(total) = self
            .tool_output("sysctl", |t| macos::sysctl("hw.memsize", t))
            .and_then(|s| s.trim().parse::<u64>().ok())
        else {
            return MemoryInfo::default();
        };

        let used = self
            .tool_output("vm_stat", macos::vm_stat)
            .map(|s| macos::parse_vm_stat_used_bytes(&s))
            .unwrap_or(0);

        MemoryInfo {
            used_bytes: used.min(total),
            total_bytes: total,
        }
    }

    fn disk(&self) -> DiskUsage {
        let path = self.layout.disk_probe_path();
        platform::disk_usage(path).unwrap_or_else(|| {
            debug!(path = %path.display(), "statvfs failed");
            DiskUsage::default()
        })
    }

    fn uptime_days(&self) -> f64 {
        let Some(boot) = self
            .tool_output("sysctl", |t| macos::sysctl("kern.boottime", t))
            .and_then(|s| macos::parse_boottime_secs(&s))
        else {
            return 0.0;
        };
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let secs = now.saturating_sub(boot).max(0);
        secs as f64 / 86_400.0
    }

    fn dir_size(&self, path: &Path) -> u64 {
        let estimate = scan::estimate_dir_size(path, self.timeout);
        if !estimate.is_complete() {
            debug!(path = %path.display(), method = ?estimate.method, "size estimate is a lower bound");
        }
        estimate.bytes
    }

    fn count(&self, kind: CountKind) -> u64 {
        let n = match kind {
            CountKind::LaunchAgents => self.launch_agent_names().len(),
            CountKind::LocalSnapshots => self
                .tool_output("tmutil", macos::tmutil_list_local_snapshots)
                .map(|s| macos::parse_tmutil_local_snapshots(&s).len())
                .unwrap_or(0),
            CountKind::LoginItems => self
                .tool_output("osascript", macos::osascript_login_items)
                .map(|s| macos::parse_login_items(&s).len())
                .unwrap_or(0),
        };
        n as u64
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Deterministic probe: sizes by path, everything else fixed.
    #[derive(Default)]
    pub(crate) struct FakeProbe {
        pub memory: MemoryInfo,
        pub sizes: HashMap<PathBuf, u64>,
        pub launch_agents: u64,
        pub snapshots: u64,
        pub login_items: u64,
    }

    impl SystemProbe for FakeProbe {
        fn memory(&self) -> MemoryInfo {
            self.memory
        }
        fn disk(&self) -> DiskUsage {
            DiskUsage {
                used_bytes: 40,
                total_bytes: 100,
            }
        }
        fn uptime_days(&self) -> f64 {
            2.5
        }
        fn dir_size(&self, path: &Path) -> u64 {
            self.sizes.get(path).copied().unwrap_or(0)
        }
        fn count(&self, kind: CountKind) -> u64 {
            match kind {
                CountKind::LaunchAgents => self.launch_agents,
                CountKind::LocalSnapshots => self.snapshots,
                CountKind::LoginItems => self.login_items,
            }
        }
    }

    fn temp_root(tag: &str) -> PathBuf {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "moleopt-metrics-{tag}-{}-{seq}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    #[test]
    fn collector_sums_multi_root_probes() {
        let layout = Layout::new("/Users/test");
        let mail = layout.mail_download_dirs();
        let mut probe = FakeProbe::default();
        probe.sizes.insert(mail[0].clone(), 1000);
        probe.sizes.insert(mail[1].clone(), 24);
        probe.launch_agents = 9;

        let metrics = MetricsCollector::new(&probe, &layout).collect();
        assert_eq!(metrics.probe(Probe::MailDownloadsBytes), 1024);
        assert_eq!(metrics.probe(Probe::LaunchAgents), 9);
        assert_eq!(metrics.probe(Probe::SavedStateBytes), 0);
        assert_eq!(metrics.disk_used_percent, 40.0);
        assert_eq!(metrics.probes.len(), Probe::ALL.len());
    }

    #[test]
    fn unavailable_memory_probe_reports_zero() {
        let layout = Layout::new("/Users/test");
        let probe = FakeProbe::default();
        let metrics = MetricsCollector::new(&probe, &layout).collect();
        assert_eq!(metrics.memory_used_bytes, 0);
        assert_eq!(metrics.memory_total_bytes, 0);
    }

    #[test]
    fn host_dir_size_of_missing_path_is_zero() {
        let root = temp_root("missing");
        let probe = HostProbe::new(Layout::new(root.join("home")), Duration::from_secs(5));
        assert_eq!(probe.dir_size(&root.join("home/Library/Saved Application State")), 0);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn host_launch_agents_dedupe_across_roots() {
        let root = temp_root("agents");
        let layout = Layout::new(root.join("home")).with_system_root(root.join("sys"));
        let dirs = layout.launch_agent_dirs();
        for dir in &dirs {
            std::fs::create_dir_all(dir).unwrap();
        }
        for name in ["com.a.plist", "com.b.plist", "com.c.plist"] {
            std::fs::write(dirs[0].join(name), b"x").unwrap();
        }
        for name in ["com.c.plist", "com.d.plist", ".DS_Store"] {
            std::fs::write(dirs[1].join(name), b"x").unwrap();
        }

        let probe = HostProbe::new(layout, Duration::from_secs(5));
        assert_eq!(probe.count(CountKind::LaunchAgents), 4);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn host_collect_on_empty_home_closes_every_size_gate() {
        let root = temp_root("empty");
        let layout = Layout::new(root.join("home")).with_system_root(root.join("sys"));
        let probe = HostProbe::new(layout.clone(), Duration::from_secs(5));
        let metrics = MetricsCollector::new(&probe, &layout).collect();
        for p in [
            Probe::UserCacheBytes,
            Probe::MailDownloadsBytes,
            Probe::SavedStateBytes,
            Probe::SwapBytes,
            Probe::DeveloperBytes,
            Probe::LaunchAgents,
        ] {
            assert_eq!(metrics.probe(p), 0, "probe {p}");
        }
        let _ = std::fs::remove_dir_all(&root);
    }
}
