//! Action keys mapped to the procedures that implement them.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::config::ThresholdConfig;
use crate::core::SafetyTier;
use crate::exit;
use crate::metrics::Layout;

pub mod executor;
pub mod prune;

pub use executor::SafeExecutor;
pub use prune::{PruneOutcome, prune_aged_entries};

const LSREGISTER: &str = "/System/Library/Frameworks/CoreServices.framework/Frameworks/LaunchServices.framework/Support/lsregister";
const LOGIN_ITEMS_PANE: &str = "x-apple.systempreferences:com.apple.LoginItems-Settings.extension";
const DEVICE_SUPPORT_AGE_DAYS: u32 = 90;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStep {
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    /// Runs inside the run's privilege session.
    pub privileged: bool,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneTarget {
    pub label: String,
    pub root: PathBuf,
    pub pattern: String,
    pub older_than_days: u32,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Command(CommandStep),
    Prune(PruneTarget),
}

impl Step {
    pub fn label(&self) -> &str {
        match self {
            Step::Command(c) => &c.label,
            Step::Prune(p) => &p.label,
        }
    }

    pub fn required(&self) -> bool {
        match self {
            Step::Command(c) => c.required,
            Step::Prune(p) => p.required,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Step::Command(c) => {
                let mut line = String::new();
                if c.privileged {
                    line.push_str("sudo ");
                }
                line.push_str(&c.program);
                for arg in &c.args {
                    line.push(' ');
                    line.push_str(arg);
                }
                line
            }
            Step::Prune(p) if p.older_than_days == 0 => {
                format!("remove {}/{}", p.root.display(), p.pattern)
            }
            Step::Prune(p) => format!(
                "remove {}/{} older than {} days",
                p.root.display(),
                p.pattern,
                p.older_than_days
            ),
        }
    }
}

/// Skip the action when the measured paths hold less than `min_bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinEffect {
    pub paths: Vec<PathBuf>,
    pub min_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct RegisteredAction {
    pub key: String,
    pub tier: SafetyTier,
    pub timeout: Duration,
    pub steps: Vec<Step>,
    /// Measured before and after a live run to estimate bytes freed.
    pub affected: Vec<PathBuf>,
    pub min_effect: Option<MinEffect>,
}

impl RegisteredAction {
    pub fn new(key: impl Into<String>, tier: SafetyTier, timeout_secs: u64) -> Self {
        Self {
            key: key.into(),
            tier,
            timeout: Duration::from_secs(timeout_secs),
            steps: vec![],
            affected: vec![],
            min_effect: None,
        }
    }

    pub fn command(mut self, label: &str, program: &str, args: &[&str]) -> Self {
        self.steps.push(Step::Command(CommandStep {
            label: label.to_string(),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            privileged: false,
            required: true,
        }));
        self
    }

    pub fn privileged(mut self, label: &str, program: &str, args: &[&str]) -> Self {
        self = self.command(label, program, args);
        if let Some(Step::Command(c)) = self.steps.last_mut() {
            c.privileged = true;
        }
        self
    }

    pub fn prune(mut self, label: &str, root: PathBuf, pattern: &str, older_than_days: u32) -> Self {
        self.steps.push(Step::Prune(PruneTarget {
            label: label.to_string(),
            root,
            pattern: pattern.to_string(),
            older_than_days,
            required: true,
        }));
        self
    }

    /// Marks the most recently added step as best-effort.
    pub fn optional(mut self) -> Self {
        match self.steps.last_mut() {
            Some(Step::Command(c)) => c.required = false,
            Some(Step::Prune(p)) => p.required = false,
            None => {}
        }
        self
    }

    pub fn affects(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.affected.extend(paths);
        self
    }

    pub fn min_effect(mut self, paths: Vec<PathBuf>, min_bytes: u64) -> Self {
        self.min_effect = Some(MinEffect { paths, min_bytes });
        self
    }

    /// Distinct external programs this action shells out to, in step order.
    pub fn programs(&self) -> Vec<&str> {
        let mut out: Vec<&str> = vec![];
        for step in &self.steps {
            if let Step::Command(c) = step {
                if !out.contains(&c.program.as_str()) {
                    out.push(&c.program);
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: Vec<RegisteredAction>,
}

impl ActionRegistry {
    pub fn new(actions: Vec<RegisteredAction>) -> Self {
        Self { actions }
    }

    /// The built-in procedures for every catalog key, with per-key timeout
    /// overrides applied. Overrides for keys that do not exist are ignored.
    pub fn builtin(
        layout: &Layout,
        thresholds: &ThresholdConfig,
        timeouts: &BTreeMap<String, u64>,
    ) -> Self {
        let mut registry = Self::new(builtin_actions(layout, thresholds));
        for (key, secs) in timeouts {
            match registry.actions.iter_mut().find(|a| &a.key == key) {
                Some(action) => action.timeout = Duration::from_secs(*secs),
                None => warn!(key = %key, "timeout override for unknown action ignored"),
            }
        }
        registry
    }

    /// Unknown keys are caller errors and map to the invalid-arguments exit code.
    pub fn get(&self, key: &str) -> Result<&RegisteredAction> {
        self.actions
            .iter()
            .find(|a| a.key == key)
            .ok_or_else(|| exit::invalid_args(format!("unknown action key: {key}")))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.actions.iter().any(|a| a.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredAction> {
        self.actions.iter()
    }
}

fn builtin_actions(layout: &Layout, t: &ThresholdConfig) -> Vec<RegisteredAction> {
    use SafetyTier::{RequiresConfirmation, Safe};

    let mut mail = RegisteredAction::new("mail_downloads", Safe, 60)
        .min_effect(layout.mail_download_dirs(), t.mail_downloads_min_bytes())
        .affects(layout.mail_download_dirs());
    for dir in layout.mail_download_dirs() {
        mail = mail.prune("remove old Mail attachments", dir, "*", t.mail_downloads_age_days);
    }

    let mut logs = RegisteredAction::new("log_cleanup", Safe, 60).affects(layout.diagnostic_log_dirs());
    for dir in layout.diagnostic_log_dirs() {
        logs = logs.prune("remove old diagnostic reports", dir, "*", t.log_age_days);
    }

    let dev = layout.developer_dirs();

    vec![
        RegisteredAction::new("system_maintenance", Safe, 180)
            .command(
                "rebuild Launch Services database",
                LSREGISTER,
                &["-kill", "-r", "-domain", "local", "-domain", "system", "-domain", "user"],
            )
            .command("reset Quick Look server", "qlmanage", &["-r"])
            .optional(),
        RegisteredAction::new("startup_items", RequiresConfirmation, 30).command(
            "open login items settings",
            "open",
            &[LOGIN_ITEMS_PANE],
        ),
        RegisteredAction::new("network_services", Safe, 30)
            .command("flush directory service cache", "dscacheutil", &["-flushcache"])
            .privileged("restart mDNSResponder", "killall", &["-HUP", "mDNSResponder"]),
        RegisteredAction::new("cache_refresh", Safe, 60)
            .command("reset Quick Look cache", "qlmanage", &["-r", "cache"])
            .prune("clear Quick Look thumbnails", layout.quicklook_cache(), "*", 0)
            .optional()
            .prune("clear Safari cache", layout.safari_cache(), "*", 0)
            .optional()
            .affects([layout.quicklook_cache(), layout.safari_cache()]),
        RegisteredAction::new("maintenance_scripts", Safe, 180).privileged(
            "run periodic maintenance",
            "periodic",
            &["daily", "weekly", "monthly"],
        ),
        RegisteredAction::new("radio_refresh", Safe, 30)
            .prune(
                "remove Bluetooth preference cache",
                layout.byhost_preferences(),
                "com.apple.Bluetooth.*.plist",
                0,
            )
            .optional()
            .prune(
                "remove Wi-Fi preference cache",
                layout.byhost_preferences(),
                "com.apple.wifi.*.plist",
                0,
            )
            .optional()
            .command("reload preferences daemon", "killall", &["cfprefsd"]),
        RegisteredAction::new("recent_items", Safe, 30)
            .prune("clear recent items lists", layout.recent_items_dir(), "*.sfl*", 0)
            .affects([layout.recent_items_dir()]),
        logs,
        mail,
        RegisteredAction::new("saved_state_cleanup", Safe, 60)
            .prune(
                "remove stale saved application state",
                layout.saved_state_dir(),
                "*.savedState",
                t.saved_state_age_days,
            )
            .affects([layout.saved_state_dir()]),
        RegisteredAction::new("finder_dock_refresh", Safe, 30)
            .prune("clear Finder cache", layout.finder_cache(), "*", 0)
            .optional()
            .command("restart Finder", "killall", &["Finder"])
            .command("restart Dock", "killall", &["Dock"])
            .affects([layout.finder_cache()]),
        RegisteredAction::new("swap_cleanup", RequiresConfirmation, 120)
            .privileged("purge inactive memory", "purge", &[])
            .affects(layout.swap_files()),
        RegisteredAction::new("login_items", Safe, 30).command(
            "open login items settings",
            "open",
            &[LOGIN_ITEMS_PANE],
        ),
        RegisteredAction::new("startup_cache", Safe, 180).privileged(
            "rebuild kernel extension cache",
            "kextcache",
            &["-i", "/"],
        ),
        RegisteredAction::new("local_snapshots", Safe, 120).privileged(
            "thin local snapshots",
            "tmutil",
            &["thinlocalsnapshots", "/", "9999999999999", "4"],
        ),
        RegisteredAction::new("developer_cleanup", RequiresConfirmation, 180)
            .prune("remove Xcode DerivedData", dev[0].clone(), "*", 0)
            .prune(
                "remove old device support files",
                dev[2].clone(),
                "*",
                DEVICE_SUPPORT_AGE_DAYS,
            )
            .prune("remove simulator caches", dev[3].clone(), "*", 0)
            .command("delete unavailable simulators", "xcrun", &["simctl", "delete", "unavailable"])
            .optional()
            .affects([dev[0].clone(), dev[2].clone(), dev[3].clone()]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SystemMetrics;
    use crate::rules::build_catalog;

    fn registry() -> ActionRegistry {
        ActionRegistry::builtin(
            &Layout::new("/Users/test"),
            &ThresholdConfig::default(),
            &BTreeMap::new(),
        )
    }

    #[test]
    fn every_catalog_key_is_registered_once() {
        let reg = registry();
        let keys: Vec<_> = reg.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys.len(), 16);
        let mut dedup = keys.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), keys.len());

        let catalog = build_catalog(&SystemMetrics::default(), None);
        for item in catalog {
            let action = reg.get(&item.action).unwrap();
            assert_eq!(action.tier, item.safety, "{}", item.action);
        }
    }

    #[test]
    fn default_timeouts_are_bounded() {
        for action in registry().iter() {
            let secs = action.timeout.as_secs();
            assert!((10..=180).contains(&secs), "{} = {secs}", action.key);
            assert!(!action.steps.is_empty(), "{}", action.key);
        }
    }

    #[test]
    fn unknown_key_is_invalid_args() {
        let err = registry().get("defrag_everything").unwrap_err();
        assert_eq!(exit::exit_code(&err), 2);
    }

    #[test]
    fn timeout_override_applies_to_known_keys() {
        let overrides = BTreeMap::from([
            ("startup_cache".to_string(), 240),
            ("nope".to_string(), 5),
        ]);
        let reg = ActionRegistry::builtin(
            &Layout::new("/Users/test"),
            &ThresholdConfig::default(),
            &overrides,
        );
        assert_eq!(reg.get("startup_cache").unwrap().timeout, Duration::from_secs(240));
        assert!(!reg.contains("nope"));
    }

    #[test]
    fn network_services_requires_both_steps() {
        let reg = registry();
        let action = reg.get("network_services").unwrap();
        assert_eq!(action.steps.len(), 2);
        assert!(action.steps.iter().all(Step::required));
        assert_eq!(action.programs(), ["dscacheutil", "killall"]);
    }

    #[test]
    fn mail_downloads_carries_configured_minimum() {
        let t = ThresholdConfig {
            mail_downloads_min_mb: 12,
            ..ThresholdConfig::default()
        };
        let reg = ActionRegistry::builtin(&Layout::new("/Users/test"), &t, &BTreeMap::new());
        let min = reg.get("mail_downloads").unwrap().min_effect.clone().unwrap();
        assert_eq!(min.min_bytes, 12 * 1024 * 1024);
        assert_eq!(min.paths.len(), 2);
    }

    #[test]
    fn describe_renders_prune_cutoff() {
        let step = Step::Prune(PruneTarget {
            label: "x".into(),
            root: PathBuf::from("/tmp/logs"),
            pattern: "*.crash".into(),
            older_than_days: 7,
            required: true,
        });
        assert_eq!(step.describe(), "remove /tmp/logs/*.crash older than 7 days");
    }
}
