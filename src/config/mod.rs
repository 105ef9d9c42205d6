use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub ui: UiConfig,
    pub thresholds: ThresholdConfig,
    pub probe: ProbeConfig,
    pub executor: ExecutorConfig,
    pub update: UpdateConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThresholdConfig {
    /// Below this the executor skips Mail Downloads even though the catalog shows it.
    pub mail_downloads_min_mb: u64,
    pub mail_downloads_age_days: u32,
    pub log_age_days: u32,
    pub saved_state_age_days: u32,
}

impl ThresholdConfig {
    pub fn mail_downloads_min_bytes(&self) -> u64 {
        self.mail_downloads_min_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeConfig {
    pub timeout_secs: u64,
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutorConfig {
    /// Per-action timeout overrides in seconds, keyed by action key.
    pub timeouts: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateConfig {
    pub self_update_command: Vec<String>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            mail_downloads_min_mb: 5,
            mail_downloads_age_days: 30,
            log_age_days: 7,
            saved_state_age_days: 7,
        }
    }
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            ui: UiConfig { color: true },
            thresholds: ThresholdConfig::default(),
            probe: ProbeConfig { timeout_secs: 5 },
            executor: ExecutorConfig::default(),
            update: UpdateConfig {
                self_update_command: vec![
                    "brew".to_string(),
                    "upgrade".to_string(),
                    "moleopt".to_string(),
                ],
            },
            config_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    ui: Option<RawUiConfig>,
    thresholds: Option<RawThresholdConfig>,
    probe: Option<RawProbeConfig>,
    executor: Option<RawExecutorConfig>,
    update: Option<RawUpdateConfig>,
}

#[derive(Debug, Deserialize)]
struct RawUiConfig {
    color: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawThresholdConfig {
    mail_downloads_min_mb: Option<u64>,
    mail_downloads_age_days: Option<u32>,
    log_age_days: Option<u32>,
    saved_state_age_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawProbeConfig {
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawExecutorConfig {
    timeouts: Option<BTreeMap<String, u64>>,
}

#[derive(Debug, Deserialize)]
struct RawUpdateConfig {
    self_update_command: Option<Vec<String>>,
}

pub fn config_dir(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/moleopt")
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    config_dir(home_dir).join("config.toml")
}

pub fn default_whitelist_path(home_dir: &Path) -> PathBuf {
    config_dir(home_dir).join("whitelist.toml")
}

/// `MOLEOPT_WHITELIST` wins over the default location.
pub fn whitelist_path(home_dir: &Path) -> PathBuf {
    std::env::var_os("MOLEOPT_WHITELIST")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| default_whitelist_path(home_dir))
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();

    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&s).context("failed to parse config file (TOML)")?;
        apply_raw_config(&mut cfg, raw)?;
        cfg.config_path = Some(path.display().to_string());
    }

    apply_env_overrides(&mut cfg)?;
    validate(&cfg)?;

    Ok(cfg)
}

/// A zero probe budget would report every directory as empty and close the
/// size gates without a trace.
fn validate(cfg: &EffectiveConfig) -> Result<()> {
    if cfg.probe.timeout_secs == 0 {
        anyhow::bail!("probe.timeout_secs must be greater than 0");
    }
    Ok(())
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) -> Result<()> {
    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
    }

    if let Some(t) = raw.thresholds {
        if let Some(v) = t.mail_downloads_min_mb {
            cfg.thresholds.mail_downloads_min_mb = v;
        }
        if let Some(v) = t.mail_downloads_age_days {
            cfg.thresholds.mail_downloads_age_days = v;
        }
        if let Some(v) = t.log_age_days {
            cfg.thresholds.log_age_days = v;
        }
        if let Some(v) = t.saved_state_age_days {
            cfg.thresholds.saved_state_age_days = v;
        }
    }

    if let Some(probe) = raw.probe {
        if let Some(v) = probe.timeout_secs {
            cfg.probe.timeout_secs = v;
        }
    }

    if let Some(executor) = raw.executor {
        if let Some(timeouts) = executor.timeouts {
            if let Some((key, _)) = timeouts.iter().find(|(_, secs)| **secs == 0) {
                anyhow::bail!("executor.timeouts.{key} must be greater than 0");
            }
            cfg.executor.timeouts = timeouts;
        }
    }

    if let Some(update) = raw.update {
        if let Some(cmd) = update.self_update_command {
            if cmd.is_empty() || cmd[0].trim().is_empty() {
                anyhow::bail!("update.self_update_command must name a program");
            }
            cfg.update.self_update_command = cmd;
        }
    }

    Ok(())
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("MOLEOPT_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "MOLEOPT_UI_COLOR")?;
    }
    if let Ok(v) = std::env::var("MOLEOPT_MAIL_DOWNLOADS_MIN_MB") {
        cfg.thresholds.mail_downloads_min_mb = v
            .trim()
            .parse::<u64>()
            .with_context(|| "MOLEOPT_MAIL_DOWNLOADS_MIN_MB")?;
    }
    if let Ok(v) = std::env::var("MOLEOPT_MAIL_DOWNLOADS_AGE_DAYS") {
        cfg.thresholds.mail_downloads_age_days = v
            .trim()
            .parse::<u32>()
            .with_context(|| "MOLEOPT_MAIL_DOWNLOADS_AGE_DAYS")?;
    }
    if let Ok(v) = std::env::var("MOLEOPT_LOG_AGE_DAYS") {
        cfg.thresholds.log_age_days = v
            .trim()
            .parse::<u32>()
            .with_context(|| "MOLEOPT_LOG_AGE_DAYS")?;
    }
    if let Ok(v) = std::env::var("MOLEOPT_SAVED_STATE_AGE_DAYS") {
        cfg.thresholds.saved_state_age_days = v
            .trim()
            .parse::<u32>()
            .with_context(|| "MOLEOPT_SAVED_STATE_AGE_DAYS")?;
    }
    if let Ok(v) = std::env::var("MOLEOPT_PROBE_TIMEOUT_SECS") {
        cfg.probe.timeout_secs = v
            .trim()
            .parse::<u64>()
            .with_context(|| "MOLEOPT_PROBE_TIMEOUT_SECS")?;
    }

    Ok(())
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "invalid boolean: {s} (expected true|false|1|0|yes|no|on|off)"
        )),
    }
}
