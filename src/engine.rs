use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::actions::{ActionRegistry, RegisteredAction, SafeExecutor};
use crate::config::{self, EffectiveConfig};
use crate::core::{HealthReport, Mode, RunReport, UpdateTally};
use crate::exit;
use crate::logs;
use crate::metrics::{HostProbe, Layout, MetricsCollector};
use crate::platform;
use crate::rules;
use crate::update::{self, HostUpdateSources, KeySource, UpdateAggregator, UpdateReport, UpdateState};
use crate::whitelist::WhitelistStore;

pub struct Engine {
    cfg: EffectiveConfig,
    home_dir: PathBuf,
    layout: Layout,
    registry: ActionRegistry,
    whitelist: WhitelistStore,
    show_progress: bool,
}

impl Engine {
    /// Loads the whitelist once; later edits by other processes are not seen.
    pub fn new(cfg: EffectiveConfig, home_dir: PathBuf, show_progress: bool) -> Result<Self> {
        let layout = Layout::new(&home_dir);
        let registry = ActionRegistry::builtin(&layout, &cfg.thresholds, &cfg.executor.timeouts);
        let whitelist = WhitelistStore::open(config::whitelist_path(&home_dir))?;
        Ok(Self {
            cfg,
            home_dir,
            layout,
            registry,
            whitelist,
            show_progress,
        })
    }

    pub fn config(&self) -> &EffectiveConfig {
        &self.cfg
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn whitelist(&self) -> &WhitelistStore {
        &self.whitelist
    }

    pub fn whitelist_mut(&mut self) -> &mut WhitelistStore {
        &mut self.whitelist
    }

    pub fn health(&self) -> HealthReport {
        let pb = self.spinner("measuring system state...");

        let probe = HostProbe::new(self.layout.clone(), self.cfg.probe.timeout());
        let metrics = MetricsCollector::new(&probe, &self.layout).collect();
        let optimizations = rules::build_catalog(&metrics, Some(&self.whitelist));
        let os = platform::os_info(self.cfg.probe.timeout());

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        HealthReport {
            schema_version: "1.0".to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            os,
            generated_at: logs::rfc3339(logs::now()),
            memory_used_bytes: metrics.memory_used_bytes,
            memory_total_bytes: metrics.memory_total_bytes,
            disk_used_bytes: metrics.disk_used_bytes,
            disk_total_bytes: metrics.disk_total_bytes,
            disk_used_percent: metrics.disk_used_percent,
            uptime_days: metrics.uptime_days,
            optimizations,
            metrics,
        }
    }

    /// Runs `keys` in order and, for live batches, writes the JSON run log. A log
    /// that cannot be written is reported but does not fail the batch.
    pub fn run_actions(
        &self,
        keys: &[String],
        mode: Mode,
        confirm: &mut dyn FnMut(&RegisteredAction) -> bool,
    ) -> Result<RunReport> {
        let started = logs::now();
        let mut executor = SafeExecutor::new(&self.registry, &self.whitelist)
            .with_size_budget(self.cfg.probe.timeout());
        let results = executor.execute_batch(keys, mode, confirm)?;
        let finished = logs::now();

        let report = RunReport::new(
            mode,
            logs::rfc3339(started),
            logs::rfc3339(finished),
            results,
        );

        if !mode.is_dry_run() {
            if let Err(err) = logs::write_run_log(
                &self.home_dir,
                started,
                finished,
                mode,
                &report.summary,
                &report.results,
            ) {
                warn!(err = %format!("{err:#}"), "failed to write run log");
            }
        }
        Ok(report)
    }

    /// Drives the update state machine to completion. Nothing pending and a
    /// declined prompt leave through their dedicated exit codes.
    pub fn update(
        &self,
        keys: &mut dyn KeySource,
        prompt: &mut dyn FnMut(&UpdateTally),
    ) -> Result<UpdateReport> {
        let sources = HostUpdateSources::new(
            self.cfg.probe.timeout().max(Duration::from_secs(30)),
            self.cfg.update.self_update_command.clone(),
            update::self_update_marker(&config::config_dir(&self.home_dir)),
        );
        let started = logs::now();
        let mut aggregator = UpdateAggregator::new(sources);
        let state = aggregator.run(keys, prompt).clone();

        match state {
            UpdateState::NoUpdates => Err(exit::no_updates("everything is up to date")),
            UpdateState::Cancelled(_) => Err(exit::cancelled("update cancelled")),
            UpdateState::Reported(report) => {
                if let Err(err) = logs::write_update_log(&self.home_dir, started, logs::now(), &report) {
                    warn!(err = %format!("{err:#}"), "failed to write update log");
                }
                Ok(report)
            }
            other => Err(anyhow::anyhow!(
                "update stopped in non-terminal state: {}",
                other.name()
            )),
        }
    }

    fn spinner(&self, message: &'static str) -> Option<indicatif::ProgressBar> {
        if !(self.show_progress && std::io::stderr().is_terminal()) {
            return None;
        }
        let pb = indicatif::ProgressBar::new_spinner();
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    }
}
