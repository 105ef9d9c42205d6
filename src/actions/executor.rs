use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info, warn};

use super::{ActionRegistry, RegisteredAction, Step, prune_aged_entries};
use crate::core::{ExecutionResult, ExecutionStatus, Mode, StepOutcome, StepRecord};
use crate::platform::{self, PrivilegeSession};
use crate::scan;
use crate::ui::format_size;
use crate::whitelist::WhitelistStore;

const DEFAULT_SIZE_BUDGET: Duration = Duration::from_secs(5);
const STDERR_EXCERPT_CHARS: usize = 200;

/// Runs registered procedures one at a time. A failing action becomes a failed
/// result; it never stops the rest of a batch.
pub struct SafeExecutor<'a> {
    registry: &'a ActionRegistry,
    whitelist: &'a WhitelistStore,
    privilege: PrivilegeSession,
    size_budget: Duration,
}

enum StepsEnd {
    Completed,
    TimedOut { label: String },
}

impl<'a> SafeExecutor<'a> {
    pub fn new(registry: &'a ActionRegistry, whitelist: &'a WhitelistStore) -> Self {
        Self {
            registry,
            whitelist,
            privilege: PrivilegeSession::new(),
            size_budget: DEFAULT_SIZE_BUDGET,
        }
    }

    /// Time allowed for each before/after size measurement.
    pub fn with_size_budget(mut self, budget: Duration) -> Self {
        self.size_budget = budget;
        self
    }

    pub fn execute(&mut self, key: &str, mode: Mode) -> Result<ExecutionResult> {
        self.execute_confirmed(key, mode, &mut |_| true)
    }

    /// Every key is looked up before anything runs, so a typo aborts the batch
    /// up front instead of halfway through. Confirmation-tier actions in a live
    /// batch go through `confirm`; declining yields `cancelled`.
    pub fn execute_batch(
        &mut self,
        keys: &[String],
        mode: Mode,
        confirm: &mut dyn FnMut(&RegisteredAction) -> bool,
    ) -> Result<Vec<ExecutionResult>> {
        for key in keys {
            self.registry.get(key)?;
        }
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.execute_confirmed(key, mode, confirm)?);
        }
        Ok(out)
    }

    fn execute_confirmed(
        &mut self,
        key: &str,
        mode: Mode,
        confirm: &mut dyn FnMut(&RegisteredAction) -> bool,
    ) -> Result<ExecutionResult> {
        let registry = self.registry;
        let action = registry.get(key)?;

        if self.whitelist.is_whitelisted(key) {
            info!(action = key, "skipped: whitelisted");
            return Ok(ExecutionResult::skipped(
                key,
                ExecutionStatus::SkippedWhitelisted,
                "suppressed by whitelist",
            ));
        }

        if let Some(min) = &action.min_effect {
            let measured = scan::total_size(&min.paths, self.size_budget);
            if measured < min.min_bytes {
                info!(action = key, measured, min = min.min_bytes, "skipped: below threshold");
                return Ok(ExecutionResult::skipped(
                    key,
                    ExecutionStatus::SkippedThreshold,
                    format!(
                        "{} is below the {} minimum",
                        format_size(measured),
                        format_size(min.min_bytes)
                    ),
                ));
            }
        }

        if !mode.is_dry_run() && !action.tier.is_safe() && !confirm(action) {
            info!(action = key, "declined at confirmation");
            return Ok(ExecutionResult::skipped(
                key,
                ExecutionStatus::Cancelled,
                "declined at confirmation",
            ));
        }

        Ok(self.run_steps(action, mode))
    }

    fn run_steps(&mut self, action: &RegisteredAction, mode: Mode) -> ExecutionResult {
        let started = Instant::now();
        let deadline = started + action.timeout;
        let dry_run = mode.is_dry_run();

        let available: BTreeMap<&str, bool> = action
            .programs()
            .into_iter()
            .map(|p| (p, platform::capability(p).is_available()))
            .collect();

        let before = (!dry_run && !action.affected.is_empty())
            .then(|| scan::total_size(&action.affected, self.size_budget));

        let mut records = Vec::with_capacity(action.steps.len());
        let mut end = StepsEnd::Completed;
        for step in &action.steps {
            if Instant::now() >= deadline {
                end = StepsEnd::TimedOut {
                    label: step.label().to_string(),
                };
                break;
            }
            match self.run_step(step, dry_run, deadline, &available) {
                Some(record) => {
                    match &record.outcome {
                        StepOutcome::Ok => info!(action = %action.key, step = %record.label, "step ok"),
                        StepOutcome::Failed(reason) => {
                            warn!(action = %action.key, step = %record.label, %reason, "step failed")
                        }
                    }
                    records.push(record);
                }
                None => {
                    end = StepsEnd::TimedOut {
                        label: step.label().to_string(),
                    };
                    break;
                }
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let (status, message) = match end {
            StepsEnd::TimedOut { label } => (
                ExecutionStatus::TimedOut,
                format!(
                    "timed out after {}s during '{label}'",
                    action.timeout.as_secs()
                ),
            ),
            StepsEnd::Completed => summarize(action, &records, dry_run),
        };

        let bytes_freed = before.map(|before| {
            let after = scan::total_size(&action.affected, self.size_budget);
            before.saturating_sub(after)
        });

        info!(action = %action.key, status = status.as_str(), elapsed_ms, "action finished");
        ExecutionResult {
            action: action.key.clone(),
            status,
            message,
            bytes_freed,
            steps: records,
            elapsed_ms,
        }
    }

    /// `None` means the step hit the action deadline.
    fn run_step(
        &mut self,
        step: &Step,
        dry_run: bool,
        deadline: Instant,
        available: &BTreeMap<&str, bool>,
    ) -> Option<StepRecord> {
        let mut record = StepRecord {
            label: step.label().to_string(),
            required: step.required(),
            outcome: StepOutcome::Ok,
            removed: None,
        };

        match step {
            Step::Command(cmd) => {
                if !available.get(cmd.program.as_str()).copied().unwrap_or(false) {
                    record.outcome = StepOutcome::failed(format!("{} is not available", cmd.program));
                    return Some(record);
                }
                if dry_run {
                    debug!(command = %step.describe(), "dry-run");
                    return Some(record);
                }
                if cmd.privileged {
                    if let Err(err) = self.privilege.acquire() {
                        record.outcome = StepOutcome::failed(format!("{err:#}"));
                        return Some(record);
                    }
                }

                let remaining = deadline.saturating_duration_since(Instant::now());
                let args: Vec<&str> = cmd.args.iter().map(String::as_str).collect();
                let result = if cmd.privileged {
                    self.privilege.run(&cmd.program, &args, remaining)
                } else {
                    platform::run_command(&cmd.program, &args, remaining)
                };
                match result {
                    Ok(out) if out.success() => {}
                    Ok(out) => {
                        record.outcome = StepOutcome::failed(exit_reason(out.exit_code, &out.stderr));
                    }
                    Err(err) if platform::is_timeout(&err) => return None,
                    Err(err) => record.outcome = StepOutcome::failed(format!("{err:#}")),
                }
            }
            Step::Prune(target) => {
                match prune_aged_entries(
                    &target.root,
                    &target.pattern,
                    target.older_than_days,
                    dry_run,
                    Some(deadline),
                ) {
                    Ok(out) => {
                        record.removed = Some(out.removed);
                        if out.errors > 0 {
                            record.outcome =
                                StepOutcome::failed(format!("{} entries could not be removed", out.errors));
                        }
                    }
                    Err(err) if platform::is_timeout(&err) => return None,
                    Err(err) => record.outcome = StepOutcome::failed(format!("{err:#}")),
                }
            }
        }
        Some(record)
    }
}

/// All-of over required steps: the first failed required step names the failure,
/// failed optional steps only add warnings.
fn summarize(action: &RegisteredAction, records: &[StepRecord], dry_run: bool) -> (ExecutionStatus, String) {
    if let Some((label, reason)) = records.iter().find_map(|r| match &r.outcome {
        StepOutcome::Failed(reason) if r.required => Some((&r.label, reason)),
        _ => None,
    }) {
        return (
            ExecutionStatus::Failed,
            format!("step '{label}' failed: {reason}"),
        );
    }

    let warnings: Vec<String> = records
        .iter()
        .filter_map(|r| match &r.outcome {
            StepOutcome::Failed(reason) => Some(format!("'{}' {reason}", r.label)),
            StepOutcome::Ok => None,
        })
        .collect();

    let mut message = if dry_run {
        let plan: Vec<String> = action
            .steps
            .iter()
            .zip(records)
            .map(|(step, record)| match record.removed {
                Some(n) => format!("{} ({n} entries)", step.describe()),
                None => step.describe(),
            })
            .collect();
        format!("would run: {}", plan.join("; "))
    } else {
        format!("{} steps completed", records.len())
    };
    if !warnings.is_empty() {
        message.push_str(&format!(" (warnings: {})", warnings.join("; ")));
    }
    (ExecutionStatus::Succeeded, message)
}

fn exit_reason(exit_code: i32, stderr: &str) -> String {
    let line = stderr.lines().map(str::trim).find(|l| !l.is_empty());
    match line {
        Some(line) => {
            let excerpt: String = line.chars().take(STDERR_EXCERPT_CHARS).collect();
            format!("exit_code={exit_code}: {excerpt}")
        }
        None => format!("exit_code={exit_code}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SafetyTier;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn temp_root(tag: &str) -> PathBuf {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "moleopt-exec-{tag}-{}-{seq}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    fn no_whitelist(root: &Path) -> WhitelistStore {
        WhitelistStore::empty(root.join("whitelist.toml"))
    }

    #[test]
    fn whitelisted_action_is_never_invoked() {
        let root = temp_root("wl");
        let marker = root.join("marker");
        std::fs::write(&marker, b"x").unwrap();
        let registry = ActionRegistry::new(vec![
            RegisteredAction::new("clean", SafetyTier::Safe, 10).prune("remove", root.clone(), "marker", 0),
        ]);
        let mut whitelist = WhitelistStore::open(root.join("whitelist.toml")).unwrap();
        whitelist.set_whitelisted("clean", true).unwrap();

        let mut exec = SafeExecutor::new(&registry, &whitelist);
        for mode in [Mode::DryRun, Mode::Live] {
            let r = exec.execute("clean", mode).unwrap();
            assert_eq!(r.status, ExecutionStatus::SkippedWhitelisted);
            assert!(r.steps.is_empty());
        }
        assert!(marker.exists());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn composite_names_the_failed_required_step() {
        let root = temp_root("dns");
        let registry = ActionRegistry::new(vec![
            RegisteredAction::new("dns", SafetyTier::Safe, 10)
                .command("flush cache", "true", &[])
                .command("restart resolver", "false", &[]),
        ]);
        let whitelist = no_whitelist(&root);
        let r = SafeExecutor::new(&registry, &whitelist)
            .execute("dns", Mode::Live)
            .unwrap();
        assert_eq!(r.status, ExecutionStatus::Failed);
        assert!(r.message.contains("restart resolver"), "{}", r.message);
        assert_eq!(r.steps.len(), 2);
        assert!(r.steps[0].outcome.is_ok());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn optional_failure_is_a_warning() {
        let root = temp_root("opt");
        let registry = ActionRegistry::new(vec![
            RegisteredAction::new("refresh", SafetyTier::Safe, 10)
                .command("nice to have", "false", &[])
                .optional()
                .command("main", "true", &[]),
        ]);
        let whitelist = no_whitelist(&root);
        let r = SafeExecutor::new(&registry, &whitelist)
            .execute("refresh", Mode::Live)
            .unwrap();
        assert_eq!(r.status, ExecutionStatus::Succeeded);
        assert!(r.message.contains("warnings"), "{}", r.message);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_tool_fails_without_spawning() {
        let root = temp_root("tool");
        let registry = ActionRegistry::new(vec![
            RegisteredAction::new("x", SafetyTier::Safe, 10).command(
                "run missing tool",
                "moleopt-definitely-missing-tool",
                &[],
            ),
        ]);
        let whitelist = no_whitelist(&root);
        let r = SafeExecutor::new(&registry, &whitelist)
            .execute("x", Mode::Live)
            .unwrap();
        assert_eq!(r.status, ExecutionStatus::Failed);
        assert!(r.message.contains("not available"), "{}", r.message);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn expired_timeout_reports_timed_out() {
        let root = temp_root("timeout");
        let mut action = RegisteredAction::new("slow", SafetyTier::Safe, 1).command("sleep", "sleep", &["5"]);
        action.timeout = Duration::from_millis(200);
        let registry = ActionRegistry::new(vec![action]);
        let whitelist = no_whitelist(&root);

        let started = Instant::now();
        let r = SafeExecutor::new(&registry, &whitelist)
            .execute("slow", Mode::Live)
            .unwrap();
        assert_eq!(r.status, ExecutionStatus::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn dry_run_describes_and_counts_without_mutation() {
        let root = temp_root("dry");
        let target = root.join("logs");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("a.crash"), b"x").unwrap();
        std::fs::write(target.join("b.crash"), b"x").unwrap();
        let registry = ActionRegistry::new(vec![
            RegisteredAction::new("logs", SafetyTier::Safe, 10)
                .prune("remove logs", target.clone(), "*.crash", 0)
                .affects([target.clone()]),
        ]);
        let whitelist = no_whitelist(&root);
        let r = SafeExecutor::new(&registry, &whitelist)
            .execute("logs", Mode::DryRun)
            .unwrap();
        assert_eq!(r.status, ExecutionStatus::Succeeded);
        assert_eq!(r.steps[0].removed, Some(2));
        assert_eq!(r.bytes_freed, None);
        assert!(r.message.starts_with("would run:"), "{}", r.message);
        assert_eq!(std::fs::read_dir(&target).unwrap().count(), 2);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn live_prune_reports_bytes_freed() {
        let root = temp_root("live");
        let target = root.join("state");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("a.savedState"), vec![0u8; 4096]).unwrap();
        let registry = ActionRegistry::new(vec![
            RegisteredAction::new("state", SafetyTier::Safe, 10)
                .prune("remove state", target.clone(), "*.savedState", 0)
                .affects([target.clone()]),
        ]);
        let whitelist = no_whitelist(&root);
        let r = SafeExecutor::new(&registry, &whitelist)
            .execute("state", Mode::Live)
            .unwrap();
        assert_eq!(r.status, ExecutionStatus::Succeeded);
        assert_eq!(r.bytes_freed, Some(4096));
        assert!(target.exists());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn below_minimum_is_a_threshold_skip() {
        let root = temp_root("min");
        let mail = root.join("mail");
        std::fs::create_dir_all(&mail).unwrap();
        std::fs::write(mail.join("a.pdf"), b"tiny").unwrap();
        let registry = ActionRegistry::new(vec![
            RegisteredAction::new("mail", SafetyTier::Safe, 10)
                .min_effect(vec![mail.clone()], 1024 * 1024)
                .prune("remove", mail.clone(), "*", 0),
        ]);
        let whitelist = no_whitelist(&root);
        let r = SafeExecutor::new(&registry, &whitelist)
            .execute("mail", Mode::Live)
            .unwrap();
        assert_eq!(r.status, ExecutionStatus::SkippedThreshold);
        assert!(mail.join("a.pdf").exists());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn batch_validates_keys_first_and_isolates_failures() {
        let root = temp_root("batch");
        let registry = ActionRegistry::new(vec![
            RegisteredAction::new("bad", SafetyTier::Safe, 10).command("fail", "false", &[]),
            RegisteredAction::new("good", SafetyTier::Safe, 10).command("ok", "true", &[]),
            RegisteredAction::new("risky", SafetyTier::RequiresConfirmation, 10).command("ok", "true", &[]),
        ]);
        let whitelist = no_whitelist(&root);
        let mut exec = SafeExecutor::new(&registry, &whitelist);

        let err = exec
            .execute_batch(&["good".into(), "typo".into()], Mode::Live, &mut |_| true)
            .unwrap_err();
        assert_eq!(crate::exit::exit_code(&err), 2);

        let keys = ["bad".to_string(), "good".to_string(), "risky".to_string()];
        let results = exec.execute_batch(&keys, Mode::Live, &mut |_| false).unwrap();
        let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            [
                ExecutionStatus::Failed,
                ExecutionStatus::Succeeded,
                ExecutionStatus::Cancelled
            ]
        );
        let _ = std::fs::remove_dir_all(&root);
    }
}
