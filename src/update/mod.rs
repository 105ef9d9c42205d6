//! Pending-update aggregation across package sources, one confirmation, then
//! independent per-source updates.
//!
//! The flow is an explicit state machine:
//!
//! ```text
//! Idle -> Aggregating -> NoUpdates
//!                     -> AwaitingConfirmation -> Cancelled
//!                                             -> Performing -> Reported
//! ```
//!
//! `NoUpdates`, `Cancelled` and `Reported` are terminal. Calling a transition
//! from any other state leaves the machine untouched.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::{StepOutcome, UpdateSource, UpdateSourceCount, UpdateTally};
use crate::platform::{self, CommandOutput, PrivilegeSession, macos};

const PERFORM_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// One source's update attempt. Command output is kept for the run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateAttempt {
    #[serde(flatten)]
    pub outcome: StepOutcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip)]
    pub stdout: String,
    #[serde(skip)]
    pub stderr: String,
}

impl UpdateAttempt {
    pub fn from_outcome(outcome: StepOutcome) -> Self {
        Self {
            outcome,
            command: vec![],
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    fn from_command(command: Vec<String>, result: Result<CommandOutput>) -> Self {
        match result {
            Ok(out) => {
                let outcome = if out.success() {
                    StepOutcome::Ok
                } else {
                    StepOutcome::failed(format!("exit_code={}", out.exit_code))
                };
                Self {
                    outcome,
                    command,
                    exit_code: Some(out.exit_code),
                    stdout: out.stdout,
                    stderr: out.stderr,
                }
            }
            Err(err) => Self {
                outcome: StepOutcome::failed(format!("{err:#}")),
                command,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
            },
        }
    }
}

/// Where pending updates come from and how each is applied.
pub trait UpdateSources {
    /// Outdated items for `source`. Failures read as 0.
    fn count(&mut self, source: UpdateSource) -> u64;
    fn perform(&mut self, source: UpdateSource) -> UpdateAttempt;
    /// Clears the cached "new version available" state after a self-update.
    fn reset_self_update_cache(&mut self) -> StepOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    Accept,
    Other,
}

impl KeyInput {
    /// `y`, `Y` and Enter accept. Everything else declines.
    pub fn from_char(c: char) -> Self {
        match c {
            'y' | 'Y' | '\n' | '\r' => KeyInput::Accept,
            _ => KeyInput::Other,
        }
    }
}

/// One blocking read of a single key event. An error (including EOF) declines.
pub trait KeySource {
    fn read_key(&mut self) -> Result<KeyInput>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceOutcome {
    pub source: UpdateSource,
    pub count: u64,
    #[serde(flatten)]
    pub attempt: UpdateAttempt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub tally: UpdateTally,
    pub outcomes: Vec<SourceOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_reset: Option<StepOutcome>,
}

impl UpdateReport {
    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.attempt.outcome.is_ok()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Aggregating,
    NoUpdates,
    AwaitingConfirmation(UpdateTally),
    Performing(UpdateTally),
    Cancelled(UpdateTally),
    Reported(UpdateReport),
}

impl UpdateState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpdateState::NoUpdates | UpdateState::Cancelled(_) | UpdateState::Reported(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            UpdateState::Idle => "idle",
            UpdateState::Aggregating => "aggregating",
            UpdateState::NoUpdates => "no_updates",
            UpdateState::AwaitingConfirmation(_) => "awaiting_confirmation",
            UpdateState::Performing(_) => "performing",
            UpdateState::Cancelled(_) => "cancelled",
            UpdateState::Reported(_) => "reported",
        }
    }
}

pub struct UpdateAggregator<S> {
    sources: S,
    state: UpdateState,
}

impl<S: UpdateSources> UpdateAggregator<S> {
    pub fn new(sources: S) -> Self {
        Self {
            sources,
            state: UpdateState::Idle,
        }
    }

    pub fn state(&self) -> &UpdateState {
        &self.state
    }

    pub fn into_parts(self) -> (S, UpdateState) {
        (self.sources, self.state)
    }

    /// Queries every source independently and decides whether to prompt.
    pub fn aggregate(&mut self) -> &UpdateState {
        if self.state != UpdateState::Idle {
            return &self.state;
        }
        self.transition(UpdateState::Aggregating);

        let counts: Vec<UpdateSourceCount> = UpdateSource::ALL
            .into_iter()
            .map(|source| {
                let count = self.sources.count(source);
                debug!(source = source.as_str(), count, "update source counted");
                UpdateSourceCount { source, count }
            })
            .collect();
        let tally = UpdateTally::from_counts(&counts);

        let next = if tally.total() == 0 {
            UpdateState::NoUpdates
        } else {
            UpdateState::AwaitingConfirmation(tally)
        };
        self.transition(next);
        &self.state
    }

    pub fn confirm(&mut self, keys: &mut dyn KeySource) -> &UpdateState {
        let UpdateState::AwaitingConfirmation(tally) = self.state else {
            return &self.state;
        };
        let next = match keys.read_key() {
            Ok(KeyInput::Accept) => UpdateState::Performing(tally),
            Ok(KeyInput::Other) => UpdateState::Cancelled(tally),
            Err(err) => {
                debug!(err = %format!("{err:#}"), "confirmation read failed");
                UpdateState::Cancelled(tally)
            }
        };
        self.transition(next);
        &self.state
    }

    /// Runs every pending source, then the self-update cache reset when the self
    /// source was part of the set. Per-source failures never stop the others.
    pub fn perform(&mut self) -> &UpdateState {
        let UpdateState::Performing(tally) = self.state else {
            return &self.state;
        };

        let mut outcomes = Vec::new();
        for source in tally.pending() {
            let attempt = self.sources.perform(source);
            match &attempt.outcome {
                StepOutcome::Ok => info!(source = source.as_str(), "update applied"),
                StepOutcome::Failed(reason) => {
                    warn!(source = source.as_str(), %reason, "update failed")
                }
            }
            outcomes.push(SourceOutcome {
                source,
                count: tally.count(source),
                attempt,
            });
        }

        let cache_reset = tally
            .self_update
            .then(|| self.sources.reset_self_update_cache());

        self.transition(UpdateState::Reported(UpdateReport {
            tally,
            outcomes,
            cache_reset,
        }));
        &self.state
    }

    /// Drives the machine to a terminal state. `prompt` is shown once, right
    /// before the single key read.
    pub fn run(
        &mut self,
        keys: &mut dyn KeySource,
        prompt: &mut dyn FnMut(&UpdateTally),
    ) -> &UpdateState {
        self.aggregate();
        if let UpdateState::AwaitingConfirmation(tally) = &self.state {
            prompt(tally);
        }
        self.confirm(keys);
        self.perform();
        &self.state
    }

    fn transition(&mut self, next: UpdateState) {
        if self.state.is_terminal() {
            debug!(state = self.state.name(), to = next.name(), "ignoring transition out of terminal state");
            return;
        }
        debug!(from = self.state.name(), to = next.name(), "update state");
        self.state = next;
    }
}

/// Package managers and the system updater on this machine.
pub struct HostUpdateSources {
    query_timeout: Duration,
    self_update_command: Vec<String>,
    self_update_marker: PathBuf,
    privilege: PrivilegeSession,
}

impl HostUpdateSources {
    pub fn new(
        query_timeout: Duration,
        self_update_command: Vec<String>,
        self_update_marker: PathBuf,
    ) -> Self {
        Self {
            query_timeout,
            self_update_command,
            self_update_marker,
            privilege: PrivilegeSession::new(),
        }
    }

    fn query(&self, tool: &str, args: &[&str]) -> Option<String> {
        if !platform::capability(tool).is_available() {
            debug!(tool, "update source tool unavailable");
            return None;
        }
        match platform::run_command_invoking_user(tool, args, self.query_timeout) {
            Ok(out) if out.success() => Some(out.stdout),
            Ok(out) => {
                debug!(tool, exit_code = out.exit_code, "update query exited non-zero");
                None
            }
            Err(err) => {
                debug!(tool, err = %format!("{err:#}"), "update query failed");
                None
            }
        }
    }

    fn run_tool(&self, tool: &str, args: &[&str]) -> UpdateAttempt {
        let command: Vec<String> = std::iter::once(tool)
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect();
        if !platform::capability(tool).is_available() {
            return UpdateAttempt {
                command,
                ..UpdateAttempt::from_outcome(StepOutcome::failed(format!("{tool} is not available")))
            };
        }
        // brew and mas refuse to run as root, so they go back to the sudo caller.
        UpdateAttempt::from_command(
            command,
            platform::run_command_invoking_user(tool, args, PERFORM_TIMEOUT),
        )
    }
}

/// The self source is pending while this marker exists under the config dir.
pub fn self_update_marker(config_dir: &std::path::Path) -> PathBuf {
    config_dir.join("cache/update-available")
}

impl UpdateSources for HostUpdateSources {
    fn count(&mut self, source: UpdateSource) -> u64 {
        let n = match source {
            UpdateSource::HomebrewFormula => self
                .query("brew", &["outdated", "--formula", "--quiet"])
                .map(|s| macos::parse_outdated_names(&s).len()),
            UpdateSource::HomebrewCask => self
                .query("brew", &["outdated", "--cask", "--quiet"])
                .map(|s| macos::parse_outdated_names(&s).len()),
            UpdateSource::AppStore => self
                .query("mas", &["outdated"])
                .map(|s| macos::parse_outdated_names(&s).len()),
            UpdateSource::MacosSystem => self
                .query("softwareupdate", &["-l"])
                .map(|s| usize::from(macos::parse_softwareupdate_available(&s))),
            UpdateSource::SelfUpdate => Some(usize::from(self.self_update_marker.exists())),
        };
        n.unwrap_or(0) as u64
    }

    fn perform(&mut self, source: UpdateSource) -> UpdateAttempt {
        match source {
            UpdateSource::HomebrewFormula => self.run_tool("brew", &["upgrade", "--formula"]),
            UpdateSource::HomebrewCask => self.run_tool("brew", &["upgrade", "--cask"]),
            UpdateSource::AppStore => self.run_tool("mas", &["upgrade"]),
            UpdateSource::MacosSystem => {
                let command: Vec<String> = ["sudo", "softwareupdate", "-i", "-a"]
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                if let Err(err) = self.privilege.acquire() {
                    return UpdateAttempt {
                        command,
                        ..UpdateAttempt::from_outcome(StepOutcome::failed(format!("{err:#}")))
                    };
                }
                let result = self
                    .privilege
                    .run("softwareupdate", &["-i", "-a"], PERFORM_TIMEOUT);
                UpdateAttempt::from_command(command, result)
            }
            UpdateSource::SelfUpdate => {
                let Some((program, args)) = self.self_update_command.split_first() else {
                    return UpdateAttempt::from_outcome(StepOutcome::failed(
                        "no self-update command configured",
                    ));
                };
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                self.run_tool(program, &args)
            }
        }
    }

    fn reset_self_update_cache(&mut self) -> StepOutcome {
        match std::fs::remove_file(&self.self_update_marker) {
            Ok(()) => StepOutcome::Ok,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StepOutcome::Ok,
            Err(err) => StepOutcome::failed(format!(
                "failed to remove {}: {err}",
                self.self_update_marker.display()
            )),
        }
    }
}
