use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::core::Mode;
use crate::engine::Engine;
use crate::exit;
use crate::ui::{self, UiConfig};

mod interactive;

#[derive(Debug, Parser)]
#[command(
    name = "moleopt",
    version,
    about = "Measure macOS health and run gated, time-bounded maintenance actions"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Describe what would run without changing anything.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Health report and the current optimization catalog.
    List,
    /// Execute actions by key.
    Run(RunArgs),
    Whitelist(WhitelistArgs),
    /// Check package sources for updates and install them after one confirmation.
    Update,
    /// Every registered action with its tier and timeout.
    Actions,
    Completion(CompletionArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    pub keys: Vec<String>,
    /// Run every item of the current catalog, in catalog order.
    #[arg(long, conflicts_with = "keys")]
    pub all: bool,
    /// Approve confirmation-tier actions without asking.
    #[arg(long)]
    pub yes: bool,
}

#[derive(Debug, Args)]
pub struct WhitelistArgs {
    #[command(subcommand)]
    pub command: WhitelistCommand,
}

#[derive(Debug, Subcommand)]
pub enum WhitelistCommand {
    List,
    Add { key: String },
    Remove { key: String },
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let home_dir = crate::platform::effective_home_dir()?;

    let env_config_path = std::env::var_os("MOLEOPT_CONFIG").map(PathBuf::from);
    let cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(exit::invalid_args_err)?;

    let ui_cfg = UiConfig {
        color: io::stdout().is_terminal() && cfg.ui.color && !cli.no_color,
        quiet: cli.quiet,
    };

    if let Commands::Completion(args) = &cli.command {
        let shell = parse_shell(&args.shell)?;
        let mut cmd = Cli::command();
        let mut out = io::stdout().lock();
        clap_complete::generate(shell, &mut cmd, "moleopt", &mut out);
        return Ok(());
    }

    let show_progress = !cli.quiet && !cli.json;
    let mut engine = Engine::new(cfg, home_dir, show_progress).map_err(exit::invalid_args_err)?;

    match cli.command {
        Commands::List => {
            let report = engine.health();
            if cli.json {
                write_json(&report)?;
            } else {
                ui::print_health(&report, &ui_cfg);
            }
        }
        Commands::Run(args) => {
            let keys = if args.all {
                engine
                    .health()
                    .optimizations
                    .into_iter()
                    .map(|o| o.action)
                    .collect()
            } else if args.keys.is_empty() {
                return Err(exit::invalid_args(
                    "run: pass one or more action keys, or --all",
                ));
            } else {
                dedup_keys(args.keys)
            };

            let mode = if cli.dry_run { Mode::DryRun } else { Mode::Live };
            let mut confirm = interactive::confirmer(args.yes);
            let report = engine.run_actions(&keys, mode, &mut confirm)?;
            if cli.json {
                write_json(&report)?;
            } else {
                ui::print_run_report(&report, &ui_cfg);
            }
            if report.all_cancelled() {
                return Err(exit::cancelled("every action was declined"));
            }
        }
        Commands::Whitelist(args) => match args.command {
            WhitelistCommand::List => {
                let entries = engine.whitelist().list_entries();
                if cli.json {
                    write_json(&entries)?;
                } else {
                    ui::print_whitelist(&entries);
                }
            }
            WhitelistCommand::Add { key } | WhitelistCommand::Remove { key }
                if !engine.registry().contains(&key) =>
            {
                return Err(exit::invalid_args(format!("unknown action key: {key}")));
            }
            WhitelistCommand::Add { key } => {
                engine.whitelist_mut().set_whitelisted(&key, true)?;
                if !cli.quiet {
                    eprintln!("whitelisted: {key} ({})", engine.whitelist().path().display());
                }
            }
            WhitelistCommand::Remove { key } => {
                engine.whitelist_mut().set_whitelisted(&key, false)?;
                if !cli.quiet {
                    eprintln!("removed from whitelist: {key}");
                }
            }
        },
        Commands::Update => {
            if cli.dry_run {
                return Err(exit::invalid_args("update does not support --dry-run"));
            }
            let report = engine.update(&mut interactive::TerminalKeys, &mut |tally| {
                ui::print_update_prompt(tally)
            })?;
            if cli.json {
                write_json(&report)?;
            } else {
                ui::print_update_report(&report, &ui_cfg);
            }
        }
        Commands::Actions => {
            if cli.json {
                let rows: Vec<_> = engine
                    .registry()
                    .iter()
                    .map(|a| ActionRow {
                        key: &a.key,
                        safety: a.tier.as_str(),
                        timeout_secs: a.timeout.as_secs(),
                        steps: a.steps.iter().map(|s| s.describe()).collect(),
                    })
                    .collect();
                write_json(&rows)?;
            } else {
                ui::print_actions(engine.registry());
            }
        }
        Commands::Config(args) => {
            if args.show {
                if cli.json {
                    serde_json::to_writer_pretty(io::stdout().lock(), engine.config())?;
                } else {
                    println!("{}", toml::to_string_pretty(engine.config())?);
                }
            } else if !cli.quiet {
                eprintln!("config: use `moleopt config --show`");
            }
        }
        Commands::Completion(_) => {}
    }

    Ok(())
}

#[derive(Serialize)]
struct ActionRow<'a> {
    key: &'a str,
    safety: &'static str,
    timeout_secs: u64,
    steps: Vec<String>,
}

/// `MOLEOPT_LOG` takes an `EnvFilter` directive; otherwise `--verbose` means debug.
fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("MOLEOPT_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn dedup_keys(keys: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(keys.len());
    for key in keys {
        if !out.contains(&key) {
            out.push(key);
        }
    }
    out
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let buf = serde_json::to_vec_pretty(value)?;

    let mut stdout = io::stdout().lock();
    match stdout.write_all(&buf) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    match stdout.write_all(b"\n") {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(exit::invalid_args(format!(
            "unsupported shell: {other} (expected bash|zsh|fish)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_multiple_keys_and_global_dry_run() {
        let cli = Cli::try_parse_from(["moleopt", "run", "log_cleanup", "recent_items", "--dry-run"])
            .unwrap();
        assert!(cli.dry_run);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.keys, ["log_cleanup", "recent_items"]);
        assert!(!args.all);
    }

    #[test]
    fn run_all_conflicts_with_keys() {
        assert!(Cli::try_parse_from(["moleopt", "run", "--all", "log_cleanup"]).is_err());
    }

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let keys = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(dedup_keys(keys), ["b", "a"]);
    }

    #[test]
    fn parse_shell_rejects_unknown() {
        assert!(parse_shell("ZSH").is_ok());
        assert_eq!(exit::exit_code(&parse_shell("tcsh").unwrap_err()), 2);
    }
}
