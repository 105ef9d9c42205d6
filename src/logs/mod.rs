use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::{ExecutionResult, Mode, RunSummary, StepOutcome, UpdateTally};
use crate::update::UpdateReport;

const MAX_CMD_OUTPUT_BYTES: usize = 64 * 1024;

#[derive(Debug, Serialize)]
struct RunLog<'a> {
    schema_version: &'static str,
    tool_version: &'static str,
    command: &'static str,
    started_at: String,
    finished_at: String,
    mode: Mode,
    summary: &'a RunSummary,
    results: &'a [ExecutionResult],
}

#[derive(Debug, Serialize)]
struct UpdateLog {
    schema_version: &'static str,
    tool_version: &'static str,
    command: &'static str,
    started_at: String,
    finished_at: String,
    status: &'static str,
    tally: UpdateTally,
    sources: Vec<UpdateSourceLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_reset: Option<StepOutcome>,
}

#[derive(Debug, Serialize)]
struct UpdateSourceLog {
    source: &'static str,
    count: u64,
    #[serde(flatten)]
    outcome: StepOutcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cmd: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    stderr: String,
}

pub fn logs_dir(home_dir: &Path) -> PathBuf {
    crate::config::config_dir(home_dir).join("logs")
}

pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| "unknown".to_string())
}

/// One JSON file per live batch.
pub fn write_run_log(
    home_dir: &Path,
    started_at: OffsetDateTime,
    finished_at: OffsetDateTime,
    mode: Mode,
    summary: &RunSummary,
    results: &[ExecutionResult],
) -> Result<PathBuf> {
    let log = RunLog {
        schema_version: "1.0",
        tool_version: env!("CARGO_PKG_VERSION"),
        command: "run",
        started_at: rfc3339(started_at),
        finished_at: rfc3339(finished_at),
        mode,
        summary,
        results,
    };
    write_json(home_dir, "run", finished_at, &log)
}

/// One JSON file per performed update, with command output excerpts.
pub fn write_update_log(
    home_dir: &Path,
    started_at: OffsetDateTime,
    finished_at: OffsetDateTime,
    report: &UpdateReport,
) -> Result<PathBuf> {
    let sources = report
        .outcomes
        .iter()
        .map(|o| UpdateSourceLog {
            source: o.source.as_str(),
            count: o.count,
            outcome: o.attempt.outcome.clone(),
            cmd: o.attempt.command.clone(),
            exit_code: o.attempt.exit_code,
            stdout: truncate_string(&o.attempt.stdout, MAX_CMD_OUTPUT_BYTES),
            stderr: truncate_string(&o.attempt.stderr, MAX_CMD_OUTPUT_BYTES),
        })
        .collect();

    let failed = report.failed_count();
    let status = if failed == 0 {
        "ok"
    } else if failed == report.outcomes.len() {
        "error"
    } else {
        "partial_error"
    };

    let log = UpdateLog {
        schema_version: "1.0",
        tool_version: env!("CARGO_PKG_VERSION"),
        command: "update",
        started_at: rfc3339(started_at),
        finished_at: rfc3339(finished_at),
        status,
        tally: report.tally,
        sources,
        cache_reset: report.cache_reset.clone(),
    };
    write_json(home_dir, "update", finished_at, &log)
}

fn write_json<T: Serialize>(
    home_dir: &Path,
    prefix: &str,
    finished_at: OffsetDateTime,
    log: &T,
) -> Result<PathBuf> {
    let dir = logs_dir(home_dir);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create log directory: {}", dir.display()))?;

    let pid = std::process::id();
    let ts = finished_at.unix_timestamp_nanos();
    let path = dir.join(format!("{prefix}-{pid}-{ts}.json"));

    let buf = serde_json::to_vec_pretty(log).context("failed to serialize log (JSON)")?;
    std::fs::write(&path, buf)
        .with_context(|| format!("failed to write log: {}", path.display()))?;
    Ok(path)
}

fn truncate_string(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut idx = max_bytes;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    format!("{}\n...(truncated, total={} bytes)", &s[..idx], s.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ExecutionStatus, RunReport, UpdateSource};
    use crate::update::{SourceOutcome, UpdateAttempt};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn temp_home(tag: &str) -> PathBuf {
        static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
        let home = std::env::temp_dir().join(format!(
            "moleopt-log-{tag}-{}-{seq}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&home);
        home
    }

    #[test]
    fn run_log_is_named_and_parseable() {
        let home = temp_home("run");
        let results = vec![ExecutionResult::skipped(
            "log_cleanup",
            ExecutionStatus::SkippedWhitelisted,
            "suppressed by whitelist",
        )];
        let report = RunReport::new(Mode::Live, String::new(), String::new(), results);
        let path = write_run_log(
            &home,
            now(),
            now(),
            report.mode,
            &report.summary,
            &report.results,
        )
        .unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&format!("run-{}-", std::process::id())), "{name}");
        assert!(name.ends_with(".json"));

        let v: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(v["command"], "run");
        assert_eq!(v["mode"], "live");
        assert_eq!(v["summary"]["skipped"], 1);
        assert_eq!(v["results"][0]["status"], "skipped_whitelisted");
        let _ = std::fs::remove_dir_all(&home);
    }

    #[test]
    fn update_log_caps_command_output() {
        let home = temp_home("update");
        let mut attempt = UpdateAttempt::from_outcome(StepOutcome::failed("exit_code=1"));
        attempt.command = vec!["brew".into(), "upgrade".into(), "--cask".into()];
        attempt.exit_code = Some(1);
        attempt.stderr = "e".repeat(MAX_CMD_OUTPUT_BYTES + 10);
        let report = UpdateReport {
            tally: UpdateTally {
                homebrew_cask: 1,
                ..UpdateTally::default()
            },
            outcomes: vec![SourceOutcome {
                source: UpdateSource::HomebrewCask,
                count: 1,
                attempt,
            }],
            cache_reset: None,
        };

        let path = write_update_log(&home, now(), now(), &report).unwrap();
        let v: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["sources"][0]["source"], "homebrew_cask");
        assert_eq!(v["sources"][0]["outcome"], "failed");
        let stderr = v["sources"][0]["stderr"].as_str().unwrap();
        assert!(stderr.len() < MAX_CMD_OUTPUT_BYTES + 100);
        assert!(stderr.contains("truncated"));
        let _ = std::fs::remove_dir_all(&home);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "ab\u{3042}";
        assert!(truncate_string(s, 3).starts_with("ab\n"));
        assert_eq!(truncate_string("abc", 3), "abc");
    }
}
