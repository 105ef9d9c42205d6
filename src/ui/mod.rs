use anyhow::Error;
use std::io::{self, Write};
use unicode_width::UnicodeWidthChar;

use crate::actions::ActionRegistry;
use crate::core::{ExecutionStatus, HealthReport, RunReport, SafetyTier, UpdateTally};
use crate::update::UpdateReport;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub quiet: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "error: {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "caused by:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }
    let _ = writeln!(
        stderr,
        "hint: re-run with `--verbose` for details, or see `moleopt --help`"
    );
}

/// Human size used in catalog descriptions: whole KB under 1 MB, whole MB under
/// 1 GB, one decimal above. Partial kilobytes round up so a non-empty directory
/// never prints as `0B`.
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0B".to_string();
    }
    let kb = bytes.div_ceil(1024);
    let mb = kb as f64 / 1024.0;
    let gb = mb / 1024.0;
    if gb >= 1.0 {
        format!("{gb:.1}GB")
    } else if mb >= 1.0 {
        format!("{mb:.0}MB")
    } else {
        format!("{kb}KB")
    }
}

pub fn print_health(report: &HealthReport, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let _ = writeln!(
        out,
        "{} {}  uptime {:.1} days",
        report.os.name, report.os.version, report.uptime_days
    );
    let _ = writeln!(
        out,
        "memory {:.1} / {:.1} GB   disk {:.1} / {:.1} GB ({:.0}%)",
        report.memory_used_bytes as f64 / GIB,
        report.memory_total_bytes as f64 / GIB,
        report.disk_used_bytes as f64 / GIB,
        report.disk_total_bytes as f64 / GIB,
        report.disk_used_percent
    );
    let _ = writeln!(out);

    let key_w = report
        .optimizations
        .iter()
        .map(|o| visible_width_ansi(&o.action))
        .max()
        .unwrap_or(0);
    let name_w = report
        .optimizations
        .iter()
        .map(|o| visible_width_ansi(&o.name))
        .max()
        .unwrap_or(0);

    for item in &report.optimizations {
        let mut notes = Vec::new();
        if item.safety == SafetyTier::RequiresConfirmation {
            notes.push(paint("confirm", "33", cfg.color));
        }
        if item.whitelisted {
            notes.push(paint("whitelisted", "90", cfg.color));
        }
        let notes = if notes.is_empty() {
            String::new()
        } else {
            format!("  [{}]", notes.join(", "))
        };
        let _ = writeln!(
            out,
            "  {}  {}  {}{notes}",
            pad_end(&item.action, key_w),
            pad_end(&item.name, name_w),
            item.description
        );
    }
}

pub fn print_run_report(report: &RunReport, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let key_w = report
        .results
        .iter()
        .map(|r| visible_width_ansi(&r.action))
        .max()
        .unwrap_or(0);
    let status_w = report
        .results
        .iter()
        .map(|r| r.status.as_str().len())
        .max()
        .unwrap_or(0);

    for r in &report.results {
        let status = pad_end(&format_status(r.status, cfg.color), status_w);
        let freed = match r.bytes_freed {
            Some(b) if b > 0 => format!("  freed {}", format_size(b)),
            _ => String::new(),
        };
        let _ = writeln!(
            out,
            "{}  {status}  {}{freed}",
            pad_end(&r.action, key_w),
            r.message
        );
    }

    let s = &report.summary;
    let prefix = if report.mode.is_dry_run() { "dry-run: " } else { "" };
    let _ = writeln!(
        out,
        "\n{prefix}{} succeeded, {} skipped, {} failed, {} timed out, {} cancelled; freed {}",
        s.succeeded,
        s.skipped,
        s.failed,
        s.timed_out,
        s.cancelled,
        format_size(s.bytes_freed)
    );
}

pub fn print_actions(registry: &ActionRegistry) {
    let mut out = io::stdout().lock();
    let key_w = registry
        .iter()
        .map(|a| a.key.len())
        .max()
        .unwrap_or(0);
    for action in registry.iter() {
        let _ = writeln!(
            out,
            "{}  {:<21}  {:>4}s  {} steps",
            pad_end(&action.key, key_w),
            action.tier.as_str(),
            action.timeout.as_secs(),
            action.steps.len()
        );
    }
}

pub fn print_whitelist<'a>(entries: impl IntoIterator<Item = &'a String>) {
    let mut out = io::stdout().lock();
    let mut any = false;
    for key in entries {
        any = true;
        let _ = writeln!(out, "{key}");
    }
    if !any {
        let _ = writeln!(io::stderr(), "whitelist is empty");
    }
}

/// Written to stderr so stdout stays clean for piping.
pub fn print_update_prompt(tally: &UpdateTally) {
    let mut err = io::stderr().lock();
    let _ = writeln!(err, "Pending updates: {}", tally.total());
    for entry in tally.sources() {
        if entry.count == 0 {
            continue;
        }
        if entry.source.is_flag() {
            let _ = writeln!(err, "  {}", entry.source);
        } else {
            let _ = writeln!(err, "  {:<17} {}", entry.source.as_str(), entry.count);
        }
    }
    let _ = write!(err, "Install now? [Y/n] ");
    let _ = err.flush();
}

pub fn print_update_report(report: &UpdateReport, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    for o in &report.outcomes {
        let status = match &o.attempt.outcome {
            crate::core::StepOutcome::Ok => paint("ok", "32", cfg.color),
            crate::core::StepOutcome::Failed(reason) => {
                format!("{} ({reason})", paint("failed", "31", cfg.color))
            }
        };
        let _ = writeln!(out, "  {:<17} {status}", o.source.as_str());
    }
    if let Some(crate::core::StepOutcome::Failed(reason)) = &report.cache_reset {
        let _ = writeln!(out, "  self-update cache reset failed: {reason}");
    }
}

fn format_status(status: ExecutionStatus, color: bool) -> String {
    let code = match status {
        ExecutionStatus::Succeeded => "32",
        ExecutionStatus::SkippedWhitelisted | ExecutionStatus::SkippedThreshold => "90",
        ExecutionStatus::Failed => "31",
        ExecutionStatus::TimedOut => "35",
        ExecutionStatus::Cancelled => "33",
    };
    paint(status.as_str(), code, color)
}

fn paint(s: &str, code: &str, color: bool) -> String {
    if !color {
        return s.to_string();
    }
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn pad_end(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_size_thresholds() {
        assert_eq!(format_size(0), "0B");
        assert_eq!(format_size(1), "1KB");
        assert_eq!(format_size(1023 * 1024), "1023KB");
        assert_eq!(format_size(1024 * 1024), "1MB");
        assert_eq!(format_size(700 * 1024 * 1024), "700MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.0GB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024 / 2), "2.5GB");
    }

    #[test]
    fn visible_width_ignores_color_codes() {
        assert_eq!(visible_width_ansi(&paint("failed", "31", true)), 6);
        assert!(pad_end(&paint("ok", "32", true), 4).ends_with("  "));
    }
}
