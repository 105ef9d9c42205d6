use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;

use crate::core::OsInfo;
use crate::platform::{CommandOutput, run_command};

pub fn os_info(timeout: Duration) -> OsInfo {
    let output = run_command("sw_vers", &["-productVersion"], timeout);
    match output {
        Ok(output) if output.exit_code == 0 => OsInfo {
            name: "macOS".to_string(),
            version: output.stdout.trim().to_string(),
        },
        _ => OsInfo {
            name: "macOS".to_string(),
            version: "unknown".to_string(),
        },
    }
}

pub fn sysctl(name: &str, timeout: Duration) -> Result<CommandOutput> {
    run_command("sysctl", &["-n", name], timeout)
}

pub fn vm_stat(timeout: Duration) -> Result<CommandOutput> {
    run_command("vm_stat", &[], timeout)
}

pub fn tmutil_list_local_snapshots(timeout: Duration) -> Result<CommandOutput> {
    run_command("tmutil", &["listlocalsnapshots", "/"], timeout)
}

pub fn osascript_login_items(timeout: Duration) -> Result<CommandOutput> {
    run_command(
        "osascript",
        &[
            "-e",
            "tell application \"System Events\" to get the name of every login item",
        ],
        timeout,
    )
}

/// Pages counted as "used": active + wired + compressed.
pub fn parse_vm_stat_used_bytes(stdout: &str) -> u64 {
    let mut page_size: u64 = 4096;
    let mut active = 0u64;
    let mut wired = 0u64;
    let mut compressed = 0u64;

    for line in stdout.lines() {
        if line.contains("page size of") {
            if let Some(size) = line
                .split_whitespace()
                .filter_map(|w| w.parse::<u64>().ok())
                .next()
            {
                page_size = size;
            }
        } else if line.contains("Pages active:") {
            active = parse_vm_stat_value(line);
        } else if line.contains("Pages wired down:") {
            wired = parse_vm_stat_value(line);
        } else if line.contains("Pages occupied by compressor:") {
            compressed = parse_vm_stat_value(line);
        }
    }

    active
        .saturating_add(wired)
        .saturating_add(compressed)
        .saturating_mul(page_size)
}

fn parse_vm_stat_value(line: &str) -> u64 {
    line.split_whitespace()
        .last()
        .map(|s| s.trim_end_matches('.'))
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0)
}

/// `kern.boottime` looks like `{ sec = 1700000000, usec = 0 } Mon Nov ...`.
pub fn parse_boottime_secs(stdout: &str) -> Option<i64> {
    let idx = stdout.find("sec = ")?;
    let rest = &stdout[idx + "sec = ".len()..];
    let end = rest.find(',')?;
    rest[..end].trim().parse::<i64>().ok()
}

/// Distinct Time Machine local snapshot names.
pub fn parse_tmutil_local_snapshots(stdout: &str) -> BTreeSet<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("com.apple.TimeMachine."))
        .map(str::to_string)
        .collect()
}

/// `osascript` prints `a, b, c`, or `missing value` when there are none.
pub fn parse_login_items(stdout: &str) -> BTreeSet<String> {
    let line = stdout.trim();
    if line.is_empty() || line == "missing value" {
        return BTreeSet::new();
    }
    line.split(", ")
        .map(|part| part.trim().trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// `softwareupdate -l` marks each available update with a `* Label:` line.
pub fn parse_softwareupdate_available(stdout: &str) -> bool {
    stdout.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("* Label:") || (line.starts_with('*') && line.len() > 2)
    })
}

/// Non-empty lines of `brew outdated --quiet` / `mas outdated`, deduplicated by name.
pub fn parse_outdated_names(stdout: &str) -> BTreeSet<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !l.starts_with("Warning:") && !l.starts_with("==>"))
        .filter_map(outdated_name)
        .collect()
}

fn outdated_name(line: &str) -> Option<String> {
    let mut words = line.split_whitespace();
    let first = words.next()?;
    // mas prints `<numeric id> <name> (<old> -> <new>)`.
    if first.chars().all(|c| c.is_ascii_digit()) {
        let name: Vec<&str> = words.take_while(|w| !w.starts_with('(')).collect();
        if name.is_empty() {
            return Some(first.to_string());
        }
        return Some(name.join(" "));
    }
    Some(first.to_string())
}
