use std::path::Path;
use std::time::{Duration, Instant};

use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeEstimateMethod {
    Missing,
    WalkDir,
    Du,
    WalkDirTruncated,
    BudgetExhausted,
}

#[derive(Debug, Clone, Copy)]
pub struct SizeEstimate {
    pub bytes: u64,
    pub file_count: u64,
    pub error_count: u64,
    pub method: SizeEstimateMethod,
}

impl SizeEstimate {
    const fn missing() -> Self {
        Self {
            bytes: 0,
            file_count: 0,
            error_count: 0,
            method: SizeEstimateMethod::Missing,
        }
    }

    pub fn is_complete(self) -> bool {
        matches!(
            self.method,
            SizeEstimateMethod::Missing | SizeEstimateMethod::WalkDir | SizeEstimateMethod::Du
        )
    }
}

/// Size of everything under `path`. A path that does not exist is 0, not an error.
///
/// Walks the tree first (apparent sizes, so an empty directory is exactly 0). If
/// half the budget runs out mid-walk, `du -sk` gets the rest of it; if that fails
/// too the truncated walk is returned as a lower bound.
pub fn estimate_dir_size(path: &Path, max_duration: Duration) -> SizeEstimate {
    if std::fs::symlink_metadata(path).is_err() {
        return SizeEstimate::missing();
    }

    let start = Instant::now();
    let end = start + max_duration;
    if max_duration.is_zero() {
        return SizeEstimate {
            bytes: 0,
            file_count: 0,
            error_count: 1,
            method: SizeEstimateMethod::BudgetExhausted,
        };
    }

    let walk = estimate_dir_size_walkdir(path, start + max_duration / 2);
    if walk.method == SizeEstimateMethod::WalkDir {
        return walk;
    }

    estimate_dir_size_du(path, end).unwrap_or(walk)
}

/// Sum of [`estimate_dir_size`] over several roots, sharing one budget.
pub fn total_size<P: AsRef<Path>>(paths: &[P], max_duration: Duration) -> u64 {
    let end = Instant::now() + max_duration;
    paths.iter().fold(0u64, |acc, p| {
        let remaining = end.saturating_duration_since(Instant::now());
        acc.saturating_add(estimate_dir_size(p.as_ref(), remaining).bytes)
    })
}

fn estimate_dir_size_du(path: &Path, end: Instant) -> Option<SizeEstimate> {
    let timeout = end.saturating_duration_since(Instant::now());
    if timeout.is_zero() {
        return None;
    }

    let path_s = path.display().to_string();
    let out = crate::platform::run_command("du", &["-sk", path_s.as_str()], timeout).ok()?;
    if out.exit_code != 0 {
        return None;
    }

    let kb = out
        .stdout
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<u64>().ok())?;

    Some(SizeEstimate {
        bytes: kb.saturating_mul(1024),
        file_count: 0,
        error_count: 0,
        method: SizeEstimateMethod::Du,
    })
}

fn estimate_dir_size_walkdir(path: &Path, end: Instant) -> SizeEstimate {
    let mut bytes: u64 = 0;
    let mut files: u64 = 0;
    let mut errors: u64 = 0;
    let mut truncated = false;

    for entry in WalkDir::new(path).follow_links(false) {
        if Instant::now() >= end {
            truncated = true;
            break;
        }
        match entry {
            Ok(entry) => {
                if !entry.file_type().is_file() {
                    continue;
                }
                match entry.metadata() {
                    Ok(meta) => {
                        bytes = bytes.saturating_add(meta.len());
                        files = files.saturating_add(1);
                    }
                    Err(_) => errors = errors.saturating_add(1),
                }
            }
            Err(_) => errors = errors.saturating_add(1),
        }
    }

    if truncated {
        errors = errors.max(1);
    }

    SizeEstimate {
        bytes,
        file_count: files,
        error_count: errors,
        method: if truncated {
            SizeEstimateMethod::WalkDirTruncated
        } else {
            SizeEstimateMethod::WalkDir
        },
    }
}
