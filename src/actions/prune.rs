use std::path::Path;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use globset::Glob;
use tracing::{debug, warn};

use crate::platform::CommandError;

const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    /// Entries removed, or that would be removed in dry-run.
    pub removed: u64,
    /// Matching entries that could not be inspected or removed.
    pub errors: u64,
}

/// Deletes direct children of `root` whose file name matches `pattern` and whose
/// modification time is at least `older_than_days` old. A cutoff of 0 takes every
/// match regardless of age. `root` itself is never removed and a missing root is
/// a no-op. Symlinks are removed as links, never followed.
///
/// Passing `deadline` bounds the walk; once it expires the call fails with
/// [`CommandError::TimedOut`] after keeping whatever was already removed.
pub fn prune_aged_entries(
    root: &Path,
    pattern: &str,
    older_than_days: u32,
    dry_run: bool,
    deadline: Option<Instant>,
) -> Result<PruneOutcome> {
    let matcher = Glob::new(pattern)
        .with_context(|| format!("invalid prune pattern: {pattern}"))?
        .compile_matcher();

    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(PruneOutcome::default());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read directory: {}", root.display()));
        }
    };

    let cutoff = Duration::from_secs(u64::from(older_than_days) * SECS_PER_DAY);
    let now = SystemTime::now();
    let started = Instant::now();
    let mut out = PruneOutcome::default();

    for entry in entries {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(CommandError::TimedOut(started.elapsed()))
                    .with_context(|| format!("prune of {} ran out of time", root.display()));
            }
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(root = %root.display(), %err, "unreadable directory entry");
                out.errors += 1;
                continue;
            }
        };
        if !matcher.is_match(entry.file_name()) {
            continue;
        }

        let path = entry.path();
        let meta = match std::fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(err) => {
                debug!(path = %path.display(), %err, "stat failed");
                out.errors += 1;
                continue;
            }
        };

        if older_than_days > 0 {
            // Unknown or future mtimes count as fresh.
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok());
            match age {
                Some(age) if age >= cutoff => {}
                _ => continue,
            }
        }

        if dry_run {
            out.removed += 1;
            continue;
        }

        let removed = if meta.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match removed {
            Ok(()) => out.removed += 1,
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to remove entry");
                out.errors += 1;
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn temp_root(tag: &str) -> PathBuf {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "moleopt-prune-{tag}-{}-{seq}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    fn age(path: &Path, days: u64) {
        let mtime = SystemTime::now() - Duration::from_secs(days * SECS_PER_DAY + 60);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    #[test]
    fn missing_root_is_a_noop() {
        let root = temp_root("missing").join("nope");
        let out = prune_aged_entries(&root, "*", 0, false, None).unwrap();
        assert_eq!(out, PruneOutcome::default());
    }

    #[test]
    fn never_removes_entries_younger_than_cutoff() {
        let root = temp_root("age");
        let old = root.join("old.crash");
        let fresh = root.join("fresh.crash");
        std::fs::write(&old, b"x").unwrap();
        std::fs::write(&fresh, b"x").unwrap();
        age(&old, 10);
        age(&fresh, 3);

        let out = prune_aged_entries(&root, "*.crash", 7, false, None).unwrap();
        assert_eq!(out.removed, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(root.exists());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn zero_cutoff_removes_every_match_only() {
        let root = temp_root("zero");
        std::fs::write(root.join("a.log"), b"x").unwrap();
        std::fs::create_dir_all(root.join("b.log/nested")).unwrap();
        std::fs::write(root.join("keep.txt"), b"x").unwrap();

        let out = prune_aged_entries(&root, "*.log", 0, false, None).unwrap();
        assert_eq!(out.removed, 2);
        assert!(root.join("keep.txt").exists());
        assert!(!root.join("b.log").exists());
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn dry_run_counts_without_mutating() {
        let root = temp_root("dry");
        for name in ["a", "b", "c"] {
            let p = root.join(name);
            std::fs::write(&p, b"x").unwrap();
            age(&p, 40);
        }

        let out = prune_aged_entries(&root, "*", 30, true, None).unwrap();
        assert_eq!(out.removed, 3);
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 3);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn expired_deadline_is_a_timeout() {
        let root = temp_root("deadline");
        std::fs::write(root.join("a"), b"x").unwrap();
        let err = prune_aged_entries(&root, "*", 0, false, Some(Instant::now())).unwrap_err();
        assert!(crate::platform::is_timeout(&err));
        assert!(root.join("a").exists());
        let _ = std::fs::remove_dir_all(&root);
    }
}
