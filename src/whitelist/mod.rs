//! Persisted set of suppressed action keys.
//!
//! The file is read once when the store is opened. Edits made by another process
//! while a run is in progress are not seen, and a concurrent `set_whitelisted`
//! from two processes is last-writer-wins.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
struct WhitelistFile {
    #[serde(default)]
    actions: BTreeMap<String, bool>,
}

#[derive(Debug, Clone)]
pub struct WhitelistStore {
    path: PathBuf,
    entries: BTreeMap<String, bool>,
}

impl WhitelistStore {
    /// A missing file is an empty whitelist. A malformed one is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(s) => {
                let file: WhitelistFile = toml::from_str(&s).with_context(|| {
                    format!("failed to parse whitelist file (TOML): {}", path.display())
                })?;
                file.actions
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read whitelist file: {}", path.display())
                });
            }
        };
        Ok(Self { path, entries })
    }

    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_whitelisted(&self, key: &str) -> bool {
        self.entries.get(key).copied().unwrap_or(false)
    }

    /// Records the flag and rewrites the file before returning.
    /// On a failed write the in-memory set is left as it was.
    pub fn set_whitelisted(&mut self, key: &str, suppressed: bool) -> Result<()> {
        let mut entries = self.entries.clone();
        entries.insert(key.to_string(), suppressed);
        self.persist(&entries)?;
        self.entries = entries;
        Ok(())
    }

    /// Keys currently suppressed. Entries set to `false` are kept in the file but
    /// not listed.
    pub fn list_entries(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|(_, on)| **on)
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn persist(&self, entries: &BTreeMap<String, bool>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }
        let body = toml::to_string_pretty(&WhitelistFile {
            actions: entries.clone(),
        })
        .context("failed to serialize whitelist")?;

        let tmp = self.path.with_extension(format!("toml.tmp-{}", std::process::id()));
        std::fs::write(&tmp, body)
            .with_context(|| format!("failed to write whitelist: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).with_context(|| {
            format!("failed to replace whitelist: {}", self.path.display())
        })?;
        Ok(())
    }
}
