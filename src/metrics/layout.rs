use std::path::{Path, PathBuf};

/// Where the things we measure and clean live. `system_root` is `/` outside tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub home: PathBuf,
    pub system_root: PathBuf,
}

impl Layout {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            system_root: PathBuf::from("/"),
        }
    }

    pub fn with_system_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.system_root = root.into();
        self
    }

    fn library(&self) -> PathBuf {
        self.home.join("Library")
    }

    pub fn user_caches(&self) -> PathBuf {
        self.library().join("Caches")
    }

    pub fn mail_download_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.library().join("Mail Downloads"),
            self.library()
                .join("Containers/com.apple.mail/Data/Library/Mail Downloads"),
        ]
    }

    pub fn saved_state_dir(&self) -> PathBuf {
        self.library().join("Saved Application State")
    }

    pub fn swap_dir(&self) -> PathBuf {
        self.system_root.join("private/var/vm")
    }

    /// `swapfile*` entries of the swap directory; empty when it cannot be read.
    pub fn swap_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(self.swap_dir()) else {
            return vec![];
        };
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with("swapfile"))
            .map(|e| e.path())
            .collect();
        files.sort();
        files
    }

    pub fn developer_dirs(&self) -> Vec<PathBuf> {
        let dev = self.library().join("Developer");
        vec![
            dev.join("Xcode/DerivedData"),
            dev.join("Xcode/Archives"),
            dev.join("Xcode/iOS DeviceSupport"),
            dev.join("CoreSimulator/Caches"),
        ]
    }

    pub fn launch_agent_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.library().join("LaunchAgents"),
            self.system_root.join("Library/LaunchAgents"),
        ]
    }

    pub fn diagnostic_log_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.library().join("Logs/DiagnosticReports"),
            self.library().join("Logs/CrashReporter"),
        ]
    }

    pub fn recent_items_dir(&self) -> PathBuf {
        self.library()
            .join("Application Support/com.apple.sharedfilelist")
    }

    pub fn byhost_preferences(&self) -> PathBuf {
        self.library().join("Preferences/ByHost")
    }

    pub fn quicklook_cache(&self) -> PathBuf {
        self.user_caches().join("com.apple.QuickLook.thumbnailcache")
    }

    pub fn safari_cache(&self) -> PathBuf {
        self.user_caches().join("com.apple.Safari")
    }

    pub fn finder_cache(&self) -> PathBuf {
        self.user_caches().join("com.apple.finder")
    }

    pub fn disk_probe_path(&self) -> &Path {
        if self.home.exists() {
            &self.home
        } else {
            &self.system_root
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_files_filters_by_prefix() {
        let root = std::env::temp_dir().join(format!("moleopt-layout-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        let layout = Layout::new(root.join("home")).with_system_root(&root);
        assert!(layout.swap_files().is_empty());

        std::fs::create_dir_all(layout.swap_dir()).unwrap();
        std::fs::write(layout.swap_dir().join("swapfile0"), b"x").unwrap();
        std::fs::write(layout.swap_dir().join("swapfile1"), b"x").unwrap();
        std::fs::write(layout.swap_dir().join("sleepimage"), b"x").unwrap();
        assert_eq!(layout.swap_files().len(), 2);

        let _ = std::fs::remove_dir_all(&root);
    }
}
