use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    HomebrewFormula,
    HomebrewCask,
    AppStore,
    MacosSystem,
    #[serde(rename = "self")]
    SelfUpdate,
}

impl UpdateSource {
    pub const ALL: [UpdateSource; 5] = [
        UpdateSource::HomebrewFormula,
        UpdateSource::HomebrewCask,
        UpdateSource::AppStore,
        UpdateSource::MacosSystem,
        UpdateSource::SelfUpdate,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            UpdateSource::HomebrewFormula => "homebrew_formula",
            UpdateSource::HomebrewCask => "homebrew_cask",
            UpdateSource::AppStore => "app_store",
            UpdateSource::MacosSystem => "macos_system",
            UpdateSource::SelfUpdate => "self",
        }
    }

    /// Flag sources contribute at most 1 to the total however they are reported.
    pub const fn is_flag(self) -> bool {
        matches!(self, UpdateSource::MacosSystem | UpdateSource::SelfUpdate)
    }
}

impl fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSourceCount {
    pub source: UpdateSource,
    pub count: u64,
}

/// Immutable aggregation record passed by value between the update stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTally {
    pub homebrew_formula: u64,
    pub homebrew_cask: u64,
    pub app_store: u64,
    pub macos_system: bool,
    pub self_update: bool,
}

impl UpdateTally {
    pub fn from_counts(counts: &[UpdateSourceCount]) -> Self {
        let mut tally = UpdateTally::default();
        for c in counts {
            match c.source {
                UpdateSource::HomebrewFormula => {
                    tally.homebrew_formula = tally.homebrew_formula.saturating_add(c.count)
                }
                UpdateSource::HomebrewCask => {
                    tally.homebrew_cask = tally.homebrew_cask.saturating_add(c.count)
                }
                UpdateSource::AppStore => tally.app_store = tally.app_store.saturating_add(c.count),
                UpdateSource::MacosSystem => tally.macos_system |= c.count > 0,
                UpdateSource::SelfUpdate => tally.self_update |= c.count > 0,
            }
        }
        tally
    }

    pub fn count(&self, source: UpdateSource) -> u64 {
        match source {
            UpdateSource::HomebrewFormula => self.homebrew_formula,
            UpdateSource::HomebrewCask => self.homebrew_cask,
            UpdateSource::AppStore => self.app_store,
            UpdateSource::MacosSystem => u64::from(self.macos_system),
            UpdateSource::SelfUpdate => u64::from(self.self_update),
        }
    }

    pub fn sources(&self) -> Vec<UpdateSourceCount> {
        UpdateSource::ALL
            .iter()
            .map(|&source| UpdateSourceCount {
                source,
                count: self.count(source),
            })
            .collect()
    }

    /// Sources with something to do, in fixed order.
    pub fn pending(&self) -> Vec<UpdateSource> {
        UpdateSource::ALL
            .into_iter()
            .filter(|&s| self.count(s) > 0)
            .collect()
    }

    pub fn total(&self) -> u64 {
        UpdateSource::ALL
            .iter()
            .fold(0u64, |acc, &s| acc.saturating_add(self.count(s)))
    }
}
