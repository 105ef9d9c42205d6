use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    System,
    Network,
    Cache,
    Privacy,
    Startup,
    Memory,
    Storage,
    Developer,
    Applications,
    Interface,
}

impl Category {
    pub const fn as_str(self) -> &'static str {
        match self {
            Category::System => "system",
            Category::Network => "network",
            Category::Cache => "cache",
            Category::Privacy => "privacy",
            Category::Startup => "startup",
            Category::Memory => "memory",
            Category::Storage => "storage",
            Category::Developer => "developer",
            Category::Applications => "applications",
            Category::Interface => "interface",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyTier {
    Safe,
    RequiresConfirmation,
}

impl SafetyTier {
    pub const fn as_str(self) -> &'static str {
        match self {
            SafetyTier::Safe => "safe",
            SafetyTier::RequiresConfirmation => "requires_confirmation",
        }
    }

    pub const fn is_safe(self) -> bool {
        matches!(self, SafetyTier::Safe)
    }
}

impl fmt::Display for SafetyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SafetyTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "safe" => Ok(SafetyTier::Safe),
            "requires_confirmation" | "confirm" => Ok(SafetyTier::RequiresConfirmation),
            other => Err(format!(
                "invalid safety tier: {other} (expected safe|requires_confirmation)"
            )),
        }
    }
}

/// A proposed optimization surfaced to the user; nothing has run yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateAction {
    pub category: Category,
    pub name: String,
    pub description: String,
    pub action: String,
    pub safety: SafetyTier,
    #[serde(default)]
    pub whitelisted: bool,
}

impl CandidateAction {
    pub fn new(
        category: Category,
        name: impl Into<String>,
        description: impl Into<String>,
        action: impl Into<String>,
        safety: SafetyTier,
    ) -> Self {
        Self {
            category,
            name: name.into(),
            description: description.into(),
            action: action.into(),
            safety,
            whitelisted: false,
        }
    }
}
