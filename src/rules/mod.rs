//! Turns one set of measurements into the ordered candidate catalog.

use std::collections::BTreeSet;

use crate::core::{CandidateAction, Category, Probe, SafetyTier, SystemMetrics};
use crate::ui::format_size;
use crate::whitelist::WhitelistStore;

/// More launch agents than this surfaces the Startup Items review.
pub const STARTUP_ITEMS_MIN_AGENTS: u64 = 5;

type Builder = fn(&SystemMetrics) -> Option<CandidateAction>;

/// Registration order. Consumers rely on it, so append rather than reorder.
const BUILDERS: [Builder; 16] = [
    system_maintenance,
    startup_items,
    network_services,
    cache_refresh,
    maintenance_scripts,
    radio_refresh,
    recent_items,
    log_cleanup,
    mail_downloads,
    saved_state_cleanup,
    finder_dock_refresh,
    swap_cleanup,
    login_items,
    startup_cache,
    local_snapshots,
    developer_cleanup,
];

/// Every builder runs independently; gates read missing probes as zero, so an
/// unmeasured condition leaves its item out instead of failing the catalog.
/// The whitelist only annotates, it never removes an item.
pub fn build_catalog(
    metrics: &SystemMetrics,
    whitelist: Option<&WhitelistStore>,
) -> Vec<CandidateAction> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(BUILDERS.len());
    for build in BUILDERS {
        let Some(mut item) = build(metrics) else {
            continue;
        };
        if !seen.insert(item.action.clone()) {
            continue;
        }
        item.whitelisted = whitelist.is_some_and(|w| w.is_whitelisted(&item.action));
        out.push(item);
    }
    out
}

/// `max(1, n / 2)` agents suggested for disabling, or `None` at or below the gate.
pub fn suggested_disable(launch_agents: u64) -> Option<u64> {
    (launch_agents > STARTUP_ITEMS_MIN_AGENTS).then(|| (launch_agents / 2).max(1))
}

fn safe(category: Category, name: &str, description: impl Into<String>, key: &str) -> CandidateAction {
    CandidateAction::new(category, name, description, key, SafetyTier::Safe)
}

fn confirm(category: Category, name: &str, description: impl Into<String>, key: &str) -> CandidateAction {
    CandidateAction::new(
        category,
        name,
        description,
        key,
        SafetyTier::RequiresConfirmation,
    )
}

fn system_maintenance(_: &SystemMetrics) -> Option<CandidateAction> {
    Some(safe(
        Category::System,
        "System Maintenance",
        "Rebuild system databases & flush caches",
        "system_maintenance",
    ))
}

fn startup_items(m: &SystemMetrics) -> Option<CandidateAction> {
    let count = m.probe(Probe::LaunchAgents);
    let suggested = suggested_disable(count)?;
    Some(confirm(
        Category::Startup,
        "Startup Items",
        format!("{count} items (suggest disable {suggested})"),
        "startup_items",
    ))
}

fn network_services(_: &SystemMetrics) -> Option<CandidateAction> {
    Some(safe(
        Category::Network,
        "Network Services",
        "Reset network services",
        "network_services",
    ))
}

fn cache_refresh(m: &SystemMetrics) -> Option<CandidateAction> {
    let size = m.probe(Probe::UserCacheBytes);
    let description = if size > 0 {
        format!("Refresh {} of Finder/Safari caches", format_size(size))
    } else {
        "Refresh Finder previews, Quick Look, and Safari caches".to_string()
    };
    Some(safe(
        Category::Cache,
        "User Cache Refresh",
        description,
        "cache_refresh",
    ))
}

fn maintenance_scripts(_: &SystemMetrics) -> Option<CandidateAction> {
    Some(safe(
        Category::System,
        "Maintenance Scripts",
        "Run daily/weekly/monthly scripts & rotate logs",
        "maintenance_scripts",
    ))
}

fn radio_refresh(_: &SystemMetrics) -> Option<CandidateAction> {
    Some(safe(
        Category::Network,
        "Bluetooth & Wi-Fi Refresh",
        "Reset wireless preference caches",
        "radio_refresh",
    ))
}

fn recent_items(_: &SystemMetrics) -> Option<CandidateAction> {
    Some(safe(
        Category::Privacy,
        "Recent Items",
        "Clear recent apps/documents/servers lists",
        "recent_items",
    ))
}

fn log_cleanup(_: &SystemMetrics) -> Option<CandidateAction> {
    Some(safe(
        Category::System,
        "Diagnostics Cleanup",
        "Purge old diagnostic & crash logs",
        "log_cleanup",
    ))
}

// Visible at any size; the executor applies the configured minimum.
fn mail_downloads(m: &SystemMetrics) -> Option<CandidateAction> {
    let size = nonzero(m.probe(Probe::MailDownloadsBytes))?;
    Some(safe(
        Category::Applications,
        "Mail Downloads",
        format!("Recover {} of Mail attachments", format_size(size)),
        "mail_downloads",
    ))
}

fn saved_state_cleanup(m: &SystemMetrics) -> Option<CandidateAction> {
    let size = nonzero(m.probe(Probe::SavedStateBytes))?;
    Some(safe(
        Category::System,
        "Saved State",
        format!("Clear {} of stale saved states", format_size(size)),
        "saved_state_cleanup",
    ))
}

fn finder_dock_refresh(_: &SystemMetrics) -> Option<CandidateAction> {
    Some(safe(
        Category::Interface,
        "Finder & Dock Refresh",
        "Clear Finder/Dock caches and restart",
        "finder_dock_refresh",
    ))
}

fn swap_cleanup(m: &SystemMetrics) -> Option<CandidateAction> {
    let size = nonzero(m.probe(Probe::SwapBytes))?;
    Some(confirm(
        Category::Memory,
        "Memory & Swap",
        format!("Purge swap ({}) & inactive memory", format_size(size)),
        "swap_cleanup",
    ))
}

fn login_items(m: &SystemMetrics) -> Option<CandidateAction> {
    let count = nonzero(m.probe(Probe::LoginItems))?;
    Some(safe(
        Category::Startup,
        "Login Items",
        format!("Review {count} login items"),
        "login_items",
    ))
}

fn startup_cache(_: &SystemMetrics) -> Option<CandidateAction> {
    Some(safe(
        Category::System,
        "Startup Cache Rebuild",
        "Rebuild kext caches & prelinked kernel",
        "startup_cache",
    ))
}

fn local_snapshots(m: &SystemMetrics) -> Option<CandidateAction> {
    let count = nonzero(m.probe(Probe::LocalSnapshots))?;
    Some(safe(
        Category::Storage,
        "Local Snapshots",
        format!("{count} APFS local snapshots detected"),
        "local_snapshots",
    ))
}

fn developer_cleanup(m: &SystemMetrics) -> Option<CandidateAction> {
    let size = nonzero(m.probe(Probe::DeveloperBytes))?;
    Some(confirm(
        Category::Developer,
        "Developer Cleanup",
        format!("Recover {} of Xcode/simulator data", format_size(size)),
        "developer_cleanup",
    ))
}

fn nonzero(v: u64) -> Option<u64> {
    (v > 0).then_some(v)
}
