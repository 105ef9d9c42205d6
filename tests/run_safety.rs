use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

const SCRUBBED_ENV: &[&str] = &[
    "MOLEOPT_CONFIG",
    "MOLEOPT_WHITELIST",
    "MOLEOPT_LOG",
    "MOLEOPT_UI_COLOR",
    "MOLEOPT_MAIL_DOWNLOADS_MIN_MB",
    "MOLEOPT_MAIL_DOWNLOADS_AGE_DAYS",
    "MOLEOPT_LOG_AGE_DAYS",
    "MOLEOPT_SAVED_STATE_AGE_DAYS",
    "MOLEOPT_PROBE_TIMEOUT_SECS",
    "SUDO_UID",
    "SUDO_GID",
    "SUDO_USER",
];

const RECENT_DIR: &str = "Library/Application Support/com.apple.sharedfilelist";

fn moleopt_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_moleopt"));
    cmd.env("HOME", home);
    cmd.env("PATH", home.join("bin"));
    for key in SCRUBBED_ENV {
        cmd.env_remove(key);
    }
    cmd
}

fn run(home: &Path, args: &[&str]) -> Output {
    moleopt_cmd(home).args(args).output().expect("run moleopt")
}

fn run_json(home: &Path, args: &[&str]) -> (Option<i32>, serde_json::Value) {
    let out = run(home, args);
    let v = serde_json::from_slice(&out.stdout).unwrap_or_else(|err| {
        panic!(
            "parse json: {err}; stderr={}",
            String::from_utf8_lossy(&out.stderr)
        )
    });
    (out.status.code(), v)
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);

    let temp = std::env::temp_dir();
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let uniq = format!("moleopt-run-test-{}-{seq}", std::process::id());
    let home = temp.join(uniq);
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(home.join("bin")).expect("create home");
    home
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdirs");
    }
    std::fs::write(path, bytes).expect("write");
}

fn run_logs(home: &Path) -> Vec<PathBuf> {
    let dir = home.join(".config/moleopt/logs");
    let Ok(rd) = std::fs::read_dir(&dir) else {
        return vec![];
    };
    rd.filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("run-") && n.ends_with(".json"))
        })
        .collect()
}

#[test]
fn whitelisted_action_is_skipped_and_untouched() {
    let home = make_temp_home();
    let recent = home.join(RECENT_DIR).join("docs.sfl2");
    write_file(&recent, b"recent");

    assert_eq!(run(&home, &["whitelist", "add", "recent_items"]).status.code(), Some(0));

    let (code, v) = run_json(&home, &["run", "recent_items", "--json"]);
    assert_eq!(code, Some(0));
    assert_eq!(v["results"][0]["status"], "skipped_whitelisted");
    assert_eq!(v["summary"]["skipped"], 1);
    assert!(recent.exists());

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn dry_run_reports_without_mutating_or_logging() {
    let home = make_temp_home();
    let recent = home.join(RECENT_DIR).join("docs.sfl2");
    write_file(&recent, b"recent");

    let (code, v) = run_json(&home, &["--dry-run", "run", "recent_items", "--json"]);
    assert_eq!(code, Some(0));
    assert_eq!(v["mode"], "dry_run");
    let result = &v["results"][0];
    assert_eq!(result["status"], "succeeded");
    assert_eq!(result["steps"][0]["removed"], 1);
    let msg = result["message"].as_str().unwrap();
    assert!(msg.starts_with("would run: "), "message={msg}");

    assert!(recent.exists());
    assert!(run_logs(&home).is_empty());

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn live_run_removes_matches_and_writes_a_run_log() {
    let home = make_temp_home();
    let recent_dir = home.join(RECENT_DIR);
    write_file(&recent_dir.join("docs.sfl2"), &[0u8; 4096]);
    write_file(&recent_dir.join("keep.plist"), b"keep");

    let (code, v) = run_json(&home, &["run", "recent_items", "--json"]);
    assert_eq!(code, Some(0));
    assert_eq!(v["results"][0]["status"], "succeeded");
    assert_eq!(v["results"][0]["bytes_freed"], 4096);
    assert!(!recent_dir.join("docs.sfl2").exists());
    assert!(recent_dir.join("keep.plist").exists());

    let logs = run_logs(&home);
    assert_eq!(logs.len(), 1, "logs={logs:?}");
    let log: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&logs[0]).expect("read log")).expect("parse log");
    assert_eq!(log["mode"], "live");
    assert_eq!(log["results"][0]["action"], "recent_items");

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn failed_required_step_does_not_stop_the_batch() {
    let home = make_temp_home();
    let recent = home.join(RECENT_DIR).join("docs.sfl2");
    write_file(&recent, b"recent");

    // network_services needs dscacheutil, which is not on PATH.
    let (code, v) = run_json(&home, &["run", "network_services", "recent_items", "--json"]);
    assert_eq!(code, Some(0));
    let results = v["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["action"], "network_services");
    assert_eq!(results[0]["status"], "failed");
    let msg = results[0]["message"].as_str().unwrap();
    assert!(msg.contains("is not available"), "message={msg}");
    assert_eq!(results[1]["status"], "succeeded");
    assert!(!recent.exists());

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn optional_step_failure_is_a_warning() {
    let home = make_temp_home();
    let derived = home.join("Library/Developer/Xcode/DerivedData/App-abc/Build.db");
    write_file(&derived, &[0u8; 2048]);

    let (code, v) = run_json(&home, &["run", "developer_cleanup", "--yes", "--json"]);
    assert_eq!(code, Some(0));
    let result = &v["results"][0];
    assert_eq!(result["status"], "succeeded");
    let msg = result["message"].as_str().unwrap();
    assert!(msg.contains("warnings"), "message={msg}");
    assert!(!home.join("Library/Developer/Xcode/DerivedData/App-abc").exists());

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn small_mail_downloads_are_skipped_below_the_minimum() {
    let home = make_temp_home();
    let attachment = home.join("Library/Mail Downloads/invoice.pdf");
    write_file(&attachment, &[0u8; 1024]);

    let (code, v) = run_json(&home, &["run", "mail_downloads", "--json"]);
    assert_eq!(code, Some(0));
    assert_eq!(v["results"][0]["status"], "skipped_threshold");
    assert!(attachment.exists());

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn log_cleanup_keeps_recent_reports() {
    let home = make_temp_home();
    let report = home.join("Library/Logs/DiagnosticReports/App-2026.crash");
    write_file(&report, b"crash");

    let (code, v) = run_json(&home, &["run", "log_cleanup", "--json"]);
    assert_eq!(code, Some(0));
    assert_eq!(v["results"][0]["status"], "succeeded");
    assert!(report.exists(), "a fresh report is inside the age cutoff");

    let _ = std::fs::remove_dir_all(&home);
}
