use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use wait_timeout::ChildExt;

use crate::core::OsInfo;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug)]
pub enum CommandError {
    Spawn(std::io::Error),
    TimedOut(Duration),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Spawn(err) => write!(f, "failed to start process: {err}"),
            CommandError::TimedOut(timeout) => write!(f, "timed out after {timeout:?}"),
        }
    }
}

impl std::error::Error for CommandError {}

#[derive(Debug, Clone)]
pub struct CommandRunAs {
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, Default)]
pub struct CommandRunOptions {
    pub run_as: Option<CommandRunAs>,
    pub env: Vec<(String, String)>,
}

pub fn run_command(cmd: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
    run_command_with_options(cmd, args, timeout, &CommandRunOptions::default())
}

/// Runs `cmd` in its own process group. On timeout the whole group is killed so
/// nothing the tool forked keeps running, and the error downcasts to
/// [`CommandError::TimedOut`].
pub fn run_command_with_options(
    cmd: &str,
    args: &[&str],
    timeout: Duration,
    options: &CommandRunOptions,
) -> Result<CommandOutput> {
    let mut command = Command::new(cmd);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    for (k, v) in &options.env {
        command.env(k, v);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
        if let Some(run_as) = &options.run_as {
            command.uid(run_as.uid);
            command.gid(run_as.gid);
        }
    }

    let mut child = command
        .spawn()
        .map_err(CommandError::Spawn)
        .with_context(|| format!("failed to start process: {cmd}"))?;

    let started = Instant::now();
    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());

    let status = match child
        .wait_timeout(timeout)
        .with_context(|| format!("failed to wait for process: {cmd}"))?
    {
        Some(status) => status,
        None => {
            terminate_process_group(&mut child);
            // Anything that escaped the group may still hold the pipes.
            let _ = collect(stdout_reader, PIPE_DRAIN_GRACE);
            let _ = collect(stderr_reader, PIPE_DRAIN_GRACE);
            return Err(anyhow!(CommandError::TimedOut(timeout)).context(cmd.to_string()));
        }
    };

    // A daemonized grandchild can keep the pipes open after the child exits.
    let drain_budget = timeout.saturating_sub(started.elapsed()) + PIPE_DRAIN_GRACE;
    let drain_deadline = Instant::now() + drain_budget;
    let stdout = collect(stdout_reader, drain_budget);
    let stderr = collect(
        stderr_reader,
        drain_deadline.saturating_duration_since(Instant::now()),
    );

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

/// Time a terminated group gets to exit on SIGTERM before SIGKILL.
const TERM_GRACE: Duration = Duration::from_millis(500);
/// How long pipe readers are waited for once the child is gone.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(200);

pub fn is_timeout(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<CommandError>(),
            Some(CommandError::TimedOut(_))
        )
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<String>> {
    pipe.map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });
        rx
    })
}

/// Output read so far is lost if the reader does not finish within `wait`; the
/// reader thread is left to end on its own when the pipe closes.
fn collect(reader: Option<Receiver<String>>, wait: Duration) -> String {
    reader
        .and_then(|rx| rx.recv_timeout(wait).ok())
        .unwrap_or_default()
}

/// SIGTERM first so `sudo` can relay it to a command we may not signal
/// ourselves, then SIGKILL. Never blocks past the grace periods.
fn terminate_process_group(child: &mut Child) {
    signal_process_group(child, TERM_SIGNAL);
    if matches!(child.wait_timeout(TERM_GRACE), Ok(Some(_))) {
        // The leader is gone; stragglers in the group still get the hard kill.
        signal_process_group(child, KILL_SIGNAL);
        return;
    }
    signal_process_group(child, KILL_SIGNAL);
    let _ = child.kill();
    let _ = child.wait_timeout(TERM_GRACE);
}

#[cfg(unix)]
const TERM_SIGNAL: i32 = libc::SIGTERM;
#[cfg(unix)]
const KILL_SIGNAL: i32 = libc::SIGKILL;
#[cfg(not(unix))]
const TERM_SIGNAL: i32 = 15;
#[cfg(not(unix))]
const KILL_SIGNAL: i32 = 9;

fn signal_process_group(child: &mut Child, signal: i32) {
    #[cfg(unix)]
    {
        let pgid = child.id() as libc::pid_t;
        // SAFETY: killpg only sends a signal; the group was created for this child.
        let rc = unsafe { libc::killpg(pgid, signal) };
        if rc == 0 {
            return;
        }
    }
    #[cfg(not(unix))]
    let _ = signal;
    if signal == KILL_SIGNAL {
        let _ = child.kill();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Available(PathBuf),
    Unavailable,
}

impl Capability {
    pub fn is_available(&self) -> bool {
        matches!(self, Capability::Available(_))
    }
}

/// Resolves `tool` against `PATH` (or takes an explicit path as-is).
pub fn capability(tool: &str) -> Capability {
    if tool.contains('/') {
        let p = PathBuf::from(tool);
        return if is_executable(&p) {
            Capability::Available(p)
        } else {
            Capability::Unavailable
        };
    }

    let Some(path) = std::env::var_os("PATH") else {
        return Capability::Unavailable;
    };
    for dir in std::env::split_paths(&path) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let candidate = dir.join(tool);
        if is_executable(&candidate) {
            return Capability::Available(candidate);
        }
    }
    Capability::Unavailable
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

pub fn is_root() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions.
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionState {
    NotRequested,
    Granted,
    Denied(String),
}

/// Elevated-privilege session for one process run. Acquired on the first
/// privileged step, reused afterwards, never persisted.
#[derive(Debug)]
pub struct PrivilegeSession {
    state: SessionState,
}

impl Default for PrivilegeSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PrivilegeSession {
    pub fn new() -> Self {
        let state = if is_root() {
            SessionState::Granted
        } else {
            SessionState::NotRequested
        };
        Self { state }
    }

    /// Prompts at most once per run; a refusal is remembered too.
    pub fn acquire(&mut self) -> Result<()> {
        match &self.state {
            SessionState::Granted => return Ok(()),
            SessionState::Denied(reason) => return Err(anyhow!(reason.clone())),
            SessionState::NotRequested => {}
        }

        tracing::info!("requesting administrator privileges");
        let result = Command::new("sudo")
            .arg("-v")
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status();
        match result {
            Ok(status) if status.success() => {
                self.state = SessionState::Granted;
                Ok(())
            }
            Ok(status) => {
                let reason = format!(
                    "administrator privileges were not granted (sudo exit_code={})",
                    status.code().unwrap_or(-1)
                );
                self.state = SessionState::Denied(reason.clone());
                Err(anyhow!(reason))
            }
            Err(err) => {
                let reason = format!("administrator privileges unavailable: {err}");
                self.state = SessionState::Denied(reason.clone());
                Err(anyhow!(reason))
            }
        }
    }

    /// Runs through `sudo -n` unless the process is already root.
    pub fn run(&self, cmd: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        if is_root() {
            return run_command(cmd, args, timeout);
        }
        let mut sudo_args = vec!["-n", cmd];
        sudo_args.extend_from_slice(args);
        run_command("sudo", &sudo_args, timeout)
    }
}

#[derive(Debug, Clone)]
pub struct InvokingUser {
    pub uid: u32,
    pub gid: u32,
    pub username: Option<String>,
    pub home_dir: PathBuf,
}

pub fn invoking_user() -> Option<InvokingUser> {
    let uid = std::env::var("SUDO_UID").ok()?.parse::<u32>().ok()?;
    let gid = std::env::var("SUDO_GID").ok()?.parse::<u32>().ok()?;
    let username = std::env::var("SUDO_USER").ok();
    let home_dir = home_dir_for_uid(uid)?;

    Some(InvokingUser {
        uid,
        gid,
        username,
        home_dir,
    })
}

pub fn effective_home_dir() -> Result<PathBuf> {
    if let Some(user) = invoking_user() {
        return Ok(user.home_dir);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("HOME is not set"))
}

/// User-level tools (brew, mas) refuse to run as root; drop back to the sudo caller.
pub fn run_command_invoking_user(cmd: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
    let Some(user) = invoking_user() else {
        return run_command(cmd, args, timeout);
    };

    let mut env = vec![("HOME".to_string(), user.home_dir.display().to_string())];
    if let Some(name) = user.username.clone() {
        env.push(("USER".to_string(), name.clone()));
        env.push(("LOGNAME".to_string(), name));
    }

    run_command_with_options(
        cmd,
        args,
        timeout,
        &CommandRunOptions {
            run_as: Some(CommandRunAs {
                uid: user.uid,
                gid: user.gid,
            }),
            env,
        },
    )
}

#[cfg(unix)]
fn home_dir_for_uid(uid: u32) -> Option<PathBuf> {
    use std::ffi::CStr;

    unsafe {
        let bufsize = libc::sysconf(libc::_SC_GETPW_R_SIZE_MAX);
        let bufsize = if bufsize <= 0 {
            16 * 1024
        } else {
            bufsize as usize
        };
        let mut buf = vec![0u8; bufsize];
        let mut pwd: libc::passwd = std::mem::zeroed();
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        let rc = libc::getpwuid_r(
            uid as libc::uid_t,
            &mut pwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        );
        if rc != 0 || result.is_null() || pwd.pw_dir.is_null() {
            return None;
        }

        let dir = CStr::from_ptr(pwd.pw_dir).to_string_lossy().to_string();
        if dir.trim().is_empty() {
            return None;
        }
        Some(PathBuf::from(dir))
    }
}

#[cfg(not(unix))]
fn home_dir_for_uid(_uid: u32) -> Option<PathBuf> {
    None
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl DiskUsage {
    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Filesystem usage of the volume holding `path`; `None` if statvfs fails.
#[cfg(unix)]
pub fn disk_usage(path: &Path) -> Option<DiskUsage> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    // SAFETY: c_path is NUL-terminated and stat is a valid out-pointer.
    let stat = unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return None;
        }
        stat
    };

    let frsize = stat.f_frsize as u64;
    let total_bytes = (stat.f_blocks as u64).saturating_mul(frsize);
    let free_bytes = (stat.f_bfree as u64).saturating_mul(frsize);
    Some(DiskUsage {
        used_bytes: total_bytes.saturating_sub(free_bytes),
        total_bytes,
    })
}

#[cfg(not(unix))]
pub fn disk_usage(_path: &Path) -> Option<DiskUsage> {
    None
}

pub fn os_info(timeout: Duration) -> OsInfo {
    #[cfg(target_os = "macos")]
    {
        return crate::platform::macos::os_info(timeout);
    }

    #[cfg(not(target_os = "macos"))]
    {
        let _ = timeout;
        return OsInfo {
            name: std::env::consts::OS.to_string(),
            version: "unknown".to_string(),
        };
    }
}

pub mod macos;
