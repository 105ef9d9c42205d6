use std::fmt;

use crate::platform::CommandError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    Cancelled,
    NoUpdates,
    InvalidArgs,
    RunFailed,
    ExternalCommandFailed,
}

impl ExitCode {
    pub const fn as_i32(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::Cancelled => 1,
            ExitCode::NoUpdates => 1,
            ExitCode::InvalidArgs => 2,
            ExitCode::RunFailed => 10,
            ExitCode::ExternalCommandFailed => 20,
        }
    }
}

#[derive(Debug)]
pub struct ExitError {
    pub code: ExitCode,
    pub err: anyhow::Error,
}

impl ExitError {
    pub fn new(code: ExitCode, err: anyhow::Error) -> Self {
        Self { code, err }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.err.fmt(f)
    }
}

impl std::error::Error for ExitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.err.as_ref())
    }
}

pub fn exit_code(err: &anyhow::Error) -> i32 {
    exit_kind(err)
        .unwrap_or(ExitCode::RunFailed)
        .as_i32()
}

/// An explicit [`ExitError`] wins; otherwise a failed external command anywhere in
/// the chain is reported as such.
pub fn exit_kind(err: &anyhow::Error) -> Option<ExitCode> {
    if let Some(exit) = err.downcast_ref::<ExitError>() {
        return Some(exit.code);
    }
    err.chain()
        .any(|cause| cause.is::<CommandError>())
        .then_some(ExitCode::ExternalCommandFailed)
}

/// Cancellation and "nothing to do" leave through the error path for their exit
/// code but are not failures worth a diagnostic block.
pub fn is_quiet_exit(err: &anyhow::Error) -> bool {
    matches!(
        exit_kind(err),
        Some(ExitCode::Cancelled | ExitCode::NoUpdates)
    )
}

pub fn invalid_args(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(ExitCode::InvalidArgs, anyhow::anyhow!(message.into())).into()
}

pub fn invalid_args_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::InvalidArgs, err).into()
}

pub fn cancelled(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(ExitCode::Cancelled, anyhow::anyhow!(message.into())).into()
}

pub fn no_updates(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(ExitCode::NoUpdates, anyhow::anyhow!(message.into())).into()
}
