/// Core error types and the exit-code table for agent-locker
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Exit codes produced by the `run` and `check` surfaces.
///
/// Every internal error resolves to one of these (or to a child's own code)
/// so callers can script against a closed set.
pub mod exit_code {
    /// Allowed: dry-run success or child exited 0
    pub const ALLOWED: i32 = 0;
    /// Policy file could not be loaded/saved or another internal failure
    pub const INTERNAL: i32 = 1;
    /// Validation failure before any decision was made
    pub const USAGE: i32 = 2;
    /// A path token or the working directory is covered by a deny entry
    pub const BLOCKED_BY_POLICY: i32 = 25;
    /// `AGENT_LOCKER_TEST_MODE=1` stopped execution
    pub const BLOCKED_TEST_MODE: i32 = 26;
    /// Audit lock could not be acquired in time
    pub const AUDIT_LOCK_TIMEOUT: i32 = 75;
    /// Child exceeded `--timeout-sec` and was terminated
    pub const TIMED_OUT: i32 = 124;
    /// Child could not be executed (permission denied, bad format)
    pub const SPAWN_FAILED: i32 = 126;
    /// Child executable was not found
    pub const COMMAND_NOT_FOUND: i32 = 127;

    /// Shell convention for "terminated by signal N"
    pub fn from_signal(signal: i32) -> i32 {
        128 + signal
    }
}

/// Errors raised while loading, validating or persisting the deny policy
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Policy file was not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Policy file {} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid policy: {0}")]
    Invalid(String),

    #[error("Policy I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the cross-process advisory lock
#[derive(Error, Debug)]
pub enum LockError {
    #[error(
        "Timed out after {waited:?} waiting for lock {} (current owner: {})",
        path.display(),
        current_owner.as_deref().unwrap_or("unknown")
    )]
    Timeout {
        path: PathBuf,
        waited: Duration,
        current_owner: Option<String>,
    },

    #[error("Lock I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("flock failed on {}: {message}", path.display())]
    SystemError { path: PathBuf, message: String },
}

/// Errors from the audit log subsystem
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit lock unavailable: {0}")]
    Lock(#[from] LockError),

    #[error("Audit log I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audit record could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Audit log {} holds a malformed record at line {line}: {details}", path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        details: String,
    },
}

impl AuditError {
    /// Lock timeouts are fatal for the invocation; other audit failures are
    /// reported loudly but keep the decision's exit code.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, AuditError::Lock(LockError::Timeout { .. }))
    }
}

/// Errors from spawning or supervising the child process
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Command not found: {program}")]
    NotFound { program: String },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for child {pid}: {message}")]
    Wait { pid: u32, message: String },

    #[error("Empty command")]
    EmptyCommand,
}

/// Top-level error for agent-locker operations
#[derive(Error, Debug)]
pub enum LockerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert errors to the exit code reported to the caller
impl From<&LockerError> for i32 {
    fn from(err: &LockerError) -> i32 {
        match err {
            LockerError::Validation(_) => exit_code::USAGE,
            LockerError::Config(_) => exit_code::USAGE,
            LockerError::Policy(_) => exit_code::INTERNAL,
            LockerError::Audit(e) if e.is_lock_timeout() => exit_code::AUDIT_LOCK_TIMEOUT,
            LockerError::Audit(_) => exit_code::INTERNAL,
            LockerError::Exec(ExecError::NotFound { .. }) => exit_code::COMMAND_NOT_FOUND,
            LockerError::Exec(ExecError::Spawn { .. }) => exit_code::SPAWN_FAILED,
            LockerError::Exec(_) => exit_code::INTERNAL,
            LockerError::Io(_) => exit_code::INTERNAL,
        }
    }
}

/// Result type alias for agent-locker operations
pub type Result<T> = std::result::Result<T, LockerError>;

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Result type for audit operations
pub type AuditResult<T> = std::result::Result<T, AuditError>;

/// Result type for policy operations
pub type PolicyResult<T> = std::result::Result<T, PolicyError>;
