/// Runtime settings resolved once per invocation
///
/// Paths come from CLI flags (which also read `AGENT_LOCKER_POLICY` /
/// `AGENT_LOCKER_AUDIT_LOG`); tunables come from the environment.
use crate::paths::canonicalize::CaseSensitivity;
use log::warn;
use std::path::PathBuf;
use std::time::Duration;

pub const APP_NAME: &str = "agent-locker";

pub const TEST_MODE_ENV: &str = "AGENT_LOCKER_TEST_MODE";
pub const LOCK_TIMEOUT_ENV: &str = "AGENT_LOCKER_LOCK_TIMEOUT_MS";
pub const KILL_GRACE_ENV: &str = "AGENT_LOCKER_KILL_GRACE_MS";
pub const CASE_INSENSITIVE_ENV: &str = "AGENT_LOCKER_CASE_INSENSITIVE";

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);

/// Settings shared by the decision engine, supervisor and audit logger
#[derive(Debug, Clone)]
pub struct Settings {
    pub policy_path: PathBuf,
    pub audit_log_path: PathBuf,
    /// Upper bound on waiting for the audit lock
    pub lock_timeout: Duration,
    /// Time between SIGTERM and SIGKILL when terminating a child
    pub kill_grace: Duration,
    pub case_sensitivity: CaseSensitivity,
    pub test_mode: bool,
}

impl Settings {
    /// Build settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup (tests pass a map)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let case_sensitivity = match lookup(CASE_INSENSITIVE_ENV).as_deref().map(parse_flag) {
            Some(Some(true)) => CaseSensitivity::Insensitive,
            Some(Some(false)) => CaseSensitivity::Sensitive,
            Some(None) => {
                warn!(
                    "Ignoring unrecognised {} value; using host default",
                    CASE_INSENSITIVE_ENV
                );
                CaseSensitivity::host_default()
            }
            None => CaseSensitivity::host_default(),
        };

        Self {
            policy_path: default_policy_path(),
            audit_log_path: default_audit_log_path(),
            lock_timeout: duration_ms(&lookup, LOCK_TIMEOUT_ENV).unwrap_or(DEFAULT_LOCK_TIMEOUT),
            kill_grace: duration_ms(&lookup, KILL_GRACE_ENV).unwrap_or(DEFAULT_KILL_GRACE),
            case_sensitivity,
            test_mode: lookup(TEST_MODE_ENV)
                .as_deref()
                .and_then(parse_flag)
                .unwrap_or(false),
        }
    }

    pub fn with_policy_path(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.policy_path = path;
        }
        self
    }

    pub fn with_audit_log_path(mut self, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            self.audit_log_path = path;
        }
        self
    }
}

fn home_or_temp() -> PathBuf {
    dirs::home_dir().unwrap_or_else(std::env::temp_dir)
}

/// `~/.config/agent-locker/policy.json`
pub fn default_policy_path() -> PathBuf {
    home_or_temp()
        .join(".config")
        .join(APP_NAME)
        .join("policy.json")
}

/// `~/.local/state/agent-locker/audit.log`
pub fn default_audit_log_path() -> PathBuf {
    home_or_temp()
        .join(".local")
        .join("state")
        .join(APP_NAME)
        .join("audit.log")
}

/// Parse a boolean-like environment value
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn duration_ms<F>(lookup: &F, key: &str) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => {
            warn!("Ignoring invalid {}={:?}; using default", key, raw);
            None
        }
    }
}
