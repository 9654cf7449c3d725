/// Value types flowing through one decision: the invocation, the verdict,
/// and the report of what the run actually did.
use crate::config::types::exit_code;
use crate::exec::supervisor::KillReport;
use crate::paths::tokens::CandidateSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// One agent command as requested by the caller. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub argv: Vec<String>,
    /// Absolute working directory the command would run in
    pub cwd: PathBuf,
    pub execute: bool,
    pub timeout: Option<Duration>,
}

impl CommandInvocation {
    /// Dry-run invocation without timeout
    pub fn new(argv: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            argv,
            cwd: cwd.into(),
            execute: false,
            timeout: None,
        }
    }

    pub fn with_execute(mut self, execute: bool) -> Self {
        self.execute = execute;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Shell-quoted rendering of argv for humans and the audit trail
    pub fn command_text(&self) -> String {
        shlex::try_join(self.argv.iter().map(String::as_str))
            .unwrap_or_else(|_| self.argv.join(" "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Allowed,
    Blocked,
    BlockedTestMode,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Allowed => "allowed",
            Outcome::Blocked => "blocked",
            Outcome::BlockedTestMode => "blocked_test_mode",
        }
    }
}

/// A candidate path covered by a deny entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub token: String,
    pub source: CandidateSource,
    /// Resolved candidate path
    pub path: PathBuf,
    /// Most specific deny entry covering `path`
    pub entry: PathBuf,
}

/// The verdict for one invocation. Immutable once built.
#[derive(Debug, Clone)]
pub struct Decision {
    pub outcome: Outcome,
    /// What the policy alone said; `BlockedTestMode` never appears here
    pub policy_outcome: Outcome,
    pub policy_enabled: bool,
    pub test_mode: bool,
    pub violations: Vec<Violation>,
    pub timestamp: DateTime<Utc>,
    pub invocation: CommandInvocation,
}

impl Decision {
    pub fn is_blocked(&self) -> bool {
        self.outcome == Outcome::Blocked
    }

    /// Deny entry reported for the block: the most specific entry of the
    /// first violation
    pub fn matched_path(&self) -> Option<&PathBuf> {
        self.violations.first().map(|v| &v.entry)
    }

    /// Every blocked candidate, sorted and deduplicated
    pub fn blocked_paths(&self) -> Vec<String> {
        self.violations
            .iter()
            .map(|v| v.path.display().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Every deny entry hit, sorted and deduplicated
    pub fn hit_entries(&self) -> Vec<String> {
        self.violations
            .iter()
            .map(|v| v.entry.display().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Why a run ended where it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunReason {
    DryRun,
    Executed,
    BlockedByPolicy,
    TestModeBlock,
    Timeout,
    Interrupted,
    CommandNotFound,
    SpawnFailed,
}

/// Decision plus everything that happened after it
#[derive(Debug, Clone)]
pub struct RunReport {
    pub decision: Decision,
    pub reason: RunReason,
    pub exit_code: i32,
    /// A child process was actually started
    pub executed: bool,
    pub message: String,
    pub duration: Duration,
    pub kill_report: Option<KillReport>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.exit_code == exit_code::ALLOWED
    }
}
