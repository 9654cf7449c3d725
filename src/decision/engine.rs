/// Decision engine: canonicalize, check, then run or refuse
///
/// ```text
/// Start -> Canonicalize -> PolicyCheck -> {Blocked | TestModeBlocked | Allowed}
///       -> {DryRunDone | Spawn -> {Completed | TimedOut | Interrupted}}
/// ```
///
/// Every terminal state yields one [`RunReport`]; [`Engine::run_audited`]
/// writes exactly one audit record for it.
use crate::config::types::{exit_code, AuditResult, ExecError, LockerError};
use crate::decision::types::{
    CommandInvocation, Decision, Outcome, RunReason, RunReport, Violation,
};
use crate::exec::signal::CancellationToken;
use crate::exec::supervisor::{CommandExecutor, ExecRequest, ExecutionOutcome, KillReport};
use crate::observability::audit::{AppendReceipt, AuditEntry, AuditLog};
use crate::paths::canonicalize::Canonicalizer;
use crate::paths::tokens::{
    Candidate, CandidateSource, ExecutableResolver, SearchPathResolver, TokenScanner,
};
use crate::policy::model::{Policy, PolicySnapshot};
use chrono::Utc;
use log::{debug, info, warn};
use std::path::Path;
use std::time::Instant;

pub struct Engine {
    snapshot: PolicySnapshot,
    canonicalizer: Canonicalizer,
    resolver: Box<dyn ExecutableResolver>,
    test_mode: bool,
}

impl Engine {
    pub fn new(snapshot: PolicySnapshot, canonicalizer: Canonicalizer) -> Self {
        Self {
            snapshot,
            canonicalizer,
            resolver: Box::new(SearchPathResolver::from_env()),
            test_mode: false,
        }
    }

    /// Snapshot `policy` once; relative entries resolve against `base_dir`
    pub fn from_policy(policy: &Policy, base_dir: &Path, canonicalizer: Canonicalizer) -> Self {
        let snapshot = policy.snapshot(&canonicalizer, base_dir);
        Self::new(snapshot, canonicalizer)
    }

    pub fn with_resolver(mut self, resolver: Box<dyn ExecutableResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn snapshot(&self) -> &PolicySnapshot {
        &self.snapshot
    }

    /// The working directory followed by every path-like token of argv
    pub fn candidates(&self, invocation: &CommandInvocation) -> Vec<Candidate> {
        let cwd = invocation.cwd.as_path();
        let cwd_token = cwd.display().to_string();
        let mut candidates = vec![Candidate {
            path: self.canonicalizer.canonicalize(&cwd_token, cwd),
            token: cwd_token,
            source: CandidateSource::WorkingDirectory,
        }];
        let scanner = TokenScanner::new(&self.canonicalizer, self.resolver.as_ref());
        candidates.extend(scanner.scan(&invocation.argv, cwd));
        candidates
    }

    /// Pure verdict for `invocation`; nothing is spawned or written
    pub fn decide(&self, invocation: &CommandInvocation) -> Decision {
        let timestamp = Utc::now();
        let violations: Vec<Violation> = self
            .candidates(invocation)
            .into_iter()
            .filter_map(|candidate| {
                let entry = self.snapshot.matching_entry(&candidate.path)?;
                Some(Violation {
                    entry: entry.as_path().to_path_buf(),
                    path: candidate.path.as_path().to_path_buf(),
                    token: candidate.token,
                    source: candidate.source,
                })
            })
            .collect();

        let policy_outcome = if violations.is_empty() {
            Outcome::Allowed
        } else {
            Outcome::Blocked
        };
        // The test-mode gate only guards execution and never hides a policy block
        let outcome = match policy_outcome {
            Outcome::Blocked => Outcome::Blocked,
            _ if self.test_mode && invocation.execute => Outcome::BlockedTestMode,
            _ => Outcome::Allowed,
        };

        debug!(
            "Decision for {:?}: {} (policy {}, {} violations)",
            invocation.argv,
            outcome.as_str(),
            policy_outcome.as_str(),
            violations.len()
        );
        Decision {
            outcome,
            policy_outcome,
            policy_enabled: self.snapshot.is_enabled(),
            test_mode: self.test_mode,
            violations,
            timestamp,
            invocation: invocation.clone(),
        }
    }

    /// Decide, then execute when allowed and requested
    pub fn run(
        &self,
        invocation: &CommandInvocation,
        executor: &dyn CommandExecutor,
        cancel: &CancellationToken,
    ) -> RunReport {
        let started = Instant::now();
        let decision = self.decide(invocation);

        let finish = |decision: Decision,
                      reason: RunReason,
                      exit_code: i32,
                      executed: bool,
                      message: String,
                      kill_report: Option<KillReport>| {
            RunReport {
                decision,
                reason,
                exit_code,
                executed,
                message,
                duration: started.elapsed(),
                kill_report,
            }
        };

        let outcome = decision.outcome;
        match outcome {
            Outcome::Blocked => {
                let entry = decision
                    .matched_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                warn!("Blocked {:?}: covered by deny entry {}", invocation.argv, entry);
                let message = format!("Blocked by policy: {}", entry);
                finish(
                    decision,
                    RunReason::BlockedByPolicy,
                    exit_code::BLOCKED_BY_POLICY,
                    false,
                    message,
                    None,
                )
            }
            Outcome::BlockedTestMode => finish(
                decision,
                RunReason::TestModeBlock,
                exit_code::BLOCKED_TEST_MODE,
                false,
                "Execution blocked by test mode".to_string(),
                None,
            ),
            Outcome::Allowed if !invocation.execute => finish(
                decision,
                RunReason::DryRun,
                exit_code::ALLOWED,
                false,
                "Allowed (dry run)".to_string(),
                None,
            ),
            Outcome::Allowed => {
                let request = ExecRequest {
                    argv: &invocation.argv,
                    cwd: &invocation.cwd,
                    timeout: invocation.timeout,
                };
                match executor.execute(&request, cancel) {
                    Ok(outcome) => {
                        let code = outcome.exit_code();
                        let kill_report = outcome.kill_report().cloned();
                        let (reason, message) = match &outcome {
                            ExecutionOutcome::TimedOut { .. } => (
                                RunReason::Timeout,
                                format!(
                                    "Timed out after {}s",
                                    invocation.timeout.map(|t| t.as_secs()).unwrap_or_default()
                                ),
                            ),
                            ExecutionOutcome::Cancelled { signal, .. } => {
                                (RunReason::Interrupted, format!("Interrupted by signal {}", signal))
                            }
                            _ => (RunReason::Executed, format!("Command exited with {}", code)),
                        };
                        info!("{}: {:?}", message, invocation.argv);
                        finish(decision, reason, code, true, message, kill_report)
                    }
                    Err(err) => {
                        let reason = match err {
                            ExecError::NotFound { .. } => RunReason::CommandNotFound,
                            _ => RunReason::SpawnFailed,
                        };
                        let code = i32::from(&LockerError::Exec(err));
                        let message = match reason {
                            RunReason::CommandNotFound => "Command not found".to_string(),
                            _ => "Command could not be started".to_string(),
                        };
                        warn!("{}: {:?}", message, invocation.argv);
                        finish(decision, reason, code, false, message, None)
                    }
                }
            }
        }
    }

    /// [`Engine::run`] plus exactly one audit record.
    ///
    /// The report's exit code is the decision's; the audit result is
    /// returned separately so the caller can surface a broken trail.
    pub fn run_audited(
        &self,
        invocation: &CommandInvocation,
        executor: &dyn CommandExecutor,
        cancel: &CancellationToken,
        audit: &AuditLog,
    ) -> (RunReport, AuditResult<AppendReceipt>) {
        let report = self.run(invocation, executor, cancel);
        let written = audit.append(&AuditEntry::from_report(&report));
        (report, written)
    }
}
