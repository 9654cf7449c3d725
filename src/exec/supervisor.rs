/// Child process launch and supervision for allowed commands
///
/// The child inherits stdio so interactive agents keep their terminal. With
/// a timeout the child gets its own process group, letting timeout and
/// cancellation take down everything it spawned; when the locker owns the
/// terminal's foreground, that group is made the foreground group for the
/// child's lifetime so terminal reads do not stop it with SIGTTIN.
use crate::config::types::{exit_code, ExecError};
use crate::exec::signal::CancellationToken;
use crate::paths::tokens::split_env_assignments;
use log::{debug, info, warn};
use nix::sys::signal::{kill, killpg, pthread_sigmask, SigSet, SigmaskHow, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Signal escalation report for timeout and cancellation paths.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillReport {
    pub term_sent: bool,
    pub kill_sent: bool,
    pub waited_ms: u64,
    pub notes: Vec<String>,
}

/// What to launch
#[derive(Debug, Clone, Copy)]
pub struct ExecRequest<'a> {
    /// May start with `NAME=value` assignments
    pub argv: &'a [String],
    pub cwd: &'a Path,
    pub timeout: Option<Duration>,
}

/// How a launched child ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Exited { code: i32 },
    Signaled { signal: i32 },
    TimedOut { kill_report: KillReport },
    Cancelled { signal: i32, kill_report: KillReport },
}

impl ExecutionOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecutionOutcome::Exited { code } => *code,
            ExecutionOutcome::Signaled { signal } => exit_code::from_signal(*signal),
            ExecutionOutcome::TimedOut { .. } => exit_code::TIMED_OUT,
            ExecutionOutcome::Cancelled { signal, .. } => exit_code::from_signal(*signal),
        }
    }

    pub fn kill_report(&self) -> Option<&KillReport> {
        match self {
            ExecutionOutcome::TimedOut { kill_report }
            | ExecutionOutcome::Cancelled { kill_report, .. } => Some(kill_report),
            _ => None,
        }
    }

    fn from_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ExecutionOutcome::Exited { code },
            (None, Some(signal)) => ExecutionOutcome::Signaled { signal },
            (None, None) => ExecutionOutcome::Exited {
                code: exit_code::INTERNAL,
            },
        }
    }
}

/// Seam between the decision engine and the operating system
pub trait CommandExecutor {
    fn execute(
        &self,
        request: &ExecRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, ExecError>;
}

#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    kill_grace: Duration,
    poll_interval: Duration,
}

impl ProcessSupervisor {
    pub fn new(kill_grace: Duration) -> Self {
        Self {
            kill_grace,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn spawn(&self, request: &ExecRequest<'_>, claim_terminal: bool) -> Result<Child, ExecError> {
        let (env, command) = split_env_assignments(request.argv);
        let Some((program, args)) = command.split_first() else {
            return Err(ExecError::EmptyCommand);
        };

        let mut cmd = Command::new(program);
        cmd.args(args).envs(env).current_dir(request.cwd);
        if request.timeout.is_some() {
            cmd.process_group(0);
            if claim_terminal {
                // SAFETY: only async-signal-safe calls between fork and exec
                unsafe {
                    cmd.pre_exec(|| {
                        // A background group must ignore SIGTTOU to take the terminal
                        let previous = libc::signal(libc::SIGTTOU, libc::SIG_IGN);
                        libc::tcsetpgrp(libc::STDIN_FILENO, libc::getpgrp());
                        libc::signal(libc::SIGTTOU, previous);
                        Ok(())
                    });
                }
            }
        }

        cmd.spawn().map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => ExecError::NotFound {
                program: program.clone(),
            },
            _ => ExecError::Spawn {
                program: program.clone(),
                source,
            },
        })
    }

    /// SIGTERM, wait up to the grace period, then SIGKILL
    fn terminate(&self, child: &mut Child, own_group: bool) -> KillReport {
        let mut report = KillReport::default();
        let start = Instant::now();
        let pid = Pid::from_raw(child.id() as i32);

        report.term_sent = send(pid, own_group, Signal::SIGTERM, &mut report.notes);

        let deadline = start + self.kill_grace;
        let mut exited = false;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = child.try_wait() {
                exited = true;
                break;
            }
            std::thread::sleep(self.poll_interval);
        }

        if !exited {
            report.kill_sent = send(pid, own_group, Signal::SIGKILL, &mut report.notes);
        }
        if own_group && exited {
            // Leader is gone; sweep stragglers still holding the group
            let _ = killpg(pid, Signal::SIGKILL);
        }
        if let Err(e) = child.wait() {
            report.notes.push(format!("wait after termination failed: {}", e));
        }

        report.waited_ms = start.elapsed().as_millis() as u64;
        report
    }
}

/// True when stdin is a terminal whose foreground group is ours
fn holds_terminal_foreground() -> bool {
    if !std::io::stdin().is_terminal() {
        return false;
    }
    // SAFETY: plain queries on the stdin descriptor
    unsafe { libc::tcgetpgrp(libc::STDIN_FILENO) == libc::getpgrp() }
}

/// Foreground terminal group handed to a child; returned to the locker on drop
struct ForegroundGuard {
    saved: libc::pid_t,
}

impl ForegroundGuard {
    fn hand_to(child_group: libc::pid_t) -> Self {
        // SAFETY: stdin is a terminal we hold the foreground of
        let (saved, rc) = unsafe {
            (
                libc::getpgrp(),
                libc::tcsetpgrp(libc::STDIN_FILENO, child_group),
            )
        };
        if rc == -1 {
            // The child claims it itself before exec; this only matters on a race
            debug!(
                "Terminal handover to group {} failed: {}",
                child_group,
                std::io::Error::last_os_error()
            );
        }
        Self { saved }
    }
}

impl Drop for ForegroundGuard {
    fn drop(&mut self) {
        // Now in the background: SIGTTOU must be blocked to take the terminal back
        let mut ttou = SigSet::empty();
        ttou.add(Signal::SIGTTOU);
        let mut previous = SigSet::empty();
        let blocked = pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&ttou), Some(&mut previous));
        // SAFETY: restores the group recorded in `hand_to`
        if unsafe { libc::tcsetpgrp(libc::STDIN_FILENO, self.saved) } == -1 {
            warn!(
                "Could not restore terminal foreground: {}",
                std::io::Error::last_os_error()
            );
        }
        if blocked.is_ok() {
            let _ = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&previous), None);
        }
    }
}

fn send(pid: Pid, own_group: bool, sig: Signal, notes: &mut Vec<String>) -> bool {
    if own_group {
        match killpg(pid, sig) {
            Ok(()) => return true,
            Err(e) => notes.push(format!("group {} fallback used: {}", sig, e)),
        }
    }
    match kill(pid, sig) {
        Ok(()) => true,
        Err(e) => {
            notes.push(format!("{} to pid {} failed: {}", sig, pid, e));
            false
        }
    }
}

impl CommandExecutor for ProcessSupervisor {
    fn execute(
        &self,
        request: &ExecRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, ExecError> {
        let own_group = request.timeout.is_some();
        let claim_terminal = own_group && holds_terminal_foreground();
        let mut child = self.spawn(request, claim_terminal)?;
        let pid = child.id();
        let started = Instant::now();
        let _terminal = claim_terminal.then(|| ForegroundGuard::hand_to(pid as libc::pid_t));
        debug!("Spawned child {} (own process group: {})", pid, own_group);

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let outcome = ExecutionOutcome::from_status(status);
                    debug!("Child {} finished: {:?}", pid, outcome);
                    return Ok(outcome);
                }
                Ok(None) => {}
                Err(e) => {
                    return Err(ExecError::Wait {
                        pid,
                        message: e.to_string(),
                    })
                }
            }

            if let Some(signal) = cancel.cancelled_by() {
                warn!("Cancelling child {} after signal {}", pid, signal);
                let kill_report = self.terminate(&mut child, own_group);
                return Ok(ExecutionOutcome::Cancelled {
                    signal,
                    kill_report,
                });
            }

            if let Some(limit) = request.timeout {
                if started.elapsed() >= limit {
                    info!("Child {} exceeded timeout of {:?}", pid, limit);
                    let kill_report = self.terminate(&mut child, own_group);
                    return Ok(ExecutionOutcome::TimedOut { kill_report });
                }
            }

            std::thread::sleep(self.poll_interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn run(args: &[&str], timeout: Option<Duration>) -> Result<ExecutionOutcome, ExecError> {
        let argv = argv(args);
        let cwd = std::env::temp_dir();
        ProcessSupervisor::new(Duration::from_millis(200)).execute(
            &ExecRequest {
                argv: &argv,
                cwd: &cwd,
                timeout,
            },
            &CancellationToken::new(),
        )
    }

    #[test]
    fn exit_code_passes_through() {
        let outcome = run(&["sh", "-c", "exit 7"], None).unwrap();
        assert_eq!(outcome, ExecutionOutcome::Exited { code: 7 });
        assert_eq!(outcome.exit_code(), 7);
    }

    #[test]
    fn env_assignments_reach_the_child() {
        let outcome = run(&["CODE=3", "sh", "-c", "exit $CODE"], None).unwrap();
        assert_eq!(outcome.exit_code(), 3);
    }

    #[test]
    fn missing_program_is_not_found() {
        let err = run(&["agent-locker-no-such-program-xyz"], None).unwrap_err();
        assert!(matches!(err, ExecError::NotFound { .. }));
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(run(&[], None), Err(ExecError::EmptyCommand)));
        assert!(matches!(run(&["X=1"], None), Err(ExecError::EmptyCommand)));
    }

    #[test]
    fn timeout_terminates_the_group() {
        let started = Instant::now();
        let outcome = run(&["sleep", "5"], Some(Duration::from_millis(100))).unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(outcome.exit_code(), exit_code::TIMED_OUT);
        let report = outcome.kill_report().unwrap();
        assert!(report.term_sent);
    }

    #[test]
    fn cancellation_reports_the_signal() {
        let argv = argv(&["sleep", "5"]);
        let cwd = std::env::temp_dir();
        let token = CancellationToken::new();
        token.cancel(libc::SIGINT);
        let outcome = ProcessSupervisor::new(Duration::from_millis(200))
            .execute(
                &ExecRequest {
                    argv: &argv,
                    cwd: &cwd,
                    timeout: None,
                },
                &token,
            )
            .unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Cancelled { signal, .. } if signal == libc::SIGINT));
        assert_eq!(outcome.exit_code(), 130);
    }

    #[test]
    fn signal_exits_map_to_128_plus_signal() {
        let outcome = run(&["sh", "-c", "kill -9 $$"], None).unwrap();
        assert_eq!(outcome, ExecutionOutcome::Signaled { signal: 9 });
        assert_eq!(outcome.exit_code(), 137);
    }
}
