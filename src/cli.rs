use crate::config::settings::Settings;
use crate::config::types::{exit_code, LockerError};
use crate::decision::{CommandInvocation, Engine, Outcome, RunReport};
use crate::exec::{CancellationToken, ProcessSupervisor, SignalHandler};
use crate::observability::audit::AuditLog;
use crate::paths::canonicalize::{normalize_lexically, Canonicalizer};
use crate::policy::storage::{load_policy, policy_base_dir, save_policy, write_default_policy};
use crate::policy::Policy;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "agent-locker", author, version, about = "Deny-path guard for agent CLIs", long_about = None)]
struct Cli {
    /// Policy JSON path
    #[arg(long, global = true, env = "AGENT_LOCKER_POLICY", value_name = "PATH")]
    policy: Option<PathBuf>,
    /// Audit log path
    #[arg(long, global = true, env = "AGENT_LOCKER_AUDIT_LOG", value_name = "PATH")]
    audit_log: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the default policy file
    Init {
        /// Overwrite an existing policy
        #[arg(long)]
        force: bool,
    },
    /// Print the policy JSON
    Show,
    /// Edit the deny-path policy
    Policy {
        #[command(subcommand)]
        action: PolicyCommand,
    },
    /// Check a command against the policy and optionally run it
    Run {
        /// Actually execute the command (dry run otherwise)
        #[arg(long)]
        execute: bool,
        /// Working directory (defaults to the current directory)
        #[arg(long, value_name = "PATH")]
        cwd: Option<PathBuf>,
        /// Terminate the command after N seconds
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
        timeout_sec: Option<u64>,
        /// Command to launch, after `--`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
        command: Vec<String>,
    },
    /// Check whether paths are covered by the deny list
    Check {
        /// Directory relative paths resolve against
        #[arg(long, value_name = "PATH")]
        cwd: Option<PathBuf>,
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<String>,
    },
    /// Inspect the audit log
    Audit {
        #[command(subcommand)]
        action: AuditCommand,
    },
}

#[derive(Subcommand)]
enum PolicyCommand {
    /// Show whether protection is on and how many entries exist
    Status,
    /// List deny paths
    List,
    /// Enable deny-path protection
    On,
    /// Disable deny-path protection
    Off,
    /// Add deny paths
    Add {
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Remove deny paths
    Remove {
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum AuditCommand {
    /// Print the newest audit records
    Tail {
        #[arg(long, default_value_t = 20)]
        lines: usize,
    },
}

fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .try_init();
}

/// Entry point for the `agent-locker` binary; returns the process exit code
pub fn run() -> i32 {
    run_from(std::env::args_os())
}

pub fn run_from<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    init_logging();

    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return err.exit_code();
        }
    };

    let settings = Settings::from_env()
        .with_policy_path(cli.policy.map(|p| absolutize(&p)))
        .with_audit_log_path(cli.audit_log.map(|p| absolutize(&p)));

    match dispatch(cli.command, &settings) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            err.downcast_ref::<LockerError>()
                .map(i32::from)
                .unwrap_or(exit_code::INTERNAL)
        }
    }
}

fn dispatch(command: Commands, settings: &Settings) -> Result<i32> {
    match command {
        Commands::Init { force } => {
            let written = write_default_policy(&settings.policy_path, force)
                .map_err(LockerError::from)?;
            if written {
                println!("Policy ready: {}", settings.policy_path.display());
            } else {
                println!(
                    "Policy kept: {} (use --force to overwrite)",
                    settings.policy_path.display()
                );
            }
            Ok(exit_code::ALLOWED)
        }
        Commands::Show => {
            let policy = load(settings)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&policy).context("cannot render policy")?
            );
            Ok(exit_code::ALLOWED)
        }
        Commands::Policy { action } => handle_policy_command(action, settings),
        Commands::Run {
            execute,
            cwd,
            timeout_sec,
            command,
        } => run_command(settings, execute, cwd, timeout_sec, command),
        Commands::Check { cwd, paths } => check_paths(settings, cwd, &paths),
        Commands::Audit {
            action: AuditCommand::Tail { lines },
        } => {
            let audit = AuditLog::new(&settings.audit_log_path).with_lock_timeout(settings.lock_timeout);
            let entries = audit.tail(lines).map_err(LockerError::from)?;
            for entry in entries {
                println!("{}", serde_json::to_string(&entry).context("cannot render audit record")?);
            }
            Ok(exit_code::ALLOWED)
        }
    }
}

fn load(settings: &Settings) -> Result<Policy> {
    Ok(load_policy(&settings.policy_path).map_err(LockerError::from)?)
}

fn enabled_label(policy: &Policy) -> &'static str {
    if policy.is_enabled() {
        "on"
    } else {
        "off"
    }
}

fn handle_policy_command(action: PolicyCommand, settings: &Settings) -> Result<i32> {
    let mut policy = load(settings)?;
    let base_dir = policy_base_dir(&settings.policy_path);
    let canonicalizer = Canonicalizer::new(settings.case_sensitivity);

    match action {
        PolicyCommand::Status => {
            println!("enabled: {}", enabled_label(&policy));
            println!("deny_paths: {}", policy.deny_paths.len());
            return Ok(exit_code::ALLOWED);
        }
        PolicyCommand::List => {
            println!("enabled: {}", enabled_label(&policy));
            for path in &policy.deny_paths {
                println!("{}", path);
            }
            return Ok(exit_code::ALLOWED);
        }
        PolicyCommand::On => policy.set_enabled(true),
        PolicyCommand::Off => policy.set_enabled(false),
        PolicyCommand::Add { paths } => {
            for raw in paths {
                if !policy.add_resolved(&raw, &canonicalizer, &base_dir) {
                    info!("Deny path already present: {}", raw);
                }
            }
        }
        PolicyCommand::Remove { paths } => {
            for raw in paths {
                if policy.remove_resolved(&raw, &canonicalizer, &base_dir) == 0 {
                    warn!("Deny path not present: {}", raw);
                }
            }
        }
    }

    save_policy(&settings.policy_path, &policy)
        .map_err(LockerError::from)
        .with_context(|| format!("cannot update {}", settings.policy_path.display()))?;
    println!("enabled: {}", enabled_label(&policy));
    for path in &policy.deny_paths {
        println!("{}", path);
    }
    Ok(exit_code::ALLOWED)
}

/// Absolute, lexically normalized form of `path`
fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize_lexically(path);
    }
    match std::env::current_dir() {
        Ok(cwd) => normalize_lexically(&cwd.join(path)),
        Err(_) => normalize_lexically(path),
    }
}

fn resolve_cwd(cwd: Option<PathBuf>) -> Result<PathBuf> {
    let cwd = match cwd {
        Some(cwd) => absolutize(&cwd),
        None => std::env::current_dir().context("cannot determine the current directory")?,
    };
    if !cwd.exists() {
        return Err(LockerError::Validation(format!(
            "Working directory was not found: {}",
            cwd.display()
        ))
        .into());
    }
    if !cwd.is_dir() {
        return Err(LockerError::Validation(format!(
            "Working directory is not a directory: {}",
            cwd.display()
        ))
        .into());
    }
    Ok(cwd)
}

fn build_engine(settings: &Settings, policy: &Policy) -> Engine {
    Engine::from_policy(
        policy,
        &policy_base_dir(&settings.policy_path),
        Canonicalizer::new(settings.case_sensitivity),
    )
    .with_test_mode(settings.test_mode)
}

fn run_command(
    settings: &Settings,
    execute: bool,
    cwd: Option<PathBuf>,
    timeout_sec: Option<u64>,
    command: Vec<String>,
) -> Result<i32> {
    if command.is_empty() {
        return Err(LockerError::Validation(
            "Command is required. Example: agent-locker run -- codex".to_string(),
        )
        .into());
    }
    let cwd = resolve_cwd(cwd)?;
    let policy = load(settings)?;
    let engine = build_engine(settings, &policy);

    let invocation = CommandInvocation::new(command, cwd)
        .with_execute(execute)
        .with_timeout(timeout_sec.map(Duration::from_secs));

    let cancel = if execute {
        match SignalHandler::install() {
            Ok(handler) => handler.token(),
            Err(e) => {
                warn!("Running without signal cancellation: {}", e);
                CancellationToken::new()
            }
        }
    } else {
        CancellationToken::new()
    };

    let supervisor = ProcessSupervisor::new(settings.kill_grace);
    let audit = AuditLog::new(&settings.audit_log_path).with_lock_timeout(settings.lock_timeout);
    let (report, written) = engine.run_audited(&invocation, &supervisor, &cancel, &audit);

    print_report(&report);

    match written {
        Ok(receipt) => {
            if receipt.rotated {
                info!("Audit log rotated: {}", audit.path().display());
            }
            Ok(report.exit_code)
        }
        Err(e) => {
            error!("Audit record for {:?} was not written: {}", invocation.argv, e);
            eprintln!("audit_error: {}", e);
            if e.is_lock_timeout() {
                Ok(exit_code::AUDIT_LOCK_TIMEOUT)
            } else {
                Ok(report.exit_code)
            }
        }
    }
}

fn print_report(report: &RunReport) {
    println!("{}", report.message);
    let decision = &report.decision;
    if decision.outcome == Outcome::Blocked {
        for path in decision.blocked_paths() {
            println!("blocked_path:{}", path);
        }
        for entry in decision.hit_entries() {
            println!("deny_entry:{}", entry);
        }
    }
    if !decision.policy_enabled {
        println!("policy: disabled");
    }
}

fn check_paths(settings: &Settings, cwd: Option<PathBuf>, paths: &[String]) -> Result<i32> {
    let cwd = resolve_cwd(cwd)?;
    let policy = load(settings)?;
    let canonicalizer = Canonicalizer::new(settings.case_sensitivity);
    let snapshot = policy.snapshot(&canonicalizer, &policy_base_dir(&settings.policy_path));

    let mut blocked = false;
    for raw in paths {
        let candidate = canonicalizer.canonicalize(raw, &cwd);
        if snapshot.matching_entry(&candidate).is_some() {
            blocked = true;
            println!("blocked_path:{}", candidate);
        } else {
            println!("allowed:{}", candidate);
        }
    }

    Ok(if blocked {
        exit_code::BLOCKED_BY_POLICY
    } else {
        exit_code::ALLOWED
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_collects_trailing_command() {
        let cli = Cli::try_parse_from([
            "agent-locker",
            "run",
            "--execute",
            "--timeout-sec",
            "3",
            "--",
            "codex",
            "--model",
            "gpt-5",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                execute,
                timeout_sec,
                command,
                ..
            } => {
                assert!(execute);
                assert_eq!(timeout_sec, Some(3));
                assert_eq!(command, vec!["codex", "--model", "gpt-5"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(Cli::try_parse_from(["agent-locker", "run", "--timeout-sec", "0", "--", "ls"]).is_err());
        assert!(Cli::try_parse_from(["agent-locker", "run", "--timeout-sec", "x", "--", "ls"]).is_err());
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = Cli::try_parse_from(["agent-locker", "policy", "list", "--policy", "/tmp/p.json"])
            .unwrap();
        assert_eq!(cli.policy, Some(PathBuf::from("/tmp/p.json")));
    }

    #[test]
    fn absolutize_normalizes_relative_paths() {
        let abs = absolutize(Path::new("a/../b"));
        assert!(abs.is_absolute());
        assert!(abs.ends_with("b"));
    }
}
