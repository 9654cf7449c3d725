//! agent-locker: a pre-execution deny-path guard for AI agent CLIs
//!
//! Every agent command is checked against an operator-maintained deny list
//! before it may run. Any path the command would touch (working directory,
//! executable, path-like arguments) that falls inside a deny entry blocks
//! the run; every verdict is appended to a rotating audit log.
//!
//! # Architecture
//!
//! ## Paths ([`paths`])
//! - [`paths::canonicalize`]: lexical canonicalization, `~` expansion, case folding
//! - [`paths::tokens`]: path-like token extraction from argv
//!
//! ## Policy ([`policy`])
//! - [`policy::model`]: deny list, enabled toggle, per-invocation snapshot
//! - [`policy::matcher`]: segment-boundary matching
//! - [`policy::storage`]: JSON persistence and the default policy
//!
//! ## Decision ([`decision`])
//! - [`decision::engine`]: `decide`, `run`, `run_audited`
//! - [`decision::types`]: invocation, decision and run report values
//!
//! ## Execution Control ([`exec`])
//! - [`exec::supervisor`]: child spawn, timeout, group termination
//! - [`exec::signal`]: signal-driven cancellation
//!
//! ## Safety ([`safety`])
//! - [`safety::file_lock`]: bounded-wait advisory locks
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: append-only rotating audit log
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: error enums and the exit-code table
//! - [`config::settings`]: paths and environment tunables
//!
//! # Design Principles
//!
//! 1. **No filesystem trust** - Canonicalization is lexical; nothing is
//!    required to exist
//! 2. **Segments, not strings** - Matching compares path components
//! 3. **Explicit policy** - One snapshot per invocation, passed by value
//! 4. **Every verdict audited** - One record per decision, or a loud failure

// Configuration
pub mod config;

// Path handling
pub mod paths;

// Deny policy
pub mod policy;

// Decision engine
pub mod decision;

// Execution Control
pub mod exec;

// Safety
pub mod safety;

// Observability
pub mod observability;

// CLI entrypoint wiring for the agent-locker binary.
pub mod cli;

pub use config::types::{exit_code, LockerError, Result};
