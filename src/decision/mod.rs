//! Decision engine
//!
//! Turns a command invocation and a policy snapshot into an allow/block
//! verdict, then runs or refuses the command.

pub mod engine;
pub mod types;

pub use engine::Engine;
pub use types::{CommandInvocation, Decision, Outcome, RunReason, RunReport, Violation};
