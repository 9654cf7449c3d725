//! Execution control
//!
//! Launches allowed commands and supervises them until exit, timeout or
//! cancellation.

pub mod signal;
pub mod supervisor;

pub use signal::{CancellationToken, SignalHandler};
pub use supervisor::{CommandExecutor, ExecRequest, ExecutionOutcome, KillReport, ProcessSupervisor};
