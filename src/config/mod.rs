//! Configuration
//!
//! Runtime settings, error types and the exit-code table.

pub mod settings;
pub mod types;
