//! Observability
//!
//! Durable audit trail of every decision.

pub mod audit;
