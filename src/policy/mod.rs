//! Deny policy
//!
//! Policy model, segment-aware matching, and JSON persistence.

pub mod matcher;
pub mod model;
pub mod storage;

pub use model::{Policy, PolicySnapshot};
