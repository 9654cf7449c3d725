//! Safety
//!
//! Cross-process mutual exclusion through advisory file locks.

pub mod file_lock;
