//! Paths
//!
//! Canonicalization of candidate paths and extraction of path-like tokens.

pub mod canonicalize;
pub mod tokens;

pub use canonicalize::{CanonicalPath, CaseSensitivity, Canonicalizer};
pub use tokens::{Candidate, CandidateSource, ExecutableResolver, SearchPathResolver, TokenScanner};
