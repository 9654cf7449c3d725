//! Deny-entry matching.
//!
//! A candidate is covered by an entry iff it equals the entry or lies
//! beneath it on a path-segment boundary: `/Users/me/.ssh` covers
//! `/Users/me/.ssh/id_rsa` but not `/Users/me/.ssh2`. Comparison runs on
//! [`Path`] components, never on raw string prefixes.

use crate::paths::canonicalize::CanonicalPath;

/// True when `entry` covers `candidate`
pub fn covers(entry: &CanonicalPath, candidate: &CanonicalPath) -> bool {
    candidate.key().starts_with(entry.key())
}

/// The most specific entry covering `candidate`, if any.
///
/// Any match blocks; picking the deepest entry only sharpens what the audit
/// trail reports.
pub fn find_match<'a>(
    candidate: &CanonicalPath,
    entries: &'a [CanonicalPath],
) -> Option<&'a CanonicalPath> {
    entries
        .iter()
        .filter(|entry| covers(entry, candidate))
        .max_by_key(|entry| entry.depth())
}
