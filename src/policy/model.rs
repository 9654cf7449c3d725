//! In-memory deny policy and its per-invocation canonical snapshot.
use crate::paths::canonicalize::{CanonicalPath, Canonicalizer};
use crate::policy::matcher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

fn default_enabled() -> bool {
    true
}

/// Persisted deny policy: the enabled toggle plus raw deny entries.
///
/// Entries are kept as written (`~/.ssh` stays `~/.ssh`); duplicates collapse
/// and order carries no meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub deny_paths: BTreeSet<String>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            enabled: true,
            deny_paths: BTreeSet::new(),
        }
    }
}

impl Policy {
    pub fn new<I, S>(enabled: bool, deny_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled,
            deny_paths: deny_paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Returns false when the entry was already present
    pub fn add(&mut self, entry: impl Into<String>) -> bool {
        self.deny_paths.insert(entry.into())
    }

    /// Add `raw` in resolved form unless some entry already resolves to the
    /// same path. Returns false when nothing was added.
    pub fn add_resolved(&mut self, raw: &str, canonicalizer: &Canonicalizer, base_dir: &Path) -> bool {
        let entry = canonicalizer.canonicalize(raw, base_dir);
        let present = self
            .deny_paths
            .iter()
            .any(|existing| canonicalizer.canonicalize(existing, base_dir).key() == entry.key());
        if present {
            return false;
        }
        self.add(entry.as_path().display().to_string())
    }

    /// Remove every entry resolving to the same path as `raw`, however it
    /// was written (`~/.ssh`, `/home/me/.ssh/`, ...). Returns the count removed.
    pub fn remove_resolved(&mut self, raw: &str, canonicalizer: &Canonicalizer, base_dir: &Path) -> usize {
        let target = canonicalizer.canonicalize(raw, base_dir);
        let before = self.deny_paths.len();
        self.deny_paths
            .retain(|existing| canonicalizer.canonicalize(existing, base_dir).key() != target.key());
        before - self.deny_paths.len()
    }

    /// Canonicalize every entry once for this invocation.
    ///
    /// Relative entries resolve against `base_dir` (the policy file's
    /// directory). The snapshot is never refreshed mid-decision.
    pub fn snapshot(&self, canonicalizer: &Canonicalizer, base_dir: &Path) -> PolicySnapshot {
        let mut seen = BTreeSet::new();
        let entries = self
            .deny_paths
            .iter()
            .map(|raw| canonicalizer.canonicalize(raw, base_dir))
            .filter(|entry| seen.insert(entry.key().to_path_buf()))
            .collect();
        PolicySnapshot {
            enabled: self.enabled,
            entries,
        }
    }
}

/// Immutable view of the policy used by one decision
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    enabled: bool,
    entries: Vec<CanonicalPath>,
}

impl PolicySnapshot {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Canonical deny entries, computed once per load
    pub fn deny_entries(&self) -> &[CanonicalPath] {
        &self.entries
    }

    /// Most specific entry covering `candidate`; always `None` when disabled
    pub fn matching_entry(&self, candidate: &CanonicalPath) -> Option<&CanonicalPath> {
        if !self.enabled {
            return None;
        }
        matcher::find_match(candidate, &self.entries)
    }
}
