//! Path canonicalization for deny-entry comparison.
//!
//! Canonical forms are purely lexical: `~` is expanded, relative paths are
//! joined onto the declared base directory, `.`/`..` and repeated separators
//! are collapsed. The filesystem is never consulted, so paths an agent has
//! not created yet still canonicalize, and symlinks are compared by the name
//! given rather than by their target.
//!
//! A token that cannot be resolved (unknown `~user`, embedded NUL, missing
//! home directory) is never dropped: it degrades to a *literal* canonical
//! form that is still compared against every deny entry.

use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// How path components are compared against deny entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseSensitivity {
    Sensitive,
    Insensitive,
}

impl CaseSensitivity {
    /// macOS default volumes are case-insensitive; everything else is exact.
    pub fn host_default() -> Self {
        if cfg!(target_os = "macos") {
            CaseSensitivity::Insensitive
        } else {
            CaseSensitivity::Sensitive
        }
    }
}

/// A canonicalized path plus the key used for comparisons
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalPath {
    path: PathBuf,
    key: PathBuf,
    literal: bool,
}

impl CanonicalPath {
    /// The canonical path as reported to operators
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// Comparison key (case-folded when the host policy requires it)
    pub fn key(&self) -> &Path {
        &self.key
    }

    /// True when canonicalization failed and the token is compared as written
    pub fn is_literal(&self) -> bool {
        self.literal
    }

    /// Number of path components, used to rank deny entries by specificity
    pub fn depth(&self) -> usize {
        self.key.components().count()
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

#[derive(Error, Debug)]
enum Unresolvable {
    #[error("empty token")]
    Empty,
    #[error("embedded NUL byte")]
    NulByte,
    #[error("home directory is unknown")]
    NoHome,
    #[error("unknown user {0:?}")]
    UnknownUser(String),
    #[error("user lookup failed for {user:?}: {errno}")]
    Lookup { user: String, errno: nix::errno::Errno },
}

/// Turns raw tokens into [`CanonicalPath`]s
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    home: Option<PathBuf>,
    case: CaseSensitivity,
}

impl Canonicalizer {
    /// Canonicalizer for the invoking user
    pub fn new(case: CaseSensitivity) -> Self {
        Self {
            home: dirs::home_dir(),
            case,
        }
    }

    /// Override the home directory used for `~` expansion
    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    pub fn case_sensitivity(&self) -> CaseSensitivity {
        self.case
    }

    /// Canonicalize `raw`, resolving relative forms against `base`.
    ///
    /// Never fails: unresolvable tokens come back as literal forms.
    pub fn canonicalize(&self, raw: &str, base: &Path) -> CanonicalPath {
        match self.resolve(raw, base) {
            Ok(path) => self.finish(path, false),
            Err(reason) => {
                debug!("Comparing {:?} literally: {}", raw, reason);
                self.finish(normalize_lexically(Path::new(raw)), true)
            }
        }
    }

    fn resolve(&self, raw: &str, base: &Path) -> Result<PathBuf, Unresolvable> {
        if raw.is_empty() {
            return Err(Unresolvable::Empty);
        }
        if raw.contains('\0') {
            return Err(Unresolvable::NulByte);
        }

        let path = match self.expand_tilde(raw)? {
            Some(expanded) => expanded,
            None => PathBuf::from(raw),
        };
        let absolute = if path.is_absolute() {
            path
        } else {
            base.join(path)
        };
        Ok(normalize_lexically(&absolute))
    }

    /// Expand a leading `~` or `~user`; `Ok(None)` when there is none
    fn expand_tilde(&self, raw: &str) -> Result<Option<PathBuf>, Unresolvable> {
        let Some(rest) = raw.strip_prefix('~') else {
            return Ok(None);
        };
        let (user, tail) = match rest.find('/') {
            Some(idx) => (&rest[..idx], rest[idx + 1..].trim_start_matches('/')),
            None => (rest, ""),
        };

        let home = if user.is_empty() {
            self.home.clone().ok_or(Unresolvable::NoHome)?
        } else {
            match nix::unistd::User::from_name(user) {
                Ok(Some(account)) => account.dir,
                Ok(None) => return Err(Unresolvable::UnknownUser(user.to_string())),
                Err(errno) => {
                    return Err(Unresolvable::Lookup {
                        user: user.to_string(),
                        errno,
                    })
                }
            }
        };

        if tail.is_empty() {
            Ok(Some(home))
        } else {
            Ok(Some(home.join(tail)))
        }
    }

    fn finish(&self, path: PathBuf, literal: bool) -> CanonicalPath {
        let key = match self.case {
            CaseSensitivity::Sensitive => path.clone(),
            CaseSensitivity::Insensitive => PathBuf::from(path.to_string_lossy().to_lowercase()),
        };
        CanonicalPath { path, key, literal }
    }
}

/// Collapse `.`, `..` and repeated separators without touching the filesystem.
///
/// `..` never climbs above the root of an absolute path.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                let last = out.components().next_back();
                match last {
                    Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                    Some(Component::Normal(_)) => {
                        out.pop();
                    }
                    _ => out.push(".."),
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}
