//! Policy persistence: a JSON object with `enabled` and `deny_paths`.
//!
//! Saves go through a temp file and `rename` so a reader never sees a
//! half-written policy. Concurrent `policy add`/`remove` calls are not
//! serialized here; the last writer wins.

use crate::config::types::{PolicyError, PolicyResult};
use crate::policy::model::Policy;
use log::{debug, info};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Entries written by `init`
pub const DEFAULT_DENY_PATHS: &[&str] = &["~/.ssh", "~/.aws", "~/.gnupg", "~/Library/Keychains"];

pub fn default_policy() -> Policy {
    Policy::new(true, DEFAULT_DENY_PATHS.iter().copied())
}

/// Directory that relative deny entries resolve against
pub fn policy_base_dir(policy_path: &Path) -> PathBuf {
    match policy_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

pub fn load_policy(path: &Path) -> PolicyResult<Policy> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PolicyError::NotFound {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(PolicyError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|source| PolicyError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    if !value.is_object() {
        return Err(PolicyError::Invalid(
            "Policy file must contain a JSON object".to_string(),
        ));
    }
    let policy: Policy = serde_json::from_value(value)
        .map_err(|e| PolicyError::Invalid(format!("{}: {}", path.display(), e)))?;
    debug!(
        "Loaded policy from {} ({} deny entries, enabled={})",
        path.display(),
        policy.deny_paths.len(),
        policy.enabled
    );
    Ok(policy)
}

pub fn save_policy(path: &Path, policy: &Policy) -> PolicyResult<()> {
    let io_err = |source| PolicyError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let mut body = serde_json::to_string_pretty(policy)
        .map_err(|e| PolicyError::Invalid(format!("cannot serialize policy: {}", e)))?;
    body.push('\n');

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "policy.json".to_string());
    let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()));

    let write_tmp = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(body.as_bytes())?;
        file.sync_all()
    };
    if let Err(e) = write_tmp() {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(e));
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        io_err(e)
    })?;

    info!("Saved policy to {}", path.display());
    Ok(())
}

/// Write the default policy. An existing non-empty file is kept unless
/// `overwrite`; returns whether a file was written.
pub fn write_default_policy(path: &Path, overwrite: bool) -> PolicyResult<bool> {
    if !overwrite {
        if let Ok(meta) = fs::metadata(path) {
            if meta.len() > 0 {
                return Ok(false);
            }
        }
    }
    save_policy(path, &default_policy())?;
    Ok(true)
}
