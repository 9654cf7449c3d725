/// Append-only, rotating audit trail of every decision
///
/// One JSON object per line. Writers serialize through an exclusive lock on
/// `<log>.lock`; rotation and append happen inside the same critical
/// section, so a reader holding the shared lock never sees a rotated log
/// without its fresh successor or a record split across generations.
use crate::config::types::{AuditError, AuditResult};
use crate::decision::types::{Outcome, RunReason, RunReport};
use crate::exec::supervisor::KillReport;
use crate::safety::file_lock::{self, LockMode};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Rotate once the live log reaches this size
pub const DEFAULT_MAX_BYTES: u64 = 2 * 1024 * 1024;
/// Rotated generations kept beside the live log
pub const DEFAULT_GENERATIONS: usize = 3;
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub pid: u32,
    pub outcome: Outcome,
    pub policy_outcome: Outcome,
    pub policy_enabled: bool,
    pub test_mode: bool,
    pub reason: RunReason,
    pub executed: bool,
    pub exit_code: i32,
    pub matched_path: Option<String>,
    pub blocked_paths: Vec<String>,
    pub command: Vec<String>,
    pub command_text: String,
    pub cwd: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_report: Option<KillReport>,
}

impl AuditEntry {
    pub fn from_report(report: &RunReport) -> Self {
        let decision = &report.decision;
        Self {
            timestamp: decision.timestamp,
            run_id: Uuid::new_v4().to_string(),
            pid: std::process::id(),
            outcome: decision.outcome,
            policy_outcome: decision.policy_outcome,
            policy_enabled: decision.policy_enabled,
            test_mode: decision.test_mode,
            reason: report.reason,
            executed: report.executed,
            exit_code: report.exit_code,
            matched_path: decision.matched_path().map(|p| p.display().to_string()),
            blocked_paths: decision.blocked_paths(),
            command: decision.invocation.argv.clone(),
            command_text: decision.invocation.command_text(),
            cwd: decision.invocation.cwd.display().to_string(),
            duration_ms: report.duration.as_millis() as u64,
            kill_report: report.kill_report.clone(),
        }
    }
}

/// Result of a successful append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendReceipt {
    pub rotated: bool,
    pub bytes_written: u64,
}

/// Handle on the audit log file and its rotated generations
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
    max_bytes: u64,
    generations: usize,
    lock_timeout: Duration,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_bytes: DEFAULT_MAX_BYTES,
            generations: DEFAULT_GENERATIONS,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_generations(mut self, generations: usize) -> Self {
        self.generations = generations;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        self.suffixed("lock")
    }

    /// `audit.log.N`; generation 0 is the live log
    pub fn generation_path(&self, generation: usize) -> PathBuf {
        if generation == 0 {
            self.path.clone()
        } else {
            self.suffixed(&generation.to_string())
        }
    }

    fn suffixed(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".");
        name.push(suffix);
        PathBuf::from(name)
    }

    fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> AuditError + '_ {
        move |source| AuditError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Append one record, rotating first when the live log is full.
    ///
    /// Nothing is written when the lock cannot be acquired in time.
    pub fn append(&self, entry: &AuditEntry) -> AuditResult<AppendReceipt> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(Self::io_err(parent))?;
            }
        }

        let _guard = file_lock::acquire(&self.lock_path(), LockMode::Exclusive, self.lock_timeout)?;

        let rotated = self.rotate_if_needed()?;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(Self::io_err(&self.path))?;
        write_record(&mut file, line.as_bytes(), |file, bytes| file.write_all(bytes))
            .map_err(Self::io_err(&self.path))?;

        debug!(
            "Appended audit record {} ({} bytes) to {}",
            entry.run_id,
            line.len(),
            self.path.display()
        );
        Ok(AppendReceipt {
            rotated,
            bytes_written: line.len() as u64,
        })
    }

    /// Shift generations when the live log is at or above the threshold.
    /// Caller must hold the exclusive lock.
    fn rotate_if_needed(&self) -> AuditResult<bool> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Self::io_err(&self.path)(e)),
        };
        if size < self.max_bytes {
            return Ok(false);
        }

        if self.generations == 0 {
            remove_if_exists(&self.path)?;
        } else {
            remove_if_exists(&self.generation_path(self.generations))?;
            for generation in (1..self.generations).rev() {
                let from = self.generation_path(generation);
                match fs::rename(&from, self.generation_path(generation + 1)) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(Self::io_err(&from)(e)),
                }
            }
            fs::rename(&self.path, self.generation_path(1)).map_err(Self::io_err(&self.path))?;
        }

        info!(
            "Rotated audit log {} at {} bytes",
            self.path.display(),
            size
        );
        Ok(true)
    }

    /// Every record, oldest generation first; fails on the first malformed line
    pub fn read_entries(&self) -> AuditResult<Vec<AuditEntry>> {
        self.collect(true)
    }

    /// The newest `count` records, oldest first.
    ///
    /// Malformed lines are skipped and logged so one damaged record does not
    /// hide the rest of the trail.
    pub fn tail(&self, count: usize) -> AuditResult<Vec<AuditEntry>> {
        let mut entries = self.collect(false)?;
        let skip = entries.len().saturating_sub(count);
        Ok(entries.split_off(skip))
    }

    fn collect(&self, strict: bool) -> AuditResult<Vec<AuditEntry>> {
        // Rotation never removes the directory, only the files in it
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Ok(Vec::new());
            }
        }
        let _guard = file_lock::acquire(&self.lock_path(), LockMode::Shared, self.lock_timeout)?;

        let mut entries = Vec::new();
        for generation in (0..=self.generations).rev() {
            let path = self.generation_path(generation);
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(Self::io_err(&path)(e)),
            };
            for (idx, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str(line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        let err = AuditError::Malformed {
                            path: path.clone(),
                            line: idx + 1,
                            details: e.to_string(),
                        };
                        if strict {
                            return Err(err);
                        }
                        warn!("Skipping audit record: {}", err);
                    }
                }
            }
        }
        Ok(entries)
    }
}

/// Append `record` through `write` and sync it, or leave the file as it was.
///
/// A file left without a trailing newline (a writer killed mid-record) gets
/// one first so the new record starts on its own line.
fn write_record<F>(file: &mut File, record: &[u8], write: F) -> io::Result<()>
where
    F: FnOnce(&mut File, &[u8]) -> io::Result<()>,
{
    let original_len = file.metadata()?.len();
    let mut bytes = Vec::with_capacity(record.len() + 1);
    if original_len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(original_len - 1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            bytes.push(b'\n');
        }
    }
    bytes.extend_from_slice(record);

    let result = write(&mut *file, bytes.as_slice()).and_then(|()| file.sync_data());
    if let Err(e) = result {
        if let Err(truncate) = file.set_len(original_len) {
            warn!("Could not roll back partial audit record: {}", truncate);
        }
        return Err(e);
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> AuditResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(AuditError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
