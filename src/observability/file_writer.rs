//! Rotating file writer with size-based rotation and backup retention.
//!
//! Trace lines are appended to a single file. Once the file grows past the
//! configured size it is renamed to a timestamped backup and a fresh file is
//! started; only the newest backups are retained.

use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// When to rotate and how many backups to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// File size that triggers a rotation before the next write.
    pub max_bytes: u64,
    /// Number of rotated backups retained.
    pub max_backups: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: crate::DEFAULT_TRACE_MAX_BYTES,
            max_backups: crate::DEFAULT_TRACE_MAX_BACKUPS,
        }
    }
}

/// Thread-safe rotating file writer.
///
/// Backups are named `<file name>.<UTC timestamp in nanoseconds>`, zero-padded
/// so that lexical order is chronological order.
pub struct FileWriter {
    file_path: PathBuf,
    policy: RotationPolicy,
    /// Opened lazily on first write.
    writer: Mutex<Option<File>>,
}

impl FileWriter {
    /// Creates a writer for `file_path`. The file is created on first write.
    pub const fn new(file_path: PathBuf, policy: RotationPolicy) -> Self {
        Self {
            file_path,
            policy,
            writer: Mutex::new(None),
        }
    }

    /// Appends one line, rotating first if the file is over its size limit.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if rotating, opening, writing or
    /// flushing fails, or if the internal lock is poisoned.
    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Mutex poisoned: {e}")))?;

        self.check_and_rotate(&mut writer)?;

        if writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.file_path)?;
            *writer = Some(file);
        }

        let file = writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "No file available"))?;

        writeln!(file, "{line}")?;
        file.flush()?;
        drop(writer);

        Ok(())
    }

    fn check_and_rotate(&self, writer: &mut Option<File>) -> io::Result<()> {
        if let Ok(metadata) = fs::metadata(&self.file_path) {
            if metadata.len() > self.policy.max_bytes {
                *writer = None;
                self.rotate_files()?;
            }
        }
        Ok(())
    }

    fn rotate_files(&self) -> io::Result<()> {
        let mut timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let mut backup_path = backup_path_for(&self.file_path, timestamp)?;
        while backup_path.exists() {
            timestamp += 1;
            backup_path = backup_path_for(&self.file_path, timestamp)?;
        }

        if self.file_path.exists() {
            fs::rename(&self.file_path, &backup_path)?;
        }

        self.cleanup_old_backups()
    }

    /// Deletes the oldest backups beyond the retention limit.
    ///
    /// Individual deletion failures are ignored.
    fn cleanup_old_backups(&self) -> io::Result<()> {
        let mut backups = self.backups()?;
        backups.sort();
        backups.reverse();

        for old_backup in backups.iter().skip(self.policy.max_backups) {
            let _ = fs::remove_file(old_backup);
        }

        Ok(())
    }

    /// Lists existing backups of this file, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be read.
    pub fn backups(&self) -> io::Result<Vec<PathBuf>> {
        let prefix = format!("{}.", file_name(&self.file_path)?);
        let parent_dir = parent_dir(&self.file_path);

        Ok(fs::read_dir(parent_dir)?
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .and_then(|name| name.strip_prefix(&prefix))
                    .is_some_and(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
            })
            .collect())
    }
}

fn file_name(path: &Path) -> io::Result<&str> {
    path.file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "Invalid file name"))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn backup_path_for(path: &Path, timestamp: i64) -> io::Result<PathBuf> {
    let name = file_name(path)?;
    Ok(parent_dir(path).join(format!("{name}.{timestamp:020}")))
}

impl std::fmt::Debug for FileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWriter")
            .field("file_path", &self.file_path)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
