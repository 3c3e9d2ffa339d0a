//! Task file persistence with locking and atomic writes.
//!
//! A save goes through these steps:
//!
//! 1. Take an exclusive lock on `<file>.lock` (retried with linear backoff)
//! 2. Copy the current file to `<file>.bak` when backups are enabled
//! 3. Write `<file>.tmp`, sync it, and rename it over the task file
//!
//! A failed backup is logged and never blocks the write. The whole save is
//! retried a bounded number of times before the error is surfaced.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use fs2::FileExt;
use tracing::{debug, warn};

use crate::config::PersistenceConfig;
use crate::error::{IntoTaskforgeError, Result, TaskforgeError};
use crate::task::TaskFile;

/// Temporary file suffix for atomic writes.
const TMP_SUFFIX: &str = "tmp";

/// Lock file suffix for concurrent access prevention.
const LOCK_SUFFIX: &str = "lock";

/// Backup file suffix.
const BACKUP_SUFFIX: &str = "bak";

/// Delay unit between lock attempts.
const LOCK_BACKOFF: Duration = Duration::from_millis(50);

/// Delay unit between whole-save attempts.
const SAVE_BACKOFF: Duration = Duration::from_millis(100);

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Reads and writes one task file.
#[derive(Debug, Clone)]
pub struct TaskFilePersistence {
    path: PathBuf,
    config: PersistenceConfig,
}

impl TaskFilePersistence {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, config: PersistenceConfig) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }

    /// Same settings, different file.
    #[must_use]
    pub fn with_path(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: self.config.clone(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    #[must_use]
    pub fn tmp_path(&self) -> PathBuf {
        sibling(&self.path, TMP_SUFFIX)
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        sibling(&self.path, LOCK_SUFFIX)
    }

    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        sibling(&self.path, BACKUP_SUFFIX)
    }

    /// Load the task file.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`TaskforgeError::Persistence`] if the file exists but cannot
    /// be read or is not a valid task file. Corrupt files are left in place.
    pub fn load(&self) -> Result<Option<TaskFile>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No task file at {}, starting empty", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(TaskforgeError::persistence(
                    &self.path,
                    format!("failed to read: {e}"),
                ))
            }
        };

        let file: TaskFile = serde_json::from_str(&contents).map_err(|e| {
            TaskforgeError::persistence(&self.path, format!("invalid task file: {e}"))
        })?;
        debug!(
            "Loaded {} tasks from {}",
            file.tasks.len(),
            self.path.display()
        );
        Ok(Some(file))
    }

    /// Save the task file, retrying the whole operation on failure.
    ///
    /// # Errors
    ///
    /// Returns the last [`TaskforgeError::Persistence`] once all attempts
    /// have failed.
    pub fn save(&self, file: &TaskFile) -> Result<()> {
        let attempts = self.config.save_retries.max(1);
        let mut attempt = 1;
        loop {
            match self.save_once(file) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(
                        "Save of {} failed (attempt {attempt}/{attempts}): {e}",
                        self.path.display()
                    );
                    thread::sleep(SAVE_BACKOFF * attempt);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn save_once(&self, file: &TaskFile) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).into_persistence(&self.path)?;
        }

        let lock_file = self.acquire_lock()?;

        if self.config.backup && self.path.exists() {
            if let Err(e) = fs::copy(&self.path, self.backup_path()) {
                warn!(
                    "Backup of {} failed, continuing with save: {e}",
                    self.path.display()
                );
            }
        }

        let json = serde_json::to_string_pretty(file).into_persistence(&self.path)?;
        let tmp_path = self.tmp_path();
        let write = || -> std::io::Result<()> {
            let mut tmp_file = File::create(&tmp_path)?;
            tmp_file.write_all(json.as_bytes())?;
            tmp_file.write_all(b"\n")?;
            tmp_file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        };
        let result = write().into_persistence(&self.path);
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }

        let _ = FileExt::unlock(&lock_file);
        result?;
        debug!("Saved {} tasks to {}", file.tasks.len(), self.path.display());
        Ok(())
    }

    fn acquire_lock(&self) -> Result<File> {
        let lock_path = self.lock_path();
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .into_persistence(&self.path)?;

        let attempts = self.config.lock_retries.max(1);
        for attempt in 1..=attempts {
            match FileExt::try_lock_exclusive(&lock_file) {
                Ok(()) => return Ok(lock_file),
                Err(e) if attempt < attempts => {
                    debug!("Lock {} busy ({e}), retrying", lock_path.display());
                    thread::sleep(LOCK_BACKOFF * attempt);
                }
                Err(e) => {
                    return Err(TaskforgeError::persistence(
                        &self.path,
                        format!(
                            "could not lock {} after {attempts} attempts: {e}",
                            lock_path.display()
                        ),
                    ))
                }
            }
        }
        Err(TaskforgeError::persistence(
            &self.path,
            format!("could not lock {}", lock_path.display()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskMeta};
    use tempfile::TempDir;

    fn test_persistence(config: PersistenceConfig) -> (TaskFilePersistence, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let persistence = TaskFilePersistence::new(temp_dir.path().join("tasks.json"), config);
        (persistence, temp_dir)
    }

    fn sample_file() -> TaskFile {
        let mut meta = TaskMeta::new();
        meta.set("projectName", "demo");
        TaskFile {
            meta,
            tasks: vec![Task::new(1, "First"), Task::new(2, "Second")],
            change_history: Vec::new(),
        }
    }

    #[test]
    fn test_sibling_paths() {
        let persistence =
            TaskFilePersistence::new("/data/tasks.json", PersistenceConfig::default());
        assert_eq!(persistence.tmp_path(), PathBuf::from("/data/tasks.json.tmp"));
        assert_eq!(persistence.lock_path(), PathBuf::from("/data/tasks.json.lock"));
        assert_eq!(persistence.backup_path(), PathBuf::from("/data/tasks.json.bak"));
    }

    #[test]
    fn test_load_missing_returns_none() {
        let (persistence, _temp) = test_persistence(PersistenceConfig::immediate());
        assert!(persistence.load().unwrap().is_none());
    }

    #[test]
    fn test_load_corrupt_file_is_error_and_keeps_file() {
        let (persistence, _temp) = test_persistence(PersistenceConfig::immediate());
        fs::write(persistence.path(), "not valid json {{{").unwrap();

        let err = persistence.load().unwrap_err();
        assert!(matches!(err, TaskforgeError::Persistence { .. }));
        assert!(persistence.path().exists());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let (persistence, _temp) = test_persistence(PersistenceConfig::immediate());
        let file = sample_file();
        persistence.save(&file).unwrap();
        assert_eq!(persistence.load().unwrap(), Some(file));
    }

    #[test]
    fn test_save_uses_two_space_indent_and_leaves_no_tmp() {
        let (persistence, _temp) = test_persistence(PersistenceConfig::immediate());
        persistence.save(&sample_file()).unwrap();

        let raw = fs::read_to_string(persistence.path()).unwrap();
        assert!(raw.starts_with("{\n  \"meta\""));
        assert!(raw.ends_with("}\n"));
        assert!(!persistence.tmp_path().exists());
    }

    #[test]
    fn test_unmodified_reload_is_byte_stable() {
        let (persistence, _temp) = test_persistence(PersistenceConfig::immediate());
        persistence.save(&sample_file()).unwrap();
        let first = fs::read_to_string(persistence.path()).unwrap();

        let loaded = persistence.load().unwrap().unwrap();
        persistence.save(&loaded).unwrap();
        assert_eq!(fs::read_to_string(persistence.path()).unwrap(), first);
    }

    #[test]
    fn test_backup_copies_previous_version() {
        let config = PersistenceConfig {
            backup: true,
            ..PersistenceConfig::immediate()
        };
        let (persistence, _temp) = test_persistence(config);
        persistence.save(&sample_file()).unwrap();
        assert!(!persistence.backup_path().exists());

        let mut next = sample_file();
        next.tasks.pop();
        persistence.save(&next).unwrap();

        let backup: TaskFile =
            serde_json::from_str(&fs::read_to_string(persistence.backup_path()).unwrap()).unwrap();
        assert_eq!(backup.tasks.len(), 2);
        assert_eq!(persistence.load().unwrap().unwrap().tasks.len(), 1);
    }

    #[test]
    fn test_failed_backup_does_not_block_save() {
        let config = PersistenceConfig {
            backup: true,
            ..PersistenceConfig::immediate()
        };
        let (persistence, _temp) = test_persistence(config);
        persistence.save(&sample_file()).unwrap();
        // A directory where the backup file should go makes the copy fail.
        fs::create_dir_all(persistence.backup_path()).unwrap();

        let mut next = sample_file();
        next.tasks.clear();
        persistence.save(&next).unwrap();
        assert!(persistence.load().unwrap().unwrap().tasks.is_empty());
    }

    #[test]
    fn test_creates_parent_directories() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("deep").join("nested").join("tasks.json");
        let persistence = TaskFilePersistence::new(&path, PersistenceConfig::immediate());
        persistence.save(&sample_file()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_held_lock_surfaces_error_after_retries() {
        let config = PersistenceConfig {
            lock_retries: 2,
            save_retries: 1,
            ..PersistenceConfig::immediate()
        };
        let (persistence, _temp) = test_persistence(config);
        persistence.save(&sample_file()).unwrap();

        let holder = File::open(persistence.lock_path()).unwrap();
        FileExt::lock_exclusive(&holder).unwrap();

        let err = persistence.save(&sample_file()).unwrap_err();
        assert!(matches!(err, TaskforgeError::Persistence { .. }));
        assert!(err.to_string().contains("could not lock"));

        FileExt::unlock(&holder).unwrap();
        persistence.save(&sample_file()).unwrap();
    }
}
