//! Temporary files backing captured logs.
//!
//! Every file handed out here is tracked until it is released. Files that
//! are still tracked when the process exits are removed by an `atexit`
//! hook, so a scope that never reached its own cleanup does not leave
//! `task_log_*.txt` files behind.

use std::{
    collections::BTreeSet,
    fs::{self, File},
    io::{self, LineWriter},
    path::{Path, PathBuf},
    sync::Once,
};

use parking_lot::{Mutex, const_mutex};

use crate::{error::CaptureError, tracing};

const PREFIX: &str = "task_log_";
const SUFFIX: &str = ".txt";

static TRACKED: Mutex<BTreeSet<PathBuf>> = const_mutex(BTreeSet::new());
static EXIT_HOOK: Once = Once::new();

/// Tests that create tracked files run one at a time, since
/// [`cleanup_tracked_files`] removes every tracked file in the process.
#[cfg(test)]
pub(super) static TEST_FILES: Mutex<()> = const_mutex(());

/// Append-only temporary file owned by a single notification scope.
#[derive(Debug)]
pub struct CapturedLog {
    path: PathBuf,
    writer: Option<LineWriter<File>>,
    released: bool,
}

impl CapturedLog {
    /// Creates a fresh `task_log_*.txt` file in the system temporary directory.
    pub fn create() -> Result<Self, CaptureError> {
        Self::create_in(std::env::temp_dir())
    }

    /// Creates a fresh `task_log_*.txt` file in `dir`.
    pub fn create_in(dir: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let (file, path) = tempfile::Builder::new()
            .prefix(PREFIX)
            .suffix(SUFFIX)
            .tempfile_in(dir)
            .map_err(CaptureError::Create)?
            .keep()
            .map_err(|e| CaptureError::Create(e.error))?;

        track(&path);

        Ok(Self {
            path,
            writer: Some(LineWriter::new(file)),
            released: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hands the writer to the capture registry.
    pub(super) fn take_writer(&mut self) -> Option<LineWriter<File>> {
        self.writer.take()
    }

    /// Reads everything captured so far.
    pub fn contents(&self) -> Result<String, CaptureError> {
        let bytes = fs::read(&self.path).map_err(|e| CaptureError::io(&self.path, e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Deletes the backing file. A file that is already gone counts as released.
    pub fn release(mut self) -> Result<(), CaptureError> {
        self.remove()
    }

    fn remove(&mut self) -> Result<(), CaptureError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        drop(self.writer.take());
        untrack(&self.path);

        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(CaptureError::io(&self.path, e)),
            _ => Ok(()),
        }
    }
}

impl Drop for CapturedLog {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            tracing::warn!(error = %e, "Failed to remove captured log file");
        }
    }
}

/// Paths of temporary log files not yet released.
#[must_use]
pub fn tracked_files() -> Vec<PathBuf> {
    TRACKED.lock().iter().cloned().collect()
}

/// Removes every tracked file, ignoring files that are already gone.
///
/// Skipped when another thread holds the tracking list, since this also
/// runs from the exit hook while other threads may be mid-update. Returns
/// the number of files actually deleted.
pub fn cleanup_tracked_files() -> usize {
    TRACKED
        .try_lock()
        .map_or(0, |mut tracked| remove_all(&std::mem::take(&mut *tracked)))
}

fn remove_all<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> usize {
    paths
        .into_iter()
        .filter(|path| fs::remove_file(path).is_ok())
        .count()
}

fn track(path: &Path) {
    EXIT_HOOK.call_once(register_exit_hook);
    TRACKED.lock().insert(path.to_path_buf());
}

fn untrack(path: &Path) {
    TRACKED.lock().remove(path);
}

#[allow(unsafe_code)]
fn register_exit_hook() {
    extern "C" fn on_exit() {
        cleanup_tracked_files();
    }

    // SAFETY: `on_exit` is a plain `extern "C"` function that does not
    // unwind and only touches process-global state that outlives `main`.
    let status = unsafe { libc::atexit(on_exit) };
    if status != 0 {
        tracing::warn!("Failed to register exit hook for temporary log cleanup");
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_create_names_and_tracks_file() {
        let _files = TEST_FILES.lock();
        let dir = tempfile::tempdir().unwrap();
        let log = CapturedLog::create_in(dir.path()).unwrap();

        let name = log.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("task_log_"));
        assert!(name.ends_with(".txt"));
        assert!(tracked_files().contains(&log.path().to_path_buf()));
    }

    #[test]
    fn test_release_removes_and_untracks() {
        let _files = TEST_FILES.lock();
        let dir = tempfile::tempdir().unwrap();
        let mut log = CapturedLog::create_in(dir.path()).unwrap();
        let path = log.path().to_path_buf();

        let mut writer = log.take_writer().unwrap();
        writer.write_all(b"hello\n").unwrap();
        drop(writer);
        assert_eq!(log.contents().unwrap(), "hello\n");

        log.release().unwrap();
        assert!(!path.exists());
        assert!(!tracked_files().contains(&path));
    }

    #[test]
    fn test_release_tolerates_missing_file() {
        let _files = TEST_FILES.lock();
        let dir = tempfile::tempdir().unwrap();
        let log = CapturedLog::create_in(dir.path()).unwrap();
        fs::remove_file(log.path()).unwrap();

        assert!(log.release().is_ok());
    }

    #[test]
    fn test_remove_all_counts_deleted_files() {
        let _files = TEST_FILES.lock();
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("task_log_present.txt");
        let missing = dir.path().join("task_log_missing.txt");
        fs::write(&present, "line\n").unwrap();

        assert_eq!(remove_all([&present, &missing]), 1);
        assert!(!present.exists());
    }

    #[test]
    fn test_cleanup_tracked_files_removes_leftovers() {
        let _files = TEST_FILES.lock();
        let dir = tempfile::tempdir().unwrap();
        let log = CapturedLog::create_in(dir.path()).unwrap();
        let path = log.path().to_path_buf();
        // Leak the guard so only the cleanup can delete the file
        std::mem::forget(log);

        assert!(cleanup_tracked_files() >= 1);
        assert!(!path.exists());
        assert!(!tracked_files().contains(&path));
    }

    #[test]
    fn test_drop_removes_file() {
        let _files = TEST_FILES.lock();
        let dir = tempfile::tempdir().unwrap();
        let log = CapturedLog::create_in(dir.path()).unwrap();
        let path = log.path().to_path_buf();

        drop(log);
        assert!(!path.exists());
    }
}
