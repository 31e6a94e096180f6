//! Process-wide log capture.
//!
//! A [`LogCapture`] routes every event seen by the [`CaptureLayer`] into a
//! [`CapturedLog`] until it is stopped. Routing is global to the process:
//! events from unrelated threads and tasks inside the window are captured
//! too. Only one capture may be active at a time; a second
//! [`LogCapture::start`] fails with [`CaptureError::AlreadyActive`] rather
//! than interleaving two scopes into one file.

mod layer;
mod sink;

use std::{
    fs::File,
    io::{self, LineWriter, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::{Mutex, const_mutex};

pub use layer::CaptureLayer;
pub use sink::{CapturedLog, cleanup_tracked_files, tracked_files};

use crate::error::CaptureError;

/// The sink currently receiving events, if any.
static ACTIVE: Mutex<Option<ActiveSink>> = const_mutex(None);
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

struct ActiveSink {
    id: u64,
    writer: LineWriter<File>,
    error: Option<io::Error>,
}

impl ActiveSink {
    fn append(&mut self, line: &str) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.writer.write_all(line.as_bytes()) {
            self.error = Some(e);
        }
    }
}

/// Appends a formatted line to the active sink. Called by [`CaptureLayer`].
fn append(line: &str) {
    if let Some(sink) = ACTIVE.lock().as_mut() {
        sink.append(line);
    }
}

/// Whether any capture is currently active. Cheap enough to call per event.
fn is_active() -> bool {
    ACTIVE.lock().is_some()
}

/// Guard for an active capture. Dropping it detaches the sink without reading it.
#[derive(Debug)]
pub struct LogCapture {
    id: u64,
    sink: Option<CapturedLog>,
}

impl LogCapture {
    /// Starts routing log events into `sink`.
    pub fn start(mut sink: CapturedLog) -> Result<Self, CaptureError> {
        let writer = sink
            .take_writer()
            .ok_or_else(|| CaptureError::io(sink.path(), io::Error::other("sink already in use")))?;
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);

        {
            let mut active = ACTIVE.lock();
            if active.is_some() {
                drop(active);
                // `sink` is dropped (and its file removed) after the lock is released.
                return Err(CaptureError::AlreadyActive);
            }
            *active = Some(ActiveSink {
                id,
                writer,
                error: None,
            });
        }

        Ok(Self {
            id,
            sink: Some(sink),
        })
    }

    /// Path of the file receiving the events.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.sink.as_ref().map(CapturedLog::path)
    }

    /// Stops routing, flushes and closes the file, and hands the finished sink back.
    ///
    /// If any write into the sink failed during the capture, the first such
    /// error is returned and the sink (with its file) is dropped.
    pub fn stop(mut self) -> Result<CapturedLog, CaptureError> {
        let detached = self.detach();
        let sink = self
            .sink
            .take()
            .ok_or_else(|| CaptureError::io(PathBuf::new(), io::Error::other("capture already stopped")))?;

        if let Some(mut active) = detached {
            let flushed = active.writer.flush();
            let first_error = active.error.take().or(flushed.err());
            drop(active);
            if let Some(e) = first_error {
                return Err(CaptureError::io(sink.path(), e));
            }
        }

        Ok(sink)
    }

    /// Removes this capture's sink from the registry, if it is still the active one.
    fn detach(&self) -> Option<ActiveSink> {
        let mut active = ACTIVE.lock();
        if active.as_ref().is_some_and(|sink| sink.id == self.id) {
            active.take()
        } else {
            None
        }
    }
}

impl Drop for LogCapture {
    fn drop(&mut self) {
        drop(self.detach());
    }
}
