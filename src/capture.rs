// src/capture.rs
//
// Raw capture log. Every received chunk is decoded to text and appended
// before tokenization, so the file mirrors the wire verbatim.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::error::LinkError;

/// A writable destination for raw capture text.
pub trait LogSink: Send {
    fn write(&mut self, text: &str) -> Result<(), LinkError>;

    /// Flush anything pending and release the destination.
    fn close(&mut self) -> Result<(), LinkError>;
}

/// Capture log backed by a file on disk.
pub struct FileLogSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileLogSink {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LinkError> {
        let path = path.into();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LinkError::LogSink(format!("failed to open {}: {}", path.display(), e)))?;
        info!(path = %path.display(), "capture log started");
        Ok(FileLogSink {
            path,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// Create a timestamped capture file inside `dir`.
    pub fn create_in(dir: &Path) -> Result<Self, LinkError> {
        std::fs::create_dir_all(dir).map_err(|e| {
            LinkError::LogSink(format!("failed to create {}: {}", dir.display(), e))
        })?;
        let filename = chrono::Local::now()
            .format("%Y%m%d-%H%M%S-bitlink.log")
            .to_string();
        FileLogSink::open(dir.join(filename))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileLogSink {
    fn write(&mut self, text: &str) -> Result<(), LinkError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| LinkError::LogSink("capture log is closed".to_string()))?;
        writer
            .write_all(text.as_bytes())
            .map_err(|e| LinkError::LogSink(format!("write to {} failed: {}", self.path.display(), e)))
    }

    fn close(&mut self) -> Result<(), LinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|e| {
                LinkError::LogSink(format!("flush of {} failed: {}", self.path.display(), e))
            })?;
            info!(path = %self.path.display(), "capture log stopped");
        }
        Ok(())
    }
}

impl Drop for FileLogSink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Shared slot for the active capture sink. Owned by the supervisor and
/// written from every read loop; writes and `stop` serialize on the same
/// lock, so a close never truncates a write in progress.
#[derive(Clone, Default)]
pub struct CaptureHandle {
    slot: Arc<Mutex<Option<Box<dyn LogSink>>>>,
}

impl CaptureHandle {
    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn LogSink>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `sink`, closing any sink it replaces.
    pub fn start(&self, sink: Box<dyn LogSink>) -> Result<(), LinkError> {
        let previous = self.lock().replace(sink);
        match previous {
            Some(mut old) => old.close(),
            None => Ok(()),
        }
    }

    /// Close and remove the active sink. No-op when logging is off.
    pub fn stop(&self) -> Result<(), LinkError> {
        let taken = self.lock().take();
        match taken {
            Some(mut sink) => sink.close(),
            None => Ok(()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    /// Append a raw chunk as text. On failure the sink is closed and removed
    /// so logging stays off; the error is returned for reporting.
    pub fn record(&self, chunk: &[u8]) -> Result<(), LinkError> {
        let mut guard = self.lock();
        let Some(sink) = guard.as_mut() else {
            return Ok(());
        };
        let text = String::from_utf8_lossy(chunk);
        if let Err(e) = sink.write(&text) {
            if let Some(mut failed) = guard.take() {
                if let Err(close_err) = failed.close() {
                    warn!("closing failed capture log: {}", close_err);
                }
            }
            return Err(e);
        }
        Ok(())
    }
}
