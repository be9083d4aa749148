//! Where finished data segments go.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use bytes::Bytes;
use tracing::{debug, warn};

/// Receives finished data segments.
pub trait PersistenceSink: Send + Sync {
    fn flush(&self, task_id: i32, chunk_index: u32, file_type: &str, bytes: Bytes)
        -> io::Result<()>;
}

/// Writes each segment to `<dir>/<task>-<chunk>.<file_type>`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    /// Create the directory if needed.
    pub fn create(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, task_id: i32, chunk_index: u32, file_type: &str) -> PathBuf {
        let extension: String = file_type
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        let extension = if extension.is_empty() {
            "bin".to_string()
        } else {
            extension
        };
        self.dir
            .join(format!("{task_id}-{chunk_index}.{extension}"))
    }
}

impl PersistenceSink for DirectorySink {
    fn flush(
        &self,
        task_id: i32,
        chunk_index: u32,
        file_type: &str,
        bytes: Bytes,
    ) -> io::Result<()> {
        let path = self.path_for(task_id, chunk_index, file_type);
        std::fs::write(&path, &bytes)?;
        debug!(task_id, chunk_index, path = %path.display(), size = bytes.len(), "segment written");
        Ok(())
    }
}

/// One flushed segment, as seen by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedSegment {
    pub task_id: i32,
    pub chunk_index: u32,
    pub file_type: String,
    pub bytes: Bytes,
}

/// Keeps flushed segments in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    segments: Mutex<Vec<FlushedSegment>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> Vec<FlushedSegment> {
        match self.segments.lock() {
            Ok(segments) => segments.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl PersistenceSink for MemorySink {
    fn flush(
        &self,
        task_id: i32,
        chunk_index: u32,
        file_type: &str,
        bytes: Bytes,
    ) -> io::Result<()> {
        let segment = FlushedSegment {
            task_id,
            chunk_index,
            file_type: file_type.to_string(),
            bytes,
        };
        match self.segments.lock() {
            Ok(mut segments) => segments.push(segment),
            Err(poisoned) => poisoned.into_inner().push(segment),
        }
        Ok(())
    }
}

/// Result of one background flush, reported to the completion hook.
#[derive(Debug)]
pub struct FlushOutcome {
    pub task_id: i32,
    pub chunk_index: u32,
    pub result: io::Result<()>,
}

pub type FlushHook = Box<dyn Fn(FlushOutcome) + Send>;

struct FlushJob {
    task_id: i32,
    chunk_index: u32,
    file_type: String,
    bytes: Bytes,
}

/// A sink that hands segments to a background thread and returns at once.
///
/// Segments are written in submission order. Dropping the worker (or calling
/// [`FlushWorker::shutdown`]) drains the queue before the thread exits.
pub struct FlushWorker {
    tx: Mutex<Option<Sender<FlushJob>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FlushWorker {
    pub fn spawn(inner: Arc<dyn PersistenceSink>) -> io::Result<Self> {
        Self::spawn_with_hook(inner, None)
    }

    pub fn spawn_with_hook(
        inner: Arc<dyn PersistenceSink>,
        hook: Option<FlushHook>,
    ) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<FlushJob>();
        let handle = std::thread::Builder::new()
            .name("sensorlink-flush".into())
            .spawn(move || {
                for job in rx {
                    let result = inner.flush(job.task_id, job.chunk_index, &job.file_type, job.bytes);
                    if let Err(err) = &result {
                        warn!(task_id = job.task_id, chunk_index = job.chunk_index, error = %err, "segment flush failed");
                    }
                    if let Some(hook) = &hook {
                        hook(FlushOutcome {
                            task_id: job.task_id,
                            chunk_index: job.chunk_index,
                            result,
                        });
                    }
                }
                debug!("flush worker drained");
            })?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop accepting segments and wait for queued ones to finish.
    pub fn shutdown(&self) {
        let tx = match self.tx.lock() {
            Ok(mut tx) => tx.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(tx);
        let handle = match self.handle.lock() {
            Ok(mut handle) => handle.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl PersistenceSink for FlushWorker {
    fn flush(
        &self,
        task_id: i32,
        chunk_index: u32,
        file_type: &str,
        bytes: Bytes,
    ) -> io::Result<()> {
        let tx = self
            .tx
            .lock()
            .map_err(|_| io::Error::other("flush worker poisoned"))?;
        let Some(tx) = tx.as_ref() else {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "flush worker stopped",
            ));
        };
        tx.send(FlushJob {
            task_id,
            chunk_index,
            file_type: file_type.to_string(),
            bytes,
        })
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "flush worker stopped"))
    }
}

impl Drop for FlushWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
