//! Debounced background writer.
//!
//! Every commit hands the writer a fresh [`TaskFile`]. The writer keeps only
//! the newest one and writes it once no new snapshot has arrived for the
//! debounce window, so a burst of changes costs a single write.
//!
//! The writer must be shut down with [`DebouncedWriter::shutdown`] before the
//! process exits; shutdown writes any pending snapshot and reports the last
//! write error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::persistence::TaskFilePersistence;
use crate::error::{Result, TaskforgeError};
use crate::task::TaskFile;

/// Message accepted by the background writer.
#[derive(Debug)]
pub(crate) enum WriteRequest {
    /// Replace the pending snapshot
    Save(Box<TaskFile>),
    /// Write the pending snapshot now and report the outcome
    Flush(oneshot::Sender<Result<()>>),
}

/// Handle used by the persistence hook to queue snapshots.
#[derive(Debug, Clone)]
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<WriteRequest>,
    path: PathBuf,
}

impl WriteQueue {
    /// Queue a snapshot for writing.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the writer has already shut down.
    pub fn submit(&self, file: TaskFile) -> Result<()> {
        self.tx
            .send(WriteRequest::Save(Box::new(file)))
            .map_err(|_| writer_gone(&self.path))
    }
}

/// Background task that collapses bursts of saves into single writes.
#[derive(Debug)]
pub struct DebouncedWriter {
    queue: Option<WriteQueue>,
    handle: JoinHandle<Option<TaskforgeError>>,
}

impl DebouncedWriter {
    /// Start the writer on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn(persistence: TaskFilePersistence, window: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let path = persistence.path().to_path_buf();
        let handle = tokio::spawn(run(persistence, rx, window));
        Self {
            queue: Some(WriteQueue { tx, path }),
            handle,
        }
    }

    /// A new handle for queuing snapshots.
    #[must_use]
    pub fn queue(&self) -> Option<WriteQueue> {
        self.queue.clone()
    }

    /// Write any pending snapshot immediately.
    ///
    /// # Errors
    ///
    /// Returns the write error, if the write failed.
    pub async fn flush(&self) -> Result<()> {
        let Some(queue) = &self.queue else {
            return Ok(());
        };
        let (reply, done) = oneshot::channel();
        if queue.tx.send(WriteRequest::Flush(reply)).is_err() {
            return Err(writer_gone(&queue.path));
        }
        done.await.unwrap_or_else(|_| Err(writer_gone(&queue.path)))
    }

    /// Stop the writer once every queue handle is dropped, writing anything
    /// still pending.
    ///
    /// # Errors
    ///
    /// Returns the most recent write error seen by the background task.
    pub async fn shutdown(mut self) -> Result<()> {
        let path = self.queue.take().map(|q| q.path);
        match self.handle.await {
            Ok(None) => Ok(()),
            Ok(Some(err)) => Err(err),
            Err(join) => Err(TaskforgeError::persistence(
                path.unwrap_or_default(),
                format!("task writer crashed: {join}"),
            )),
        }
    }
}

fn writer_gone(path: &Path) -> TaskforgeError {
    TaskforgeError::persistence(path, "task writer has shut down")
}

async fn write(persistence: &TaskFilePersistence, file: TaskFile) -> Result<()> {
    let path = persistence.path().to_path_buf();
    let persistence = persistence.clone();
    tokio::task::spawn_blocking(move || persistence.save(&file))
        .await
        .map_err(|e| TaskforgeError::persistence(path, format!("task writer crashed: {e}")))?
}

async fn run(
    persistence: TaskFilePersistence,
    mut rx: mpsc::UnboundedReceiver<WriteRequest>,
    window: Duration,
) -> Option<TaskforgeError> {
    let mut pending: Option<TaskFile> = None;
    let mut last_error: Option<TaskforgeError> = None;
    let mut collapsed = 0usize;

    loop {
        let message = if pending.is_some() {
            match tokio::time::timeout(window, rx.recv()).await {
                Ok(message) => message,
                Err(_) => {
                    if let Some(file) = pending.take() {
                        debug!("Debounce window elapsed, writing ({collapsed} changes collapsed)");
                        collapsed = 0;
                        if let Err(e) = write(&persistence, file).await {
                            warn!("Deferred save failed: {e}");
                            last_error = Some(e);
                        }
                    }
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        match message {
            Some(WriteRequest::Save(file)) => {
                if pending.is_some() {
                    collapsed += 1;
                }
                pending = Some(*file);
            }
            Some(WriteRequest::Flush(reply)) => {
                let result = match pending.take() {
                    Some(file) => write(&persistence, file).await,
                    None => Ok(()),
                };
                collapsed = 0;
                let _ = reply.send(result);
            }
            None => break,
        }
    }

    if let Some(file) = pending.take() {
        if let Err(e) = write(&persistence, file).await {
            warn!("Final save failed: {e}");
            last_error = Some(e);
        }
    }
    last_error
}
