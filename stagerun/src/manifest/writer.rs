//! Single-writer queue that serializes manifest updates.
//!
//! Workers hand finished stage records to a [`ManifestHandle`]. One blocking
//! task owns the in-memory manifest, applies each update and rewrites the
//! file atomically before taking the next one.

use super::{Manifest, ManifestStore, StageRecord};
use crate::errors::ManifestError;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

enum WriterCommand {
    Update { stage: String, record: StageRecord },
    Close,
}

impl std::fmt::Debug for WriterCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Update { stage, .. } => f.debug_struct("Update").field("stage", stage).finish(),
            Self::Close => f.write_str("Close"),
        }
    }
}

#[derive(Debug, Default)]
struct WriterState {
    failure: Mutex<Option<String>>,
}

/// Cloneable submission side of a [`ManifestWriter`].
#[derive(Debug, Clone)]
pub struct ManifestHandle {
    tx: mpsc::UnboundedSender<WriterCommand>,
    state: Arc<WriterState>,
}

impl ManifestHandle {
    /// Queues a record for a stage without waiting for it to be written.
    ///
    /// # Errors
    ///
    /// Returns `WriterClosed` if an earlier write failed or the writer has
    /// already shut down. The record is not queued in either case.
    pub fn submit(
        &self,
        stage: impl Into<String>,
        record: StageRecord,
    ) -> Result<(), ManifestError> {
        if let Some(reason) = self.state.failure.lock().clone() {
            return Err(ManifestError::WriterClosed { reason });
        }
        self.tx
            .send(WriterCommand::Update {
                stage: stage.into(),
                record,
            })
            .map_err(|_| ManifestError::WriterClosed {
                reason: "writer has shut down".to_string(),
            })
    }

    /// Returns true once a write has failed.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.state.failure.lock().is_some()
    }
}

/// Owner of the manifest writer task.
#[derive(Debug)]
pub struct ManifestWriter {
    handle: ManifestHandle,
    worker: JoinHandle<Result<Manifest, ManifestError>>,
}

impl ManifestWriter {
    /// Starts the writer on the blocking pool.
    ///
    /// `initial` is the manifest as loaded before the run; every update is
    /// applied on top of it. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(store: ManifestStore, initial: Manifest) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(WriterState::default());
        let worker_state = Arc::clone(&state);
        let worker = tokio::task::spawn_blocking(move || drain(&store, initial, rx, &worker_state));

        Self {
            handle: ManifestHandle { tx, state },
            worker,
        }
    }

    /// Returns a submission handle.
    #[must_use]
    pub fn handle(&self) -> ManifestHandle {
        self.handle.clone()
    }

    /// Waits for every queued update to be written, then stops the writer.
    ///
    /// Returns the manifest as last committed to disk.
    ///
    /// # Errors
    ///
    /// Returns the first write error, if any occurred during the writer's
    /// lifetime, or `WriterClosed` if the worker task itself failed.
    pub async fn flush_and_close(self) -> Result<Manifest, ManifestError> {
        // A send error means the worker already exited; the join below
        // reports why.
        let _ = self.handle.tx.send(WriterCommand::Close);
        self.worker.await.map_err(|e| ManifestError::WriterClosed {
            reason: format!("writer task failed: {e}"),
        })?
    }
}

fn drain(
    store: &ManifestStore,
    mut manifest: Manifest,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
    state: &WriterState,
) -> Result<Manifest, ManifestError> {
    let mut first_error = None;

    while let Some(command) = rx.blocking_recv() {
        let (stage, record) = match command {
            WriterCommand::Update { stage, record } => (stage, record),
            WriterCommand::Close => break,
        };

        if first_error.is_some() {
            debug!(stage = %stage, "Dropping manifest update after earlier failure");
            continue;
        }

        let previous = manifest.insert(stage.clone(), record);
        match store.save(&manifest) {
            Ok(()) => debug!(stage = %stage, "Committed stage record"),
            Err(e) => {
                warn!(stage = %stage, error = %e, "Manifest write failed, writer poisoned");
                match previous {
                    Some(previous) => {
                        manifest.insert(stage, previous);
                    }
                    None => {
                        manifest.stages.remove(&stage);
                    }
                }
                *state.failure.lock() = Some(e.to_string());
                first_error = Some(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(manifest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PathFingerprint;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn record(n: usize) -> StageRecord {
        let mut record = StageRecord::new(format!("build {n}"));
        record.outs.push(PathFingerprint {
            path: format!("out/{n}.bin"),
            md5: format!("{n:032x}"),
            size: n as u64,
        });
        record
    }

    #[tokio::test]
    async fn test_single_update_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join("dvc.lock"));
        let writer = ManifestWriter::spawn(store.clone(), Manifest::new());

        writer.handle().submit("one", record(1)).unwrap();
        let committed = writer.flush_and_close().await.unwrap();

        assert_eq!(committed.get("one"), Some(&record(1)));
        assert_eq!(store.load().unwrap(), committed);
    }

    #[tokio::test]
    async fn test_updates_apply_on_top_of_initial() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join("dvc.lock"));
        let mut initial = Manifest::new();
        initial.insert("kept", record(7));
        initial.insert("replaced", record(8));

        let writer = ManifestWriter::spawn(store.clone(), initial);
        writer.handle().submit("replaced", record(9)).unwrap();
        let committed = writer.flush_and_close().await.unwrap();

        assert_eq!(committed.get("kept"), Some(&record(7)));
        assert_eq!(committed.get("replaced"), Some(&record(9)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions() {
        const N: usize = 64;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dvc.lock");
        let store = ManifestStore::new(&path);
        let writer = ManifestWriter::spawn(store.clone(), Manifest::new());

        // Every read taken while updates land must be a complete document.
        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let stop = Arc::clone(&stop);
            let path = path.clone();
            std::thread::spawn(move || {
                let mut reads = 0usize;
                while !stop.load(Ordering::Relaxed) {
                    if let Ok(text) = std::fs::read_to_string(&path) {
                        Manifest::from_yaml(&text).expect("intermediate manifest must parse");
                        reads += 1;
                    }
                }
                reads
            })
        };

        let tasks: Vec<_> = (0..N)
            .map(|n| {
                let handle = writer.handle();
                tokio::spawn(async move { handle.submit(format!("stage-{n}"), record(n)) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let committed = writer.flush_and_close().await.unwrap();
        stop.store(true, Ordering::Relaxed);
        reader.join().unwrap();

        assert_eq!(committed.stages.len(), N);
        let on_disk = store.load().unwrap();
        for n in 0..N {
            assert_eq!(on_disk.get(&format!("stage-{n}")), Some(&record(n)));
        }
    }

    #[tokio::test]
    async fn test_write_failure_poisons_writer() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join("missing-dir").join("dvc.lock"));
        let writer = ManifestWriter::spawn(store, Manifest::new());
        let handle = writer.handle();

        handle.submit("one", record(1)).unwrap();
        let err = writer.flush_and_close().await.unwrap_err();

        assert!(matches!(err, ManifestError::Io { .. }));
        assert!(handle.is_poisoned());
        let err = handle.submit("two", record(2)).unwrap_err();
        assert!(matches!(err, ManifestError::WriterClosed { .. }));
    }

    #[tokio::test]
    async fn test_submit_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join("dvc.lock"));
        let writer = ManifestWriter::spawn(store, Manifest::new());
        let handle = writer.handle();
        writer.flush_and_close().await.unwrap();

        assert!(!handle.is_poisoned());
        assert!(handle.submit("late", record(1)).is_err());
    }
}
