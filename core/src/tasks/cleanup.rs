use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Result, StreamError};
use crate::tasks::runner::{DispatchOutcome, TaskPipeline};
use crate::tasks::store::TaskStore;
use crate::tasks::{TaskRecord, TaskStatus, VIDEO_DELETION};

/// Pipeline that drains pending `video_deletion` tasks and removes the
/// files they point at, fanning deletions out concurrently.
pub struct DeletionPipeline {
    store: Arc<TaskStore>,
    batch: usize,
}

impl DeletionPipeline {
    pub fn new(store: Arc<TaskStore>, batch: usize) -> Self {
        Self { store, batch }
    }
}

#[async_trait]
impl TaskPipeline for DeletionPipeline {
    type Item = TaskRecord;

    async fn dispatch(&self, tx: &mpsc::Sender<TaskRecord>) -> Result<DispatchOutcome> {
        let tasks = self.store.pending(VIDEO_DELETION, self.batch)?;
        if tasks.is_empty() {
            return Ok(DispatchOutcome::Idle);
        }

        for task in tasks {
            if let Err(e) = self.store.update_status(&task.id, TaskStatus::Processing) {
                warn!("failed to mark task {} processing: {e}", task.id);
                continue;
            }
            tx.send(task)
                .await
                .map_err(|e| StreamError::Task(format!("dispatch channel closed: {e}")))?;
        }
        Ok(DispatchOutcome::Dispatched)
    }

    async fn execute(&self, rx: &mut mpsc::Receiver<TaskRecord>) -> Result<()> {
        let errors: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));
        let mut handles = Vec::new();

        while let Ok(task) = rx.try_recv() {
            let store = Arc::clone(&self.store);
            let errors = Arc::clone(&errors);
            handles.push(tokio::spawn(async move {
                match delete_video(&task.data).await {
                    Ok(()) => {
                        if let Err(e) = store.remove(&task.id) {
                            warn!("failed to remove completed task {}: {e}", task.id);
                            errors
                                .lock()
                                .expect("deletion error map lock poisoned")
                                .insert(task.id.clone(), e.to_string());
                            return;
                        }
                        info!("deleted video {}", task.data);
                    }
                    Err(e) => {
                        warn!("failed to delete video {}: {e}", task.data);
                        if let Err(e) = store.update_status(&task.id, TaskStatus::Failed) {
                            warn!("failed to mark task {} failed: {e}", task.id);
                        }
                        errors
                            .lock()
                            .expect("deletion error map lock poisoned")
                            .insert(task.id.clone(), e.to_string());
                    }
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("deletion subtask panicked: {e:?}");
            }
        }

        let errors = errors.lock().expect("deletion error map lock poisoned");
        match errors.values().next() {
            Some(first) => Err(StreamError::Task(first.clone())),
            None => Ok(()),
        }
    }
}

/// Removing a file that is already gone counts as success.
async fn delete_video(path: &str) -> Result<()> {
    let path = Path::new(path);
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("video already absent: {}", path.display());
            Ok(())
        }
        Err(e) => Err(StreamError::Io(e)),
    }
}

/// Pipeline that ages out completed and failed task records.
pub struct SweepPipeline {
    store: Arc<TaskStore>,
    max_age: Duration,
    /// One sentinel per runner cycle; the Idle that closes the cycle
    /// re-arms the next one.
    armed: AtomicBool,
}

impl SweepPipeline {
    pub fn new(store: Arc<TaskStore>, max_age: Duration) -> Self {
        Self {
            store,
            max_age,
            armed: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl TaskPipeline for SweepPipeline {
    type Item = ();

    async fn dispatch(&self, tx: &mpsc::Sender<()>) -> Result<DispatchOutcome> {
        if !self.armed.swap(false, Ordering::AcqRel) {
            self.armed.store(true, Ordering::Release);
            return Ok(DispatchOutcome::Idle);
        }
        tx.send(())
            .await
            .map_err(|e| StreamError::Task(format!("dispatch channel closed: {e}")))?;
        Ok(DispatchOutcome::Dispatched)
    }

    async fn execute(&self, rx: &mut mpsc::Receiver<()>) -> Result<()> {
        while rx.try_recv().is_ok() {
            let removed = self.store.cleanup_completed(self.max_age)?;
            if removed > 0 {
                info!("cleaned up {removed} old task records");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::runner::TaskRunner;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_deletion_pipeline_removes_file_and_record() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TaskStore::new(dir.path().join("tasks")).unwrap());

        let victim = dir.path().join("doomed.mp4");
        std::fs::write(&victim, b"bytes").unwrap();
        store
            .add(VIDEO_DELETION, victim.to_str().unwrap())
            .unwrap();

        let runner = TaskRunner::new(3, Arc::new(DeletionPipeline::new(Arc::clone(&store), 3)));
        runner.run(&CancellationToken::new()).await;

        assert!(!victim.exists());
        assert_eq!(store.stats().unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_deletion_of_missing_file_succeeds() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TaskStore::new(dir.path().join("tasks")).unwrap());
        store
            .add(VIDEO_DELETION, dir.path().join("ghost.mp4").to_str().unwrap())
            .unwrap();

        let runner = TaskRunner::new(3, Arc::new(DeletionPipeline::new(Arc::clone(&store), 3)));
        runner.run(&CancellationToken::new()).await;

        assert_eq!(store.stats().unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_failed_deletion_marks_task_failed() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TaskStore::new(dir.path().join("tasks")).unwrap());

        // A directory cannot be removed with remove_file.
        let obstinate = dir.path().join("actually_a_dir.mp4");
        std::fs::create_dir(&obstinate).unwrap();
        store
            .add(VIDEO_DELETION, obstinate.to_str().unwrap())
            .unwrap();

        let runner = TaskRunner::new(3, Arc::new(DeletionPipeline::new(Arc::clone(&store), 3)));
        runner.run(&CancellationToken::new()).await;

        let stats = store.stats().unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total, 1);
        assert!(obstinate.exists());
    }

    #[tokio::test]
    async fn test_deletion_batch_limit() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TaskStore::new(dir.path().join("tasks")).unwrap());
        for i in 0..5 {
            let path = dir.path().join(format!("v{i}.mp4"));
            std::fs::write(&path, b"x").unwrap();
            store.add(VIDEO_DELETION, path.to_str().unwrap()).unwrap();
        }

        // The runner loops dispatch batches until the store is drained,
        // three records per dispatch.
        let runner = TaskRunner::new(3, Arc::new(DeletionPipeline::new(Arc::clone(&store), 3)));
        runner.run(&CancellationToken::new()).await;

        assert_eq!(store.stats().unwrap().total, 0);
        for i in 0..5 {
            assert!(!dir.path().join(format!("v{i}.mp4")).exists());
        }
    }

    #[tokio::test]
    async fn test_sweep_pipeline_ages_out_records() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TaskStore::new(dir.path().join("tasks")).unwrap());
        let record = store.add(VIDEO_DELETION, "/tmp/x").unwrap();
        store
            .update_status(&record.id, TaskStatus::Completed)
            .unwrap();

        // Zero max age: everything completed is eligible immediately.
        let pipeline = Arc::new(SweepPipeline::new(Arc::clone(&store), Duration::ZERO));
        let runner = TaskRunner::new(1, Arc::clone(&pipeline));
        runner.run(&CancellationToken::new()).await;

        assert_eq!(store.stats().unwrap().total, 0);

        // The pipeline re-arms: a second cycle sweeps again.
        let record = store.add(VIDEO_DELETION, "/tmp/y").unwrap();
        store
            .update_status(&record.id, TaskStatus::Completed)
            .unwrap();
        runner.run(&CancellationToken::new()).await;
        assert_eq!(store.stats().unwrap().total, 0);
    }
}
