use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::Result;
use crate::tasks::cleanup::{DeletionPipeline, SweepPipeline};
use crate::tasks::runner::Worker;
use crate::tasks::store::TaskStore;
use crate::tasks::{TaskRecord, VIDEO_DELETION};

/// Tick intervals and batch sizing. Defaults match production cadence;
/// tests compress them.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub video_cleanup_interval: Duration,
    pub record_cleanup_interval: Duration,
    pub deletion_batch: usize,
    pub completed_max_age: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            video_cleanup_interval: Duration::from_secs(30),
            record_cleanup_interval: Duration::from_secs(60 * 60),
            deletion_batch: 3,
            completed_max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Owns the background workers. Workers hold only the shared store handle,
/// never a reference back to the scheduler.
pub struct Scheduler {
    store: Arc<TaskStore>,
    config: SchedulerConfig,
    inner: Mutex<SchedulerInner>,
}

#[derive(Default)]
struct SchedulerInner {
    running: bool,
    cancel: Option<CancellationToken>,
    workers: Vec<Worker>,
}

impl Scheduler {
    pub fn new(store: Arc<TaskStore>, config: SchedulerConfig) -> Self {
        Self {
            store,
            config,
            inner: Mutex::new(SchedulerInner::default()),
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Idempotent: starting a running scheduler is a no-op.
    pub async fn start(&self) {
        let mut inner = self.inner.lock().await;
        if inner.running {
            return;
        }

        info!("starting scheduler");
        let cancel = CancellationToken::new();

        let deletion = Arc::new(DeletionPipeline::new(
            Arc::clone(&self.store),
            self.config.deletion_batch,
        ));
        let sweep = Arc::new(SweepPipeline::new(
            Arc::clone(&self.store),
            self.config.completed_max_age,
        ));

        inner.workers = vec![
            Worker::spawn(
                "video_cleanup",
                self.config.video_cleanup_interval,
                self.config.deletion_batch,
                deletion,
                cancel.child_token(),
            ),
            Worker::spawn(
                "cleanup",
                self.config.record_cleanup_interval,
                1,
                sweep,
                cancel.child_token(),
            ),
        ];
        inner.cancel = Some(cancel);
        inner.running = true;
        info!("scheduler started");
    }

    /// Cancel the tickers and wait for workers to finish their current
    /// cycle; in-flight deletions complete rather than being aborted.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if !inner.running {
            return;
        }

        info!("stopping scheduler");
        if let Some(cancel) = inner.cancel.take() {
            cancel.cancel();
        }
        for worker in inner.workers.drain(..) {
            worker.join().await;
        }
        inner.running = false;
        info!("scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.running
    }

    /// Enqueue a deletion for an absolute file path.
    pub fn add_video_deletion(&self, path: &str) -> Result<TaskRecord> {
        self.store.add(VIDEO_DELETION, path)
    }

    /// Running flag, per-worker liveness, and task-store counts.
    pub async fn stats(&self) -> serde_json::Value {
        let inner = self.inner.lock().await;
        let worker_status: HashMap<&str, bool> = inner
            .workers
            .iter()
            .map(|w| (w.name(), w.is_running()))
            .collect();
        let tasks = self.store.stats().unwrap_or_default();

        json!({
            "running": inner.running,
            "active_workers": inner.workers.len(),
            "worker_status": worker_status,
            "tasks": tasks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            video_cleanup_interval: Duration::from_millis(50),
            record_cleanup_interval: Duration::from_millis(80),
            deletion_batch: 3,
            completed_max_age: Duration::ZERO,
        }
    }

    async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("timed out waiting for {what}");
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TaskStore::new(dir.path().join("tasks")).unwrap());
        let scheduler = Scheduler::new(store, fast_config());

        assert!(!scheduler.is_running().await);
        scheduler.start().await;
        scheduler.start().await;
        assert!(scheduler.is_running().await);

        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running().await);

        // And it can come back up.
        scheduler.start().await;
        assert!(scheduler.is_running().await);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_pending_deletion_executes_within_a_tick() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TaskStore::new(dir.path().join("tasks")).unwrap());
        let scheduler = Scheduler::new(Arc::clone(&store), fast_config());

        let victim = dir.path().join("doomed.mp4");
        std::fs::write(&victim, b"bytes").unwrap();
        scheduler
            .add_video_deletion(victim.to_str().unwrap())
            .unwrap();
        assert_eq!(store.stats().unwrap().pending, 1);

        scheduler.start().await;
        wait_until("deletion to run", || {
            !victim.exists() && store.stats().unwrap().total == 0
        })
        .await;
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_failed_tasks_are_swept() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TaskStore::new(dir.path().join("tasks")).unwrap());
        let scheduler = Scheduler::new(Arc::clone(&store), fast_config());

        // Deleting a directory through remove_file fails and marks the
        // task failed; the sweep (zero max age) then removes the record.
        let obstinate = dir.path().join("dir.mp4");
        std::fs::create_dir(&obstinate).unwrap();
        scheduler
            .add_video_deletion(obstinate.to_str().unwrap())
            .unwrap();

        scheduler.start().await;
        wait_until("failed task to be swept", || {
            store.stats().unwrap().total == 0
        })
        .await;
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_stats_shape() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TaskStore::new(dir.path().join("tasks")).unwrap());
        let scheduler = Scheduler::new(Arc::clone(&store), fast_config());

        let stats = scheduler.stats().await;
        assert_eq!(stats["running"], false);
        assert_eq!(stats["active_workers"], 0);

        scheduler.start().await;
        let stats = scheduler.stats().await;
        assert_eq!(stats["running"], true);
        assert_eq!(stats["active_workers"], 2);
        assert_eq!(stats["worker_status"]["video_cleanup"], true);
        assert_eq!(stats["worker_status"]["cleanup"], true);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_tasks_enqueued_while_stopped_run_after_start() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(TaskStore::new(dir.path().join("tasks")).unwrap());
        let scheduler = Scheduler::new(Arc::clone(&store), fast_config());

        let victim = dir.path().join("later.mp4");
        std::fs::write(&victim, b"x").unwrap();
        scheduler
            .add_video_deletion(victim.to_str().unwrap())
            .unwrap();

        // Nothing happens while stopped.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(victim.exists());

        scheduler.start().await;
        wait_until("startup catch-up deletion", || !victim.exists()).await;
        scheduler.stop().await;
    }
}
