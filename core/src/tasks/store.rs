use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, StreamError};
use crate::tasks::{TaskRecord, TaskStatus};

/// Durable queue of task records: a flat directory, one JSON file per
/// task. Scans take the read lock; mutations take the write lock.
#[derive(Debug)]
pub struct TaskStore {
    data_dir: PathBuf,
    lock: RwLock<()>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl TaskStore {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            lock: RwLock::new(()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Append a new pending record. The id is `<now_ns>_<type>`.
    pub fn add(&self, kind: &str, data: &str) -> Result<TaskRecord> {
        let _guard = self.lock.write().expect("task store lock poisoned");

        let now = Utc::now();
        let nanos = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000));
        let record = TaskRecord {
            id: format!("{nanos}_{kind}"),
            kind: kind.to_string(),
            data: data.to_string(),
            created_at: now,
            status: TaskStatus::Pending,
        };

        self.write_record(&record)?;
        Ok(record)
    }

    /// Up to `limit` pending records of the given type, in directory scan
    /// order. Corrupt files are skipped silently.
    pub fn pending(&self, kind: &str, limit: usize) -> Result<Vec<TaskRecord>> {
        let _guard = self.lock.read().expect("task store lock poisoned");

        let mut tasks = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            if tasks.len() >= limit {
                break;
            }
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(task) = read_record(&path) else {
                debug!("skipping corrupt task file {}", path.display());
                continue;
            };
            if task.kind == kind && task.status == TaskStatus::Pending {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    /// Read-modify-write of a record's status. Missing records are an
    /// error for the caller to log, never a panic.
    pub fn update_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let _guard = self.lock.write().expect("task store lock poisoned");

        let path = self.task_path(id);
        let mut task = read_record(&path)
            .map_err(|e| StreamError::Task(format!("failed to read task {id}: {e}")))?;
        task.status = status;
        self.write_record(&task)
    }

    /// Delete a record; missing is not an error.
    pub fn remove(&self, id: &str) -> Result<()> {
        let _guard = self.lock.write().expect("task store lock poisoned");

        match std::fs::remove_file(self.task_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove completed and failed records older than `max_age`.
    /// Returns how many were removed.
    pub fn cleanup_completed(&self, max_age: Duration) -> Result<usize> {
        let _guard = self.lock.write().expect("task store lock poisoned");

        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age)
                .map_err(|e| StreamError::Task(format!("invalid cleanup age: {e}")))?;
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(task) = read_record(&path) else {
                continue;
            };
            let done = matches!(task.status, TaskStatus::Completed | TaskStatus::Failed);
            if done && task.created_at < cutoff {
                if std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Aggregate counts by status.
    pub fn stats(&self) -> Result<TaskStats> {
        let _guard = self.lock.read().expect("task store lock poisoned");

        let mut stats = TaskStats::default();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(task) = read_record(&path) else {
                continue;
            };
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
            stats.total += 1;
        }
        Ok(stats)
    }

    fn task_path(&self, id: &str) -> PathBuf {
        self.data_dir.join(format!("{id}.json"))
    }

    /// Serialize to a temp file in the same directory, then rename over
    /// the final name so readers never observe a half-written record.
    fn write_record(&self, record: &TaskRecord) -> Result<()> {
        let tmp = self.data_dir.join(format!(".{}.tmp", record.id));
        let encoded = serde_json::to_vec(record)?;
        std::fs::write(&tmp, encoded)?;
        std::fs::rename(&tmp, self.task_path(&record.id))?;
        Ok(())
    }
}

fn read_record(path: &Path) -> Result<TaskRecord> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::VIDEO_DELETION;
    use tempfile::TempDir;

    fn store() -> (TempDir, TaskStore) {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path().join("tasks")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_add_creates_pending_record() {
        let (_dir, store) = store();
        let record = store.add(VIDEO_DELETION, "/tmp/a.mp4").unwrap();

        assert!(record.id.ends_with("_video_deletion"));
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.data, "/tmp/a.mp4");

        let pending = store.pending(VIDEO_DELETION, 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, record.id);
    }

    #[test]
    fn test_lifecycle_roundtrip() {
        let (_dir, store) = store();
        let record = store.add(VIDEO_DELETION, "/tmp/b.mp4").unwrap();

        store
            .update_status(&record.id, TaskStatus::Processing)
            .unwrap();
        assert!(store.pending(VIDEO_DELETION, 10).unwrap().is_empty());

        store.remove(&record.id).unwrap();
        assert!(store.pending(VIDEO_DELETION, 10).unwrap().is_empty());
        assert_eq!(store.stats().unwrap().total, 0);

        // Removing again is fine; updating a removed id is an error.
        store.remove(&record.id).unwrap();
        assert!(store
            .update_status(&record.id, TaskStatus::Failed)
            .is_err());
    }

    #[test]
    fn test_pending_respects_limit_and_type() {
        let (_dir, store) = store();
        for i in 0..5 {
            store.add(VIDEO_DELETION, &format!("/tmp/{i}.mp4")).unwrap();
        }
        store.add("other_type", "/tmp/x").unwrap();

        assert_eq!(store.pending(VIDEO_DELETION, 3).unwrap().len(), 3);
        assert_eq!(store.pending(VIDEO_DELETION, 100).unwrap().len(), 5);
        assert_eq!(store.pending("other_type", 100).unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_files_skipped() {
        let (_dir, store) = store();
        store.add(VIDEO_DELETION, "/tmp/ok.mp4").unwrap();
        std::fs::write(store.data_dir().join("junk_video_deletion.json"), b"{nope").unwrap();

        let pending = store.pending(VIDEO_DELETION, 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(store.stats().unwrap().total, 1);
    }

    #[test]
    fn test_cleanup_completed_by_age() {
        let (_dir, store) = store();
        let old = store.add(VIDEO_DELETION, "/tmp/old.mp4").unwrap();
        let fresh = store.add(VIDEO_DELETION, "/tmp/fresh.mp4").unwrap();

        // Backdate the first record by rewriting it.
        let mut backdated = old.clone();
        backdated.created_at = Utc::now() - chrono::Duration::hours(48);
        backdated.status = TaskStatus::Failed;
        store.write_record(&backdated).unwrap();
        store
            .update_status(&fresh.id, TaskStatus::Completed)
            .unwrap();

        let removed = store
            .cleanup_completed(Duration::from_secs(24 * 60 * 60))
            .unwrap();
        assert_eq!(removed, 1);

        let stats = store.stats().unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn test_cleanup_spares_pending_and_processing() {
        let (_dir, store) = store();
        let a = store.add(VIDEO_DELETION, "/tmp/a.mp4").unwrap();
        let mut backdated = a.clone();
        backdated.created_at = Utc::now() - chrono::Duration::days(7);
        store.write_record(&backdated).unwrap();

        let removed = store.cleanup_completed(Duration::from_secs(60)).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(store.stats().unwrap().pending, 1);
    }

    #[test]
    fn test_writes_leave_no_temp_files() {
        let (_dir, store) = store();
        store.add(VIDEO_DELETION, "/tmp/a.mp4").unwrap();
        store.add(VIDEO_DELETION, "/tmp/b.mp4").unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(store.data_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path().extension().and_then(|x| x.to_str()) == Some("tmp")
            })
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let (_dir, store) = store();
        let a = store.add(VIDEO_DELETION, "x").unwrap();
        let b = store.add(VIDEO_DELETION, "y").unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.stats().unwrap().total, 2);
    }

    #[test]
    fn test_new_fails_on_unwritable_location() {
        // A path below an existing file cannot be created as a directory.
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("blocker");
        std::fs::write(&file, b"x").unwrap();
        assert!(TaskStore::new(file.join("tasks")).is_err());
    }
}
