//! Backend persisted as a single JSON document in the data directory.
//!
//! Every mutation rewrites the whole file atomically, so a crash never leaves
//! a half-written store behind. Other processes may write the same file; a
//! change in its modification time or size makes the next call re-read it,
//! and the task differences are published on this store's feeds. Two writes
//! landing within one timestamp tick with the same size are not told apart.

use super::tables::{Feeds, Tables};
use super::{SessionStore, StoreResult, TaskFeed, TaskStore};
use crate::clock::Clock;
use crate::domain::{
    SessionId, SessionPatch, SessionQuery, TaskEvent, TaskId, TaskPatch, TaskRecord, UserId,
    WorkSession,
};
use crate::persistence::{atomic_write, read_file};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

/// Modification time and size of the file as last read or written
type Fingerprint = (SystemTime, u64);

struct Disk {
    tables: Tables,
    seen: Option<Fingerprint>,
}

pub struct FileStore {
    path: PathBuf,
    disk: Mutex<Disk>,
    feeds: Feeds,
    clock: Arc<dyn Clock>,
}

impl FileStore {
    /// Open the store at `path`; a missing or empty file starts empty
    pub fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let seen = fingerprint(&path)?;
        let tables = load_tables(&path)?;
        tracing::debug!(
            path = %path.display(),
            tasks = tables.tasks.len(),
            sessions = tables.sessions.len(),
            "opened file store"
        );
        Ok(Self {
            path,
            disk: Mutex::new(Disk { tables, seen }),
            feeds: Feeds::default(),
            clock,
        })
    }

    /// Lock the tables after catching up with any change made by another process
    fn current(&self) -> StoreResult<MutexGuard<'_, Disk>> {
        let mut disk = self.disk.lock().unwrap_or_else(PoisonError::into_inner);
        let seen = fingerprint(&self.path)?;
        if seen != disk.seen {
            let tables = load_tables(&self.path)?;
            let changes = disk.tables.task_changes(&tables);
            tracing::debug!(
                path = %self.path.display(),
                changes = changes.len(),
                "store changed on disk, reloaded"
            );
            disk.tables = tables;
            disk.seen = seen;
            for (user, event) in changes {
                self.feeds.publish(&user, event);
            }
        }
        Ok(disk)
    }

    /// Apply `change` to a copy, persist it, then commit it in memory.
    /// A failed save leaves the in-memory tables untouched.
    fn write<T>(&self, change: impl FnOnce(&mut Tables) -> StoreResult<T>) -> StoreResult<T> {
        let mut disk = self.current()?;
        let mut next = disk.tables.clone();
        let out = change(&mut next)?;
        let content = serde_json::to_string_pretty(&next)?;
        atomic_write(&self.path, &content)
            .with_context(|| format!("Failed to save store: {}", self.path.display()))?;
        disk.tables = next;
        disk.seen = fingerprint(&self.path)?;
        Ok(out)
    }
}

fn load_tables(path: &Path) -> StoreResult<Tables> {
    let content = read_file(path)?;
    if content.trim().is_empty() {
        Ok(Tables::default())
    } else {
        Ok(serde_json::from_str(&content)?)
    }
}

fn fingerprint(path: &Path) -> StoreResult<Option<Fingerprint>> {
    match fs::metadata(path) {
        Ok(meta) => {
            let modified = meta
                .modified()
                .with_context(|| format!("Failed to stat store: {}", path.display()))?;
            Ok(Some((modified, meta.len())))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(anyhow::Error::new(err)
            .context(format!("Failed to stat store: {}", path.display()))
            .into()),
    }
}

#[async_trait]
impl TaskStore for FileStore {
    async fn list_tasks(&self, user: &UserId) -> StoreResult<Vec<TaskRecord>> {
        Ok(self.current()?.tables.list_tasks(user))
    }

    async fn create_task(&self, user: &UserId, name: &str) -> StoreResult<TaskRecord> {
        let now = self.clock.now();
        let record = self.write(|t| Ok(t.create_task(user, name, now)))?;
        self.feeds.publish(user, TaskEvent::Inserted(record.clone()));
        Ok(record)
    }

    async fn update_task(
        &self,
        user: &UserId,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> StoreResult<TaskRecord> {
        let record = self.write(|t| t.update_task(user, id, patch))?;
        self.feeds.publish(
            user,
            TaskEvent::Updated {
                id: id.clone(),
                patch: patch.clone(),
            },
        );
        Ok(record)
    }

    async fn delete_task(&self, user: &UserId, id: &TaskId) -> StoreResult<u64> {
        let removed = self.write(|t| Ok(t.delete_task(user, id)))?;
        if removed > 0 {
            self.feeds.publish(user, TaskEvent::Deleted { id: id.clone() });
        }
        Ok(removed)
    }

    fn subscribe(&self, user: &UserId) -> TaskFeed {
        self.feeds.subscribe(user)
    }

    fn poll(&self) -> StoreResult<()> {
        self.current().map(|_| ())
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn active_session(&self, user: &UserId) -> StoreResult<Option<WorkSession>> {
        Ok(self.current()?.tables.active_session(user))
    }

    async fn list_sessions(
        &self,
        user: &UserId,
        query: &SessionQuery,
    ) -> StoreResult<Vec<WorkSession>> {
        Ok(self.current()?.tables.list_sessions(user, query))
    }

    async fn create_session(
        &self,
        user: &UserId,
        check_in: DateTime<Utc>,
    ) -> StoreResult<WorkSession> {
        self.write(|t| t.create_session(user, check_in))
    }

    async fn update_session(
        &self,
        user: &UserId,
        id: &SessionId,
        patch: &SessionPatch,
    ) -> StoreResult<WorkSession> {
        self.write(|t| t.update_session(user, id, patch))
    }

    async fn delete_session(&self, user: &UserId, id: &SessionId) -> StoreResult<u64> {
        self.write(|t| Ok(t.delete_session(user, id)))
    }

    async fn delete_sessions(
        &self,
        user: &UserId,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<u64> {
        self.write(|t| Ok(t.delete_sessions(user, since)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::StoreError;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap(),
        ))
    }

    fn setup() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        (dir, path)
    }

    #[tokio::test]
    async fn test_missing_file_opens_empty() {
        let (_dir, path) = setup();
        let store = FileStore::open(&path, clock()).unwrap();
        let tasks = store.list_tasks(&UserId::from("alice")).await.unwrap();
        assert!(tasks.is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let (_dir, path) = setup();
        let user = UserId::from("alice");
        let clock = clock();

        let store = FileStore::open(&path, clock.clone()).unwrap();
        let task = store.create_task(&user, "Write report").await.unwrap();
        store
            .update_task(&user, &task.id, &TaskPatch::default().attempts(vec![2]))
            .await
            .unwrap();
        store.create_session(&user, clock.now()).await.unwrap();
        drop(store);

        let reopened = FileStore::open(&path, clock).unwrap();
        let tasks = reopened.list_tasks(&user).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "Write report");
        assert_eq!(tasks[0].attempts, vec![2]);
        assert!(reopened.active_session(&user).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_conflict_does_not_write() {
        let (_dir, path) = setup();
        let user = UserId::from("alice");
        let clock = clock();
        let store = FileStore::open(&path, clock.clone()).unwrap();

        store.create_session(&user, clock.now()).await.unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let err = store.create_session(&user, clock.now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let (_dir, path) = setup();
        std::fs::write(&path, "{ not json").unwrap();
        let err = FileStore::open(&path, clock()).err().unwrap();
        assert!(matches!(err, StoreError::Serde(_)));
    }

    #[tokio::test]
    async fn test_feed_receives_file_writes() {
        let (_dir, path) = setup();
        let user = UserId::from("alice");
        let store = FileStore::open(&path, clock()).unwrap();
        let mut feed = store.subscribe(&user);

        let task = store.create_task(&user, "a").await.unwrap();
        store.delete_task(&user, &task.id).await.unwrap();

        assert_eq!(feed.try_recv().unwrap(), TaskEvent::Inserted(task.clone()));
        assert_eq!(feed.try_recv().unwrap(), TaskEvent::Deleted { id: task.id });
    }

    #[tokio::test]
    async fn test_poll_publishes_changes_from_another_process() {
        let (_dir, path) = setup();
        let user = UserId::from("alice");
        let watcher = FileStore::open(&path, clock()).unwrap();
        let other = FileStore::open(&path, clock()).unwrap();
        let mut feed = watcher.subscribe(&user);

        let task = other.create_task(&user, "Shared").await.unwrap();
        watcher.poll().unwrap();
        assert_eq!(feed.try_recv().unwrap(), TaskEvent::Inserted(task.clone()));

        other
            .update_task(&user, &task.id, &TaskPatch::default().name("Shared and renamed"))
            .await
            .unwrap();
        watcher.poll().unwrap();
        assert_eq!(
            feed.try_recv().unwrap(),
            TaskEvent::Updated {
                id: task.id.clone(),
                patch: TaskPatch::default().name("Shared and renamed"),
            }
        );

        // Nothing changed since the last look
        watcher.poll().unwrap();
        assert!(feed.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_writes_keep_records_from_another_process() {
        let (_dir, path) = setup();
        let user = UserId::from("alice");
        let first = FileStore::open(&path, clock()).unwrap();
        let second = FileStore::open(&path, clock()).unwrap();

        first.create_task(&user, "from first").await.unwrap();
        second.create_task(&user, "from second").await.unwrap();

        let reopened = FileStore::open(&path, clock()).unwrap();
        let mut names: Vec<String> = reopened
            .list_tasks(&user)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["from first", "from second"]);
    }
}
