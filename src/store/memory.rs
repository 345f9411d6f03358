//! In-process backend. Also the test double: it can be told to fail or stall.

use super::tables::{Feeds, Tables};
use super::{SessionStore, StoreError, StoreResult, TaskFeed, TaskStore};
use crate::clock::Clock;
use crate::domain::{
    SessionId, SessionPatch, SessionQuery, TaskEvent, TaskId, TaskPatch, TaskRecord, UserId,
    WorkSession,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Injected failures and latency
#[derive(Debug, Default)]
struct Faults {
    failing: AtomicBool,
    fail_next_writes: AtomicUsize,
    latency_ms: AtomicU64,
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    feeds: Feeds,
    clock: Arc<dyn Clock>,
    faults: Faults,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_tables(Tables::default(), clock)
    }

    pub fn with_tables(tables: Tables, clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Mutex::new(tables),
            feeds: Feeds::default(),
            clock,
            faults: Faults::default(),
        }
    }

    /// Make every call fail with [`StoreError::Unavailable`]
    pub fn set_failing(&self, failing: bool) {
        self.faults.failing.store(failing, Ordering::SeqCst);
    }

    /// Make the next `count` mutating calls fail
    pub fn fail_next_writes(&self, count: usize) {
        self.faults.fail_next_writes.store(count, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.faults
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Copy of the raw tables, for inspection
    pub fn dump(&self) -> Tables {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn before_read(&self) -> StoreResult<()> {
        self.delay().await;
        if self.faults.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    async fn before_write(&self) -> StoreResult<()> {
        self.before_read().await?;
        let consumed = self
            .faults
            .fail_next_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }

    async fn delay(&self) {
        let ms = self.faults.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn list_tasks(&self, user: &UserId) -> StoreResult<Vec<TaskRecord>> {
        self.before_read().await?;
        Ok(self.lock().list_tasks(user))
    }

    async fn create_task(&self, user: &UserId, name: &str) -> StoreResult<TaskRecord> {
        self.before_write().await?;
        let record = self.lock().create_task(user, name, self.clock.now());
        self.feeds.publish(user, TaskEvent::Inserted(record.clone()));
        Ok(record)
    }

    async fn update_task(
        &self,
        user: &UserId,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> StoreResult<TaskRecord> {
        self.before_write().await?;
        let record = self.lock().update_task(user, id, patch)?;
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
        self.before_write().await?;
        let removed = self.lock().delete_task(user, id);
        if removed > 0 {
            self.feeds.publish(user, TaskEvent::Deleted { id: id.clone() });
        }
        Ok(removed)
    }

    fn subscribe(&self, user: &UserId) -> TaskFeed {
        self.feeds.subscribe(user)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn active_session(&self, user: &UserId) -> StoreResult<Option<WorkSession>> {
        self.before_read().await?;
        Ok(self.lock().active_session(user))
    }

    async fn list_sessions(
        &self,
        user: &UserId,
        query: &SessionQuery,
    ) -> StoreResult<Vec<WorkSession>> {
        self.before_read().await?;
        Ok(self.lock().list_sessions(user, query))
    }

    async fn create_session(
        &self,
        user: &UserId,
        check_in: DateTime<Utc>,
    ) -> StoreResult<WorkSession> {
        self.before_write().await?;
        self.lock().create_session(user, check_in)
    }

    async fn update_session(
        &self,
        user: &UserId,
        id: &SessionId,
        patch: &SessionPatch,
    ) -> StoreResult<WorkSession> {
        self.before_write().await?;
        self.lock().update_session(user, id, patch)
    }

    async fn delete_session(&self, user: &UserId, id: &SessionId) -> StoreResult<u64> {
        self.before_write().await?;
        Ok(self.lock().delete_session(user, id))
    }

    async fn delete_sessions(
        &self,
        user: &UserId,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<u64> {
        self.before_write().await?;
        Ok(self.lock().delete_sessions(user, since))
    }
}
