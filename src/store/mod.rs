//! Remote store capability interfaces.
//!
//! The state machines are written against [`TaskStore`] and [`SessionStore`]
//! only; the concrete backend is picked by the composition root.

pub mod file;
pub mod memory;
pub mod tables;

use crate::domain::{
    SessionId, SessionPatch, SessionQuery, TaskEvent, TaskId, TaskPatch, TaskRecord, UserId,
    WorkSession,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use tables::{Feeds, Tables};

/// Failure reported by a backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("persistence error: {0:#}")]
    Persistence(#[from] anyhow::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Realtime inbox of change events for one user's tasks
pub type TaskFeed = mpsc::UnboundedReceiver<TaskEvent>;

/// Managed table of task records
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// The user's tasks, newest first
    async fn list_tasks(&self, user: &UserId) -> StoreResult<Vec<TaskRecord>>;

    async fn create_task(&self, user: &UserId, name: &str) -> StoreResult<TaskRecord>;

    async fn update_task(
        &self,
        user: &UserId,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> StoreResult<TaskRecord>;

    /// Returns the number of rows removed (0 when absent or not owned)
    async fn delete_task(&self, user: &UserId, id: &TaskId) -> StoreResult<u64>;

    /// Open a change feed for the user's tasks
    fn subscribe(&self, user: &UserId) -> TaskFeed;

    /// Pick up changes made by other writers and publish them on the open feeds
    fn poll(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Managed table of work-session records
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The user's open session, if any
    async fn active_session(&self, user: &UserId) -> StoreResult<Option<WorkSession>>;

    async fn list_sessions(
        &self,
        user: &UserId,
        query: &SessionQuery,
    ) -> StoreResult<Vec<WorkSession>>;

    /// Fails with [`StoreError::Conflict`] if the user already has an open session
    async fn create_session(
        &self,
        user: &UserId,
        check_in: DateTime<Utc>,
    ) -> StoreResult<WorkSession>;

    async fn update_session(
        &self,
        user: &UserId,
        id: &SessionId,
        patch: &SessionPatch,
    ) -> StoreResult<WorkSession>;

    /// Returns the number of rows removed (0 when absent or not owned)
    async fn delete_session(&self, user: &UserId, id: &SessionId) -> StoreResult<u64>;

    /// Remove completed sessions with `check_in >= since`. Open sessions are never touched.
    async fn delete_sessions(
        &self,
        user: &UserId,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<u64>;
}

/// Bound a store call; expiry becomes [`StoreError::Timeout`].
pub async fn bounded<T, F>(limit: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(StoreError::Timeout(limit)))
}
