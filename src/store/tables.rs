//! Table logic shared by the in-process backends.

use super::{StoreError, StoreResult, TaskFeed};
use crate::domain::{
    SessionId, SessionPatch, SessionQuery, TaskEvent, TaskId, TaskPatch, TaskRecord, UserId,
    WorkSession,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

/// Every record of every user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
    #[serde(default)]
    pub sessions: Vec<WorkSession>,
}

impl Tables {
    pub fn list_tasks(&self, user: &UserId) -> Vec<TaskRecord> {
        // Reverse insertion order first so equal timestamps still list newest first
        let mut tasks: Vec<TaskRecord> = self
            .tasks
            .iter()
            .rev()
            .filter(|t| &t.user_id == user)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    pub fn create_task(&mut self, user: &UserId, name: &str, now: DateTime<Utc>) -> TaskRecord {
        let record = TaskRecord::new(user.clone(), name.to_string(), now);
        self.tasks.push(record.clone());
        record
    }

    pub fn update_task(
        &mut self,
        user: &UserId,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> StoreResult<TaskRecord> {
        let record = self
            .tasks
            .iter_mut()
            .find(|t| &t.id == id && &t.user_id == user)
            .ok_or_else(|| StoreError::NotFound(format!("task {}", id)))?;
        record.apply(patch);
        Ok(record.clone())
    }

    pub fn delete_task(&mut self, user: &UserId, id: &TaskId) -> u64 {
        let before = self.tasks.len();
        self.tasks.retain(|t| !(&t.id == id && &t.user_id == user));
        (before - self.tasks.len()) as u64
    }

    /// Task events that turn `self` into `newer`, tagged with the owning user
    pub fn task_changes(&self, newer: &Tables) -> Vec<(UserId, TaskEvent)> {
        let mut events = Vec::new();
        for record in &newer.tasks {
            match self.tasks.iter().find(|t| t.id == record.id) {
                None => events.push((record.user_id.clone(), TaskEvent::Inserted(record.clone()))),
                Some(old) => {
                    let patch = old.changes_to(record);
                    if !patch.is_empty() {
                        events.push((
                            record.user_id.clone(),
                            TaskEvent::Updated {
                                id: record.id.clone(),
                                patch,
                            },
                        ));
                    }
                }
            }
        }
        for old in &self.tasks {
            if !newer.tasks.iter().any(|t| t.id == old.id) {
                events.push((old.user_id.clone(), TaskEvent::Deleted { id: old.id.clone() }));
            }
        }
        events
    }

    pub fn active_session(&self, user: &UserId) -> Option<WorkSession> {
        self.sessions
            .iter()
            .filter(|s| &s.user_id == user && s.is_active())
            .max_by_key(|s| s.check_in)
            .cloned()
    }

    pub fn list_sessions(&self, user: &UserId, query: &SessionQuery) -> Vec<WorkSession> {
        let mut sessions: Vec<WorkSession> = self
            .sessions
            .iter()
            .filter(|s| &s.user_id == user && query.matches(s))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.check_in.cmp(&a.check_in));
        if let Some(limit) = query.limit {
            sessions.truncate(limit);
        }
        sessions
    }

    pub fn create_session(
        &mut self,
        user: &UserId,
        check_in: DateTime<Utc>,
    ) -> StoreResult<WorkSession> {
        if self.active_session(user).is_some() {
            return Err(StoreError::Conflict(
                "an active work session already exists".to_string(),
            ));
        }
        let session = WorkSession::new(user.clone(), check_in);
        self.sessions.push(session.clone());
        Ok(session)
    }

    pub fn update_session(
        &mut self,
        user: &UserId,
        id: &SessionId,
        patch: &SessionPatch,
    ) -> StoreResult<WorkSession> {
        let session = self
            .sessions
            .iter_mut()
            .find(|s| &s.id == id && &s.user_id == user)
            .ok_or_else(|| StoreError::NotFound(format!("session {}", id)))?;
        session.apply(patch);
        Ok(session.clone())
    }

    pub fn delete_session(&mut self, user: &UserId, id: &SessionId) -> u64 {
        let before = self.sessions.len();
        self.sessions
            .retain(|s| !(&s.id == id && &s.user_id == user));
        (before - self.sessions.len()) as u64
    }

    pub fn delete_sessions(&mut self, user: &UserId, since: Option<DateTime<Utc>>) -> u64 {
        let query = SessionQuery {
            since,
            completed_only: true,
            limit: None,
        };
        let before = self.sessions.len();
        self.sessions
            .retain(|s| !(&s.user_id == user && query.matches(s)));
        (before - self.sessions.len()) as u64
    }
}

/// Realtime subscribers, keyed by user
#[derive(Debug, Default)]
pub struct Feeds {
    subscribers: Mutex<Vec<(UserId, mpsc::UnboundedSender<TaskEvent>)>>,
}

impl Feeds {
    pub fn subscribe(&self, user: &UserId) -> TaskFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((user.clone(), tx));
        rx
    }

    /// Deliver `event` to every live subscriber of `user`; closed feeds are dropped
    pub fn publish(&self, user: &UserId, event: TaskEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|(owner, tx)| owner != user || tx.send(event.clone()).is_ok());
    }
}
