use super::enums::TaskStatus;
use super::ids::{TaskId, UserId};
use crate::clock::whole_seconds_between;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable shape of a task as the remote store keeps it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub user_id: UserId,
    pub name: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// Seconds accumulated in the current attempt before `started_at`
    #[serde(default)]
    pub base_time: u64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub best_time: Option<u64>,
    #[serde(default)]
    pub attempts: Vec<u64>,
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(user_id: UserId, name: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::generate(),
            user_id,
            name,
            status: TaskStatus::Idle,
            base_time: 0,
            started_at: None,
            best_time: None,
            attempts: Vec::new(),
            created_at,
        }
    }

    /// Write the fields present in `patch`
    pub fn apply(&mut self, patch: &TaskPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(base_time) = patch.base_time {
            self.base_time = base_time;
        }
        if let Some(started_at) = patch.started_at {
            self.started_at = started_at;
        }
        if let Some(best_time) = patch.best_time {
            self.best_time = best_time;
        }
        if let Some(attempts) = &patch.attempts {
            self.attempts = attempts.clone();
        }
    }

    /// The patch that turns `self` into `newer`, carrying only the fields that differ
    pub fn changes_to(&self, newer: &TaskRecord) -> TaskPatch {
        let mut patch = TaskPatch::default();
        if self.name != newer.name {
            patch.name = Some(newer.name.clone());
        }
        if self.status != newer.status {
            patch.status = Some(newer.status);
        }
        if self.base_time != newer.base_time {
            patch.base_time = Some(newer.base_time);
        }
        if self.started_at != newer.started_at {
            patch.started_at = Some(newer.started_at);
        }
        if self.best_time != newer.best_time {
            patch.best_time = Some(newer.best_time);
        }
        if self.attempts != newer.attempts {
            patch.attempts = Some(newer.attempts.clone());
        }
        patch
    }
}

/// A partial update. `None` means "leave unchanged"; nested `Option`s can clear a field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub status: Option<TaskStatus>,
    pub base_time: Option<u64>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub best_time: Option<Option<u64>>,
    pub attempts: Option<Vec<u64>>,
}

impl TaskPatch {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn base_time(mut self, seconds: u64) -> Self {
        self.base_time = Some(seconds);
        self
    }

    pub fn started_at(mut self, started_at: Option<DateTime<Utc>>) -> Self {
        self.started_at = Some(started_at);
        self
    }

    pub fn best_time(mut self, best_time: Option<u64>) -> Self {
        self.best_time = Some(best_time);
        self
    }

    pub fn attempts(mut self, attempts: Vec<u64>) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether the patch changes anything the running timer derives from
    pub fn touches_timer(&self) -> bool {
        self.status.is_some() || self.base_time.is_some() || self.started_at.is_some()
    }
}

/// Change notification pushed by a store's realtime feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Inserted(TaskRecord),
    Updated { id: TaskId, patch: TaskPatch },
    Deleted { id: TaskId },
}

/// Local view of a task, including the derived timer fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    /// Seconds elapsed in the current attempt
    pub current_time: u64,
    /// Seconds accumulated before the current running interval
    pub base_time: u64,
    pub best_time: Option<u64>,
    /// One duration per completed run, oldest first
    pub attempts: Vec<u64>,
    pub is_exceeding: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn from_record(record: TaskRecord, now: DateTime<Utc>) -> Self {
        let mut task = Self {
            id: record.id,
            name: record.name,
            status: record.status,
            current_time: 0,
            base_time: record.base_time,
            best_time: record.best_time,
            attempts: record.attempts,
            is_exceeding: false,
            started_at: record.started_at,
            created_at: record.created_at,
        };
        task.refresh(now);
        task.is_exceeding = task.exceeds_best();
        task
    }

    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }

    /// Elapsed seconds in the current attempt as of `now`, derived from wall-clock deltas
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> u64 {
        match (self.status, self.started_at) {
            (TaskStatus::Running, Some(started)) => {
                self.base_time + whole_seconds_between(started, now)
            }
            _ => self.base_time,
        }
    }

    /// Recompute `current_time` from the accumulated base and the running interval
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        self.current_time = self.elapsed_at(now);
    }

    pub fn exceeds_best(&self) -> bool {
        self.is_running() && self.best_time.is_some_and(|best| self.current_time > best)
    }

    /// Sum of every completed attempt
    pub fn total_time(&self) -> u64 {
        self.attempts.iter().sum()
    }

    /// Merge the fields present in `patch`, leaving the others untouched.
    ///
    /// `current_time` is only recomputed when the patch moves the timer, so a
    /// name-only update never rewinds a ticking value.
    pub fn apply_patch(&mut self, patch: &TaskPatch, now: DateTime<Utc>) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
            self.is_exceeding = false;
        }
        if let Some(base_time) = patch.base_time {
            self.base_time = base_time;
        }
        if let Some(started_at) = patch.started_at {
            self.started_at = started_at;
        }
        if let Some(best_time) = patch.best_time {
            self.best_time = best_time;
        }
        if let Some(attempts) = &patch.attempts {
            self.attempts = attempts.clone();
        }
        if patch.touches_timer() {
            self.refresh(now);
        }
    }

    /// Begin or resume the timer, keeping the accumulated base
    pub fn start_patch(&self, now: DateTime<Utc>) -> TaskPatch {
        TaskPatch::default()
            .status(TaskStatus::Running)
            .base_time(self.base_time)
            .started_at(Some(now))
    }

    /// Stop the timer and fold the running interval into the base
    pub fn stop_patch(&self, now: DateTime<Utc>) -> TaskPatch {
        TaskPatch::default()
            .status(TaskStatus::Idle)
            .base_time(self.elapsed_at(now))
            .started_at(None)
    }

    /// Record the current attempt and reset the timer. Returns the final attempt time too.
    pub fn complete_patch(&self, now: DateTime<Utc>) -> (TaskPatch, u64) {
        let final_time = self.elapsed_at(now);
        let mut attempts = self.attempts.clone();
        attempts.push(final_time);
        let best_time = Some(self.best_time.map_or(final_time, |best| best.min(final_time)));

        let patch = TaskPatch::default()
            .status(TaskStatus::Completed)
            .attempts(attempts)
            .best_time(best_time)
            .base_time(0)
            .started_at(None);
        (patch, final_time)
    }

    /// Run a completed task again from zero
    pub fn restart_patch(&self, now: DateTime<Utc>) -> TaskPatch {
        TaskPatch::default()
            .status(TaskStatus::Running)
            .base_time(0)
            .started_at(Some(now))
    }
}
