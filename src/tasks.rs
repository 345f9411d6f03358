//! The task state machine.
//!
//! [`TaskManager`] owns the signed-in user's task list. Every mutation except
//! `add` is applied locally first and rolled back if the store rejects it;
//! `add` waits for the store because the id is assigned remotely. Realtime
//! events are queued in an inbox and merged field by field when drained.
//!
//! At most one task is running at any time: `start` and `restart` stop the
//! running task (remotely) before the new one is activated, and abort if that
//! stop fails.

use crate::clock::Clock;
use crate::domain::{
    compute_stats, NotificationKind, Task, TaskEvent, TaskId, TaskPatch, TaskRecord, TaskStats,
    TaskStatus, UserId,
};
use crate::error::{Error, Result};
use crate::format::format_clock;
use crate::notifications::Notifier;
use crate::store::{self, TaskFeed, TaskStore};
use crate::sync;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;

pub struct TaskManager {
    user: UserId,
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
    timeout: Duration,
    /// Newest first
    tasks: Vec<Task>,
    /// Tasks already warned about exceeding their best time in the current run
    exceed_notified: HashSet<TaskId>,
    inbox: Option<TaskFeed>,
}

impl TaskManager {
    pub fn new(
        user: UserId,
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        notifier: Notifier,
        timeout: Duration,
    ) -> Self {
        Self {
            user,
            store,
            clock,
            notifier,
            timeout,
            tasks: Vec::new(),
            exceed_notified: HashSet::new(),
            inbox: None,
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn running(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.is_running())
    }

    pub fn stats(&self) -> TaskStats {
        compute_stats(&self.tasks)
    }

    /// Fetch the user's tasks and open the realtime inbox.
    ///
    /// The feed is opened before the fetch so no change is lost in between;
    /// events already reflected by the fetch merge as no-ops.
    pub async fn load(&mut self) -> Result<()> {
        let inbox = self.store.subscribe(&self.user);

        let records = match store::bounded(self.timeout, self.store.list_tasks(&self.user)).await
        {
            Ok(records) => records,
            Err(err) => return Err(self.report("load tasks", err.into())),
        };

        let now = self.clock.now();
        let mut tasks: Vec<Task> = records
            .into_iter()
            .map(|record| Task::from_record(record, now))
            .collect();

        // A store should never hold two running tasks; keep the newest one
        let mut seen_running = false;
        for task in tasks.iter_mut().filter(|t| t.is_running()) {
            if seen_running {
                tracing::warn!(task = %task.id, "more than one running task stored, idling locally");
                let patch = task.stop_patch(now);
                task.apply_patch(&patch, now);
            }
            seen_running = true;
        }

        tracing::debug!(user = %self.user, count = tasks.len(), "loaded tasks");
        self.tasks = tasks;
        self.exceed_notified.clear();
        self.inbox = Some(inbox);
        Ok(())
    }

    pub async fn add(&mut self, name: &str) -> Result<TaskId> {
        let name = name.trim();
        if name.is_empty() {
            return Err(self.report("add task", Error::validation("Task name cannot be empty")));
        }

        let created =
            store::bounded(self.timeout, self.store.create_task(&self.user, name)).await;
        let record = match created {
            Ok(record) => record,
            Err(err) => return Err(self.report("add task", err.into())),
        };

        let id = record.id.clone();
        if self.get(&id).is_none() {
            let task = Task::from_record(record, self.clock.now());
            self.tasks.insert(0, task);
        }

        tracing::info!(task = %id, name, "added task");
        self.notifier
            .success("Task Added", &format!("\"{}\" has been added", name));
        Ok(id)
    }

    pub async fn rename(&mut self, id: &TaskId, name: &str) -> Result<()> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(self.report("rename task", Error::validation("Task name cannot be empty")));
        }
        self.require(id, "rename task")?;

        let patch = TaskPatch::default().name(name.clone());
        let now = self.clock.now();
        let remote = self.update_call(id, patch.clone());
        let result = sync::optimistic(
            &mut self.tasks,
            &[id],
            |tasks| patch_local(tasks, id, &patch, now),
            remote,
        )
        .await;

        match result {
            Ok(_) => {
                tracing::info!(task = %id, name = %name, "renamed task");
                self.notifier
                    .success("Task Updated", &format!("Renamed to \"{}\"", name));
                Ok(())
            }
            Err(err) => Err(self.report("rename task", err)),
        }
    }

    pub async fn delete(&mut self, id: &TaskId) -> Result<()> {
        let task = self.require(id, "delete task")?;

        let store = Arc::clone(&self.store);
        let user = self.user.clone();
        let target = id.clone();
        let limit = self.timeout;
        let remote = async move {
            let rows = store::bounded(limit, store.delete_task(&user, &target)).await?;
            if rows == 0 {
                return Err(Error::concurrency(
                    "the task may not exist or you may not have permission to delete it",
                ));
            }
            Ok::<u64, Error>(rows)
        };

        let result = sync::optimistic(
            &mut self.tasks,
            &[id],
            |tasks| tasks.retain(|t| &t.id != id),
            remote,
        )
        .await;

        match result {
            Ok(_) => {
                self.exceed_notified.remove(id);
                tracing::info!(task = %id, "deleted task");
                self.notifier
                    .info("Task Deleted", &format!("\"{}\" has been deleted", task.name));
                Ok(())
            }
            Err(err) => Err(self.report("delete task", err)),
        }
    }

    /// Run `id`, stopping whichever task is running first.
    ///
    /// A completed task is restarted from zero; a running one is left alone.
    pub async fn start(&mut self, id: &TaskId) -> Result<()> {
        let task = self.require(id, "start task")?;
        match task.status {
            TaskStatus::Running => return Ok(()),
            TaskStatus::Completed => return self.restart(id).await,
            TaskStatus::Idle => {}
        }

        self.stop_others(id).await?;

        let now = self.clock.now();
        let patch = task.start_patch(now);
        self.commit(id, patch, now, "start task").await?;
        self.exceed_notified.remove(id);
        tracing::info!(task = %id, base_time = task.base_time, "started task");
        Ok(())
    }

    /// Pause `id`, keeping its accumulated time. No-op unless it is running.
    pub async fn stop(&mut self, id: &TaskId) -> Result<()> {
        let task = self.require(id, "stop task")?;
        if !task.is_running() {
            return Ok(());
        }

        let now = self.clock.now();
        let patch = task.stop_patch(now);
        self.commit(id, patch, now, "stop task").await?;
        self.exceed_notified.remove(id);
        tracing::info!(task = %id, elapsed = task.elapsed_at(now), "stopped task");
        Ok(())
    }

    /// Record the current run as an attempt. Unknown or completed tasks are left alone.
    pub async fn complete(&mut self, id: &TaskId) -> Result<()> {
        let Some(task) = self.get(id).cloned() else {
            return Ok(());
        };
        if task.status == TaskStatus::Completed {
            return Ok(());
        }

        let now = self.clock.now();
        let (patch, final_time) = task.complete_patch(now);
        self.commit(id, patch, now, "complete task").await?;
        self.exceed_notified.remove(id);

        tracing::info!(task = %id, final_time, "completed task");
        let dedup_key = format!("complete:{}:{}", id, task.attempts.len() + 1);
        self.notifier.notify_once(
            NotificationKind::Success,
            "Task Completed!",
            &format!("\"{}\" finished in {}", task.name, format_clock(final_time)),
            &dedup_key,
        );
        Ok(())
    }

    /// Run a completed task again from zero, keeping its attempts and best time.
    pub async fn restart(&mut self, id: &TaskId) -> Result<()> {
        let task = self.require(id, "restart task")?;
        if task.status != TaskStatus::Completed {
            return Ok(());
        }

        self.stop_others(id).await?;

        let now = self.clock.now();
        let patch = task.restart_patch(now);
        self.commit(id, patch, now, "restart task").await?;
        self.exceed_notified.remove(id);
        tracing::info!(task = %id, "restarted task");
        Ok(())
    }

    /// Recompute the running timer from the wall clock and warn once when it
    /// passes the best time.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        let Some(task) = self.tasks.iter_mut().find(|t| t.is_running()) else {
            return;
        };

        task.refresh(now);
        let exceeding = task.exceeds_best();
        let crossed = exceeding && !task.is_exceeding;
        task.is_exceeding = exceeding;

        if crossed && self.exceed_notified.insert(task.id.clone()) {
            let best = task.best_time.unwrap_or_default();
            let started = task.started_at.map(|t| t.timestamp()).unwrap_or_default();
            tracing::debug!(task = %task.id, best, current = task.current_time, "task exceeded best time");
            self.notifier.notify_once(
                NotificationKind::Warning,
                "Time Alert",
                &format!(
                    "\"{}\" has exceeded your best time of {}",
                    task.name,
                    format_clock(best)
                ),
                &format!("exceed:{}:{}", task.id, started),
            );
        }
    }

    /// Apply every queued realtime event in arrival order. Returns how many were applied.
    ///
    /// The store is polled first so changes made by other writers land in the inbox.
    pub fn drain_events(&mut self) -> usize {
        if self.inbox.is_none() {
            return 0;
        }
        if let Err(err) = self.store.poll() {
            tracing::warn!(user = %self.user, error = %err, "failed to poll store for changes");
        }
        let Some(inbox) = self.inbox.as_mut() else {
            return 0;
        };

        let mut events = Vec::new();
        loop {
            match inbox.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::warn!(user = %self.user, "realtime feed closed");
                    self.inbox = None;
                    break;
                }
            }
        }

        let count = events.len();
        for event in events {
            self.reconcile(event);
        }
        count
    }

    /// Merge one change pushed by the store into the local list
    pub fn reconcile(&mut self, event: TaskEvent) {
        let now = self.clock.now();
        match event {
            TaskEvent::Inserted(record) => {
                if self.get(&record.id).is_some() {
                    return;
                }
                let task = Task::from_record(record, now);
                if task.is_running() {
                    self.idle_others_locally(&task.id, now);
                }
                tracing::debug!(task = %task.id, "remote insert");
                self.tasks.insert(0, task);
            }
            TaskEvent::Updated { id, patch } => {
                if self.get(&id).is_none() {
                    tracing::debug!(task = %id, "update for unknown task ignored");
                    return;
                }
                if patch.status == Some(TaskStatus::Running) {
                    self.idle_others_locally(&id, now);
                }
                if patch.status.is_some_and(|s| s != TaskStatus::Running) {
                    self.exceed_notified.remove(&id);
                }
                patch_local(&mut self.tasks, &id, &patch, now);
            }
            TaskEvent::Deleted { id } => {
                self.tasks.retain(|t| t.id != id);
                self.exceed_notified.remove(&id);
                tracing::debug!(task = %id, "remote delete");
            }
        }
    }

    /// Another writer started `keep`; whatever runs here goes idle without a remote write
    fn idle_others_locally(&mut self, keep: &TaskId, now: DateTime<Utc>) {
        for task in self.tasks.iter_mut().filter(|t| t.is_running() && &t.id != keep) {
            tracing::debug!(task = %task.id, "idled by remote start");
            let patch = task.stop_patch(now);
            task.apply_patch(&patch, now);
            self.exceed_notified.remove(&task.id);
        }
    }

    /// Stop the running task unless it is `keep`
    async fn stop_others(&mut self, keep: &TaskId) -> Result<()> {
        let running: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|t| t.is_running() && &t.id != keep)
            .map(|t| t.id.clone())
            .collect();
        for id in running {
            self.stop(&id).await?;
        }
        Ok(())
    }

    /// Apply `patch` optimistically and persist it, rolling back on failure
    async fn commit(
        &mut self,
        id: &TaskId,
        patch: TaskPatch,
        now: DateTime<Utc>,
        action: &str,
    ) -> Result<()> {
        let remote = self.update_call(id, patch.clone());
        let result = sync::optimistic(
            &mut self.tasks,
            &[id],
            |tasks| patch_local(tasks, id, &patch, now),
            remote,
        )
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => Err(self.report(action, err)),
        }
    }

    fn update_call(
        &self,
        id: &TaskId,
        patch: TaskPatch,
    ) -> impl Future<Output = Result<TaskRecord>> {
        let store = Arc::clone(&self.store);
        let user = self.user.clone();
        let id = id.clone();
        let limit = self.timeout;
        async move {
            store::bounded(limit, store.update_task(&user, &id, &patch))
                .await
                .map_err(Error::from)
        }
    }

    fn require(&self, id: &TaskId, action: &str) -> Result<Task> {
        match self.get(id) {
            Some(task) => Ok(task.clone()),
            None => Err(self.report(action, Error::not_found(format!("task {}", id)))),
        }
    }

    /// Log and surface a failure, then hand it back to the caller
    fn report(&self, action: &str, err: Error) -> Error {
        tracing::warn!(user = %self.user, action, error = %err, "task operation failed");
        self.notifier
            .warning("Error", &format!("Failed to {}: {}", action, err));
        err
    }
}

fn patch_local(tasks: &mut [Task], id: &TaskId, patch: &TaskPatch, now: DateTime<Utc>) {
    if let Some(task) = tasks.iter_mut().find(|t| &t.id == id) {
        task.apply_patch(patch, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notifications::{Notification, NotificationQueue};
    use crate::store::{MemoryStore, StoreError};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    struct Harness {
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        notifier: Notifier,
        manager: TaskManager,
    }

    impl Harness {
        fn notifications(&self) -> Vec<Notification> {
            self.notifier.snapshot()
        }

        fn titled(&self, title: &str) -> usize {
            self.notifications()
                .iter()
                .filter(|n| n.title == title)
                .count()
        }

        fn task(&self, id: &TaskId) -> Task {
            self.manager.get(id).cloned().unwrap()
        }

        fn running_count(&self) -> usize {
            self.manager.tasks().iter().filter(|t| t.is_running()).count()
        }

        /// Advance one second and tick
        fn tick_secs(&mut self, secs: usize) {
            for _ in 0..secs {
                self.clock.advance_secs(1);
                self.manager.tick();
            }
        }
    }

    async fn setup() -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        // Long-lived so tests can count everything emitted
        let notifier = Notifier::new(
            NotificationQueue::new(chrono::Duration::hours(1)),
            clock.clone(),
        );
        let mut manager = TaskManager::new(
            UserId::from("alice"),
            store.clone(),
            clock.clone(),
            notifier.clone(),
            Duration::from_secs(15),
        );
        manager.load().await.unwrap();
        Harness {
            clock,
            store,
            notifier,
            manager,
        }
    }

    #[tokio::test]
    async fn test_write_report_scenario() {
        let mut h = setup().await;
        let id = h.manager.add("Write report").await.unwrap();
        let task = h.task(&id);
        assert!(task.attempts.is_empty());
        assert_eq!(task.best_time, None);

        h.manager.start(&id).await.unwrap();
        h.tick_secs(5);
        let task = h.task(&id);
        assert_eq!(task.current_time, 5);
        assert_eq!(task.status, TaskStatus::Running);

        h.manager.complete(&id).await.unwrap();
        let task = h.task(&id);
        assert_eq!(task.attempts, vec![5]);
        assert_eq!(task.best_time, Some(5));
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.current_time, 0);
        assert_eq!(h.titled("Task Completed!"), 1);

        let stored = &h.store.dump().tasks[0];
        assert_eq!(stored.attempts, vec![5]);
        assert_eq!(stored.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_start_other_stops_running_first() {
        let mut h = setup().await;
        let a = h.manager.add("A").await.unwrap();
        let b = h.manager.add("B").await.unwrap();

        h.manager.start(&a).await.unwrap();
        h.tick_secs(7);
        h.manager.start(&b).await.unwrap();

        let task_a = h.task(&a);
        assert_eq!(task_a.status, TaskStatus::Idle);
        assert_eq!(task_a.current_time, 7);
        assert_eq!(task_a.base_time, 7);
        let task_b = h.task(&b);
        assert_eq!(task_b.status, TaskStatus::Running);
        assert_eq!(task_b.current_time, 0);
        assert_eq!(h.running_count(), 1);

        // A resumes from its accumulated time
        h.tick_secs(2);
        h.manager.start(&a).await.unwrap();
        h.tick_secs(3);
        assert_eq!(h.task(&a).current_time, 10);
        assert_eq!(h.task(&b).base_time, 2);
        assert_eq!(h.running_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_idle_task_is_noop() {
        let mut h = setup().await;
        let id = h.manager.add("Idle").await.unwrap();
        let before = h.manager.tasks().to_vec();
        let stored = h.store.dump().tasks;

        h.manager.stop(&id).await.unwrap();

        assert_eq!(h.manager.tasks(), before.as_slice());
        assert_eq!(h.store.dump().tasks, stored);
    }

    #[tokio::test]
    async fn test_complete_then_restart_round_trip() {
        let mut h = setup().await;
        let id = h.manager.add("Round trip").await.unwrap();
        h.manager.start(&id).await.unwrap();
        h.tick_secs(4);
        h.manager.complete(&id).await.unwrap();
        let completed = h.task(&id);

        h.clock.advance_secs(30);
        h.manager.restart(&id).await.unwrap();

        let task = h.task(&id);
        assert_eq!(task.current_time, 0);
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.attempts, completed.attempts);
        assert_eq!(task.best_time, completed.best_time);
        assert!(!task.is_exceeding);
    }

    #[tokio::test]
    async fn test_start_on_completed_restarts() {
        let mut h = setup().await;
        let id = h.manager.add("Again").await.unwrap();
        h.manager.start(&id).await.unwrap();
        h.tick_secs(3);
        h.manager.complete(&id).await.unwrap();

        h.manager.start(&id).await.unwrap();
        h.tick_secs(1);
        let task = h.task(&id);
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.current_time, 1);
    }

    #[tokio::test]
    async fn test_best_time_is_min_of_attempts() {
        let mut h = setup().await;
        let id = h.manager.add("Laps").await.unwrap();

        for secs in [9, 4, 6, 4, 12] {
            h.manager.start(&id).await.unwrap();
            h.tick_secs(secs);
            h.manager.complete(&id).await.unwrap();
            let task = h.task(&id);
            assert_eq!(task.best_time, task.attempts.iter().copied().min());
        }
        assert_eq!(h.task(&id).attempts, vec![9, 4, 6, 4, 12]);
        assert_eq!(h.task(&id).best_time, Some(4));
    }

    #[tokio::test]
    async fn test_exceeding_best_warns_once_per_run() {
        let mut h = setup().await;
        let id = h.manager.add("Race").await.unwrap();
        h.manager.start(&id).await.unwrap();
        h.tick_secs(10);
        h.manager.complete(&id).await.unwrap();
        assert_eq!(h.task(&id).best_time, Some(10));

        h.manager.restart(&id).await.unwrap();
        h.tick_secs(10);
        assert!(!h.task(&id).is_exceeding);
        assert_eq!(h.titled("Time Alert"), 0);

        h.tick_secs(1);
        assert_eq!(h.task(&id).current_time, 11);
        assert!(h.task(&id).is_exceeding);
        assert_eq!(h.titled("Time Alert"), 1);

        h.tick_secs(2);
        assert_eq!(h.titled("Time Alert"), 1);

        // A new running interval may warn again
        h.manager.stop(&id).await.unwrap();
        assert!(!h.task(&id).is_exceeding);
        h.clock.advance_secs(1);
        h.manager.start(&id).await.unwrap();
        h.tick_secs(1);
        assert_eq!(h.titled("Time Alert"), 2);
        let alert = h
            .notifications()
            .into_iter()
            .find(|n| n.title == "Time Alert")
            .unwrap();
        assert_eq!(alert.kind, NotificationKind::Warning);
    }

    #[tokio::test]
    async fn test_rename_empty_is_rejected_locally() {
        let mut h = setup().await;
        let id = h.manager.add("Keep me").await.unwrap();
        let stored = h.store.dump();
        // Any remote call would fail; validation must happen first
        h.store.set_failing(true);

        let err = h.manager.rename(&id, "   ").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(h.task(&id).name, "Keep me");
        assert_eq!(h.store.dump().tasks, stored.tasks);
        assert_eq!(h.titled("Error"), 1);
    }

    #[tokio::test]
    async fn test_rename_rolls_back_on_failure() {
        let mut h = setup().await;
        let id = h.manager.add("Old name").await.unwrap();
        h.store.fail_next_writes(1);

        let err = h.manager.rename(&id, "New name").await.unwrap_err();
        assert!(matches!(err, Error::Remote(StoreError::Unavailable(_))));
        assert_eq!(h.task(&id).name, "Old name");
        assert_eq!(h.titled("Error"), 1);

        h.manager.rename(&id, " New name ").await.unwrap();
        assert_eq!(h.task(&id).name, "New name");
        assert_eq!(h.store.dump().tasks[0].name, "New name");
        assert_eq!(h.titled("Task Updated"), 1);
    }

    #[tokio::test]
    async fn test_add_failure_leaves_state_alone() {
        let mut h = setup().await;
        h.store.fail_next_writes(1);

        assert!(h.manager.add("Nope").await.is_err());
        assert!(h.manager.tasks().is_empty());
        assert_eq!(h.titled("Error"), 1);
        assert_eq!(h.titled("Task Added"), 0);

        let err = h.manager.add("").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_add_prepends_newest_first() {
        let mut h = setup().await;
        h.manager.add("first").await.unwrap();
        h.manager.add("second").await.unwrap();

        let names: Vec<&str> = h.manager.tasks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["second", "first"]);
        assert_eq!(h.titled("Task Added"), 2);
    }

    #[tokio::test]
    async fn test_delete_reinserts_when_no_rows_affected() {
        let mut h = setup().await;
        let a = h.manager.add("A").await.unwrap();
        let b = h.manager.add("B").await.unwrap();
        let c = h.manager.add("C").await.unwrap();
        // Another device removed B; its realtime event has not been drained yet
        h.store.delete_task(&UserId::from("alice"), &b).await.unwrap();

        let err = h.manager.delete(&b).await.unwrap_err();
        assert!(matches!(err, Error::Concurrency(_)));
        let ids: Vec<TaskId> = h.manager.tasks().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec![c, b, a]);
        assert_eq!(h.titled("Error"), 1);
    }

    #[tokio::test]
    async fn test_delete_success() {
        let mut h = setup().await;
        let id = h.manager.add("Gone").await.unwrap();

        h.manager.delete(&id).await.unwrap();
        assert!(h.manager.tasks().is_empty());
        assert!(h.store.dump().tasks.is_empty());
        assert_eq!(h.titled("Task Deleted"), 1);

        let err = h.manager.delete(&id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_start_aborts_when_stopping_running_fails() {
        let mut h = setup().await;
        let a = h.manager.add("A").await.unwrap();
        let b = h.manager.add("B").await.unwrap();
        h.manager.start(&a).await.unwrap();
        h.tick_secs(3);
        h.store.fail_next_writes(1);

        assert!(h.manager.start(&b).await.is_err());
        assert_eq!(h.task(&a).status, TaskStatus::Running);
        assert_eq!(h.task(&b).status, TaskStatus::Idle);
        assert_eq!(h.running_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_stops_running_first() {
        let mut h = setup().await;
        let a = h.manager.add("A").await.unwrap();
        let b = h.manager.add("B").await.unwrap();
        h.manager.start(&b).await.unwrap();
        h.tick_secs(2);
        h.manager.complete(&b).await.unwrap();
        h.manager.start(&a).await.unwrap();
        h.tick_secs(4);

        h.manager.restart(&b).await.unwrap();

        let task_a = h.task(&a);
        assert_eq!(task_a.status, TaskStatus::Idle);
        assert_eq!(task_a.current_time, 4);
        assert_eq!(task_a.base_time, 4);
        let task_b = h.task(&b);
        assert_eq!(task_b.status, TaskStatus::Running);
        assert_eq!(task_b.current_time, 0);
        assert_eq!(task_b.attempts, vec![2]);
        assert_eq!(h.running_count(), 1);

        let stored = h.store.dump().tasks;
        let stored_a = stored.iter().find(|t| t.id == a).unwrap();
        assert_eq!(stored_a.status, TaskStatus::Idle);
        assert_eq!(stored_a.base_time, 4);
    }

    #[tokio::test]
    async fn test_restart_aborts_when_stopping_running_fails() {
        let mut h = setup().await;
        let a = h.manager.add("A").await.unwrap();
        let b = h.manager.add("B").await.unwrap();
        h.manager.complete(&b).await.unwrap();
        h.manager.start(&a).await.unwrap();
        h.tick_secs(3);
        h.store.fail_next_writes(1);

        assert!(h.manager.restart(&b).await.is_err());
        let task_a = h.task(&a);
        assert_eq!(task_a.status, TaskStatus::Running);
        assert_eq!(task_a.current_time, 3);
        assert_eq!(h.task(&b).status, TaskStatus::Completed);
        assert_eq!(h.running_count(), 1);
        assert_eq!(h.titled("Error"), 1);
    }

    #[tokio::test]
    async fn test_load_idles_extra_running_tasks() {
        let h = setup().await;
        let user = UserId::from("alice");
        let older = h.store.create_task(&user, "Older").await.unwrap();
        h.clock.advance_secs(1);
        let newer = h.store.create_task(&user, "Newer").await.unwrap();
        let started = h.clock.now();
        for id in [&older.id, &newer.id] {
            h.store
                .update_task(
                    &user,
                    id,
                    &TaskPatch::default()
                        .status(TaskStatus::Running)
                        .started_at(Some(started)),
                )
                .await
                .unwrap();
        }
        h.clock.advance_secs(10);

        let mut manager = TaskManager::new(
            user,
            h.store.clone(),
            h.clock.clone(),
            h.notifier.clone(),
            Duration::from_secs(15),
        );
        manager.load().await.unwrap();

        let running: Vec<&TaskId> = manager
            .tasks()
            .iter()
            .filter(|t| t.is_running())
            .map(|t| &t.id)
            .collect();
        assert_eq!(running, vec![&newer.id]);
        let idled = manager.get(&older.id).unwrap();
        assert_eq!(idled.status, TaskStatus::Idle);
        assert_eq!(idled.current_time, 10);

        // Local only; the store is left to whoever wrote it
        let stored = h.store.dump().tasks;
        assert!(stored.iter().all(|t| t.status == TaskStatus::Running));
    }

    #[tokio::test]
    async fn test_failed_complete_rolls_back() {
        let mut h = setup().await;
        let id = h.manager.add("Flaky").await.unwrap();
        h.manager.start(&id).await.unwrap();
        h.tick_secs(6);
        h.store.fail_next_writes(1);

        assert!(h.manager.complete(&id).await.is_err());
        let task = h.task(&id);
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.attempts.is_empty());
        assert_eq!(task.best_time, None);
        assert_eq!(task.current_time, 6);
        assert_eq!(h.titled("Task Completed!"), 0);
    }

    #[tokio::test]
    async fn test_complete_unknown_or_completed_is_noop() {
        let mut h = setup().await;
        h.manager.complete(&TaskId::from("missing")).await.unwrap();
        assert!(h.notifications().is_empty());

        let id = h.manager.add("Once").await.unwrap();
        h.manager.complete(&id).await.unwrap();
        h.manager.complete(&id).await.unwrap();
        assert_eq!(h.task(&id).attempts, vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_remote_call_times_out() {
        let mut h = setup().await;
        let id = h.manager.add("Slow").await.unwrap();
        h.store.set_latency(Duration::from_secs(60));

        let err = h.manager.rename(&id, "Renamed").await.unwrap_err();
        assert!(matches!(err, Error::Remote(StoreError::Timeout(_))));
        assert_eq!(h.task(&id).name, "Slow");
    }

    #[tokio::test]
    async fn test_own_events_merge_as_noops() {
        let mut h = setup().await;
        let a = h.manager.add("A").await.unwrap();
        let b = h.manager.add("B").await.unwrap();
        h.manager.start(&a).await.unwrap();
        h.tick_secs(2);
        h.manager.start(&b).await.unwrap();
        h.tick_secs(1);
        h.manager.rename(&a, "A2").await.unwrap();
        let before = h.manager.tasks().to_vec();

        let applied = h.manager.drain_events();
        assert!(applied >= 6);
        assert_eq!(h.manager.tasks(), before.as_slice());
    }

    #[tokio::test]
    async fn test_remote_events_from_other_device() {
        let mut h = setup().await;
        let user = UserId::from("alice");
        let local = h.manager.add("Local").await.unwrap();
        h.manager.drain_events();
        h.manager.start(&local).await.unwrap();
        h.manager.drain_events();
        h.tick_secs(4);

        // Another device inserts a task and starts it
        let record = h.store.create_task(&user, "Remote").await.unwrap();
        let started_at = h.clock.now();
        h.store
            .update_task(
                &user,
                &record.id,
                &TaskPatch::default()
                    .status(TaskStatus::Running)
                    .base_time(0)
                    .started_at(Some(started_at)),
            )
            .await
            .unwrap();

        assert_eq!(h.manager.drain_events(), 2);
        assert_eq!(h.manager.tasks()[0].id, record.id);
        assert_eq!(h.task(&record.id).status, TaskStatus::Running);
        let local_task = h.task(&local);
        assert_eq!(local_task.status, TaskStatus::Idle);
        assert_eq!(local_task.base_time, 4);
        assert_eq!(h.running_count(), 1);

        // A name-only update keeps the ticking value
        h.tick_secs(3);
        h.store
            .update_task(&user, &record.id, &TaskPatch::default().name("Renamed"))
            .await
            .unwrap();
        h.manager.drain_events();
        let remote = h.task(&record.id);
        assert_eq!(remote.name, "Renamed");
        assert_eq!(remote.current_time, 3);

        h.store.delete_task(&user, &record.id).await.unwrap();
        h.manager.drain_events();
        assert!(h.manager.get(&record.id).is_none());
    }

    #[tokio::test]
    async fn test_load_resumes_running_task() {
        let h = setup().await;
        let user = UserId::from("alice");
        let record = h.store.create_task(&user, "Persisted").await.unwrap();
        let started = h.clock.now();
        h.store
            .update_task(
                &user,
                &record.id,
                &TaskPatch::default()
                    .status(TaskStatus::Running)
                    .base_time(20)
                    .started_at(Some(started)),
            )
            .await
            .unwrap();
        h.clock.advance_secs(15);

        let mut manager = TaskManager::new(
            user,
            h.store.clone(),
            h.clock.clone(),
            h.notifier.clone(),
            Duration::from_secs(15),
        );
        manager.load().await.unwrap();
        assert_eq!(manager.get(&record.id).unwrap().current_time, 35);

        h.clock.advance_secs(1);
        manager.tick();
        assert_eq!(manager.get(&record.id).unwrap().current_time, 36);
    }

    #[tokio::test]
    async fn test_load_failure_notifies() {
        let h = setup().await;
        h.store.set_failing(true);
        let mut manager = TaskManager::new(
            UserId::from("alice"),
            h.store.clone(),
            h.clock.clone(),
            h.notifier.clone(),
            Duration::from_secs(15),
        );

        assert!(manager.load().await.is_err());
        assert_eq!(h.titled("Error"), 1);
    }

    #[tokio::test]
    async fn test_stats_follow_state() {
        let mut h = setup().await;
        let a = h.manager.add("A").await.unwrap();
        let b = h.manager.add("B").await.unwrap();
        h.manager.start(&a).await.unwrap();
        h.tick_secs(5);
        h.manager.complete(&a).await.unwrap();
        h.manager.start(&b).await.unwrap();

        let stats = h.manager.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.total_time, 5);
    }
}
