//! Composition root: picks the backend and wires the state machines,
//! notifier and scheduler together.

use crate::clock::Clock;
use crate::config::{Backend, Config};
use crate::domain::UserId;
use crate::error::Result;
use crate::notifications::{NotificationQueue, Notifier};
use crate::persistence::store_file;
use crate::scheduler::Scheduler;
use crate::sessions::SessionTracker;
use crate::store::{FileStore, MemoryStore, SessionStore, StoreResult, TaskStore};
use crate::ticker::tick_duration;
use crate::tasks::TaskManager;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The two store capabilities, usually served by one backend
#[derive(Clone)]
pub struct Backends {
    pub tasks: Arc<dyn TaskStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Backends {
    /// Serve both capabilities from one store
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: TaskStore + SessionStore + 'static,
    {
        Self {
            tasks: store.clone(),
            sessions: store,
        }
    }
}

/// Build the configured backend rooted at `data_dir`
pub fn open_backend(
    config: &Config,
    data_dir: &Path,
    clock: Arc<dyn Clock>,
) -> StoreResult<Backends> {
    match config.backend {
        Backend::Memory => Ok(Backends::shared(Arc::new(MemoryStore::new(clock)))),
        Backend::File => {
            let store = FileStore::open(store_file(data_dir), clock)?;
            Ok(Backends::shared(Arc::new(store)))
        }
    }
}

pub struct App {
    config: Config,
    notifier: Notifier,
    tasks: Arc<Mutex<TaskManager>>,
    sessions: Arc<Mutex<SessionTracker>>,
    scheduler: Option<Scheduler>,
}

impl App {
    pub fn new(config: Config, user: UserId, backends: Backends, clock: Arc<dyn Clock>) -> Self {
        let queue = NotificationQueue::new(config.notification_ttl())
            .with_desktop(config.desktop_notifications);
        let notifier = Notifier::new(queue, clock.clone());
        let timeout = config.remote_timeout();

        let tasks = TaskManager::new(
            user.clone(),
            backends.tasks,
            clock.clone(),
            notifier.clone(),
            timeout,
        );
        let sessions = SessionTracker::new(
            user,
            backends.sessions,
            clock,
            notifier.clone(),
            timeout,
            config.history_limit,
        );

        Self {
            config,
            notifier,
            tasks: Arc::new(Mutex::new(tasks)),
            sessions: Arc::new(Mutex::new(sessions)),
            scheduler: None,
        }
    }

    /// Fetch tasks and sessions for the user
    pub async fn load(&self) -> Result<()> {
        self.tasks.lock().await.load().await?;
        self.sessions.lock().await.load().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn tasks(&self) -> &Arc<Mutex<TaskManager>> {
        &self.tasks
    }

    pub fn sessions(&self) -> &Arc<Mutex<SessionTracker>> {
        &self.sessions
    }

    /// Start ticking. Calling it twice keeps the first scheduler.
    pub fn start_scheduler(&mut self) {
        if self.scheduler.is_some() {
            return;
        }
        self.scheduler = Some(Scheduler::start(
            Arc::clone(&self.tasks),
            Arc::clone(&self.sessions),
            self.notifier.clone(),
            tick_duration(self.config.tick_ms),
        ));
    }

    pub fn is_ticking(&self) -> bool {
        self.scheduler.as_ref().is_some_and(Scheduler::is_running)
    }

    pub async fn shutdown(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::TaskStatus;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_file_backend_persists_between_apps() {
        let dir = tempfile::tempdir().unwrap();
        let clock = clock();
        let config = Config::default();
        let user = UserId::from("alice");

        let backends = open_backend(&config, dir.path(), clock.clone()).unwrap();
        let app = App::new(config.clone(), user.clone(), backends, clock.clone());
        app.load().await.unwrap();
        let id = app.tasks().lock().await.add("Persist me").await.unwrap();
        app.tasks().lock().await.start(&id).await.unwrap();
        app.sessions().lock().await.check_in().await.unwrap();
        drop(app);

        clock.advance_secs(42);
        let backends = open_backend(&config, dir.path(), clock.clone()).unwrap();
        let app = App::new(config, user, backends, clock);
        app.load().await.unwrap();

        let tasks = app.tasks().lock().await;
        let task = tasks.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.current_time, 42);
        assert!(app.sessions().lock().await.is_checked_in());
    }

    #[tokio::test]
    async fn test_watcher_sees_stop_from_another_app() {
        let dir = tempfile::tempdir().unwrap();
        let clock = clock();
        let config = Config::default();
        let user = UserId::from("alice");

        let backends = open_backend(&config, dir.path(), clock.clone()).unwrap();
        let watcher = App::new(config.clone(), user.clone(), backends, clock.clone());
        watcher.load().await.unwrap();
        let id = watcher.tasks().lock().await.add("Shared").await.unwrap();
        watcher.tasks().lock().await.start(&id).await.unwrap();
        watcher.tasks().lock().await.drain_events();

        clock.advance_secs(30);
        let backends = open_backend(&config, dir.path(), clock.clone()).unwrap();
        let other = App::new(config, user, backends, clock.clone());
        other.load().await.unwrap();
        other.tasks().lock().await.stop(&id).await.unwrap();

        let mut tasks = watcher.tasks().lock().await;
        assert!(tasks.drain_events() > 0);
        let task = tasks.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Idle);
        assert_eq!(task.current_time, 30);
        assert!(tasks.running().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_lifecycle() {
        let clock = clock();
        let config = Config {
            backend: Backend::Memory,
            ..Config::default()
        };
        let backends = open_backend(&config, Path::new("unused"), clock.clone()).unwrap();
        let mut app = App::new(config, UserId::from("alice"), backends, clock.clone());
        app.load().await.unwrap();
        let id = app.tasks().lock().await.add("Tick").await.unwrap();
        app.tasks().lock().await.start(&id).await.unwrap();

        app.start_scheduler();
        app.start_scheduler();
        assert!(app.is_ticking());

        clock.advance_secs(2);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(app.tasks().lock().await.get(&id).unwrap().current_time, 2);

        app.shutdown().await;
        assert!(!app.is_ticking());
    }
}
