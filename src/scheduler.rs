//! Owned tick loop driving both state machines.

use crate::notifications::Notifier;
use crate::sessions::SessionTracker;
use crate::tasks::TaskManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Handle to the background tick task. Dropping it without [`Scheduler::shutdown`]
/// leaves the task running until the runtime stops.
pub struct Scheduler {
    cancellation_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the tick loop on the current runtime
    pub fn start(
        tasks: Arc<Mutex<TaskManager>>,
        sessions: Arc<Mutex<SessionTracker>>,
        notifier: Notifier,
        period: Duration,
    ) -> Self {
        let cancellation_token = CancellationToken::new();
        let token = cancellation_token.clone();

        let handle = tokio::spawn(async move {
            let mut tick_interval = tokio::time::interval(period);
            // Elapsed time comes from the clock, so missed ticks need no catch-up
            tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick_interval.tick() => {
                        tick_once(&tasks, &sessions, &notifier).await;
                    }
                }
            }
            tracing::debug!("scheduler stopped");
        });

        tracing::debug!(period_ms = period.as_millis() as u64, "scheduler started");
        Self {
            cancellation_token,
            handle,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the loop and wait for the in-flight tick to finish
    pub async fn shutdown(self) {
        self.cancellation_token.cancel();
        if let Err(err) = self.handle.await {
            tracing::warn!(error = %err, "scheduler task ended abnormally");
        }
    }
}

/// One scheduler step: merge realtime events, advance timers, expire notifications
pub async fn tick_once(
    tasks: &Mutex<TaskManager>,
    sessions: &Mutex<SessionTracker>,
    notifier: &Notifier,
) {
    {
        let mut tasks = tasks.lock().await;
        tasks.drain_events();
        tasks.tick();
    }
    sessions.lock().await.tick();
    notifier.expire();
}
