//! Work session tracker: check-in/check-out with history and stats.
//!
//! The active session is only ever visible through [`SessionTracker::current`];
//! history, stats and bulk deletion work on completed sessions only.

use crate::clock::Clock;
use crate::domain::{
    start_of_day, HistoryRange, SessionId, SessionPatch, SessionQuery, SessionStats, UserId,
    WorkSession,
};
use crate::error::{Error, Result};
use crate::format::{format_duration, format_time_of_day};
use crate::notifications::Notifier;
use crate::store::{self, SessionStore, StoreError};
use crate::sync::{self, Snapshot};
use chrono::{DateTime, Local, Utc};
use std::sync::Arc;
use std::time::Duration;

pub struct SessionTracker {
    user: UserId,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
    timeout: Duration,
    history_limit: usize,
    current: Option<WorkSession>,
    /// Live seconds of the active session, 0 when checked out
    session_duration: u64,
    /// Sessions checked in today, newest first, including the active one
    today: Vec<WorkSession>,
    history: Vec<WorkSession>,
    filter: HistoryRange,
    stats: SessionStats,
}

impl SessionTracker {
    pub fn new(
        user: UserId,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        notifier: Notifier,
        timeout: Duration,
        history_limit: usize,
    ) -> Self {
        Self {
            user,
            store,
            clock,
            notifier,
            timeout,
            history_limit,
            current: None,
            session_duration: 0,
            today: Vec::new(),
            history: Vec::new(),
            filter: HistoryRange::default(),
            stats: SessionStats::default(),
        }
    }

    pub fn current(&self) -> Option<&WorkSession> {
        self.current.as_ref()
    }

    pub fn is_checked_in(&self) -> bool {
        self.current.is_some()
    }

    pub fn session_duration(&self) -> u64 {
        self.session_duration
    }

    pub fn today(&self) -> &[WorkSession] {
        &self.today
    }

    pub fn history(&self) -> &[WorkSession] {
        &self.history
    }

    pub fn filter(&self) -> HistoryRange {
        self.filter
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Fetch the active session, today's sessions and the current history page
    pub async fn load(&mut self) -> Result<()> {
        self.refresh_current().await?;
        self.refresh_today().await?;
        self.fetch_history(self.filter, self.history_limit).await
    }

    /// Open a session now. No-op if already checked in.
    pub async fn check_in(&mut self) -> Result<()> {
        if self.current.is_some() {
            return Ok(());
        }

        let now = self.clock.now();
        let created =
            store::bounded(self.timeout, self.store.create_session(&self.user, now)).await;
        match created {
            Ok(session) => {
                tracing::info!(session = %session.id, "checked in");
                self.notifier.success(
                    "Checked In",
                    &format!("Work session started at {}", format_time_of_day(Some(now))),
                );
                self.today.insert(0, session.clone());
                self.current = Some(session);
                self.session_duration = 0;
                Ok(())
            }
            Err(StoreError::Conflict(reason)) => {
                tracing::warn!(user = %self.user, %reason, "check-in conflict");
                self.notifier.warning(
                    "Already Checked In",
                    "A work session is already active on another device",
                );
                // Best effort; a failure here is reported on its own
                if self.refresh_current().await.is_ok() {
                    let _ = self.refresh_today().await;
                }
                Err(StoreError::Conflict(reason).into())
            }
            Err(err) => Err(self.report("check in", err.into())),
        }
    }

    /// Close the active session now. No-op if not checked in.
    pub async fn check_out(&mut self, reason: Option<&str>) -> Result<()> {
        let Some(session) = self.current.clone() else {
            return Ok(());
        };

        let now = self.clock.now();
        let patch = SessionPatch::check_out(&session, now, reason);

        let store = Arc::clone(&self.store);
        let user = self.user.clone();
        let id = session.id.clone();
        let limit = self.timeout;
        let remote_patch = patch.clone();
        let remote = async move {
            store::bounded(limit, store.update_session(&user, &id, &remote_patch))
                .await
                .map_err(Error::from)
        };

        self.current = None;
        let result = sync::optimistic(
            &mut self.today,
            &[&session.id],
            |today| {
                if let Some(entry) = today.iter_mut().find(|s| s.id == session.id) {
                    entry.apply(&patch);
                }
            },
            remote,
        )
        .await;

        match result {
            Ok(closed) => {
                let duration = closed.duration.unwrap_or_default();
                tracing::info!(session = %closed.id, duration, "checked out");
                self.session_duration = 0;
                self.add_to_history(closed);
                self.notifier
                    .success("Checked Out", &format!("Worked {}", format_duration(duration)));
                Ok(())
            }
            Err(err) => {
                self.current = Some(session);
                Err(self.report("check out", err))
            }
        }
    }

    /// Recompute the live duration of the active session from the wall clock
    pub fn tick(&mut self) {
        if let Some(session) = &self.current {
            self.session_duration = session.elapsed_at(self.clock.now());
        }
    }

    /// Replace the history with up to `limit` completed sessions in `filter`,
    /// newest first, and recompute the stats over them.
    pub async fn fetch_history(&mut self, filter: HistoryRange, limit: usize) -> Result<()> {
        let query = SessionQuery {
            since: self.lower_bound(filter),
            completed_only: true,
            limit: Some(limit),
        };
        let listed =
            store::bounded(self.timeout, self.store.list_sessions(&self.user, &query)).await;
        match listed {
            Ok(sessions) => {
                tracing::debug!(%filter, count = sessions.len(), "fetched session history");
                self.stats = SessionStats::from_sessions(&sessions);
                self.history = sessions;
                self.filter = filter;
                Ok(())
            }
            Err(err) => Err(self.report("load session history", err.into())),
        }
    }

    /// Delete one completed session. The active session must be checked out first.
    pub async fn delete_session(&mut self, id: &SessionId) -> Result<()> {
        if self.current.as_ref().is_some_and(|s| &s.id == id) {
            return Err(self.report(
                "delete session",
                Error::validation("Check out before deleting the active session"),
            ));
        }

        let store = Arc::clone(&self.store);
        let user = self.user.clone();
        let target = id.clone();
        let limit = self.timeout;
        let remote = async move {
            let rows = store::bounded(limit, store.delete_session(&user, &target)).await?;
            if rows == 0 {
                return Err(Error::not_found(format!("session {}", target)));
            }
            Ok::<u64, Error>(rows)
        };

        let today_snapshot = Snapshot::capture(&self.today, &[id]);
        self.today.retain(|s| &s.id != id);
        let result = sync::optimistic(
            &mut self.history,
            &[id],
            |history| history.retain(|s| &s.id != id),
            remote,
        )
        .await;

        match result {
            Ok(_) => {
                self.stats = SessionStats::from_sessions(&self.history);
                tracing::info!(session = %id, "deleted session");
                self.notifier
                    .info("Session Deleted", "The work session has been removed");
                Ok(())
            }
            Err(err) => {
                today_snapshot.restore(&mut self.today);
                Err(self.report("delete session", err))
            }
        }
    }

    /// Delete every completed session checked in within `range`, then refresh
    /// history and today's list. Returns how many were removed.
    pub async fn delete_sessions_in_range(&mut self, range: HistoryRange) -> Result<u64> {
        let since = self.lower_bound(range);
        let deleted =
            store::bounded(self.timeout, self.store.delete_sessions(&self.user, since)).await;
        let removed = match deleted {
            Ok(removed) => removed,
            Err(err) => return Err(self.report("delete sessions", err.into())),
        };

        tracing::info!(%range, removed, "deleted sessions in range");
        self.notifier.info(
            "Sessions Deleted",
            &format!("Removed {} session(s) from {}", removed, range_label(range)),
        );

        self.fetch_history(self.filter, self.history_limit).await?;
        // Every range reaches today
        self.refresh_today().await?;
        Ok(removed)
    }

    /// Completed time today plus the live duration of the active session
    pub fn total_time_today(&self) -> u64 {
        let completed: u64 = self.today.iter().filter_map(|s| s.duration.or(s.span())).sum();
        let live = match &self.current {
            Some(current) if self.today.iter().any(|s| s.id == current.id) => {
                self.session_duration
            }
            _ => 0,
        };
        completed + live
    }

    async fn refresh_current(&mut self) -> Result<()> {
        let active =
            store::bounded(self.timeout, self.store.active_session(&self.user)).await;
        match active {
            Ok(current) => {
                let now = self.clock.now();
                self.session_duration = current.as_ref().map_or(0, |s| s.elapsed_at(now));
                self.current = current;
                Ok(())
            }
            Err(err) => Err(self.report("load active session", err.into())),
        }
    }

    async fn refresh_today(&mut self) -> Result<()> {
        let query = SessionQuery {
            since: Some(today_start(self.clock.now())),
            completed_only: false,
            limit: None,
        };
        let listed =
            store::bounded(self.timeout, self.store.list_sessions(&self.user, &query)).await;
        match listed {
            Ok(sessions) => {
                self.today = sessions;
                Ok(())
            }
            Err(err) => Err(self.report("load today's sessions", err.into())),
        }
    }

    fn add_to_history(&mut self, session: WorkSession) {
        let in_window = self
            .lower_bound(self.filter)
            .map_or(true, |since| session.check_in >= since);
        if !in_window || self.history.iter().any(|s| s.id == session.id) {
            return;
        }
        self.history.insert(0, session);
        self.history.sort_by(|a, b| b.check_in.cmp(&a.check_in));
        self.history.truncate(self.history_limit);
        self.stats = SessionStats::from_sessions(&self.history);
    }

    fn lower_bound(&self, range: HistoryRange) -> Option<DateTime<Utc>> {
        range.lower_bound(&self.clock.now().with_timezone(&Local))
    }

    fn report(&self, action: &str, err: Error) -> Error {
        tracing::warn!(user = %self.user, action, error = %err, "session operation failed");
        self.notifier
            .warning("Error", &format!("Failed to {}: {}", action, err));
        err
    }
}

fn range_label(range: HistoryRange) -> &'static str {
    match range {
        HistoryRange::Today => "today",
        HistoryRange::Week => "the last 7 days",
        HistoryRange::Month => "the last month",
        HistoryRange::All => "all time",
    }
}

/// Local midnight of the day containing `now`
pub fn today_start(now: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(&now.with_timezone(&Local))
}
