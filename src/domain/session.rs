use super::ids::{SessionId, UserId};
use crate::clock::whole_seconds_between;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A check-in/check-out record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub check_in: DateTime<Utc>,
    /// `None` while the session is the user's active one
    #[serde(default)]
    pub check_out: Option<DateTime<Utc>>,
    /// Seconds, written at check-out
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl WorkSession {
    pub fn new(user_id: UserId, check_in: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::generate(),
            user_id,
            check_in,
            check_out: None,
            duration: None,
            reason: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.check_out.is_none()
    }

    /// Live duration of an open session as of `now`
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> u64 {
        whole_seconds_between(self.check_in, now)
    }

    /// `check_out - check_in` for closed sessions
    pub fn span(&self) -> Option<u64> {
        self.check_out
            .map(|check_out| whole_seconds_between(self.check_in, check_out))
    }

    pub fn apply(&mut self, patch: &SessionPatch) {
        if let Some(check_out) = patch.check_out {
            self.check_out = Some(check_out);
        }
        if let Some(duration) = patch.duration {
            self.duration = Some(duration);
        }
        if let Some(reason) = &patch.reason {
            self.reason = reason.clone();
        }
    }
}

/// Fields written when a session is closed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub check_out: Option<DateTime<Utc>>,
    pub duration: Option<u64>,
    pub reason: Option<Option<String>>,
}

impl SessionPatch {
    /// Close `session` at `now` with an optional free-text reason
    pub fn check_out(session: &WorkSession, now: DateTime<Utc>, reason: Option<&str>) -> Self {
        Self {
            check_out: Some(now),
            duration: Some(session.elapsed_at(now)),
            reason: Some(normalize_reason(reason)),
        }
    }
}

/// Trimmed reason, or `None` when empty or whitespace-only
pub fn normalize_reason(reason: Option<&str>) -> Option<String> {
    reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
}

/// Selection of a user's sessions, newest `check_in` first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionQuery {
    /// Inclusive lower bound on `check_in`
    pub since: Option<DateTime<Utc>>,
    /// Only sessions that have a `check_out`
    pub completed_only: bool,
    pub limit: Option<usize>,
}

impl SessionQuery {
    pub fn matches(&self, session: &WorkSession) -> bool {
        if self.completed_only && session.is_active() {
            return false;
        }
        match self.since {
            Some(since) => session.check_in >= since,
            None => true,
        }
    }
}

/// Aggregates over a window of completed sessions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub count: usize,
    /// Seconds, Σ(check_out - check_in)
    pub total_time: u64,
    /// Seconds, `total_time / count`, 0 when empty
    pub average: u64,
}

impl SessionStats {
    /// Active sessions are ignored
    pub fn from_sessions(sessions: &[WorkSession]) -> Self {
        let spans: Vec<u64> = sessions.iter().filter_map(WorkSession::span).collect();
        let count = spans.len();
        let total_time: u64 = spans.iter().sum();
        let average = if count > 0 { total_time / count as u64 } else { 0 };

        Self {
            count,
            total_time,
            average,
        }
    }
}
