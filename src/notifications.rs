//! Transient user messages produced by the state machines.
//!
//! The queue is time-boxed: each entry expires a fixed delay after it was
//! enqueued. Expiry is deadline based, so nothing needs a timer per message;
//! the scheduler sweeps expired entries once per tick and reads never return
//! stale ones.

use crate::clock::Clock;
use crate::domain::NotificationKind;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[cfg(target_os = "macos")]
use std::process::Command;

/// Default lifetime of a notification
pub const DEFAULT_TTL_SECS: i64 = 4;

/// A queued message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub dedup_key: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Ordered, deduplicated, auto-expiring list of notifications
#[derive(Debug)]
pub struct NotificationQueue {
    entries: Vec<Notification>,
    ttl: Duration,
    desktop: bool,
}

impl NotificationQueue {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Vec::new(),
            ttl,
            desktop: false,
        }
    }

    /// Mirror every enqueued message to the OS notification center
    pub fn with_desktop(mut self, enabled: bool) -> Self {
        self.desktop = enabled;
        self
    }

    /// Append a message unless one with the same dedup key is still queued.
    pub fn enqueue(
        &mut self,
        kind: NotificationKind,
        title: &str,
        message: &str,
        dedup_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<Uuid> {
        self.expire(now);

        if let Some(key) = dedup_key {
            if self.entries.iter().any(|n| n.dedup_key.as_deref() == Some(key)) {
                tracing::debug!(key, "suppressed duplicate notification");
                return None;
            }
        }

        let id = Uuid::new_v4();
        self.entries.push(Notification {
            id,
            kind,
            title: title.to_string(),
            message: message.to_string(),
            dedup_key: dedup_key.map(str::to_string),
            expires_at: now + self.ttl,
        });

        if self.desktop {
            send_desktop(title, message);
        }

        Some(id)
    }

    /// Remove a message now. Unknown ids are ignored.
    pub fn dismiss(&mut self, id: Uuid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|n| n.id != id);
        self.entries.len() != before
    }

    /// Drop every message whose deadline has passed. Returns how many were dropped.
    pub fn expire(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|n| n.expires_at > now);
        before - self.entries.len()
    }

    /// Messages still live at `now`, oldest first
    pub fn active(&self, now: DateTime<Utc>) -> Vec<Notification> {
        self.entries
            .iter()
            .filter(|n| n.expires_at > now)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared handle to the process-wide queue, stamped with the injected clock.
#[derive(Clone)]
pub struct Notifier {
    queue: Arc<Mutex<NotificationQueue>>,
    clock: Arc<dyn Clock>,
}

impl Notifier {
    pub fn new(queue: NotificationQueue, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue: Arc::new(Mutex::new(queue)),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, NotificationQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn notify(&self, kind: NotificationKind, title: &str, message: &str) -> Option<Uuid> {
        let now = self.clock.now();
        self.lock().enqueue(kind, title, message, None, now)
    }

    pub fn notify_once(
        &self,
        kind: NotificationKind,
        title: &str,
        message: &str,
        dedup_key: &str,
    ) -> Option<Uuid> {
        let now = self.clock.now();
        self.lock().enqueue(kind, title, message, Some(dedup_key), now)
    }

    pub fn success(&self, title: &str, message: &str) -> Option<Uuid> {
        self.notify(NotificationKind::Success, title, message)
    }

    pub fn info(&self, title: &str, message: &str) -> Option<Uuid> {
        self.notify(NotificationKind::Info, title, message)
    }

    pub fn warning(&self, title: &str, message: &str) -> Option<Uuid> {
        self.notify(NotificationKind::Warning, title, message)
    }

    pub fn dismiss(&self, id: Uuid) -> bool {
        self.lock().dismiss(id)
    }

    pub fn expire(&self) -> usize {
        let now = self.clock.now();
        self.lock().expire(now)
    }

    /// Live messages, oldest first
    pub fn snapshot(&self) -> Vec<Notification> {
        let now = self.clock.now();
        self.lock().active(now)
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").field("queue", &*self.lock()).finish()
    }
}

/// Post a message to the OS notification center (macOS only)
fn send_desktop(title: &str, message: &str) {
    #[cfg(target_os = "macos")]
    {
        let script = format!(
            r#"display notification "{}" with title "Stint - {}""#,
            message.replace('"', "\\\""),
            title.replace('"', "\\\"")
        );

        let _ = Command::new("osascript").arg("-e").arg(&script).output();
    }

    #[cfg(not(target_os = "macos"))]
    {
        // No-op on other platforms
        let _ = (title, message);
    }
}
