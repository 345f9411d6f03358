//! Task stopwatch and work-session tracker.
//!
//! The core is two state machines, [`tasks::TaskManager`] and
//! [`sessions::SessionTracker`], kept in sync with a remote store through the
//! [`store::TaskStore`] and [`store::SessionStore`] capabilities. Every
//! failure is surfaced through the shared [`notifications::Notifier`].

pub mod analytics;
pub mod app;
pub mod auth;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod format;
pub mod notifications;
pub mod persistence;
pub mod scheduler;
pub mod sessions;
pub mod store;
pub mod sync;
pub mod tasks;
pub mod ticker;

pub use app::{open_backend, App, Backends};
pub use error::{Error, Result};
