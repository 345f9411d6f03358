pub mod enums;
pub mod ids;
pub mod session;
pub mod task;
pub mod views;

pub use enums::{start_of_day, HistoryRange, NotificationKind, TaskStatus};
pub use ids::{SessionId, TaskId, UserId};
pub use session::{normalize_reason, SessionPatch, SessionQuery, SessionStats, WorkSession};
pub use task::{Task, TaskEvent, TaskPatch, TaskRecord};
pub use views::{compute_stats, status_badge, TaskStats};
