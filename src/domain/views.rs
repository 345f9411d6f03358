use super::enums::TaskStatus;
use super::task::Task;

/// Aggregate figures derived from the task list on every change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub running: usize,
    /// Seconds, sum of every attempt across all tasks
    pub total_time: u64,
}

/// Compute task statistics
pub fn compute_stats(tasks: &[Task]) -> TaskStats {
    TaskStats {
        total: tasks.len(),
        completed: tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count(),
        running: tasks.iter().filter(|t| t.status == TaskStatus::Running).count(),
        total_time: tasks.iter().map(Task::total_time).sum(),
    }
}

/// Short status label for list rendering
pub fn status_badge(task: &Task) -> &'static str {
    match task.status {
        TaskStatus::Running if task.is_exceeding => "⏱ OVER BEST",
        TaskStatus::Running => "⏱ RUNNING",
        TaskStatus::Idle => "· IDLE",
        TaskStatus::Completed => "✓ DONE",
    }
}
