use crate::domain::{Task, TaskStatus};

/// Entries shown in the time-per-task ranking
pub const TOP_TIME_PER_TASK: usize = 5;

/// Entries shown in the attempts ranking
pub const TOP_ATTEMPTS: usize = 6;

/// Entries shown in the improvers ranking
pub const TOP_IMPROVERS: usize = 4;

/// Headline numbers over all tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryStats {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    /// Rounded percentage of completed tasks
    pub completion_rate: u64,
    pub total_attempts: usize,
    /// Seconds across every attempt
    pub total_time: u64,
    /// Rounded seconds per attempt
    pub avg_time_per_attempt: u64,
}

/// How many tasks are in each status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusDistribution {
    pub completed: usize,
    pub running: usize,
    pub idle: usize,
}

/// Total recorded time for one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTime {
    pub name: String,
    pub total_time: u64,
    pub best_time: Option<u64>,
    pub attempts: usize,
}

/// A task whose last attempt beat its first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Improver {
    pub name: String,
    /// Rounded percentage, always positive
    pub improvement: i64,
    pub attempts: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analytics {
    pub summary: SummaryStats,
    pub status: StatusDistribution,
    /// Tasks with recorded time, most time first
    pub time_per_task: Vec<TaskTime>,
    /// Tasks with attempts, most attempts first
    pub attempts_per_task: Vec<(String, usize)>,
    /// Largest improvement first
    pub improvers: Vec<Improver>,
}

/// Calculate every analytics view over the task list
pub fn summarize(tasks: &[Task]) -> Analytics {
    Analytics {
        summary: calculate_summary(tasks),
        status: calculate_status_distribution(tasks),
        time_per_task: calculate_time_per_task(tasks),
        attempts_per_task: calculate_attempts_per_task(tasks),
        improvers: calculate_improvers(tasks),
    }
}

pub fn calculate_summary(tasks: &[Task]) -> SummaryStats {
    let total_tasks = tasks.len();
    let completed_tasks = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .count();
    let total_attempts: usize = tasks.iter().map(|t| t.attempts.len()).sum();
    let total_time: u64 = tasks.iter().map(Task::total_time).sum();

    let avg_time_per_attempt = if total_attempts > 0 {
        rounded_ratio(total_time, total_attempts as u64)
    } else {
        0
    };
    let completion_rate = if total_tasks > 0 {
        rounded_ratio(completed_tasks as u64 * 100, total_tasks as u64)
    } else {
        0
    };

    SummaryStats {
        total_tasks,
        completed_tasks,
        completion_rate,
        total_attempts,
        total_time,
        avg_time_per_attempt,
    }
}

pub fn calculate_status_distribution(tasks: &[Task]) -> StatusDistribution {
    let mut distribution = StatusDistribution::default();
    for task in tasks {
        match task.status {
            TaskStatus::Completed => distribution.completed += 1,
            TaskStatus::Running => distribution.running += 1,
            TaskStatus::Idle => distribution.idle += 1,
        }
    }
    distribution
}

pub fn calculate_time_per_task(tasks: &[Task]) -> Vec<TaskTime> {
    let mut times: Vec<TaskTime> = tasks
        .iter()
        .map(|task| TaskTime {
            name: task.name.clone(),
            total_time: task.total_time(),
            best_time: task.best_time,
            attempts: task.attempts.len(),
        })
        .filter(|t| t.total_time > 0)
        .collect();
    times.sort_by(|a, b| b.total_time.cmp(&a.total_time));
    times.truncate(TOP_TIME_PER_TASK);
    times
}

pub fn calculate_attempts_per_task(tasks: &[Task]) -> Vec<(String, usize)> {
    let mut attempts: Vec<(String, usize)> = tasks
        .iter()
        .filter(|t| !t.attempts.is_empty())
        .map(|t| (t.name.clone(), t.attempts.len()))
        .collect();
    attempts.sort_by(|a, b| b.1.cmp(&a.1));
    attempts.truncate(TOP_ATTEMPTS);
    attempts
}

/// Tasks with at least two attempts whose last attempt was faster than the first
pub fn calculate_improvers(tasks: &[Task]) -> Vec<Improver> {
    let mut improvers: Vec<Improver> = tasks
        .iter()
        .filter(|t| t.attempts.len() >= 2)
        .filter_map(|task| {
            let first = *task.attempts.first()?;
            let last = *task.attempts.last()?;
            let improvement = improvement_percent(first, last);
            (improvement > 0).then(|| Improver {
                name: task.name.clone(),
                improvement,
                attempts: task.attempts.len(),
            })
        })
        .collect();
    improvers.sort_by(|a, b| b.improvement.cmp(&a.improvement));
    improvers.truncate(TOP_IMPROVERS);
    improvers
}

/// `round((first - last) / first * 100)`, 0 when `first` is 0
pub fn improvement_percent(first: u64, last: u64) -> i64 {
    if first == 0 {
        return 0;
    }
    let ratio = (first as f64 - last as f64) / first as f64;
    (ratio * 100.0).round() as i64
}

fn rounded_ratio(numerator: u64, denominator: u64) -> u64 {
    (numerator as f64 / denominator as f64).round() as u64
}
