use chrono::{DateTime, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Idle,
    Running,
    Completed,
}

impl TaskStatus {
    /// Parse status from a tag like "running"
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn to_tag(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_tag())
    }
}

/// Severity of a user-facing notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Warning,
    Success,
    #[default]
    Info,
}

impl NotificationKind {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Warning => "!",
            Self::Success => "✓",
            Self::Info => "i",
        }
    }
}

/// Date window used to filter and bulk-delete work sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRange {
    Today,
    Week,
    Month,
    #[default]
    All,
}

impl HistoryRange {
    pub fn all() -> &'static [HistoryRange] {
        &[
            HistoryRange::Today,
            HistoryRange::Week,
            HistoryRange::Month,
            HistoryRange::All,
        ]
    }

    pub fn to_tag(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Week => "week",
            Self::Month => "month",
            Self::All => "all",
        }
    }

    /// Earliest `check_in` included by this range, evaluated in `now`'s timezone.
    ///
    /// today = midnight today, week = seven days ago at midnight,
    /// month = one calendar month ago at midnight, all = unbounded.
    pub fn lower_bound<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
        let anchor = match self {
            Self::Today => now.clone(),
            Self::Week => now.clone() - chrono::Duration::days(7),
            Self::Month => now
                .clone()
                .checked_sub_months(Months::new(1))
                .unwrap_or_else(|| now.clone()),
            Self::All => return None,
        };
        Some(start_of_day(&anchor))
    }
}

impl fmt::Display for HistoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_tag())
    }
}

impl FromStr for HistoryRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "today" => Ok(Self::Today),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "all" => Ok(Self::All),
            other => {
                let expected: Vec<&str> = Self::all().iter().map(Self::to_tag).collect();
                Err(format!(
                    "unknown range '{}', expected one of: {}",
                    other,
                    expected.join(", ")
                ))
            }
        }
    }
}

/// Local midnight of the day containing `at`, as UTC
pub fn start_of_day<Tz: TimeZone>(at: &DateTime<Tz>) -> DateTime<Utc> {
    at.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| at.timezone().from_local_datetime(&midnight).earliest())
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or_else(|| at.with_timezone(&Utc))
}
