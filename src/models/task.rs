use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::TaskError;

/// Prefix of ids the store assigns to not-yet-confirmed tasks.
pub const PLACEHOLDER_PREFIX: &str = "local-";

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Waiting,
    InProgress,
    Completed,
    Abandoned,
}

impl TaskStatus {
    /// Board column order.
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Waiting,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Abandoned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown status {:?} (expected waiting, in-progress, completed or abandoned)",
                    s
                )
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Always ISO-8601 once inside the crate, whatever shape the source used.
    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub due: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl Task {
    /// Local stand-in for a task the backend has not confirmed yet.
    pub fn placeholder(draft: &TaskDraft, owner: &str) -> Self {
        Task {
            id: format!("{}{}", PLACEHOLDER_PREFIX, Uuid::new_v4()),
            title: draft.title.clone(),
            description: draft.description.clone(),
            due: draft.due.clone(),
            status: draft.status,
            owner: Some(owner.to_string()),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.starts_with(PLACEHOLDER_PREFIX)
    }

    /// Milliseconds since the epoch of `due`, if present and readable.
    pub fn due_millis(&self) -> Option<i64> {
        self.due.as_deref().and_then(parse_due_millis)
    }
}

/// The writable fields of a task. Used for creation and for full-record updates, so it can
/// never carry `id` or `owner`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        TaskDraft {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_due(mut self, due: impl Into<String>) -> Self {
        self.due = Some(due.into());
        self
    }

    /// Trims text fields and drops empty optionals; fails when the title is blank.
    pub fn validated(&self) -> Result<TaskDraft, TaskError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(TaskError::Validation("Title is required".to_string()));
        }
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Ok(TaskDraft {
            title: title.to_string(),
            description: non_empty(&self.description),
            due: non_empty(&self.due),
            status: self.status,
        })
    }
}

impl From<&Task> for TaskDraft {
    fn from(task: &Task) -> Self {
        TaskDraft {
            title: task.title.clone(),
            description: task.description.clone(),
            due: task.due.clone(),
            status: task.status,
        }
    }
}

/// Field-level edit requested by the UI. `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskEdit {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub due: Option<Option<String>>,
    pub status: Option<TaskStatus>,
}

impl TaskEdit {
    pub fn status(status: TaskStatus) -> Self {
        TaskEdit {
            status: Some(status),
            ..Default::default()
        }
    }

    /// The whole record after the edit.
    pub fn apply(&self, task: &Task) -> Task {
        let mut edited = task.clone();
        if let Some(title) = &self.title {
            edited.title = title.clone();
        }
        if let Some(description) = &self.description {
            edited.description = description.clone();
        }
        if let Some(due) = &self.due {
            edited.due = due.clone();
        }
        if let Some(status) = self.status {
            edited.status = status;
        }
        edited
    }
}

/// Timestamp shapes accepted from collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Text(String),
    /// Document-database native timestamp (`{seconds, nanoseconds}`).
    Native {
        #[serde(alias = "_seconds")]
        seconds: i64,
        #[serde(default, alias = "_nanoseconds")]
        nanoseconds: u32,
    },
}

impl RawTimestamp {
    /// ISO-8601 form. Strings pass through untouched; native values go through
    /// `seconds * 1000` milliseconds.
    pub fn normalize(self) -> Option<String> {
        match self {
            RawTimestamp::Text(text) => Some(text),
            RawTimestamp::Native { seconds, .. } => {
                let millis = seconds.checked_mul(1000)?;
                match Utc.timestamp_millis_opt(millis).single() {
                    Some(at) => Some(to_iso_string(at)),
                    None => {
                        log::warn!("Dropping out-of-range timestamp: {} seconds", seconds);
                        None
                    }
                }
            }
        }
    }
}

pub fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawTimestamp>::deserialize(deserializer)?;
    Ok(raw.and_then(RawTimestamp::normalize))
}

/// `YYYY-MM-DDTHH:MM:SS.mmmZ`, the shape browsers produce.
pub fn to_iso_string(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Reads the due formats the board produces. Naive values are taken as UTC.
pub fn parse_due_millis(due: &str) -> Option<i64> {
    let due = due.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(due) {
        return Some(at.timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(at) = NaiveDateTime::parse_from_str(due, format) {
            return Some(at.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(due, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc().timestamp_millis())
}

/// Ascending by due; missing or unreadable due dates count as epoch 0. Stable.
pub fn sort_by_due(tasks: &mut [Task]) {
    tasks.sort_by_key(|task| task.due_millis().unwrap_or(0));
}
