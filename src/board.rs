//! Derived views over the task list: the status board and the dashboard counters.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{Task, TaskStatus};

/// How far ahead a due date counts as "upcoming".
pub const UPCOMING_WINDOW_DAYS: i64 = 7;

/// Partitions `tasks` into the four lifecycle columns.
///
/// Every status is present, even when its column is empty, and tasks keep their input order
/// within a column.
pub fn group_by_status(tasks: &[Task]) -> BTreeMap<TaskStatus, Vec<&Task>> {
    let mut grouped: BTreeMap<TaskStatus, Vec<&Task>> = TaskStatus::ALL
        .into_iter()
        .map(|status| (status, Vec::new()))
        .collect();

    for task in tasks {
        grouped.entry(task.status).or_default().push(task);
    }
    grouped
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BoardSummary {
    pub total: usize,
    pub waiting: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub completed_percent: u32,
    pub overdue: usize,
    pub upcoming: usize,
}

impl BoardSummary {
    pub fn compute(tasks: &[Task], now: DateTime<Utc>) -> Self {
        let now_ms = now.timestamp_millis();
        let horizon_ms = (now + Duration::days(UPCOMING_WINDOW_DAYS)).timestamp_millis();
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();

        let total = tasks.len();
        let completed = count(TaskStatus::Completed);
        let completed_percent = if total == 0 {
            0
        } else {
            ((completed as f64 / total as f64) * 100.0).round() as u32
        };

        let overdue = tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Completed)
            .filter(|t| matches!(t.due_millis(), Some(due) if due < now_ms))
            .count();
        let upcoming = tasks
            .iter()
            .filter(|t| matches!(t.due_millis(), Some(due) if due > now_ms && due <= horizon_ms))
            .count();

        BoardSummary {
            total,
            waiting: count(TaskStatus::Waiting),
            in_progress: count(TaskStatus::InProgress),
            completed,
            completed_percent,
            overdue,
            upcoming,
        }
    }
}
