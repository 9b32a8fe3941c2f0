//! Completion state of a task.
//!
//! `status`, `is_completed` and `completed_at` always move together. Every code
//! path that changes any of them goes through [`Progress::apply`], which keeps
//! `completed_at.is_some() == is_completed == (status == Done)`.

use chrono::{DateTime, Utc};

use super::TaskStatus;
use crate::entities::task as task_entity;

/// The completion-related fields of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub status: TaskStatus,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A requested change to a task's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressChange {
    /// Flip completion. Completing moves the task to `done`; uncompleting a
    /// `done` task moves it back to `not_started`.
    ToggleCompletion,
    /// Move the task to a column of the board.
    SetStatus(TaskStatus),
}

impl Default for Progress {
    fn default() -> Self {
        Self::not_started()
    }
}

impl Progress {
    pub fn not_started() -> Self {
        Self {
            status: TaskStatus::NotStarted,
            is_completed: false,
            completed_at: None,
        }
    }

    /// Applies `change` and returns the resulting progress.
    ///
    /// `now` is used as the completion timestamp when a task becomes
    /// complete. A task that is already complete keeps its original timestamp.
    pub fn apply(self, change: ProgressChange, now: DateTime<Utc>) -> Self {
        match change {
            ProgressChange::ToggleCompletion if self.is_completed => {
                let status = match self.status {
                    TaskStatus::Done => TaskStatus::NotStarted,
                    other => other,
                };
                Self::open(status)
            }
            ProgressChange::ToggleCompletion => self.completed(now),
            ProgressChange::SetStatus(TaskStatus::Done) => self.completed(now),
            ProgressChange::SetStatus(status) => Self::open(status),
        }
    }

    /// Whether the three fields agree with each other.
    pub fn is_consistent(&self) -> bool {
        self.is_completed == self.completed_at.is_some()
            && self.is_completed == (self.status == TaskStatus::Done)
    }

    fn completed(self, now: DateTime<Utc>) -> Self {
        let completed_at = match (self.is_completed, self.completed_at) {
            (true, Some(at)) => at,
            _ => now,
        };
        Self {
            status: TaskStatus::Done,
            is_completed: true,
            completed_at: Some(completed_at),
        }
    }

    fn open(status: TaskStatus) -> Self {
        Self {
            status,
            is_completed: false,
            completed_at: None,
        }
    }
}

impl From<&task_entity::Model> for Progress {
    fn from(model: &task_entity::Model) -> Self {
        Self {
            status: model.status,
            is_completed: model.is_completed,
            completed_at: model.completed_at,
        }
    }
}
