//! View model behind the kanban board and the priority matrix.
//!
//! A [`Board`] holds the cards a user sees. Changes are applied locally first
//! with [`Board::begin`], which hands back a [`PendingChange`] carrying the
//! card as it was. Once the server answers, [`Board::settle`] either keeps the
//! server's version of the card or restores the snapshot and records the error.

use chrono::Utc;

use crate::task::{Priority, ProgressChange, Quadrant, Task, TaskStatus};

/// A task as rendered on the board.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskCard {
    pub task: Task,
    /// A local change is waiting for the server.
    pub updating: bool,
    /// The server just confirmed a change to this card.
    pub highlighted: bool,
}

impl TaskCard {
    fn new(task: Task) -> Self {
        Self {
            task,
            updating: false,
            highlighted: false,
        }
    }
}

/// A change the user made to a card before the server confirmed it.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalChange {
    Toggle,
    Retitle(String),
    Remove,
    Move(TaskStatus),
    Reprioritize(Priority),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BoardError {
    #[error("Task {0} not found or unauthorized")]
    UnknownTask(i32),
    #[error("Task {0} is already being updated")]
    Busy(i32),
    /// The change would leave the card where it already is.
    #[error("Task {0} is unchanged")]
    Unchanged(i32),
}

/// A local change awaiting the server's answer.
#[derive(Debug)]
#[must_use = "a pending change must be settled"]
pub struct PendingChange {
    id: i32,
    change: LocalChange,
    position: usize,
    snapshot: TaskCard,
}

impl PendingChange {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn change(&self) -> &LocalChange {
        &self.change
    }
}

/// One kanban column.
#[derive(Debug)]
pub struct ColumnView<'a> {
    pub status: TaskStatus,
    pub title: &'static str,
    pub cards: Vec<&'a TaskCard>,
}

/// One cell of the priority matrix.
#[derive(Debug)]
pub struct QuadrantView<'a> {
    pub quadrant: Quadrant,
    pub cards: Vec<&'a TaskCard>,
}

#[derive(Debug, Default)]
pub struct Board {
    cards: Vec<TaskCard>,
    error: Option<String>,
}

impl Board {
    /// Builds a board from tasks in display order.
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            cards: tasks.into_iter().map(TaskCard::new).collect(),
            error: None,
        }
    }

    pub fn cards(&self) -> &[TaskCard] {
        &self.cards
    }

    pub fn card(&self, id: i32) -> Option<&TaskCard> {
        self.cards.iter().find(|card| card.task.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// The message of the last failed change, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// Puts a freshly created task at the top of the board.
    pub fn add(&mut self, task: Task) {
        let mut card = TaskCard::new(task);
        card.highlighted = true;
        self.cards.insert(0, card);
    }

    /// Applies `change` to the card locally and marks it as updating.
    ///
    /// Refuses cards that are unknown, already waiting on the server, or that
    /// the change would not move. A board rebuilt per request never holds an
    /// unsettled card, so `Busy` only applies while one board sees overlapping
    /// changes; in the browser the `updating` class blocks further input.
    pub fn begin(&mut self, id: i32, change: LocalChange) -> Result<PendingChange, BoardError> {
        let position = self
            .cards
            .iter()
            .position(|card| card.task.id == id)
            .ok_or(BoardError::UnknownTask(id))?;
        let card = &self.cards[position];
        if card.updating {
            return Err(BoardError::Busy(id));
        }
        let unchanged = match &change {
            LocalChange::Move(status) => card.task.status == *status,
            LocalChange::Reprioritize(priority) => card.task.priority == *priority,
            LocalChange::Retitle(title) => card.task.title == *title,
            LocalChange::Toggle | LocalChange::Remove => false,
        };
        if unchanged {
            return Err(BoardError::Unchanged(id));
        }

        let snapshot = card.clone();
        self.error = None;

        if change == LocalChange::Remove {
            self.cards.remove(position);
        } else {
            let card = &mut self.cards[position];
            let now = Utc::now();
            match &change {
                LocalChange::Toggle => {
                    let progress = card
                        .task
                        .progress()
                        .apply(ProgressChange::ToggleCompletion, now);
                    card.task.set_progress(progress);
                }
                LocalChange::Move(status) => {
                    let progress = card
                        .task
                        .progress()
                        .apply(ProgressChange::SetStatus(*status), now);
                    card.task.set_progress(progress);
                }
                LocalChange::Retitle(title) => card.task.title = title.clone(),
                LocalChange::Reprioritize(priority) => card.task.priority = *priority,
                LocalChange::Remove => {}
            }
            card.updating = true;
            card.highlighted = false;
        }

        Ok(PendingChange {
            id,
            change,
            position,
            snapshot,
        })
    }

    /// Reconciles a pending change with the server's answer.
    ///
    /// `Ok(Some(task))` replaces the card with the server's version,
    /// `Ok(None)` means the task is gone, and `Err(message)` restores the card
    /// to how it was before [`Board::begin`].
    pub fn settle(&mut self, pending: PendingChange, result: Result<Option<Task>, String>) {
        let existing = self.cards.iter().position(|card| card.task.id == pending.id);
        match result {
            Ok(_) if pending.change == LocalChange::Remove => {}
            Ok(Some(task)) => {
                if let Some(position) = existing {
                    self.cards[position] = TaskCard {
                        task,
                        updating: false,
                        highlighted: true,
                    };
                }
            }
            Ok(None) => {
                if let Some(position) = existing {
                    self.cards.remove(position);
                }
            }
            Err(message) => {
                tracing::debug!(task_id = pending.id, "Rolling back {:?}", pending.change);
                match existing {
                    Some(position) => self.cards[position] = pending.snapshot,
                    None => {
                        let position = pending.position.min(self.cards.len());
                        self.cards.insert(position, pending.snapshot);
                    }
                }
                self.error = Some(message);
            }
        }
    }

    /// The kanban columns in board order.
    pub fn columns(&self) -> Vec<ColumnView<'_>> {
        TaskStatus::ALL
            .into_iter()
            .map(|status| ColumnView {
                status,
                title: status.label(),
                cards: self
                    .cards
                    .iter()
                    .filter(|card| card.task.status == status)
                    .collect(),
            })
            .collect()
    }

    /// The matrix quadrants, narrowed to `filter` when one is given.
    pub fn quadrants(&self, filter: Option<Quadrant>) -> Vec<QuadrantView<'_>> {
        Quadrant::ALL
            .into_iter()
            .filter(|quadrant| filter.is_none_or(|wanted| wanted == *quadrant))
            .map(|quadrant| QuadrantView {
                quadrant,
                cards: self
                    .cards
                    .iter()
                    .filter(|card| card.task.quadrant() == quadrant)
                    .collect(),
            })
            .collect()
    }
}
