use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, QueryOrder, SqlErr};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::auth::CurrentUser;
use crate::config::DEFAULT_MAX_TITLE_LENGTH;
use crate::entities::task as task_entity;

pub mod api;
pub mod transition;
pub mod web;

pub use transition::{Progress, ProgressChange};

/// Column of the kanban board a task sits in.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    #[sea_orm(string_value = "not_started")]
    NotStarted,
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    #[sea_orm(string_value = "done")]
    Done,
}

impl TaskStatus {
    /// Board columns, left to right.
    pub const ALL: [TaskStatus; 3] = [
        TaskStatus::NotStarted,
        TaskStatus::InProgress,
        TaskStatus::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "not_started",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "Not Started",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Done => "Done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| TaskError::InvalidStatus(s.to_string()))
    }
}

/// Urgency and importance flags of a task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Priority {
    pub is_urgent: bool,
    pub is_important: bool,
}

impl Priority {
    pub fn new(is_urgent: bool, is_important: bool) -> Self {
        Self {
            is_urgent,
            is_important,
        }
    }

    pub fn quadrant(&self) -> Quadrant {
        match (self.is_urgent, self.is_important) {
            (true, true) => Quadrant::Do,
            (false, true) => Quadrant::Schedule,
            (true, false) => Quadrant::Delegate,
            (false, false) => Quadrant::Eliminate,
        }
    }
}

/// One cell of the Eisenhower matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Quadrant {
    #[serde(rename = "urgent-important")]
    Do,
    #[serde(rename = "not-urgent-important")]
    Schedule,
    #[serde(rename = "urgent-not-important")]
    Delegate,
    #[serde(rename = "not-urgent-not-important")]
    Eliminate,
}

impl Quadrant {
    /// Matrix cells in the order they are shown.
    pub const ALL: [Quadrant; 4] = [
        Quadrant::Do,
        Quadrant::Schedule,
        Quadrant::Delegate,
        Quadrant::Eliminate,
    ];

    pub fn slug(&self) -> &'static str {
        match self {
            Quadrant::Do => "urgent-important",
            Quadrant::Schedule => "not-urgent-important",
            Quadrant::Delegate => "urgent-not-important",
            Quadrant::Eliminate => "not-urgent-not-important",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Quadrant::Do => "Do: Urgent & Important",
            Quadrant::Schedule => "Schedule: Not Urgent & Important",
            Quadrant::Delegate => "Delegate: Urgent & Not Important",
            Quadrant::Eliminate => "Delete: Not Urgent & Not Important",
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            Quadrant::Do => Priority::new(true, true),
            Quadrant::Schedule => Priority::new(false, true),
            Quadrant::Delegate => Priority::new(true, false),
            Quadrant::Eliminate => Priority::new(false, false),
        }
    }
}

impl FromStr for Quadrant {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quadrant::ALL
            .into_iter()
            .find(|quadrant| quadrant.slug() == s)
            .ok_or_else(|| TaskError::InvalidQuadrant(s.to_string()))
    }
}

/// Reasons a title is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TitleError {
    #[error("Title is required")]
    Empty,
    #[error("Title must be at most {max} characters")]
    TooLong { max: usize, actual: usize },
}

/// A trimmed, non-empty task title within the length limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Title(String);

impl Title {
    pub fn parse(raw: &str, max_length: usize) -> Result<Self, TitleError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TitleError::Empty);
        }
        let actual = trimmed.chars().count();
        if actual > max_length {
            return Err(TitleError::TooLong {
                max: max_length,
                actual,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: i32,
    pub user_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn progress(&self) -> Progress {
        Progress {
            status: self.status,
            is_completed: self.is_completed,
            completed_at: self.completed_at,
        }
    }

    pub fn set_progress(&mut self, progress: Progress) {
        self.status = progress.status;
        self.is_completed = progress.is_completed;
        self.completed_at = progress.completed_at;
    }

    pub fn quadrant(&self) -> Quadrant {
        self.priority.quadrant()
    }
}

impl From<task_entity::Model> for Task {
    fn from(model: task_entity::Model) -> Self {
        Task {
            id: model.id,
            user_id: model.user_id,
            title: model.title,
            status: model.status,
            is_completed: model.is_completed,
            completed_at: model.completed_at,
            priority: Priority::new(model.is_urgent, model.is_important),
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Error type for TaskService operations.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The request carried no verified identity.
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Invalid title: {0}")]
    InvalidTitle(#[from] TitleError),
    #[error("Invalid status '{0}'")]
    InvalidStatus(String),
    #[error("Invalid quadrant '{0}'")]
    InvalidQuadrant(String),
    /// The task does not exist or belongs to someone else.
    #[error("Task {0} not found or unauthorized")]
    NotFound(i32),
    #[error("Task '{0}' already exists")]
    DuplicateTitle(String),
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl TaskError {
    /// Message safe to show to the caller. Database details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            TaskError::Database(_) => "Database error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Task operations on behalf of one authenticated user.
///
/// Every query is scoped to the owner the service was created for; tasks of
/// other users are indistinguishable from missing ones.
pub struct TaskService<'a> {
    db: &'a DatabaseConnection,
    owner: &'a str,
    max_title_length: usize,
}

impl<'a> TaskService<'a> {
    /// Creates a service for the caller, or fails if there is none.
    pub fn new(
        db: &'a DatabaseConnection,
        caller: Option<&'a CurrentUser>,
    ) -> Result<TaskService<'a>, TaskError> {
        let caller = caller.ok_or(TaskError::NotAuthenticated)?;
        Ok(TaskService {
            db,
            owner: &caller.user_id,
            max_title_length: DEFAULT_MAX_TITLE_LENGTH,
        })
    }

    pub fn with_max_title_length(mut self, max_title_length: usize) -> Self {
        self.max_title_length = max_title_length;
        self
    }

    pub fn owner(&self) -> &str {
        self.owner
    }

    /// Creates a new task owned by the caller.
    ///
    /// # Arguments
    ///
    /// * `title` - The raw title, trimmed before validation.
    /// * `priority` - Urgency and importance of the task.
    ///
    /// # Returns
    ///
    /// The created `Task`, or `DuplicateTitle` if the caller already has a task
    /// with this title.
    #[tracing::instrument(skip(self))]
    pub async fn create_task(&self, title: &str, priority: Priority) -> Result<Task, TaskError> {
        let title = Title::parse(title, self.max_title_length)?;
        if self.title_taken(title.as_str(), None).await? {
            return Err(TaskError::DuplicateTitle(title.into_inner()));
        }

        let now = Utc::now();
        let progress = Progress::not_started();
        let active_model = task_entity::ActiveModel {
            user_id: ActiveValue::Set(self.owner.to_string()),
            title: ActiveValue::Set(title.as_str().to_string()),
            is_completed: ActiveValue::Set(progress.is_completed),
            status: ActiveValue::Set(progress.status),
            completed_at: ActiveValue::Set(progress.completed_at),
            is_urgent: ActiveValue::Set(priority.is_urgent),
            is_important: ActiveValue::Set(priority.is_important),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        let created_model = active_model
            .insert(self.db)
            .await
            .map_err(|err| write_error(err, title.as_str()))?;
        tracing::info!(task_id = created_model.id, "Created task");
        Ok(Task::from(created_model))
    }

    /// Retrieves all tasks of the caller, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn get_tasks(&self) -> Result<Vec<Task>, TaskError> {
        let tasks = task_entity::Entity::find()
            .filter(task_entity::Column::UserId.eq(self.owner))
            .order_by_desc(task_entity::Column::CreatedAt)
            .order_by_desc(task_entity::Column::Id)
            .all(self.db)
            .await?
            .into_iter()
            .map(Task::from)
            .collect();
        Ok(tasks)
    }

    /// Retrieves one task of the caller by its ID.
    #[tracing::instrument(skip(self))]
    pub async fn get_task(&self, id: i32) -> Result<Task, TaskError> {
        self.find_owned(id).await.map(Task::from)
    }

    /// Flips the completion of a task.
    #[tracing::instrument(skip(self))]
    pub async fn toggle_task_completion(&self, id: i32) -> Result<Task, TaskError> {
        self.change_progress(id, ProgressChange::ToggleCompletion).await
    }

    /// Moves a task to another status; `done` completes it, anything else
    /// reopens it.
    #[tracing::instrument(skip(self))]
    pub async fn update_task_status(&self, id: i32, status: TaskStatus) -> Result<Task, TaskError> {
        self.change_progress(id, ProgressChange::SetStatus(status)).await
    }

    /// Renames a task.
    ///
    /// # Arguments
    ///
    /// * `id` - The ID of the task to rename.
    /// * `title` - The new raw title, validated like on creation.
    ///
    /// # Returns
    ///
    /// The updated `Task`. Renaming to a title used by another of the
    /// caller's tasks fails with `DuplicateTitle`.
    #[tracing::instrument(skip(self))]
    pub async fn update_task_title(&self, id: i32, title: &str) -> Result<Task, TaskError> {
        let title = Title::parse(title, self.max_title_length)?;
        let model = self.find_owned(id).await?;
        if model.title == title.as_str() {
            return Ok(Task::from(model));
        }
        if self.title_taken(title.as_str(), Some(id)).await? {
            return Err(TaskError::DuplicateTitle(title.into_inner()));
        }

        let mut active_model: task_entity::ActiveModel = model.into();
        active_model.title = ActiveValue::Set(title.as_str().to_string());
        active_model.updated_at = ActiveValue::Set(Utc::now());
        let updated_model = active_model
            .update(self.db)
            .await
            .map_err(|err| write_error(err, title.as_str()))?;
        Ok(Task::from(updated_model))
    }

    /// Sets the urgency and importance of a task. Progress is left untouched.
    #[tracing::instrument(skip(self))]
    pub async fn update_task_priority(
        &self,
        id: i32,
        priority: Priority,
    ) -> Result<Task, TaskError> {
        let model = self.find_owned(id).await?;

        let mut active_model: task_entity::ActiveModel = model.into();
        active_model.is_urgent = ActiveValue::Set(priority.is_urgent);
        active_model.is_important = ActiveValue::Set(priority.is_important);
        active_model.updated_at = ActiveValue::Set(Utc::now());
        let updated_model = active_model.update(self.db).await?;
        Ok(Task::from(updated_model))
    }

    /// Deletes a task of the caller and returns it.
    #[tracing::instrument(skip(self))]
    pub async fn delete_task(&self, id: i32) -> Result<Task, TaskError> {
        let model = self.find_owned(id).await?;

        let result = task_entity::Entity::delete_many()
            .filter(task_entity::Column::Id.eq(id))
            .filter(task_entity::Column::UserId.eq(self.owner))
            .exec(self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(TaskError::NotFound(id));
        }
        tracing::info!(task_id = id, "Deleted task");
        Ok(Task::from(model))
    }

    async fn change_progress(&self, id: i32, change: ProgressChange) -> Result<Task, TaskError> {
        let model = self.find_owned(id).await?;
        let now = Utc::now();
        let progress = Progress::from(&model).apply(change, now);

        let mut active_model: task_entity::ActiveModel = model.into();
        active_model.status = ActiveValue::Set(progress.status);
        active_model.is_completed = ActiveValue::Set(progress.is_completed);
        active_model.completed_at = ActiveValue::Set(progress.completed_at);
        active_model.updated_at = ActiveValue::Set(now);
        let updated_model = active_model.update(self.db).await?;
        Ok(Task::from(updated_model))
    }

    async fn find_owned(&self, id: i32) -> Result<task_entity::Model, TaskError> {
        task_entity::Entity::find_by_id(id)
            .filter(task_entity::Column::UserId.eq(self.owner))
            .one(self.db)
            .await?
            .ok_or(TaskError::NotFound(id))
    }

    /// Checks if the caller already has a task with this title, ignoring `except`.
    async fn title_taken(&self, title: &str, except: Option<i32>) -> Result<bool, TaskError> {
        let mut query = task_entity::Entity::find()
            .filter(task_entity::Column::UserId.eq(self.owner))
            .filter(task_entity::Column::Title.eq(title));
        if let Some(id) = except {
            query = query.filter(task_entity::Column::Id.ne(id));
        }
        Ok(query.one(self.db).await?.is_some())
    }
}

/// Maps a failed insert/update, turning a lost race on the unique title index
/// into `DuplicateTitle`.
fn write_error(err: DbErr, title: &str) -> TaskError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => TaskError::DuplicateTitle(title.to_string()),
        _ => TaskError::Database(err),
    }
}
