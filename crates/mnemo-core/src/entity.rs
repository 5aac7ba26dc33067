use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Workflow state of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Captured but not planned.
    #[default]
    Backlog,
    /// Planned for a future day.
    Planned,
    /// Scheduled for today.
    Today,
    /// In progress.
    Doing,
    /// Started and put on hold.
    Paused,
    /// Finished.
    Done,
    /// Dropped without finishing.
    Cancelled,
}

impl TaskStatus {
    /// Stable lowercase label, also used as index metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::Planned => "planned",
            TaskStatus::Today => "today",
            TaskStatus::Doing => "doing",
            TaskStatus::Paused => "paused",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the task still needs attention.
    pub fn is_active(&self) -> bool {
        !matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }
}

/// Priority of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Must be handled right away.
    Urgent,
    /// Important.
    High,
    /// Regular work.
    #[default]
    Normal,
    /// Whenever there is time.
    Low,
}

impl TaskPriority {
    /// Stable lowercase label, also used as index metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Urgent => "urgent",
            TaskPriority::High => "high",
            TaskPriority::Normal => "normal",
            TaskPriority::Low => "low",
        }
    }
}

/// Lifecycle state of a [`Project`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Just an idea.
    Idea,
    /// Being scoped.
    Planning,
    /// Being worked on.
    #[default]
    Active,
    /// Blocked on someone else.
    Waiting,
    /// On hold.
    Paused,
    /// Finished.
    Completed,
    /// Dropped.
    Cancelled,
}

impl ProjectStatus {
    /// Stable lowercase label, also used as index metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Idea => "idea",
            ProjectStatus::Planning => "planning",
            ProjectStatus::Active => "active",
            ProjectStatus::Waiting => "waiting",
            ProjectStatus::Paused => "paused",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the project is still open.
    pub fn is_active(&self) -> bool {
        !matches!(self, ProjectStatus::Completed | ProjectStatus::Cancelled)
    }
}

/// A task record as held by the authoritative repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Repository identifier.
    pub id: String,
    /// Short title; the first line of the indexed text.
    pub title: String,
    /// Free-form notes.
    #[serde(default)]
    pub notes: Option<String>,
    /// Where or how the task is done (e.g. "home", "office").
    #[serde(default)]
    pub context: Option<String>,
    /// Workflow state.
    #[serde(default)]
    pub status: TaskStatus,
    /// Priority.
    #[serde(default)]
    pub priority: TaskPriority,
    /// Owning project, if linked.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Denormalised name of the owning project.
    #[serde(default)]
    pub project_name: Option<String>,
    /// Optional due date.
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    /// Creation time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Creates a backlog task with a fresh id.
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            notes: None,
            context: None,
            status: TaskStatus::default(),
            priority: TaskPriority::default(),
            project_id: None,
            project_name: None,
            due_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Sets the context.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Links the task to a project.
    pub fn with_project(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.project_id = Some(id.into());
        self.project_name = Some(name.into());
        self
    }
}

/// A project record as held by the authoritative repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Repository identifier.
    pub id: String,
    /// Project name; the first line of the indexed text.
    pub name: String,
    /// Longer description.
    #[serde(default)]
    pub description: Option<String>,
    /// What "done" looks like.
    #[serde(default)]
    pub objective: Option<String>,
    /// Lifecycle state.
    #[serde(default)]
    pub status: ProjectStatus,
    /// Completion percentage, 0..=100.
    #[serde(default)]
    pub progress: u8,
    /// Creation time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Creates an active project with a fresh id.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            objective: None,
            status: ProjectStatus::default(),
            progress: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the objective.
    pub fn with_objective(mut self, objective: impl Into<String>) -> Self {
        self.objective = Some(objective.into());
        self
    }
}
