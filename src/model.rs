use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type ProjectId = String;
pub type TaskId = String;

pub const NAME_MIN_LEN: usize = 3;
pub const NAME_MAX_LEN: usize = 80;
pub const DESCRIPTION_MIN_LEN: usize = 1;
pub const DESCRIPTION_MAX_LEN: usize = 160;

const GENERATED_ID_LEN: usize = 11;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub status: TaskStatus,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Todo,
    Doing,
    Done,
}

/// View-only predicate over task status. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Filter {
    #[default]
    All,
    Todo,
    Doing,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Name,
    Description,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: Field },
    #[error("{field} must be at least {min} characters")]
    TooShort { field: Field, min: usize },
    #[error("{field} cannot exceed {max} characters")]
    TooLong { field: Field, max: usize },
    #[error("{field} can only contain {allowed}")]
    InvalidCharacters { field: Field, allowed: String },
    #[error("this ID is already in use: {0}")]
    DuplicateId(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("project not found: {0}")]
    Project(ProjectId),
    #[error("task {task} not found in project {project}")]
    Task { project: ProjectId, task: TaskId },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
}

/// Character-set and length rules for project IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdPolicy {
    pub allow_letters: bool,
    pub allow_numbers: bool,
    pub allow_dashes: bool,
    pub allow_underscores: bool,
    pub allow_spaces: bool,
    pub allow_dots: bool,
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for IdPolicy {
    fn default() -> Self {
        IdPolicy {
            allow_letters: true,
            allow_numbers: true,
            allow_dashes: true,
            allow_underscores: true,
            allow_spaces: false,
            allow_dots: false,
            min_length: 3,
            max_length: 60,
        }
    }
}

impl IdPolicy {
    pub fn allows(&self, ch: char) -> bool {
        (self.allow_letters && ch.is_ascii_alphabetic())
            || (self.allow_numbers && ch.is_ascii_digit())
            || (self.allow_dashes && ch == '-')
            || (self.allow_underscores && ch == '_')
            || (self.allow_spaces && ch == ' ')
            || (self.allow_dots && ch == '.')
    }

    pub fn validate(&self, id: &str) -> Result<(), ValidationError> {
        let len = id.chars().count();
        if len == 0 {
            return Err(ValidationError::Required { field: Field::Id });
        }
        if len < self.min_length {
            return Err(ValidationError::TooShort {
                field: Field::Id,
                min: self.min_length,
            });
        }
        if len > self.max_length {
            return Err(ValidationError::TooLong {
                field: Field::Id,
                max: self.max_length,
            });
        }
        if !id.chars().all(|c| self.allows(c)) {
            return Err(ValidationError::InvalidCharacters {
                field: Field::Id,
                allowed: self.allowed_summary(),
            });
        }
        Ok(())
    }

    pub fn allowed_summary(&self) -> String {
        let mut parts = Vec::new();
        if self.allow_letters {
            parts.push("letters (a-z, A-Z)");
        }
        if self.allow_numbers {
            parts.push("numbers (0-9)");
        }
        if self.allow_dashes {
            parts.push("dashes");
        }
        if self.allow_underscores {
            parts.push("underscores");
        }
        if self.allow_spaces {
            parts.push("spaces");
        }
        if self.allow_dots {
            parts.push("dots");
        }
        parts.join(", ")
    }

    /// Random lowercase token that always satisfies this policy.
    ///
    /// Assumes letters or numbers are allowed and `min_length <= max_length`,
    /// which `Config::validate` enforces.
    pub fn generate(&self) -> String {
        let len = GENERATED_ID_LEN.clamp(self.min_length.max(1), self.max_length.max(1));
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .map(|b| char::from(b).to_ascii_lowercase())
            .filter(|c| self.allows(*c))
            .take(len)
            .collect()
    }
}

impl TaskStatus {
    #[cfg(test)]
    pub const ALL: [TaskStatus; 3] = [TaskStatus::Todo, TaskStatus::Doing, TaskStatus::Done];

    pub fn next(self) -> Self {
        match self {
            TaskStatus::Todo => TaskStatus::Doing,
            TaskStatus::Doing => TaskStatus::Done,
            TaskStatus::Done => TaskStatus::Todo,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::Doing => "doing",
            TaskStatus::Done => "done",
        }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "[ ]",
            TaskStatus::Doing => "[~]",
            TaskStatus::Done => "[x]",
        }
    }
}

impl Filter {
    pub const ALL: [Filter; 4] = [Filter::All, Filter::Todo, Filter::Doing, Filter::Done];

    pub fn status(&self) -> Option<TaskStatus> {
        match self {
            Filter::All => None,
            Filter::Todo => Some(TaskStatus::Todo),
            Filter::Doing => Some(TaskStatus::Doing),
            Filter::Done => Some(TaskStatus::Done),
        }
    }

    pub fn matches(&self, status: TaskStatus) -> bool {
        self.status().map_or(true, |s| s == status)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Filter::All => "All",
            Filter::Todo => "Todo",
            Filter::Doing => "Doing",
            Filter::Done => "Done",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Field::Id => "Project ID",
            Field::Name => "Project name",
            Field::Description => "Project description",
        };
        f.write_str(label)
    }
}

impl ValidationError {
    pub fn field(&self) -> Field {
        match self {
            ValidationError::Required { field }
            | ValidationError::TooShort { field, .. }
            | ValidationError::TooLong { field, .. }
            | ValidationError::InvalidCharacters { field, .. } => *field,
            ValidationError::DuplicateId(_) => Field::Id,
        }
    }
}

impl Project {
    pub fn new(id: ProjectId, name: String, description: String) -> Self {
        Project {
            id,
            name,
            description,
            tasks: Vec::new(),
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Whether the project shows up in the grid under `filter`.
    pub fn is_visible(&self, filter: Filter) -> bool {
        match filter.status() {
            None => true,
            Some(status) => self.tasks.iter().any(|t| t.status == status),
        }
    }

    pub fn visible_tasks(&self, filter: Filter) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| filter.matches(t.status))
            .collect()
    }

    pub fn hidden_count(&self, filter: Filter) -> usize {
        self.tasks.len() - self.visible_tasks(filter).len()
    }

    /// `<project-id>-<n>`, starting after the current task count and skipping
    /// suffixes already taken.
    pub fn next_task_id(&self) -> TaskId {
        let mut n = self.tasks.len() + 1;
        loop {
            let candidate = format!("{}-{}", self.id, n);
            if self.task(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }
}

impl Task {
    pub fn new(id: TaskId, description: String) -> Self {
        Task {
            id,
            description,
            status: TaskStatus::Todo,
        }
    }
}

pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    validate_text(Field::Name, name, NAME_MIN_LEN, NAME_MAX_LEN)
}

pub fn validate_description(description: &str) -> Result<(), ValidationError> {
    validate_text(
        Field::Description,
        description,
        DESCRIPTION_MIN_LEN,
        DESCRIPTION_MAX_LEN,
    )
}

fn validate_text(field: Field, value: &str, min: usize, max: usize) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if value.trim().is_empty() {
        return Err(ValidationError::Required { field });
    }
    if len < min {
        return Err(ValidationError::TooShort { field, min });
    }
    if len > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

/// Sample projects for `seed`. Every call builds fresh IDs.
pub fn demo_projects(policy: &IdPolicy) -> Vec<Project> {
    let specs: [(&str, &str, &[(&str, TaskStatus)]); 4] = [
        (
            "Mobile App Development",
            "New iOS and Android app for task management with offline functionality",
            &[
                ("API integration", TaskStatus::Doing),
                ("Offline sync", TaskStatus::Todo),
                ("Push notifications", TaskStatus::Todo),
            ],
        ),
        (
            "Content Strategy",
            "Develop comprehensive content strategy for Q1",
            &[
                ("Competitor analysis", TaskStatus::Done),
                ("Content calendar", TaskStatus::Doing),
                ("SEO optimization", TaskStatus::Todo),
            ],
        ),
        (
            "Website Redesign",
            "Refresh the marketing site and improve accessibility",
            &[
                ("Audit keyboard navigation", TaskStatus::Done),
                ("New landing page", TaskStatus::Doing),
            ],
        ),
        (
            "Team Onboarding",
            "Prepare material for new hires",
            &[("Write setup guide", TaskStatus::Todo)],
        ),
    ];
    specs
        .iter()
        .map(|(name, description, tasks)| {
            let mut project =
                Project::new(policy.generate(), name.to_string(), description.to_string());
            for (text, status) in tasks.iter() {
                let mut task = Task::new(project.next_task_id(), text.to_string());
                task.status = *status;
                project.tasks.push(task);
            }
            project
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_cycle_returns_to_start_after_three_steps() {
        for status in TaskStatus::ALL {
            assert_eq!(status.next().next().next(), status);
            assert_ne!(status.next(), status);
        }
        assert_eq!(TaskStatus::Todo.next(), TaskStatus::Doing);
        assert_eq!(TaskStatus::Doing.next(), TaskStatus::Done);
        assert_eq!(TaskStatus::Done.next(), TaskStatus::Todo);
    }

    #[test]
    fn status_serializes_lowercase_and_rejects_unknown() {
        let json = serde_json::to_string(&TaskStatus::Doing).unwrap();
        assert_eq!(json, "\"doing\"");
        assert!(serde_json::from_str::<TaskStatus>("\"blocked\"").is_err());
    }

    #[test]
    fn default_policy_accepts_dashes_and_underscores() {
        let policy = IdPolicy::default();
        assert!(policy.validate("web-app_2").is_ok());
        assert_eq!(
            policy.validate("ab"),
            Err(ValidationError::TooShort {
                field: Field::Id,
                min: 3
            })
        );
        assert!(matches!(
            policy.validate("has space"),
            Err(ValidationError::InvalidCharacters { .. })
        ));
        assert!(matches!(
            policy.validate(&"a".repeat(61)),
            Err(ValidationError::TooLong { max: 60, .. })
        ));
    }

    #[test]
    fn generated_ids_satisfy_restrictive_policies() {
        let digits_only = IdPolicy {
            allow_letters: false,
            min_length: 1,
            max_length: 4,
            ..IdPolicy::default()
        };
        for _ in 0..50 {
            let id = digits_only.generate();
            assert_eq!(id.len(), 4);
            assert!(digits_only.validate(&id).is_ok(), "{id}");
        }
        let id = IdPolicy::default().generate();
        assert!(IdPolicy::default().validate(&id).is_ok());
    }

    #[test]
    fn next_task_id_skips_taken_suffixes() {
        let mut project = Project::new("web".into(), "Web".into(), "site".into());
        project.tasks.push(Task::new("web-2".into(), "b".into()));
        // tasks.len() + 1 == 2 is taken
        assert_eq!(project.next_task_id(), "web-3");
    }

    #[test]
    fn filter_visibility_follows_task_status() {
        let mut project = Project::new("p1".into(), "Proj".into(), "d".into());
        project.tasks.push(Task::new("p1-1".into(), "a".into()));
        let mut done = Task::new("p1-2".into(), "b".into());
        done.status = TaskStatus::Done;
        project.tasks.push(done);

        assert!(project.is_visible(Filter::All));
        assert!(project.is_visible(Filter::Done));
        assert!(!project.is_visible(Filter::Doing));
        assert_eq!(project.visible_tasks(Filter::Todo).len(), 1);
        assert_eq!(project.hidden_count(Filter::Todo), 1);
    }

    #[test]
    fn name_and_description_rules() {
        assert!(validate_name("Launch").is_ok());
        assert_eq!(
            validate_name("  "),
            Err(ValidationError::Required { field: Field::Name })
        );
        assert!(validate_name("ab").is_err());
        assert!(validate_description("Q1").is_ok());
        assert!(validate_description(&"x".repeat(161)).is_err());
    }
}
