use crate::model::Filter;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "taskgrid", version, about = "Keyboard-driven project and task grid")]
pub struct Cli {
    /// Config file (YAML). Defaults to the platform config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Directory holding projects.json and the log file
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch the interactive grid
    Tui,
    /// List projects and their tasks
    List {
        /// Only show tasks with this status
        #[arg(long, value_enum, default_value_t = Filter::All)]
        filter: Filter,
    },
    /// Create a project
    AddProject {
        name: String,
        description: String,
        /// Explicit project id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },
    /// Rename a project or change its description
    EditProject {
        project_id: String,
        name: String,
        description: String,
    },
    /// Delete a project and all of its tasks
    DeleteProject { project_id: String },
    /// Append a todo task to a project
    AddTask {
        project_id: String,
        description: String,
    },
    /// Change a task description (an empty description deletes the task)
    EditTask {
        project_id: String,
        task_id: String,
        description: String,
    },
    /// Delete a task
    DeleteTask { project_id: String, task_id: String },
    /// Advance a task: todo -> doing -> done -> todo
    Cycle { project_id: String, task_id: String },
    /// Add a handful of sample projects
    Seed,
}
