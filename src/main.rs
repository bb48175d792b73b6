mod cli;
mod commands;
mod config;
mod layout;
mod logging;
mod model;
mod nav;
mod spatial;
mod storage;
mod store;
mod ui;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let (config, mut store) = commands::open(&args)?;
    let command = args.command.unwrap_or(cli::Command::Tui);
    match command {
        cli::Command::Tui => commands::tui(config, store),
        cli::Command::List { filter } => commands::list(&store, filter),
        cli::Command::AddProject {
            name,
            description,
            id,
        } => commands::add_project(&mut store, name, description, id),
        cli::Command::EditProject {
            project_id,
            name,
            description,
        } => commands::edit_project(&mut store, project_id, name, description),
        cli::Command::DeleteProject { project_id } => {
            commands::delete_project(&mut store, project_id)
        }
        cli::Command::AddTask {
            project_id,
            description,
        } => commands::add_task(&mut store, project_id, description),
        cli::Command::EditTask {
            project_id,
            task_id,
            description,
        } => commands::edit_task(&mut store, project_id, task_id, description),
        cli::Command::DeleteTask {
            project_id,
            task_id,
        } => commands::delete_task(&mut store, project_id, task_id),
        cli::Command::Cycle {
            project_id,
            task_id,
        } => commands::cycle(&mut store, project_id, task_id),
        cli::Command::Seed => commands::seed(&mut store),
    }
}
