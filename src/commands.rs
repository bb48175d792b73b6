use crate::cli::Cli;
use crate::config::Config;
use crate::logging::setup_logging;
use crate::model::{demo_projects, Filter, Project, Task};
use crate::storage::{resolve_data_dir, FileStorage, Storage};
use crate::store::ProjectStore;
use crate::ui;
use anyhow::{Context, Result};
use log::info;

pub type FileStore = ProjectStore<FileStorage>;

/// Loads config, sets up logging and opens the store for one invocation.
pub fn open(cli: &Cli) -> Result<(Config, FileStore)> {
    let config = Config::load(cli.config.as_deref())?;
    let explicit = cli
        .data_dir
        .as_deref()
        .or(config.storage.data_dir.as_deref());
    let data_dir = resolve_data_dir(explicit)?;
    let log_path = setup_logging(&data_dir, &config.log_level)?;
    let storage = FileStorage::new(&data_dir);
    info!(
        "opening {} (log {})",
        storage.path().display(),
        log_path.display()
    );
    let mut store = ProjectStore::load(storage, config.id_policy.clone());
    store.reserve_ids(config.reserved_ids.iter().cloned());
    Ok((config, store))
}

pub fn tui(config: Config, store: FileStore) -> Result<()> {
    ui::run(store, config)
}

pub fn list<S: Storage>(store: &ProjectStore<S>, filter: Filter) -> Result<()> {
    let projects = store.filtered(filter);
    if projects.is_empty() {
        if store.projects().is_empty() {
            println!("No projects yet. Create one with `taskgrid add-project`.");
        } else {
            println!("No tasks found with current filter: {}", filter.label());
        }
        return Ok(());
    }
    for project in projects {
        print_project(project, filter);
        println!();
    }
    Ok(())
}

pub fn add_project<S: Storage>(
    store: &mut ProjectStore<S>,
    name: String,
    description: String,
    id: Option<String>,
) -> Result<()> {
    let project = store
        .create_project(&name, &description, id.as_deref())
        .context("creating project")?;
    println!("Created project {} ({})", project.id, project.name);
    Ok(())
}

pub fn edit_project<S: Storage>(
    store: &mut ProjectStore<S>,
    project_id: String,
    name: String,
    description: String,
) -> Result<()> {
    store
        .edit_project(&project_id, &name, &description)
        .with_context(|| format!("editing project {}", project_id))?;
    println!("Updated project {}", project_id);
    Ok(())
}

pub fn delete_project<S: Storage>(store: &mut ProjectStore<S>, project_id: String) -> Result<()> {
    if store.delete_project(&project_id) {
        println!("Deleted project {}", project_id);
    } else {
        println!("No project {}; nothing deleted", project_id);
    }
    Ok(())
}

pub fn add_task<S: Storage>(
    store: &mut ProjectStore<S>,
    project_id: String,
    description: String,
) -> Result<()> {
    match store
        .add_task(&project_id, &description)
        .with_context(|| format!("adding task to {}", project_id))?
    {
        Some(task_id) => println!("Added task {} to {}", task_id, project_id),
        None => println!("Empty description; no task added"),
    }
    Ok(())
}

pub fn edit_task<S: Storage>(
    store: &mut ProjectStore<S>,
    project_id: String,
    task_id: String,
    description: String,
) -> Result<()> {
    store
        .edit_task_description(&project_id, &task_id, &description)
        .with_context(|| format!("editing task {} in {}", task_id, project_id))?;
    if description.trim().is_empty() {
        println!("Deleted task {}", task_id);
    } else {
        println!("Updated task {}", task_id);
    }
    Ok(())
}

pub fn delete_task<S: Storage>(
    store: &mut ProjectStore<S>,
    project_id: String,
    task_id: String,
) -> Result<()> {
    if store.delete_task(&project_id, &task_id) {
        println!("Deleted task {}", task_id);
    } else {
        println!("No task {} in {}; nothing deleted", task_id, project_id);
    }
    Ok(())
}

pub fn cycle<S: Storage>(store: &mut ProjectStore<S>, project_id: String, task_id: String) -> Result<()> {
    let status = store
        .cycle_task_status(&project_id, &task_id)
        .with_context(|| format!("cycling task {} in {}", task_id, project_id))?;
    println!("Task {} is now {}", task_id, status.label());
    Ok(())
}

pub fn seed<S: Storage>(store: &mut ProjectStore<S>) -> Result<()> {
    for demo in demo_projects(store.policy()) {
        let mut created = store
            .create_project(&demo.name, &demo.description, None)
            .with_context(|| format!("seeding {}", demo.name))?;
        // Task IDs are derived from the stored project ID, not the demo one.
        for task in demo.tasks {
            let mut seeded = Task::new(created.next_task_id(), task.description);
            seeded.status = task.status;
            created.tasks.push(seeded);
        }
        store.replace_tasks(&created.id, created.tasks)?;
        println!("Seeded {} ({})", created.id, created.name);
    }
    Ok(())
}

fn print_project(project: &Project, filter: Filter) {
    println!("{}: {}", project.id, project.name);
    println!("  {}", project.description);
    let visible = project.visible_tasks(filter);
    if project.tasks.is_empty() {
        println!("  (no tasks)");
    }
    for task in visible {
        println!("  {} {} ({})", task.status.marker(), task.description, task.id);
    }
    let hidden = project.hidden_count(filter);
    if hidden > 0 {
        println!(
            "  {} task{} hidden by current filter",
            hidden,
            if hidden == 1 { "" } else { "s" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IdPolicy, TaskStatus};
    use crate::storage::MemoryStorage;
    use pretty_assertions::assert_eq;

    #[test]
    fn seed_adds_demo_projects_with_tasks() {
        let mut store = ProjectStore::load(MemoryStorage::default(), IdPolicy::default());
        seed(&mut store).unwrap();
        seed(&mut store).unwrap();
        assert_eq!(store.projects().len(), 8);
        let first = &store.projects()[0];
        assert_eq!(first.tasks[0].status, TaskStatus::Doing);
        assert!(first.tasks[0].id.starts_with(&first.id));
    }

    #[test]
    fn seed_regenerates_ids_around_taken_ones() {
        let policy = IdPolicy {
            min_length: 1,
            max_length: 1,
            ..IdPolicy::default()
        };
        let mut store = ProjectStore::load(MemoryStorage::default(), policy);
        store.reserve_ids(('a'..='t').map(String::from));
        seed(&mut store).unwrap();

        assert_eq!(store.projects().len(), 4);
        for project in store.projects() {
            assert!(!('a'..='t').any(|c| project.id == c.to_string()));
            assert!(project
                .tasks
                .iter()
                .all(|t| t.id.starts_with(&format!("{}-", project.id))));
        }
    }

    #[test]
    fn cli_helpers_propagate_store_errors() {
        let mut store = ProjectStore::load(MemoryStorage::default(), IdPolicy::default());
        assert!(add_project(&mut store, "ab".into(), "short name".into(), None).is_err());
        assert!(cycle(&mut store, "ghost".into(), "t".into()).is_err());
        add_project(&mut store, "Launch".into(), "Q1".into(), Some("launch".into())).unwrap();
        add_task(&mut store, "launch".into(), "Press kit".into()).unwrap();
        edit_task(&mut store, "launch".into(), "launch-1".into(), "".into()).unwrap();
        assert!(store.project("launch").unwrap().tasks.is_empty());
        delete_project(&mut store, "launch".into()).unwrap();
        assert!(list(&store, Filter::All).is_ok());
    }
}
