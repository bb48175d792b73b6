use crate::model::{
    validate_description, validate_name, Filter, IdPolicy, NotFoundError, Project, ProjectId,
    StoreError, Task, TaskId, TaskStatus, ValidationError,
};
use crate::storage::Storage;
use log::{debug, error};
use std::collections::HashSet;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::Instant;

const MAX_ID_ATTEMPTS: usize = 64;

/// Immutable view of the collection published after every effective mutation.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub revision: u64,
    pub projects: Arc<Vec<Project>>,
}

/// Authoritative in-memory project collection.
///
/// Every effective mutation writes the whole collection to storage and
/// publishes a [`Snapshot`]. Mutations that would leave the collection
/// unchanged do neither.
pub struct ProjectStore<S: Storage> {
    projects: Arc<Vec<Project>>,
    storage: S,
    policy: IdPolicy,
    reserved: HashSet<ProjectId>,
    revision: u64,
    subscribers: Vec<Sender<Snapshot>>,
    last_save: Option<Instant>,
}

impl<S: Storage> ProjectStore<S> {
    /// Loads from `storage` without writing back.
    pub fn load(storage: S, policy: IdPolicy) -> Self {
        let projects = storage.load();
        debug!("loaded {} projects", projects.len());
        ProjectStore {
            projects: Arc::new(projects),
            storage,
            policy,
            reserved: HashSet::new(),
            revision: 0,
            subscribers: Vec::new(),
            last_save: None,
        }
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn filtered(&self, filter: Filter) -> Vec<&Project> {
        self.projects
            .iter()
            .filter(|p| p.is_visible(filter))
            .collect()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            revision: self.revision,
            projects: Arc::clone(&self.projects),
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn policy(&self) -> &IdPolicy {
        &self.policy
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn last_save(&self) -> Option<Instant> {
        self.last_save
    }

    pub fn subscribe(&mut self) -> Receiver<Snapshot> {
        let (tx, rx) = channel();
        self.subscribers.push(tx);
        rx
    }

    /// IDs that new projects may not take even though no project holds them.
    pub fn reserve_ids<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = ProjectId>,
    {
        self.reserved.extend(ids);
    }

    pub fn is_taken(&self, id: &str) -> bool {
        self.reserved.contains(id) || self.project(id).is_some()
    }

    /// Every problem with a would-be project, in field order. An empty `id`
    /// is fine since one will be generated.
    pub fn validate_draft(&self, id: &str, name: &str, description: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let id = id.trim();
        if !id.is_empty() {
            if let Err(err) = self.check_new_id(id) {
                errors.push(err);
            }
        }
        if let Err(err) = validate_name(name.trim()) {
            errors.push(err);
        }
        if let Err(err) = validate_description(description.trim()) {
            errors.push(err);
        }
        errors
    }

    pub fn create_project(
        &mut self,
        name: &str,
        description: &str,
        id: Option<&str>,
    ) -> Result<Project, StoreError> {
        let name = name.trim();
        let description = description.trim();
        let id = match id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => {
                self.check_new_id(id)?;
                id.to_string()
            }
            None => self.generate_unique_id()?,
        };
        validate_name(name)?;
        validate_description(description)?;

        let project = Project::new(id, name.to_string(), description.to_string());
        let created = project.clone();
        self.commit(move |projects| projects.push(project));
        debug!("created project {}", created.id);
        Ok(created)
    }

    pub fn edit_project(&mut self, id: &str, name: &str, description: &str) -> Result<(), StoreError> {
        let idx = self.project_index(id)?;
        let name = name.trim();
        let description = description.trim();
        validate_name(name)?;
        validate_description(description)?;
        let current = &self.projects[idx];
        if current.name == name && current.description == description {
            return Ok(());
        }
        self.commit(|projects| {
            let project = &mut projects[idx];
            project.name = name.to_string();
            project.description = description.to_string();
        });
        debug!("edited project {}", id);
        Ok(())
    }

    /// Removes the project and its tasks. Returns false if it was already gone.
    pub fn delete_project(&mut self, id: &str) -> bool {
        let Ok(idx) = self.project_index(id) else {
            return false;
        };
        self.commit(|projects| {
            projects.remove(idx);
        });
        debug!("deleted project {}", id);
        true
    }

    /// Appends a `todo` task. Blank descriptions are ignored.
    pub fn add_task(&mut self, project_id: &str, description: &str) -> Result<Option<TaskId>, StoreError> {
        let description = description.trim();
        if description.is_empty() {
            return Ok(None);
        }
        let idx = self.project_index(project_id)?;
        let task = Task::new(self.projects[idx].next_task_id(), description.to_string());
        let task_id = task.id.clone();
        self.commit(|projects| projects[idx].tasks.push(task));
        debug!("added task {} to {}", task_id, project_id);
        Ok(Some(task_id))
    }

    /// A blank description deletes the task, so it succeeds even when the
    /// task is already gone.
    pub fn edit_task_description(
        &mut self,
        project_id: &str,
        task_id: &str,
        description: &str,
    ) -> Result<(), StoreError> {
        let description = description.trim();
        if description.is_empty() {
            self.delete_task(project_id, task_id);
            return Ok(());
        }
        let (p_idx, t_idx) = self.task_index(project_id, task_id)?;
        if self.projects[p_idx].tasks[t_idx].description == description {
            return Ok(());
        }
        self.commit(|projects| {
            projects[p_idx].tasks[t_idx].description = description.to_string();
        });
        Ok(())
    }

    pub fn delete_task(&mut self, project_id: &str, task_id: &str) -> bool {
        let Ok((p_idx, t_idx)) = self.task_index(project_id, task_id) else {
            return false;
        };
        self.commit(|projects| {
            projects[p_idx].tasks.remove(t_idx);
        });
        debug!("deleted task {} from {}", task_id, project_id);
        true
    }

    pub fn cycle_task_status(&mut self, project_id: &str, task_id: &str) -> Result<TaskStatus, StoreError> {
        let (p_idx, t_idx) = self.task_index(project_id, task_id)?;
        let next = self.projects[p_idx].tasks[t_idx].status.next();
        self.commit(|projects| projects[p_idx].tasks[t_idx].status = next);
        Ok(next)
    }

    /// Bulk replacement. Returns false, writing and publishing nothing, when
    /// `tasks` equals the current list.
    pub fn replace_tasks(&mut self, project_id: &str, tasks: Vec<Task>) -> Result<bool, StoreError> {
        let idx = self.project_index(project_id)?;
        if self.projects[idx].tasks == tasks {
            return Ok(false);
        }
        let duplicate = {
            let mut seen = HashSet::new();
            tasks
                .iter()
                .find(|t| !seen.insert(t.id.as_str()))
                .map(|t| t.id.clone())
        };
        if let Some(dup) = duplicate {
            return Err(ValidationError::DuplicateId(dup).into());
        }
        self.commit(|projects| projects[idx].tasks = tasks);
        Ok(true)
    }

    fn check_new_id(&self, id: &str) -> Result<(), ValidationError> {
        self.policy.validate(id)?;
        if self.is_taken(id) {
            return Err(ValidationError::DuplicateId(id.to_string()));
        }
        Ok(())
    }

    fn generate_unique_id(&self) -> Result<ProjectId, ValidationError> {
        let mut last = String::new();
        for _ in 0..MAX_ID_ATTEMPTS {
            last = self.policy.generate();
            if !self.is_taken(&last) {
                return Ok(last);
            }
        }
        Err(ValidationError::DuplicateId(last))
    }

    fn project_index(&self, id: &str) -> Result<usize, NotFoundError> {
        self.projects
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| NotFoundError::Project(id.to_string()))
    }

    fn task_index(&self, project_id: &str, task_id: &str) -> Result<(usize, usize), NotFoundError> {
        let p_idx = self.project_index(project_id)?;
        let t_idx = self.projects[p_idx]
            .tasks
            .iter()
            .position(|t| t.id == task_id)
            .ok_or_else(|| NotFoundError::Task {
                project: project_id.to_string(),
                task: task_id.to_string(),
            })?;
        Ok((p_idx, t_idx))
    }

    fn commit<F>(&mut self, mutate: F)
    where
        F: FnOnce(&mut Vec<Project>),
    {
        mutate(Arc::make_mut(&mut self.projects));
        self.revision += 1;
        match self.storage.save(&self.projects) {
            Ok(()) => self.last_save = Some(Instant::now()),
            Err(err) => error!("saving projects failed: {}", err),
        }
        let snapshot = self.snapshot();
        self.subscribers
            .retain(|tx| tx.send(snapshot.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStorage, MemoryStorage};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn store() -> ProjectStore<MemoryStorage> {
        ProjectStore::load(MemoryStorage::default(), IdPolicy::default())
    }

    fn ids(store: &ProjectStore<MemoryStorage>) -> Vec<String> {
        store.projects().iter().map(|p| p.id.clone()).collect()
    }

    #[test]
    fn initial_load_does_not_write() {
        let mut storage = MemoryStorage::default();
        storage.initial = vec![Project::new("abc".into(), "Abc".into(), "d".into())];
        let store = ProjectStore::load(storage, IdPolicy::default());
        assert_eq!(store.projects().len(), 1);
        assert!(store.storage().writes.is_empty());
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn generated_project_survives_reload() {
        let tmp = TempDir::new().unwrap();
        let policy = IdPolicy::default();
        let mut store = ProjectStore::load(FileStorage::new(tmp.path()), policy.clone());
        let project = store.create_project("Launch", "Q1", None).unwrap();

        assert!(policy.validate(&project.id).is_ok());
        assert!(project.tasks.is_empty());

        let reloaded = FileStorage::new(tmp.path()).load();
        assert_eq!(reloaded, vec![project]);
    }

    #[test]
    fn explicit_ids_are_validated_and_unique() {
        let mut store = store();
        store.create_project("Alpha", "first", Some("alpha")).unwrap();
        let err = store.create_project("Again", "second", Some("alpha")).unwrap_err();
        assert_eq!(
            err,
            StoreError::Validation(ValidationError::DuplicateId("alpha".into()))
        );
        let err = store.create_project("Bad", "id", Some("a!")).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(ids(&store), vec!["alpha"]);
        assert_eq!(store.storage().writes.len(), 1);
    }

    #[test]
    fn reserved_ids_are_rejected() {
        let mut store = store();
        store.reserve_ids(["taken".to_string()]);
        let err = store.create_project("Name", "desc", Some("taken")).unwrap_err();
        assert_eq!(
            err,
            StoreError::Validation(ValidationError::DuplicateId("taken".into()))
        );
    }

    #[test]
    fn project_ids_never_duplicate_across_create_and_delete() {
        let mut store = store();
        let fixed = ["aaa", "bbb", "ccc"];
        for round in 0..30 {
            let id = fixed[round % fixed.len()];
            let _ = store.create_project("Project", "desc", Some(id));
            store.create_project("Project", "desc", None).unwrap();
            if round % 4 == 0 {
                store.delete_project(fixed[(round + 1) % fixed.len()]);
            }
            let all = ids(&store);
            let unique: HashSet<_> = all.iter().collect();
            assert_eq!(unique.len(), all.len());
        }
    }

    #[test]
    fn replace_tasks_with_equal_list_is_a_noop() {
        let mut store = store();
        let rx = store.subscribe();
        store.create_project("Alpha", "d", Some("alpha")).unwrap();
        let tasks = vec![Task::new("alpha-1".into(), "one".into())];

        assert!(store.replace_tasks("alpha", tasks.clone()).unwrap());
        assert!(!store.replace_tasks("alpha", tasks.clone()).unwrap());

        // create + one replace
        assert_eq!(store.storage().writes.len(), 2);
        assert_eq!(rx.try_iter().count(), 2);
        assert_eq!(store.project("alpha").unwrap().tasks, tasks);
    }

    #[test]
    fn replace_tasks_rejects_duplicate_task_ids() {
        let mut store = store();
        store.create_project("Alpha", "d", Some("alpha")).unwrap();
        let tasks = vec![
            Task::new("t1".into(), "one".into()),
            Task::new("t1".into(), "two".into()),
        ];
        assert!(store.replace_tasks("alpha", tasks).is_err());
        assert!(store.project("alpha").unwrap().tasks.is_empty());
    }

    #[test]
    fn blank_edit_removes_last_task() {
        let mut store = store();
        store.create_project("Alpha", "d", Some("alpha")).unwrap();
        let task_id = store.add_task("alpha", "only task").unwrap().unwrap();
        store.edit_task_description("alpha", &task_id, "   ").unwrap();
        assert!(store.project("alpha").unwrap().tasks.is_empty());
    }

    #[test]
    fn blank_edit_of_missing_task_is_a_noop_like_delete() {
        let mut store = store();
        store.create_project("Alpha", "d", Some("alpha")).unwrap();
        let writes = store.storage().writes.len();
        assert!(!store.delete_task("alpha", "gone"));
        store.edit_task_description("alpha", "gone", "").unwrap();
        store.edit_task_description("ghost", "gone", " ").unwrap();
        assert_eq!(store.storage().writes.len(), writes);
        // a real edit still needs the task to exist
        assert!(matches!(
            store.edit_task_description("alpha", "gone", "text"),
            Err(StoreError::NotFound(NotFoundError::Task { .. }))
        ));
    }

    #[test]
    fn edit_task_trims_and_skips_unchanged() {
        let mut store = store();
        store.create_project("Alpha", "d", Some("alpha")).unwrap();
        let task_id = store.add_task("alpha", "draft").unwrap().unwrap();
        let writes = store.storage().writes.len();
        store.edit_task_description("alpha", &task_id, "  final ").unwrap();
        store.edit_task_description("alpha", &task_id, "final").unwrap();
        assert_eq!(store.storage().writes.len(), writes + 1);
        assert_eq!(store.project("alpha").unwrap().tasks[0].description, "final");
    }

    #[test]
    fn same_task_id_in_two_projects_is_independent() {
        let mut store = store();
        store.create_project("Alpha", "d", Some("alpha")).unwrap();
        store.create_project("Beta", "d", Some("beta")).unwrap();
        let t1 = vec![Task::new("t1".into(), "shared id".into())];
        store.replace_tasks("alpha", t1.clone()).unwrap();
        store.replace_tasks("beta", t1.clone()).unwrap();

        assert!(store.delete_task("alpha", "t1"));
        assert!(store.project("alpha").unwrap().tasks.is_empty());
        assert_eq!(store.project("beta").unwrap().tasks, t1);
    }

    #[test]
    fn cycle_walks_todo_doing_done() {
        let mut store = store();
        store.create_project("Alpha", "d", Some("alpha")).unwrap();
        let id = store.add_task("alpha", "task").unwrap().unwrap();
        assert_eq!(store.cycle_task_status("alpha", &id).unwrap(), TaskStatus::Doing);
        assert_eq!(store.cycle_task_status("alpha", &id).unwrap(), TaskStatus::Done);
        assert_eq!(store.cycle_task_status("alpha", &id).unwrap(), TaskStatus::Todo);
    }

    #[test]
    fn deletes_are_idempotent_and_cascade() {
        let mut store = store();
        store.create_project("Alpha", "d", Some("alpha")).unwrap();
        store.add_task("alpha", "one").unwrap();
        assert!(!store.delete_task("alpha", "nope"));
        assert!(store.delete_project("alpha"));
        assert!(!store.delete_project("alpha"));
        assert!(store.projects().is_empty());
        assert_eq!(store.storage().writes.len(), 3);
    }

    #[test]
    fn blank_task_is_ignored_and_unknown_ids_are_not_found() {
        let mut store = store();
        assert_eq!(store.add_task("ghost", "  ").unwrap(), None);
        assert!(matches!(
            store.add_task("ghost", "real"),
            Err(StoreError::NotFound(NotFoundError::Project(_)))
        ));
        assert!(matches!(
            store.edit_project("ghost", "Name", "desc"),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.cycle_task_status("ghost", "t"),
            Err(StoreError::NotFound(_))
        ));
        assert!(store.storage().writes.is_empty());
    }

    #[test]
    fn edit_project_keeps_id_and_tasks() {
        let mut store = store();
        store.create_project("Alpha", "d", Some("alpha")).unwrap();
        store.add_task("alpha", "one").unwrap();
        store.edit_project("alpha", " Renamed ", "new desc").unwrap();
        let project = store.project("alpha").unwrap();
        assert_eq!(project.name, "Renamed");
        assert_eq!(project.description, "new desc");
        assert_eq!(project.tasks.len(), 1);
    }

    #[test]
    fn snapshots_are_immutable_copies() {
        let mut store = store();
        store.create_project("Alpha", "d", Some("alpha")).unwrap();
        let before = store.snapshot();
        store.add_task("alpha", "one").unwrap();
        assert!(before.projects[0].tasks.is_empty());
        assert_eq!(store.snapshot().revision, before.revision + 1);
    }

    #[test]
    fn validate_draft_reports_every_field() {
        let mut store = store();
        store.create_project("Alpha", "d", Some("alpha")).unwrap();
        let errors = store.validate_draft("alpha", "", "");
        let fields: Vec<_> = errors.iter().map(|e| e.field()).collect();
        assert_eq!(
            fields,
            vec![
                crate::model::Field::Id,
                crate::model::Field::Name,
                crate::model::Field::Description
            ]
        );
        assert!(store.validate_draft("", "Beta", "x").is_empty());
    }
}
