use crate::model::Project;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::{info, warn};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Key the project collection is stored under.
pub const COLLECTION_KEY: &str = "projects";

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("serializing projects: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Persistent key/value home of the project collection.
///
/// `load` never fails: anything unreadable comes back as an empty collection.
pub trait Storage {
    fn load(&self) -> Vec<Project>;
    fn save(&mut self, projects: &[Project]) -> Result<(), StorageError>;
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(data_dir: &Path) -> Self {
        FileStorage {
            path: data_dir.join(format!("{}.json", COLLECTION_KEY)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn load(&self) -> Vec<Project> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!("no stored projects at {:?}, starting empty", self.path);
                return Vec::new();
            }
            Err(err) => {
                warn!("reading {:?} failed, starting empty: {}", self.path, err);
                return Vec::new();
            }
        };
        parse_collection(&data).unwrap_or_else(|reason| {
            warn!("ignoring stored projects in {:?}: {}", self.path, reason);
            Vec::new()
        })
    }

    fn save(&mut self, projects: &[Project]) -> Result<(), StorageError> {
        let serialized = serde_json::to_vec_pretty(projects)?;
        atomic_write(&self.path, &serialized).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// In-memory adapter that keeps every write, used by tests to count saves.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    pub initial: Vec<Project>,
    pub writes: Vec<Vec<Project>>,
}

#[cfg(test)]
impl Storage for MemoryStorage {
    fn load(&self) -> Vec<Project> {
        self.writes
            .last()
            .cloned()
            .unwrap_or_else(|| self.initial.clone())
    }

    fn save(&mut self, projects: &[Project]) -> Result<(), StorageError> {
        self.writes.push(projects.to_vec());
        Ok(())
    }
}

/// Absent-equivalent content (`undefined`, blank) and non-array JSON both
/// count as "nothing stored".
fn parse_collection(data: &str) -> Result<Vec<Project>, String> {
    let trimmed = data.trim();
    if trimmed.is_empty() || trimmed == "undefined" {
        return Ok(Vec::new());
    }
    let value: serde_json::Value =
        serde_json::from_str(trimmed).map_err(|err| format!("not valid JSON: {}", err))?;
    if !value.is_array() {
        return Err("stored value is not an array".into());
    }
    serde_json::from_value(value).map_err(|err| format!("malformed project: {}", err))
}

fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Explicit override first, then the platform data directory.
pub fn resolve_data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    let dirs = ProjectDirs::from("", "", "taskgrid").context("locating data directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
