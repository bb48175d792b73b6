use crate::layout::Breakpoints;
use crate::model::IdPolicy;
use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub id_policy: IdPolicy,
    /// Project IDs new projects may never take.
    pub reserved_ids: Vec<String>,
    pub layout: LayoutConfig,
    pub storage: StorageConfig,
    pub log_level: String,
}

/// Terminal cells are scaled into layout units so breakpoints and alignment
/// thresholds read like pixel values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub breakpoints: Breakpoints,
    pub cell_width: f64,
    pub cell_height: f64,
    pub column_threshold: f64,
    pub row_threshold: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            id_policy: IdPolicy::default(),
            reserved_ids: Vec::new(),
            layout: LayoutConfig::default(),
            storage: StorageConfig::default(),
            log_level: "info".into(),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        LayoutConfig {
            breakpoints: Breakpoints::default(),
            cell_width: 8.0,
            cell_height: 16.0,
            column_threshold: 50.0,
            row_threshold: 50.0,
        }
    }
}

impl Config {
    /// Reads `explicit`, or the platform config file if present. A missing
    /// file means defaults; a malformed one is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Config> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Config::default()),
            },
        };
        let data = fs::read_to_string(&path).with_context(|| format!("reading {:?}", path))?;
        let config = Config::parse(&data).with_context(|| format!("parsing {:?}", path))?;
        Ok(config)
    }

    pub fn parse(data: &str) -> Result<Config> {
        if data.trim().is_empty() {
            return Ok(Config::default());
        }
        let config: Config = serde_yaml::from_str(data).context("parsing config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let policy = &self.id_policy;
        if !policy.allow_letters && !policy.allow_numbers {
            bail!("id_policy must allow letters or numbers");
        }
        if policy.min_length == 0 || policy.min_length > policy.max_length {
            bail!(
                "id_policy lengths must satisfy 1 <= min_length <= max_length (got {}..{})",
                policy.min_length,
                policy.max_length
            );
        }
        let bp = &self.layout.breakpoints;
        if !(bp.one_column < bp.two_columns && bp.two_columns < bp.three_columns) {
            bail!("layout breakpoints must be strictly increasing");
        }
        if self.layout.cell_width <= 0.0 || self.layout.cell_height <= 0.0 {
            bail!("layout cell sizes must be positive");
        }
        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "taskgrid").map(|dirs| dirs.config_dir().join("config.yml"))
}
