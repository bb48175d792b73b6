use anyhow::{Context, Result};
use log::LevelFilter;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const LOG_FILE_NAME: &str = "taskgrid.log";

/// Sends log output to `<data_dir>/taskgrid.log` so the terminal UI is never
/// drawn over. `RUST_LOG`, when set, overrides `level`.
pub fn setup_logging(data_dir: &Path, level: &str) -> Result<PathBuf> {
    fs::create_dir_all(data_dir).with_context(|| format!("creating {:?}", data_dir))?;
    let log_path = data_dir.join(LOG_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening log file {:?}", log_path))?;

    let filter = LevelFilter::from_str(level).unwrap_or(LevelFilter::Info);
    let mut builder = env_logger::Builder::new();
    builder
        .target(env_logger::Target::Pipe(Box::new(file)))
        .filter_level(filter)
        .format_timestamp_secs();
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    // A second init (tests, repeated runs in one process) keeps the first logger.
    let _ = builder.try_init();
    Ok(log_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_log_file_in_data_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("data");
        let path = setup_logging(&dir, "debug").unwrap();
        assert!(path.exists());
        assert!(path.ends_with("taskgrid.log"));
        // unknown levels fall back instead of failing
        assert!(setup_logging(&dir, "chatty").is_ok());
    }
}
