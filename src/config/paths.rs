use super::ConfigError;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    pub root: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn required_directories(&self) -> Vec<PathBuf> {
        vec![
            self.root.join("jobs"),
            self.root.join("cache"),
            self.logs_dir(),
            self.root.join("daemon"),
        ]
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join("settings.yaml")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.root.join("recipes.yaml")
    }

    pub fn jobs_log_path(&self) -> PathBuf {
        self.root.join("jobs/journal.ndjson")
    }

    pub fn cache_store_path(&self) -> PathBuf {
        self.root.join("cache/steps.json")
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.root.join("preferences.json")
    }

    pub fn orchestrator_log_path(&self) -> PathBuf {
        self.logs_dir().join("orchestrator.log")
    }

    pub fn stop_signal_path(&self) -> PathBuf {
        self.root.join("daemon/stop")
    }
}

pub const DEFAULT_STATE_ROOT_DIR: &str = ".deckhand";

pub fn default_state_root_path() -> Result<PathBuf, ConfigError> {
    let home = std::env::var_os("HOME").ok_or(ConfigError::HomeDirectoryUnavailable)?;
    Ok(PathBuf::from(home).join(DEFAULT_STATE_ROOT_DIR))
}

pub fn bootstrap_state_root(paths: &StatePaths) -> Result<(), ConfigError> {
    for path in paths.required_directories() {
        fs::create_dir_all(&path).map_err(|source| ConfigError::CreateDir {
            path: path.display().to_string(),
            source,
        })?;
    }
    Ok(())
}
