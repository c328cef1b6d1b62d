pub mod paths;
pub mod settings;

pub use paths::{bootstrap_state_root, default_state_root_path, StatePaths, DEFAULT_STATE_ROOT_DIR};
pub use settings::{Settings, WorkerSpawnConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid document in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("settings validation failed: {0}")]
    Settings(String),
    #[error("failed to create state path {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to resolve home directory for state root")]
    HomeDirectoryUnavailable,
}
