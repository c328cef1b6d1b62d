use super::ConfigError;
use crate::protocol::WorkerKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// How to spawn one worker process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkerSpawnConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    pub workers: BTreeMap<WorkerKind, WorkerSpawnConfig>,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
}

fn default_health_check_interval_ms() -> u64 {
    15_000
}

fn default_ping_timeout_ms() -> u64 {
    3_000
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let settings: Settings =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for worker in WorkerKind::ALL {
            let Some(spawn) = self.workers.get(&worker) else {
                return Err(ConfigError::Settings(format!(
                    "missing spawn configuration for worker `{worker}`"
                )));
            };
            if spawn.command.trim().is_empty() {
                return Err(ConfigError::Settings(format!(
                    "worker `{worker}` spawn command must be non-empty"
                )));
            }
            if let Some(cwd) = &spawn.cwd {
                if !cwd.is_absolute() {
                    return Err(ConfigError::Settings(format!(
                        "worker `{worker}` cwd must be an absolute path"
                    )));
                }
            }
        }
        if self.ping_timeout_ms == 0 {
            return Err(ConfigError::Settings(
                "`ping_timeout_ms` must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn spawn_config(&self, worker: WorkerKind) -> &WorkerSpawnConfig {
        self.workers
            .get(&worker)
            .expect("validated settings carry every worker")
    }
}
