use crate::engine::default_concurrency;
use crate::protocol::WorkerKind;
use crate::shared::atomic_write_file;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum PreferencesError {
    #[error("failed to read preferences {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid preferences in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write preferences {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Persisted operator preferences: per-recipe default inputs and per-worker
/// concurrency limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub recipe_defaults: BTreeMap<String, Map<String, Value>>,
    #[serde(default = "default_concurrency")]
    pub worker_concurrency: BTreeMap<WorkerKind, usize>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            recipe_defaults: BTreeMap::new(),
            worker_concurrency: default_concurrency(),
        }
    }
}

/// Partial update; present fields merge key-wise into the stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferencesPatch {
    #[serde(default)]
    pub recipe_defaults: Option<BTreeMap<String, Map<String, Value>>>,
    #[serde(default)]
    pub worker_concurrency: Option<BTreeMap<WorkerKind, usize>>,
}

impl Preferences {
    pub fn load(path: &Path) -> Result<Self, PreferencesError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default())
            }
            Err(source) => {
                return Err(PreferencesError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw).map_err(|source| PreferencesError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), PreferencesError> {
        let body = serde_json::to_vec_pretty(self).map_err(|source| PreferencesError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        atomic_write_file(path, &body).map_err(|source| PreferencesError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn apply_patch(&mut self, patch: &PreferencesPatch) {
        if let Some(defaults) = &patch.recipe_defaults {
            for (recipe_id, values) in defaults {
                let entry = self
                    .recipe_defaults
                    .entry(recipe_id.clone())
                    .or_default();
                for (key, value) in values {
                    entry.insert(key.clone(), value.clone());
                }
            }
        }
        if let Some(concurrency) = &patch.worker_concurrency {
            for (worker, limit) in concurrency {
                self.worker_concurrency.insert(*worker, (*limit).max(1));
            }
        }
    }

    pub fn defaults_for(&self, recipe_id: &str) -> Map<String, Value> {
        self.recipe_defaults
            .get(recipe_id)
            .cloned()
            .unwrap_or_default()
    }
}
