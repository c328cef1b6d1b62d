use crate::shared::{atomic_write_file, now_millis};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Per-step cache policy, interpolated from the recipe. Caching is opt-in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachePolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub created_at: i64,
    pub output: Value,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(default)]
    entries: BTreeMap<String, CacheEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheStoreError {
    #[error("cache io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cache json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Keyed persistent store for step results, one JSON document on disk,
/// written atomically after every mutation.
#[derive(Debug)]
pub struct CacheStore {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
}

impl CacheStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheStoreError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => {
                let document: CacheDocument =
                    serde_json::from_str(&raw).map_err(|source| CacheStoreError::Json {
                        path: path.display().to_string(),
                        source,
                    })?;
                document.entries
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(CacheStoreError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        Ok(Self { path, entries })
    }

    pub fn get(&self, fingerprint: &str, ttl_ms: Option<u64>) -> Option<&CacheEntry> {
        let entry = self.entries.get(fingerprint)?;
        if let Some(ttl) = ttl_ms {
            let age = now_millis().saturating_sub(entry.created_at);
            if age > ttl as i64 {
                return None;
            }
        }
        Some(entry)
    }

    pub fn set(&mut self, fingerprint: &str, output: Value) -> Result<(), CacheStoreError> {
        self.entries.insert(
            fingerprint.to_string(),
            CacheEntry {
                created_at: now_millis(),
                output,
            },
        );
        self.persist()
    }

    /// Remove one entry, or every entry when no fingerprint is given.
    pub fn invalidate(&mut self, fingerprint: Option<&str>) -> Result<(), CacheStoreError> {
        match fingerprint {
            Some(fingerprint) => {
                self.entries.remove(fingerprint);
            }
            None => self.entries.clear(),
        }
        self.persist()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), CacheStoreError> {
        let document = CacheDocument {
            entries: self.entries.clone(),
        };
        let body =
            serde_json::to_vec_pretty(&document).map_err(|source| CacheStoreError::Json {
                path: self.path.display().to_string(),
                source,
            })?;
        atomic_write_file(&self.path, &body).map_err(|source| CacheStoreError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }
}
