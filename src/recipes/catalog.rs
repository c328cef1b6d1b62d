use crate::cache::CachePolicy;
use crate::protocol::{command_owner, WorkerKind};
use crate::shared::RecipeId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid catalog document in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("duplicate recipe id `{recipe_id}`")]
    DuplicateRecipe { recipe_id: String },
    #[error("recipe `{recipe_id}` validation failed: {reason}")]
    Validation { recipe_id: String, reason: String },
    #[error("unknown recipe `{recipe_id}`")]
    UnknownRecipe { recipe_id: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipeInputSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

/// Retry budget for a step. `max_attempts` counts runs, not re-runs; the
/// default of 1 means no retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeStep {
    pub id: String,
    pub worker: WorkerKind,
    pub command: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Payload template; interpolated to a mapping at plan build time.
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub cache_policy: CachePolicy,
    #[serde(default)]
    pub output_contract: Value,
    #[serde(default)]
    pub tool_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: RecipeId,
    pub version: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, RecipeInputSpec>,
    #[serde(default)]
    pub defaults: Map<String, Value>,
    pub steps: Vec<RecipeStep>,
    /// Interpolation template rendered against finished step outputs.
    #[serde(default)]
    pub outputs: Value,
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

impl Recipe {
    pub fn validate(&self) -> Result<(), CatalogError> {
        let fail = |reason: String| CatalogError::Validation {
            recipe_id: self.id.to_string(),
            reason,
        };

        if self.steps.is_empty() {
            return Err(fail("recipe declares no steps".to_string()));
        }

        let mut step_ids = BTreeSet::new();
        for step in &self.steps {
            crate::shared::validate_identifier_value("step id", &step.id).map_err(&fail)?;
            if !step_ids.insert(step.id.as_str()) {
                return Err(fail(format!("duplicate step id `{}`", step.id)));
            }
        }

        for step in &self.steps {
            let Some(owner) = command_owner(&step.command) else {
                return Err(fail(format!(
                    "step `{}` uses unknown command `{}`",
                    step.id, step.command
                )));
            };
            if owner != step.worker {
                return Err(fail(format!(
                    "step `{}` declares worker `{}` but command `{}` is owned by `{owner}`",
                    step.id, step.worker, step.command
                )));
            }
            for dependency in &step.depends_on {
                if dependency == &step.id {
                    return Err(fail(format!("step `{}` depends on itself", step.id)));
                }
                if !step_ids.contains(dependency.as_str()) {
                    return Err(fail(format!(
                        "step `{}` depends on undeclared step `{dependency}`",
                        step.id
                    )));
                }
            }
        }

        self.check_dependency_cycles().map_err(&fail)
    }

    fn check_dependency_cycles(&self) -> Result<(), String> {
        // Kahn-style peel; anything left over sits on a cycle.
        let mut remaining: BTreeMap<&str, BTreeSet<&str>> = self
            .steps
            .iter()
            .map(|step| {
                (
                    step.id.as_str(),
                    step.depends_on.iter().map(String::as_str).collect(),
                )
            })
            .collect();

        loop {
            let ready: Vec<&str> = remaining
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(id, _)| *id)
                .collect();
            if ready.is_empty() {
                break;
            }
            for id in &ready {
                remaining.remove(id);
            }
            for deps in remaining.values_mut() {
                for id in &ready {
                    deps.remove(id);
                }
            }
        }

        if remaining.is_empty() {
            Ok(())
        } else {
            let cycle = remaining.keys().copied().collect::<Vec<_>>().join(", ");
            Err(format!("dependency cycle involving steps: {cycle}"))
        }
    }
}

/// A validated, id-indexed set of recipes loaded from one document.
#[derive(Debug, Clone, Default)]
pub struct RecipeCatalog {
    recipes: Vec<Recipe>,
}

impl RecipeCatalog {
    pub fn from_recipes(recipes: Vec<Recipe>) -> Result<Self, CatalogError> {
        let mut seen = BTreeSet::new();
        for recipe in &recipes {
            if !seen.insert(recipe.id.as_str().to_string()) {
                return Err(CatalogError::DuplicateRecipe {
                    recipe_id: recipe.id.to_string(),
                });
            }
            recipe.validate()?;
        }
        Ok(Self { recipes })
    }

    /// Load the catalog document: an array of recipes, YAML or JSON.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let recipes: Vec<Recipe> =
            serde_yaml::from_str(&raw).map_err(|source| CatalogError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_recipes(recipes)
    }

    pub fn get(&self, recipe_id: &str) -> Result<&Recipe, CatalogError> {
        self.recipes
            .iter()
            .find(|recipe| recipe.id.as_str() == recipe_id)
            .ok_or_else(|| CatalogError::UnknownRecipe {
                recipe_id: recipe_id.to_string(),
            })
    }

    pub fn recipes(&self) -> &[Recipe] {
        &self.recipes
    }
}
