use crate::cache::{CachePolicy, OutputContract};
use crate::protocol::WorkerKind;
use crate::recipes::catalog::{CatalogError, Recipe, RetryPolicy};
use crate::recipes::interpolate::{interpolate, interpolate_map};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Launch-time knobs carried alongside the user input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<String>,
}

/// One submit-ready step compiled from a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: String,
    pub worker: WorkerKind,
    pub cmd: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub cache_policy: CachePolicy,
    #[serde(default)]
    pub output_contract: OutputContract,
    #[serde(default)]
    pub tool_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

/// A recipe compiled against concrete input, ready for the job engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub preset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub input: Map<String, Value>,
}

fn plan_context(recipe: &Recipe, input: &Map<String, Value>) -> Value {
    json!({
        "recipe": {
            "id": recipe.id.as_str(),
            "version": recipe.version,
        },
        "defaults": Value::Object(recipe.defaults.clone()),
        "input": Value::Object(input.clone()),
        "steps": {},
    })
}

/// Compile a recipe into a plan: merge defaults under the user input, then
/// interpolate every step template against the plan context. Step-output
/// references stay unresolved here; they only resolve when the finished
/// job's outputs are materialized.
pub fn build_plan(
    recipe: &Recipe,
    user_input: &Map<String, Value>,
    options: &PlanOptions,
) -> Result<Plan, CatalogError> {
    let mut input = recipe.defaults.clone();
    for (key, value) in user_input {
        input.insert(key.clone(), value.clone());
    }
    let ctx = plan_context(recipe, &input);

    let mut steps = Vec::with_capacity(recipe.steps.len());
    for step in &recipe.steps {
        let payload = interpolate_map(&step.payload, &ctx);
        let output_contract = match &step.output_contract {
            Value::Null => OutputContract::default(),
            template => serde_json::from_value(interpolate(template, &ctx)).map_err(|err| {
                CatalogError::Validation {
                    recipe_id: recipe.id.to_string(),
                    reason: format!("step `{}` output contract is invalid: {err}", step.id),
                }
            })?,
        };
        let tool_versions = step
            .tool_versions
            .iter()
            .map(|(name, version)| {
                let rendered = match interpolate(&Value::String(version.clone()), &ctx) {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                (name.clone(), rendered)
            })
            .collect();

        steps.push(PlanStep {
            step_id: step.id.clone(),
            worker: step.worker,
            cmd: step.command.clone(),
            depends_on: step.depends_on.clone(),
            payload,
            cache_policy: step.cache_policy.clone(),
            output_contract,
            tool_versions,
            retry_policy: step.retry_policy.unwrap_or(recipe.retry_policy),
        });
    }

    Ok(Plan {
        preset_id: recipe.id.to_string(),
        idempotency_key: options.idempotency_key.clone(),
        timeout_ms: options.timeout_ms.unwrap_or(recipe.timeout_ms),
        retry_policy: recipe.retry_policy,
        steps,
        input,
    })
}

/// Interpolate the recipe's outputs template against the finished steps of a
/// job. Every finished step's output is exposed under `steps.<step_id>`.
pub fn materialize_outputs(
    recipe: &Recipe,
    input: &Map<String, Value>,
    step_outputs: &BTreeMap<String, Value>,
) -> Value {
    let mut steps = Map::new();
    for (step_id, output) in step_outputs {
        steps.insert(step_id.clone(), output.clone());
    }
    let ctx = json!({
        "recipe": {
            "id": recipe.id.as_str(),
            "version": recipe.version,
        },
        "defaults": Value::Object(recipe.defaults.clone()),
        "input": Value::Object(input.clone()),
        "steps": Value::Object(steps),
    });
    interpolate(&recipe.outputs, &ctx)
}
