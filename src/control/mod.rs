pub mod preferences;

pub use preferences::{Preferences, PreferencesError, PreferencesPatch};

use crate::config::StatePaths;
use crate::engine::{CancelAck, EngineEvent, Job, JobEngine, StepState};
use crate::protocol::WorkerKind;
use crate::recipes::{build_plan, materialize_outputs, CatalogError, PlanOptions, RecipeCatalog};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::mpsc::Receiver;
use std::sync::Mutex;

/// Ring-buffer capacity for recent engine events.
pub const EVENT_RING_CAPACITY: usize = 2_000;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("unknown action `{action}`")]
    UnknownAction { action: String },
    #[error("invalid payload for `{action}`: {reason}")]
    InvalidPayload { action: String, reason: String },
    #[error("job `{job_id}` not found")]
    UnknownJob { job_id: String },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Preferences(#[from] PreferencesError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveStep {
    pub step_id: String,
    pub worker: WorkerKind,
    pub cmd: String,
    pub state: StepState,
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardRow {
    pub job_id: String,
    pub preset_id: String,
    pub state: String,
    pub created_at: i64,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub finished_at: Option<i64>,
    #[serde(default)]
    pub active_step: Option<ActiveStep>,
    #[serde(default)]
    pub eta_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSummary {
    pub job_id: String,
    pub preset_id: String,
    pub state: String,
    pub input: Map<String, Value>,
}

/// The surface the front end talks to: recipes, jobs, dashboard snapshots,
/// preferences, and the recent-event window.
pub struct ControlPlane {
    engine: JobEngine,
    catalog: RecipeCatalog,
    paths: StatePaths,
    preferences: Mutex<Preferences>,
    events_rx: Mutex<Receiver<EngineEvent>>,
    recent: Mutex<VecDeque<EngineEvent>>,
}

impl ControlPlane {
    pub fn new(
        engine: JobEngine,
        catalog: RecipeCatalog,
        paths: StatePaths,
    ) -> Result<Self, ControlError> {
        let preferences = Preferences::load(&paths.preferences_path())?;
        engine.set_concurrency(&preferences.worker_concurrency);
        let events_rx = engine.subscribe();
        Ok(Self {
            engine,
            catalog,
            paths,
            preferences: Mutex::new(preferences),
            events_rx: Mutex::new(events_rx),
            recent: Mutex::new(VecDeque::with_capacity(EVENT_RING_CAPACITY)),
        })
    }

    /// Push stream of engine events for the front end.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.engine.subscribe()
    }

    /// Drain newly produced engine events into the ring buffer.
    fn pump_events(&self) {
        let rx = self.events_rx.lock().expect("events receiver lock poisoned");
        let mut recent = self.recent.lock().expect("event ring lock poisoned");
        while let Ok(event) = rx.try_recv() {
            if recent.len() == EVENT_RING_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(event);
        }
    }

    /// Recent events, optionally narrowed to a job and step.
    pub fn recent_events(
        &self,
        job_id: Option<&str>,
        step_id: Option<&str>,
    ) -> Vec<EngineEvent> {
        self.pump_events();
        let recent = self.recent.lock().expect("event ring lock poisoned");
        recent
            .iter()
            .filter(|event| job_id.map(|id| event.job_id == id).unwrap_or(true))
            .filter(|event| {
                step_id
                    .map(|id| event.step_id.as_deref() == Some(id))
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    pub fn jobs_list(&self) -> Vec<Job> {
        self.engine.list_jobs()
    }

    pub fn jobs_get(&self, job_id: &str) -> Result<Job, ControlError> {
        self.engine
            .get_job(job_id)
            .ok_or_else(|| ControlError::UnknownJob {
                job_id: job_id.to_string(),
            })
    }

    pub fn jobs_cancel(&self, job_id: &str) -> CancelAck {
        self.engine.cancel(job_id)
    }

    /// Re-launch a finished or stuck job's recipe with the job's last input.
    pub fn jobs_retry(&self, job_id: &str) -> Result<LaunchSummary, ControlError> {
        let job = self.jobs_get(job_id)?;
        let options = PlanOptions {
            retry_of: Some(job.job_id.clone()),
            ..PlanOptions::default()
        };
        self.launch_recipe(&job.preset_id, &job.input, &options)
    }

    pub fn recipes_list(&self) -> Vec<Value> {
        self.catalog
            .recipes()
            .iter()
            .map(|recipe| {
                json!({
                    "id": recipe.id.as_str(),
                    "version": recipe.version,
                    "description": recipe.description,
                    "inputs": recipe.inputs,
                })
            })
            .collect()
    }

    /// Merge saved per-recipe defaults under the user input, compile the
    /// recipe and submit the plan.
    pub fn launch_recipe(
        &self,
        recipe_id: &str,
        input: &Map<String, Value>,
        options: &PlanOptions,
    ) -> Result<LaunchSummary, ControlError> {
        let recipe = self.catalog.get(recipe_id)?;
        let mut merged = {
            let preferences = self.preferences.lock().expect("preferences lock poisoned");
            preferences.defaults_for(recipe_id)
        };
        for (key, value) in input {
            merged.insert(key.clone(), value.clone());
        }
        let plan = build_plan(recipe, &merged, options)?;
        let job = self.engine.submit(&plan);
        Ok(LaunchSummary {
            job_id: job.job_id,
            preset_id: job.preset_id,
            state: job.state.as_str().to_string(),
            input: job.input,
        })
    }

    /// Render the recipe's outputs template for a job from its finished
    /// step outputs.
    pub fn job_outputs(&self, job_id: &str) -> Result<Value, ControlError> {
        let job = self.jobs_get(job_id)?;
        let recipe = self.catalog.get(&job.preset_id)?;
        let step_outputs = job
            .steps
            .iter()
            .filter_map(|step| {
                step.output
                    .clone()
                    .map(|output| (step.step_id.clone(), output))
            })
            .collect();
        Ok(materialize_outputs(recipe, &job.input, &step_outputs))
    }

    /// Per-job dashboard rows, newest first. `eta_ms` extrapolates from the
    /// mean duration of finished steps; null until one step has finished.
    pub fn dashboard_snapshot(&self) -> Vec<DashboardRow> {
        self.pump_events();
        let mut rows: Vec<DashboardRow> = self
            .engine
            .list_jobs()
            .into_iter()
            .map(|job| dashboard_row(&job))
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }

    pub fn preferences_get(&self) -> Preferences {
        self.preferences
            .lock()
            .expect("preferences lock poisoned")
            .clone()
    }

    /// Merge the patch, persist atomically, and re-apply worker concurrency
    /// to the engine.
    pub fn preferences_update(
        &self,
        patch: &PreferencesPatch,
    ) -> Result<Preferences, ControlError> {
        let updated = {
            let mut preferences = self.preferences.lock().expect("preferences lock poisoned");
            preferences.apply_patch(patch);
            preferences.save(&self.paths.preferences_path())?;
            preferences.clone()
        };
        self.engine.set_concurrency(&updated.worker_concurrency);
        Ok(updated)
    }

    /// Logical action dispatch for the front-end transport.
    pub fn handle(&self, action: &str, payload: &Value) -> Result<Value, ControlError> {
        let as_object = || {
            payload
                .as_object()
                .cloned()
                .ok_or_else(|| ControlError::InvalidPayload {
                    action: action.to_string(),
                    reason: "payload must be a mapping".to_string(),
                })
        };
        let job_id_field = || {
            payload
                .get("job_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ControlError::InvalidPayload {
                    action: action.to_string(),
                    reason: "`job_id` is required".to_string(),
                })
        };

        match action {
            "jobs.list" => Ok(serde_json::to_value(self.jobs_list()).unwrap_or(Value::Null)),
            "jobs.get" => {
                let job = self.jobs_get(&job_id_field()?)?;
                Ok(serde_json::to_value(job).unwrap_or(Value::Null))
            }
            "jobs.cancel" => {
                let ack = self.jobs_cancel(&job_id_field()?);
                Ok(serde_json::to_value(ack).unwrap_or(Value::Null))
            }
            "jobs.retry" => {
                let summary = self.jobs_retry(&job_id_field()?)?;
                Ok(serde_json::to_value(summary).unwrap_or(Value::Null))
            }
            "recipes.list" => Ok(Value::Array(self.recipes_list())),
            "recipes.launch" => {
                let fields = as_object()?;
                let recipe_id = fields
                    .get("recipe_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ControlError::InvalidPayload {
                        action: action.to_string(),
                        reason: "`recipe_id` is required".to_string(),
                    })?;
                let input = fields
                    .get("input")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let options = fields
                    .get("options")
                    .map(|raw| {
                        serde_json::from_value(raw.clone()).map_err(|err| {
                            ControlError::InvalidPayload {
                                action: action.to_string(),
                                reason: format!("invalid options: {err}"),
                            }
                        })
                    })
                    .transpose()?
                    .unwrap_or_default();
                let summary = self.launch_recipe(recipe_id, &input, &options)?;
                Ok(serde_json::to_value(summary).unwrap_or(Value::Null))
            }
            "dashboard.snapshot" => {
                Ok(serde_json::to_value(self.dashboard_snapshot()).unwrap_or(Value::Null))
            }
            "preferences.get" => {
                Ok(serde_json::to_value(self.preferences_get()).unwrap_or(Value::Null))
            }
            "preferences.update" => {
                let patch: PreferencesPatch = serde_json::from_value(payload.clone())
                    .map_err(|err| ControlError::InvalidPayload {
                        action: action.to_string(),
                        reason: format!("invalid preferences patch: {err}"),
                    })?;
                let updated = self.preferences_update(&patch)?;
                Ok(serde_json::to_value(updated).unwrap_or(Value::Null))
            }
            _ => Err(ControlError::UnknownAction {
                action: action.to_string(),
            }),
        }
    }
}

fn dashboard_row(job: &Job) -> DashboardRow {
    let active_step = job
        .steps
        .iter()
        .find(|step| matches!(step.state, StepState::Running | StepState::Dispatching))
        .map(|step| ActiveStep {
            step_id: step.step_id.clone(),
            worker: step.worker,
            cmd: step.cmd.clone(),
            state: step.state,
            attempt: step.attempt,
        });

    let finished_durations: Vec<i64> = job
        .steps
        .iter()
        .filter(|step| step.state.is_terminal())
        .filter_map(|step| match (step.started_at, step.finished_at) {
            (Some(started), Some(finished)) if finished >= started => Some(finished - started),
            _ => None,
        })
        .collect();
    let remaining = job
        .steps
        .iter()
        .filter(|step| !step.state.is_terminal())
        .count() as i64;
    let eta_ms = if finished_durations.is_empty() {
        None
    } else {
        let mean = finished_durations.iter().sum::<i64>() / finished_durations.len() as i64;
        Some(mean * remaining)
    };

    DashboardRow {
        job_id: job.job_id.clone(),
        preset_id: job.preset_id.clone(),
        state: job.state.as_str().to_string(),
        created_at: job.created_at,
        started_at: job.started_at,
        finished_at: job.finished_at,
        active_step,
        eta_ms,
    }
}
