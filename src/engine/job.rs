use crate::cache::{CachePolicy, OutputContract};
use crate::protocol::WorkerKind;
use crate::recipes::{Plan, RetryPolicy};
use crate::shared::WorkerFault;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Queued,
    Dispatching,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl StepState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Dispatching => "dispatching",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    #[serde(default)]
    pub requested: bool,
}

/// Runtime state of one step, owned exclusively by the job engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub cmd: String,
    pub worker: WorkerKind,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub state: StepState,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub finished_at: Option<i64>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<WorkerFault>,
    #[serde(default)]
    pub cancellation: Cancellation,
    #[serde(default)]
    pub cache_policy: CachePolicy,
    #[serde(default)]
    pub output_contract: OutputContract,
    #[serde(default)]
    pub tool_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

/// A runtime instance of a plan. Jobs are created at submit, mutated only by
/// the engine's scheduler, finalized once and kept as history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub preset_id: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    pub state: JobState,
    pub created_at: i64,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub finished_at: Option<i64>,
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub outputs: Vec<Value>,
    #[serde(default)]
    pub errors: Vec<WorkerFault>,
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default)]
    pub timeout_ms: u64,
}

impl Job {
    pub fn from_plan(job_id: impl Into<String>, plan: &Plan, created_at: i64) -> Self {
        let steps = plan
            .steps
            .iter()
            .map(|step| StepRecord {
                step_id: step.step_id.clone(),
                cmd: step.cmd.clone(),
                worker: step.worker,
                payload: step.payload.clone(),
                depends_on: step.depends_on.clone(),
                state: StepState::Queued,
                attempt: 0,
                started_at: None,
                finished_at: None,
                output: None,
                error: None,
                cancellation: Cancellation::default(),
                cache_policy: step.cache_policy.clone(),
                output_contract: step.output_contract,
                tool_versions: step.tool_versions.clone(),
                retry_policy: step.retry_policy,
            })
            .collect();

        Self {
            job_id: job_id.into(),
            preset_id: plan.preset_id.clone(),
            idempotency_key: plan.idempotency_key.clone(),
            state: JobState::Queued,
            created_at,
            started_at: None,
            finished_at: None,
            steps,
            outputs: Vec::new(),
            errors: Vec::new(),
            input: plan.input.clone(),
            retry_policy: plan.retry_policy,
            timeout_ms: plan.timeout_ms,
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|step| step.step_id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut StepRecord> {
        self.steps.iter_mut().find(|step| step.step_id == step_id)
    }

    /// A step is runnable when it is queued and every dependency succeeded.
    pub fn step_is_runnable(&self, step_id: &str) -> bool {
        let Some(step) = self.step(step_id) else {
            return false;
        };
        if step.state != StepState::Queued || step.cancellation.requested {
            return false;
        }
        step.depends_on.iter().all(|dependency| {
            self.step(dependency)
                .map(|dep| dep.state == StepState::Succeeded)
                .unwrap_or(false)
        })
    }
}
