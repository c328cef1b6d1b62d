use deckhand::cache::{CachePolicy, CacheStore, OutputContract};
use deckhand::engine::{
    Cancellation, Job, JobEngine, JobJournal, JobState, StepRecord, StepState, StepTransport,
};
use deckhand::protocol::{RequestEnvelope, ResponseEnvelope, WorkerKind};
use deckhand::recipes::{Plan, PlanStep, RetryPolicy};
use deckhand::shared::WorkerFault;
use serde_json::{json, Map};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct CountingTransport {
    calls: AtomicUsize,
}

impl StepTransport for CountingTransport {
    fn call(
        &self,
        env: &RequestEnvelope,
        _timeout: Option<Duration>,
    ) -> Result<ResponseEnvelope, WorkerFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResponseEnvelope {
            id: Some(env.id.clone()),
            ok: true,
            data: Some(json!({"result": true})),
            error: None,
            metrics: None,
        })
    }

    fn restart_worker(&self, _worker: WorkerKind, _reason: &str) -> Result<(), WorkerFault> {
        Ok(())
    }
}

fn engine_with(transport: Arc<CountingTransport>, root: &Path) -> JobEngine {
    JobEngine::new(
        transport,
        JobJournal::new(root.join("journal.ndjson")),
        CacheStore::open(root.join("steps.json")).expect("cache store"),
        root.join("orchestrator.log"),
    )
}

fn one_step_plan(preset: &str, idempotency_key: Option<&str>) -> Plan {
    Plan {
        preset_id: preset.to_string(),
        idempotency_key: idempotency_key.map(str::to_string),
        timeout_ms: 0,
        retry_policy: RetryPolicy::default(),
        steps: vec![PlanStep {
            step_id: "connect".to_string(),
            worker: WorkerKind::Resolve,
            cmd: "connect".to_string(),
            depends_on: Vec::new(),
            payload: Map::new(),
            cache_policy: CachePolicy::default(),
            output_contract: OutputContract::NonNull,
            tool_versions: BTreeMap::new(),
            retry_policy: RetryPolicy::default(),
        }],
        input: Map::new(),
    }
}

fn wait_terminal(engine: &JobEngine, job_id: &str) -> Job {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let job = engine.get_job(job_id).expect("job exists");
        if job.state.is_terminal() {
            return job;
        }
        assert!(Instant::now() < deadline, "job did not reach a terminal state");
        thread::sleep(Duration::from_millis(10));
    }
}

fn step_record(step_id: &str, state: StepState, attempt: u32) -> StepRecord {
    StepRecord {
        step_id: step_id.to_string(),
        cmd: "connect".to_string(),
        worker: WorkerKind::Resolve,
        payload: Map::new(),
        depends_on: Vec::new(),
        state,
        attempt,
        started_at: Some(1_000),
        finished_at: None,
        output: None,
        error: None,
        cancellation: Cancellation::default(),
        cache_policy: CachePolicy::default(),
        output_contract: OutputContract::NonNull,
        tool_versions: BTreeMap::new(),
        retry_policy: RetryPolicy {
            max_attempts: 3,
            backoff_ms: 0,
        },
    }
}

fn interrupted_job(job_id: &str, idempotency_key: Option<&str>) -> Job {
    Job {
        job_id: job_id.to_string(),
        preset_id: "prepare_project".to_string(),
        idempotency_key: idempotency_key.map(str::to_string),
        state: JobState::Running,
        created_at: 1_000,
        started_at: Some(1_000),
        finished_at: None,
        steps: vec![step_record("connect", StepState::Running, 1)],
        outputs: Vec::new(),
        errors: Vec::new(),
        input: Map::new(),
        retry_policy: RetryPolicy::default(),
        timeout_ms: 0,
    }
}

#[test]
fn journal_replay_keeps_the_last_snapshot_per_job() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = JobJournal::new(dir.path().join("journal.ndjson"));

    let mut job = interrupted_job("job-1", None);
    journal.append(&job).expect("append first snapshot");
    job.state = JobState::Succeeded;
    job.steps[0].state = StepState::Succeeded;
    journal.append(&job).expect("append second snapshot");

    let restored = journal.hydrate().expect("hydrate");
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].state, JobState::Succeeded);
}

#[test]
fn journal_replay_skips_unparseable_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("journal.ndjson");
    let journal = JobJournal::new(&path);
    journal
        .append(&interrupted_job("job-1", None))
        .expect("append snapshot");
    deckhand::shared::append_line(&path, "not json at all").expect("append garbage");

    let restored = journal.hydrate().expect("hydrate tolerates garbage");
    assert_eq!(restored.len(), 1);
}

#[test]
fn terminal_jobs_recover_untouched_and_do_not_rerun() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(CountingTransport::default());

    {
        let engine = engine_with(transport.clone(), dir.path());
        let submitted = engine.submit(&one_step_plan("prepare_project", None));
        let job = wait_terminal(&engine, &submitted.job_id);
        assert_eq!(job.state, JobState::Succeeded);
    }
    let calls_before = transport.calls.load(Ordering::SeqCst);

    let rehydrated = engine_with(transport.clone(), dir.path());
    let resumed = rehydrated.hydrate().expect("hydrate");
    assert_eq!(resumed, 0, "terminal jobs are not resumed");

    let jobs = rehydrated.list_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].state, JobState::Succeeded);
    assert_eq!(jobs[0].outputs, vec![json!({"result": true})]);
    assert_eq!(
        transport.calls.load(Ordering::SeqCst),
        calls_before,
        "no worker calls on recovery of terminal jobs"
    );
}

#[test]
fn interrupted_jobs_resume_and_rerun_their_in_flight_steps() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = JobJournal::new(dir.path().join("journal.ndjson"));
    journal
        .append(&interrupted_job("job-resume", None))
        .expect("append interrupted snapshot");

    let transport = Arc::new(CountingTransport::default());
    let engine = engine_with(transport.clone(), dir.path());
    let resumed = engine.hydrate().expect("hydrate");
    assert_eq!(resumed, 1);

    let job = wait_terminal(&engine, "job-resume");
    assert_eq!(job.state, JobState::Succeeded);
    let step = job.step("connect").expect("step");
    assert_eq!(
        step.attempt, 2,
        "the demoted step runs again with a fresh attempt"
    );
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn hydration_rebuilds_the_idempotency_index() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(CountingTransport::default());

    let first_job_id = {
        let engine = engine_with(transport.clone(), dir.path());
        let submitted = engine.submit(&one_step_plan("prepare_project", Some("launch-9")));
        wait_terminal(&engine, &submitted.job_id);
        submitted.job_id
    };

    let rehydrated = engine_with(transport, dir.path());
    rehydrated.hydrate().expect("hydrate");
    let again = rehydrated.submit(&one_step_plan("prepare_project", Some("launch-9")));
    assert_eq!(again.job_id, first_job_id);
    assert_eq!(rehydrated.list_jobs().len(), 1);
}

#[test]
fn hydrate_is_a_no_op_without_a_journal_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine_with(Arc::new(CountingTransport::default()), dir.path());
    assert_eq!(engine.hydrate().expect("hydrate"), 0);
    assert!(engine.list_jobs().is_empty());
}
