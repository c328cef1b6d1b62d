use crate::cache::CachePolicy;
use crate::protocol::WorkerKind;
use crate::recipes::{Recipe, RecipeInputSpec, RecipeStep, RetryPolicy};
use crate::shared::RecipeId;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const DAY_MS: u64 = 86_400_000;

fn input(kind: &str, required: bool, description: &str) -> RecipeInputSpec {
    RecipeInputSpec {
        kind: kind.to_string(),
        required,
        description: description.to_string(),
    }
}

fn step(id: &str, worker: WorkerKind, command: &str, depends_on: &[&str]) -> RecipeStep {
    RecipeStep {
        id: id.to_string(),
        worker,
        command: command.to_string(),
        depends_on: depends_on.iter().map(|dep| dep.to_string()).collect(),
        payload: Value::Null,
        cache_policy: CachePolicy::default(),
        output_contract: Value::Null,
        tool_versions: BTreeMap::new(),
        retry_policy: None,
    }
}

fn transcribe_folder_recipe() -> Recipe {
    let mut transcribe = step("transcribe", WorkerKind::Media, "transcribe_folder", &[]);
    transcribe.payload = json!({
        "folder_path": "${input.folder}",
        "use_gpu": "${input.use_gpu}",
        "language": "${input.language}",
        "engine": "${input.engine}",
        "output_mode": "${input.output_mode}",
        "overwrite": "${input.overwrite}",
    });
    transcribe.cache_policy = CachePolicy {
        enabled: true,
        ttl_ms: Some(DAY_MS),
    };
    transcribe.output_contract = Value::String("transcribe_output".to_string());
    transcribe.retry_policy = Some(RetryPolicy {
        max_attempts: 2,
        backoff_ms: 1_000,
    });

    Recipe {
        id: RecipeId::parse("transcribe_folder").expect("template recipe id is valid"),
        version: 1,
        description: "Transcribe every supported media file under a folder".to_string(),
        inputs: BTreeMap::from([
            ("folder".to_string(), input("string", true, "Folder scanned recursively for media files")),
            ("use_gpu".to_string(), input("boolean", false, "Prefer the GPU transcription path")),
            ("language".to_string(), input("string", false, "Language hint for the transcription engine")),
            ("engine".to_string(), input("string", false, "Transcription engine override")),
        ]),
        defaults: json!({
            "use_gpu": false,
            "output_mode": "txt",
            "overwrite": false,
        })
        .as_object()
        .cloned()
        .unwrap_or_default(),
        steps: vec![transcribe],
        outputs: json!({
            "transcripts": "${steps.transcribe.outputs}",
            "files_processed": "${steps.transcribe.files_processed}",
        }),
        timeout_ms: 0,
        retry_policy: RetryPolicy::default(),
    }
}

fn lp_base_export_round1_recipe() -> Recipe {
    let queue_renders = step("queue_renders", WorkerKind::Resolve, "lp_base_export", &[]);
    let mut render = step(
        "render",
        WorkerKind::Resolve,
        "start_render",
        &["queue_renders"],
    );
    render.retry_policy = Some(RetryPolicy {
        max_attempts: 2,
        backoff_ms: 2_000,
    });

    Recipe {
        id: RecipeId::parse("lp_base_export_round1").expect("template recipe id is valid"),
        version: 1,
        description: "Queue every EXPORT-bin timeline for render, then start the render queue"
            .to_string(),
        inputs: BTreeMap::new(),
        defaults: serde_json::Map::new(),
        steps: vec![queue_renders, render],
        outputs: json!({
            "queued": "${steps.queue_renders}",
            "render": "${steps.render}",
        }),
        timeout_ms: 0,
        retry_policy: RetryPolicy::default(),
    }
}

fn prepare_project_recipe() -> Recipe {
    let mut connect = step("connect", WorkerKind::Resolve, "connect", &[]);
    connect.payload = json!({
        "project": "${input.project}",
    });
    let create_bins = step(
        "create_bins",
        WorkerKind::Resolve,
        "create_project_bins",
        &["connect"],
    );

    Recipe {
        id: RecipeId::parse("prepare_project").expect("template recipe id is valid"),
        version: 1,
        description: "Connect to the editing project and create the standard bin layout"
            .to_string(),
        inputs: BTreeMap::from([(
            "project".to_string(),
            input("string", false, "Project name; defaults to the open project"),
        )]),
        defaults: serde_json::Map::new(),
        steps: vec![connect, create_bins],
        outputs: json!({
            "context": "${steps.connect}",
            "bins": "${steps.create_bins}",
        }),
        timeout_ms: 0,
        retry_policy: RetryPolicy::default(),
    }
}

/// The recipes shipped with a fresh state root.
pub fn default_recipe_catalog() -> Vec<Recipe> {
    vec![
        transcribe_folder_recipe(),
        lp_base_export_round1_recipe(),
        prepare_project_recipe(),
    ]
}
