use crate::protocol::envelope::RequestEnvelope;
use crate::protocol::schema::{command_spec, FieldKind};
use crate::shared::WorkerFault;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of worker roles. Every command is owned by exactly one of
/// them; sending a command anywhere else is a routing error.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    Resolve,
    Media,
    Platform,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 3] = [WorkerKind::Resolve, WorkerKind::Media, WorkerKind::Platform];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Media => "media",
            Self::Platform => "platform",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "resolve" => Ok(Self::Resolve),
            "media" => Ok(Self::Media),
            "platform" => Ok(Self::Platform),
            _ => Err("worker must be one of: resolve, media, platform".to_string()),
        }
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const RESOLVE_COMMANDS: &[&str] = &[
    "connect",
    "context",
    "add_marker",
    "start_render",
    "stop_render",
    "create_project_bins",
    "update_text",
    "goto",
    "spellcheck",
    "lp_base_export",
    "shutdown",
];

const MEDIA_COMMANDS: &[&str] = &["transcribe", "transcribe_folder", "test_cuda"];

const PLATFORM_COMMANDS: &[&str] = &["leaderpass_auth", "leaderpass_upload"];

/// The command → worker ownership table. `ping` is deliberately absent: it is
/// a universal health command the supervisor sends to every worker directly.
pub fn command_owner(cmd: &str) -> Option<WorkerKind> {
    if RESOLVE_COMMANDS.contains(&cmd) {
        return Some(WorkerKind::Resolve);
    }
    if MEDIA_COMMANDS.contains(&cmd) {
        return Some(WorkerKind::Media);
    }
    if PLATFORM_COMMANDS.contains(&cmd) {
        return Some(WorkerKind::Platform);
    }
    None
}

pub fn known_commands() -> Vec<&'static str> {
    RESOLVE_COMMANDS
        .iter()
        .chain(MEDIA_COMMANDS)
        .chain(PLATFORM_COMMANDS)
        .copied()
        .collect()
}

/// Validate a canonical request envelope. Every rejection is a user fault
/// naming the offending field.
pub fn validate_request_envelope(env: &RequestEnvelope) -> Result<(), WorkerFault> {
    if env.id.trim().is_empty() {
        return Err(WorkerFault::user("request `id` must be non-empty"));
    }
    if env.trace_id.trim().is_empty() {
        return Err(WorkerFault::user("request `trace_id` must be non-empty"));
    }
    if env.cmd.trim().is_empty() {
        return Err(WorkerFault::user("request `cmd` must be non-empty"));
    }
    let Some(owner) = command_owner(&env.cmd) else {
        return Err(WorkerFault::user(format!("unknown command `{}`", env.cmd)));
    };
    if owner != env.worker {
        return Err(WorkerFault::user(format!(
            "command `{}` is owned by worker `{owner}`, not `{}`",
            env.cmd, env.worker
        )));
    }

    let spec = command_spec(&env.cmd);
    for field in spec.fields {
        match env.payload.get(field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    return Err(WorkerFault::user(format!(
                        "command `{}` requires payload field `{}`",
                        env.cmd, field.name
                    )));
                }
            }
            Some(value) => {
                let matches = match field.kind {
                    FieldKind::String => value.is_string(),
                    FieldKind::Number => value.is_number(),
                    FieldKind::Boolean => value.is_boolean(),
                };
                if !matches {
                    return Err(WorkerFault::user(format!(
                        "payload field `{}` of command `{}` must be a {}",
                        field.name,
                        env.cmd,
                        field.kind.as_str()
                    )));
                }
            }
        }
    }
    Ok(())
}
