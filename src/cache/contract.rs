use crate::shared::WorkerFault;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Declarative post-condition a step output must satisfy before the engine
/// accepts it as successful or cacheable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputContract {
    #[default]
    NonNull,
    TranscribeOutput,
}

impl OutputContract {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NonNull => "non_null",
            Self::TranscribeOutput => "transcribe_output",
        }
    }

    pub fn validate(self, output: &Value) -> Result<(), WorkerFault> {
        match self {
            Self::NonNull => {
                if output.is_null() {
                    return Err(WorkerFault::retryable(
                        "output contract `non_null` violated: output is null",
                    ));
                }
                Ok(())
            }
            Self::TranscribeOutput => validate_transcribe_output(output),
        }
    }
}

impl std::fmt::Display for OutputContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn contract_violation(reason: impl Into<String>) -> WorkerFault {
    WorkerFault::retryable(format!(
        "output contract `transcribe_output` violated: {}",
        reason.into()
    ))
}

fn validate_transcribe_output(output: &Value) -> Result<(), WorkerFault> {
    let Some(outputs) = output.get("outputs").and_then(Value::as_array) else {
        return Err(contract_violation("missing `outputs` list"));
    };
    if outputs.is_empty() {
        return Err(contract_violation("`outputs` list is empty"));
    }

    for (index, entry) in outputs.iter().enumerate() {
        let Some(file) = entry.get("file").and_then(Value::as_str) else {
            return Err(contract_violation(format!(
                "outputs[{index}] is missing its source `file`"
            )));
        };
        if !Path::new(file).is_file() {
            return Err(contract_violation(format!(
                "outputs[{index}] source file does not exist: {file}"
            )));
        }
        let Some(output_paths) = entry.get("output_paths").and_then(Value::as_array) else {
            return Err(contract_violation(format!(
                "outputs[{index}] is missing `output_paths`"
            )));
        };
        if output_paths.is_empty() {
            return Err(contract_violation(format!(
                "outputs[{index}].output_paths is empty"
            )));
        }
        for raw_path in output_paths {
            let Some(path) = raw_path.as_str() else {
                return Err(contract_violation(format!(
                    "outputs[{index}].output_paths entries must be strings"
                )));
            };
            let non_empty_file = fs::metadata(path)
                .map(|meta| meta.is_file() && meta.len() > 0)
                .unwrap_or(false);
            if !non_empty_file {
                return Err(contract_violation(format!(
                    "outputs[{index}] output path is missing or empty: {path}"
                )));
            }
        }
    }
    Ok(())
}
