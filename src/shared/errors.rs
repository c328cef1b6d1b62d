use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCategory {
    User,
    Retryable,
    Fatal,
}

impl FaultCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Retryable => "retryable",
            Self::Fatal => "fatal",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" | "usererror" | "user_error" => Ok(Self::User),
            "retryable" | "retryableerror" | "retryable_error" => Ok(Self::Retryable),
            "fatal" | "fatalerror" | "fatal_error" => Ok(Self::Fatal),
            _ => Err("fault category must be one of: user, retryable, fatal".to_string()),
        }
    }
}

impl std::fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The one fault shape that crosses the worker boundary. Everything a worker
/// or the supervisor reports is normalized into this before callers or
/// subscribers see it; the category drives the engine's retry decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{category} error: {message}")]
pub struct WorkerFault {
    pub category: FaultCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl WorkerFault {
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            category: FaultCategory::User,
            message: message.into(),
            details: None,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            category: FaultCategory::Retryable,
            message: message.into(),
            details: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            category: FaultCategory::Fatal,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.category == FaultCategory::Retryable
    }

    /// Normalize an error value received on the wire. Workers written to the
    /// current envelope tag errors with a category; legacy workers send a
    /// bare string, which defaults to a user fault on this side.
    pub fn from_wire(raw: &Value) -> Self {
        match raw {
            Value::String(message) => Self::user(message.clone()),
            Value::Object(map) => {
                let category = map
                    .get("category")
                    .and_then(Value::as_str)
                    .and_then(|raw| FaultCategory::parse(raw).ok())
                    .unwrap_or(FaultCategory::User);
                let message = map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("worker error")
                    .to_string();
                Self {
                    category,
                    message,
                    details: map.get("details").cloned(),
                }
            }
            Value::Null => Self::user("worker error"),
            other => Self::user(other.to_string()),
        }
    }
}
