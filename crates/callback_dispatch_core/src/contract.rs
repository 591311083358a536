use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const TOKEN_FIELD: &str = "Token";
pub const OUTPUT_FIELD: &str = "Output";
pub const DEFAULT_RESULT_OUTPUT: &str = "42";

const TOKEN_FINGERPRINT_HEX_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Direct,
    Queue,
    Topic,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Queue => "queue",
            Self::Topic => "topic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct" => Some(Self::Direct),
            "queue" => Some(Self::Queue),
            "topic" => Some(Self::Topic),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message sent to the workflow coordinator to resume a paused step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionReport {
    pub token: String,
    pub result: String,
}

/// Business payload decoded from one record, before a result is chosen.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCallback {
    pub token: String,
    pub output: Option<Value>,
}

impl ResolvedCallback {
    /// Builds the report, preferring the caller-supplied `Output` over the
    /// configured default result.
    pub fn into_report(self, default_output: &str) -> Result<CompletionReport, DispatchError> {
        let result = match self.output {
            Some(output) => serde_json::to_string(&output).map_err(|error| {
                DispatchError::malformed(format!("{OUTPUT_FIELD} cannot be serialized: {error}"))
            })?,
            None => default_output.to_string(),
        };

        Ok(CompletionReport {
            token: self.token,
            result,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorErrorKind {
    InvalidToken,
    TaskDoesNotExist,
    TaskTimedOut,
    Throttled,
    Rejected,
    Transport,
}

impl CoordinatorErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidToken => "invalid_token",
            Self::TaskDoesNotExist => "task_does_not_exist",
            Self::TaskTimedOut => "task_timed_out",
            Self::Throttled => "throttled",
            Self::Rejected => "rejected",
            Self::Transport => "transport",
        }
    }
}

impl fmt::Display for CoordinatorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("malformed payload: {reason}")]
    MalformedPayload { reason: String },
    #[error("missing correlation token at {location}")]
    MissingToken { location: String },
    #[error("coordinator unavailable ({kind}): {message}")]
    CoordinatorUnavailable {
        kind: CoordinatorErrorKind,
        message: String,
    },
}

impl DispatchError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            reason: reason.into(),
        }
    }

    pub fn missing_token(location: impl Into<String>) -> Self {
        Self::MissingToken {
            location: location.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedPayload { .. } => "malformed_payload",
            Self::MissingToken { .. } => "missing_token",
            Self::CoordinatorUnavailable { .. } => "coordinator_unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub index: usize,
    pub message_id: Option<String>,
    pub error: DispatchError,
}

/// Result of one dispatch cycle over every record of an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub source: SourceKind,
    pub reports: Vec<CompletionReport>,
    pub failures: Vec<RecordFailure>,
}

impl DispatchOutcome {
    pub fn new(source: SourceKind) -> Self {
        Self {
            source,
            reports: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Transport message ids of the failed records, or `None` when any failed
    /// record cannot be identified individually.
    pub fn failed_message_ids(&self) -> Option<Vec<String>> {
        self.failures
            .iter()
            .map(|failure| failure.message_id.clone())
            .collect()
    }

    /// Collapses the outcome into the reports, or the first record failure.
    pub fn into_result(self) -> Result<Vec<CompletionReport>, DispatchError> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.error),
            None => Ok(self.reports),
        }
    }
}

/// Short stable digest of a token, safe to write to logs.
pub fn token_fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let mut digest = format!("{:x}", hasher.finalize());
    digest.truncate(TOKEN_FINGERPRINT_HEX_LEN);
    digest
}
