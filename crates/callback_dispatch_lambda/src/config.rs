use callback_dispatch_core::contract::{SourceKind, DEFAULT_RESULT_OUTPUT};

use crate::handlers::dispatch::DispatchSettings;
use crate::telemetry::LogFormat;

pub const RESULT_OUTPUT_VAR: &str = "CALLBACK_RESULT_OUTPUT";
pub const SOURCE_VAR: &str = "CALLBACK_SOURCE";
pub const REPORT_BATCH_ITEM_FAILURES_VAR: &str = "CALLBACK_REPORT_BATCH_ITEM_FAILURES";
pub const LOG_FORMAT_VAR: &str = "CALLBACK_LOG_FORMAT";

const AUTO_SOURCE: &str = "auto";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{variable} must be valid JSON: {reason}")]
    InvalidResultOutput { variable: &'static str, reason: String },
    #[error("{variable} must be one of auto, direct, queue, topic (got '{value}')")]
    UnknownSource { variable: &'static str, value: String },
    #[error("{variable} must be true or false (got '{value}')")]
    InvalidFlag { variable: &'static str, value: String },
    #[error("{variable} must be json or pretty (got '{value}')")]
    UnknownLogFormat { variable: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub dispatch: DispatchSettings,
    pub report_batch_item_failures: bool,
    pub log_format: LogFormat,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Blank values count as
    /// unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |key: &str| read_var(&lookup, key);

        let default_output = match read(RESULT_OUTPUT_VAR) {
            Some(value) => {
                serde_json::from_str::<serde_json::Value>(&value).map_err(|error| {
                    ConfigError::InvalidResultOutput {
                        variable: RESULT_OUTPUT_VAR,
                        reason: error.to_string(),
                    }
                })?;
                value
            }
            None => DEFAULT_RESULT_OUTPUT.to_string(),
        };

        let expected_source = match read(SOURCE_VAR) {
            None => None,
            Some(value) if value.eq_ignore_ascii_case(AUTO_SOURCE) => None,
            Some(value) => Some(SourceKind::parse(&value).ok_or(ConfigError::UnknownSource {
                variable: SOURCE_VAR,
                value,
            })?),
        };

        let report_batch_item_failures = match read(REPORT_BATCH_ITEM_FAILURES_VAR) {
            None => false,
            Some(value) => parse_flag(&value).ok_or(ConfigError::InvalidFlag {
                variable: REPORT_BATCH_ITEM_FAILURES_VAR,
                value,
            })?,
        };

        let log_format = log_format_from_lookup(&lookup)?;

        Ok(Self {
            dispatch: DispatchSettings {
                default_output,
                expected_source,
            },
            report_batch_item_failures,
            log_format,
        })
    }
}

/// Reads only the log format, for binaries that never dispatch callbacks.
pub fn log_format_from_env() -> Result<LogFormat, ConfigError> {
    log_format_from_lookup(|key| std::env::var(key).ok())
}

pub fn log_format_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<LogFormat, ConfigError> {
    match read_var(&lookup, LOG_FORMAT_VAR) {
        None => Ok(LogFormat::default()),
        Some(value) => LogFormat::parse(&value).ok_or(ConfigError::UnknownLogFormat {
            variable: LOG_FORMAT_VAR,
            value,
        }),
    }
}

fn read_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
