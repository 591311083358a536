use callback_dispatch_core::contract::{CoordinatorErrorKind, DispatchError};

/// Acknowledgement returned by the workflow coordinator for one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorAck {
    Accepted,
    /// The token was already completed; no side effect was applied.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CoordinatorError {
    pub kind: CoordinatorErrorKind,
    pub message: String,
}

impl CoordinatorError {
    pub fn new(kind: CoordinatorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<CoordinatorError> for DispatchError {
    fn from(error: CoordinatorError) -> Self {
        DispatchError::CoordinatorUnavailable {
            kind: error.kind,
            message: error.message,
        }
    }
}

/// Task-completion endpoint of the external workflow engine.
///
/// Implementations must be idempotent per token: reporting a token twice
/// either acknowledges as [`CoordinatorAck::Duplicate`] or returns an error,
/// never a second side effect.
pub trait TaskCoordinator {
    fn send_task_success(&self, token: &str, output: &str)
        -> Result<CoordinatorAck, CoordinatorError>;
}
