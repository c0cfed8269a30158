use thiserror::Error;

use questwalk_shared::error::{LocationError, SequenceError};

use crate::state::PhaseKind;

/// Failures reported by a [`crate::backend::QuestBackend`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend responded with HTTP {status}")]
    Http { status: u16 },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Backend rejected request: {0}")]
    Rejected(String),

    #[error("Backend request timed out")]
    Timeout,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmissionError {
    #[error("Step requires a photo")]
    MissingPhoto,

    #[error("Step requires a text answer")]
    MissingText,

    #[error("Upload failed: {0}")]
    Upload(String),
}

/// Errors surfaced by the quest progression controller.
///
/// None of these are fatal: the session state stays consistent and the
/// caller may retry or pick another action.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuestError {
    #[error("Cannot {action} while {phase}")]
    InvalidTransition {
        action: &'static str,
        phase: PhaseKind,
    },

    #[error("Current location or step target is unknown")]
    MissingLocation,

    #[error("No route available to the next step")]
    RouteUnavailable,

    #[error(transparent)]
    OutOfSequence(#[from] SequenceError),

    #[error("Invalid location: {0}")]
    InvalidLocation(#[from] LocationError),

    #[error("Submission incomplete: {0}")]
    SubmissionIncomplete(SubmissionError),

    #[error("A submission for this step is already in flight")]
    SubmissionInProgress,

    #[error("Submission failed: {0}")]
    Submission(SubmissionError),

    #[error("Invalid quest: {0}")]
    InvalidQuest(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Operation timed out")]
    Timeout,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Quest controller is not running")]
    ControllerClosed,
}

impl QuestError {
    /// Transient failures where repeating the same action may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            QuestError::RouteUnavailable
            | QuestError::MissingLocation
            | QuestError::Timeout
            | QuestError::Submission(_) => true,
            QuestError::Backend(e) => !matches!(e, BackendError::Rejected(_)),
            _ => false,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QuestError>;
