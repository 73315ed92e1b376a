//! Shared error types for the engine crate.

use thiserror::Error;

use quiz_core::model::{QuestionId, SessionModelError, SessionState};
use storage::StorageError;

/// Errors emitted by `QuestionPageLoader`.
///
/// Load failures are local: previously loaded pages stay intact and the next
/// explicit loader call retries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error("page {page} is out of range ({pages} pages)")]
    PageOutOfRange { page: usize, pages: usize },
    #[error("question store did not return question {0}")]
    MissingQuestion(QuestionId),
    #[error("question load task failed: {0}")]
    Task(String),
    #[error(transparent)]
    Store(#[from] StorageError),
}

/// Errors emitted by `AutosavePersister`. Never fatal to the session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PersistError {
    #[error("autosave read failed: {0}")]
    Read(#[source] StorageError),
    #[error("autosave write failed: {0}")]
    Write(#[source] StorageError),
    #[error("autosave delete failed: {0}")]
    Delete(#[source] StorageError),
}

/// Errors emitted by `SubmissionCoordinator`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SubmissionError {
    #[error("session has no attempt to submit")]
    NoAttempt,
    #[error("could not load remaining questions: {0}")]
    Load(#[from] LoadError),
    #[error("attempt store rejected the submission: {0}")]
    Store(#[from] StorageError),
}

/// Errors emitted by `AttemptSession`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("attempt could not be created: {0}")]
    AttemptCreation(#[source] StorageError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error("session is {0}, not in progress")]
    NotInProgress(SessionState),
    #[error("session was left")]
    Left,
    #[error("cannot {action} while session is {state}")]
    InvalidTransition {
        action: &'static str,
        state: SessionState,
    },
    #[error("question {0} is not part of this attempt")]
    UnknownQuestion(QuestionId),
    #[error("question index {index} out of range for {len} questions")]
    IndexOutOfRange { index: usize, len: usize },
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Model(SessionModelError),
}

impl From<SessionModelError> for SessionError {
    fn from(err: SessionModelError) -> Self {
        match err {
            SessionModelError::UnknownQuestion(id) => SessionError::UnknownQuestion(id),
            SessionModelError::IndexOutOfRange { index, len } => {
                SessionError::IndexOutOfRange { index, len }
            }
            other => SessionError::Model(other),
        }
    }
}
