#![forbid(unsafe_code)]

pub mod autosave;
pub mod config;
pub mod error;
pub mod loader;
pub mod session;
pub mod submission;
pub mod timer;

#[cfg(test)]
mod test_support;

pub use quiz_core::Clock;

pub use autosave::AutosavePersister;
pub use config::EngineConfig;
pub use error::{LoadError, PersistError, SessionError, SubmissionError};
pub use loader::{PageLoad, QuestionPageLoader};
pub use session::{AttemptSession, SessionProgress, StartOutcome, TimerEvent};
pub use submission::SubmissionCoordinator;
pub use timer::{CountdownTimer, TickOutcome};
