//! Attempt lifecycle: recovery decision, in-progress mutations, timer events and submission.

mod machine;
mod progress;

pub use machine::{AttemptSession, StartOutcome, TimerEvent};
pub use progress::SessionProgress;
