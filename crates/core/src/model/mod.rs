mod ids;
mod question;
mod quiz;
mod session;
mod snapshot;
mod submission;

pub use ids::{AnswerId, AttemptId, ParseIdError, QuestionId, QuizId, UserId};
pub use question::{AnswerOption, Question};
pub use quiz::{QuizDefinition, QuizMode};
pub use session::{AttemptRef, Session, SessionModelError, SessionState};
pub use snapshot::AutosaveSnapshot;
pub use submission::{AttemptResult, SubmissionEntry, SubmissionRecord};
