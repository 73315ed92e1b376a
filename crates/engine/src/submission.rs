use std::sync::Arc;

use quiz_core::Clock;
use quiz_core::model::{AttemptRef, AttemptResult, Session, SubmissionRecord};
use quiz_core::scoring::score_submission;
use storage::AttemptStore;

use crate::error::SubmissionError;
use crate::loader::QuestionPageLoader;

/// Assembles the complete answer set for a session and dispatches it.
///
/// Graded attempts go to the attempt store; practice runs are scored locally and carry
/// the wall-clock duration since the session started.
pub struct SubmissionCoordinator {
    attempts: Arc<dyn AttemptStore>,
    loader: QuestionPageLoader,
    clock: Clock,
}

impl SubmissionCoordinator {
    #[must_use]
    pub fn new(attempts: Arc<dyn AttemptStore>, loader: QuestionPageLoader, clock: Clock) -> Self {
        Self {
            attempts,
            loader,
            clock,
        }
    }

    /// Make sure every question of the session is loaded, then build the record.
    ///
    /// Missing questions are fetched in one bulk request rather than page by page.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::Load` if the remaining questions cannot be fetched.
    pub async fn prepare(&self, session: &Session) -> Result<SubmissionRecord, SubmissionError> {
        if self.loader.has_more() {
            let appended = self.loader.load_remaining().await?;
            tracing::debug!(
                quiz_id = %session.quiz_id(),
                appended,
                "loaded remaining questions before submit"
            );
        }
        Ok(session.submission_record())
    }

    /// Submit the session and return the scored result.
    ///
    /// Does not touch session state; the caller folds the outcome in.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError` if the session has no attempt, the remaining questions
    /// cannot be loaded, or the attempt store rejects the submission.
    pub async fn submit(&self, session: &Session) -> Result<AttemptResult, SubmissionError> {
        let attempt = session.attempt().ok_or(SubmissionError::NoAttempt)?;
        let record = self.prepare(session).await?;

        match attempt {
            AttemptRef::Graded(attempt_id) => {
                let result = self.attempts.submit(attempt_id, &record).await?;
                tracing::info!(
                    quiz_id = %session.quiz_id(),
                    %attempt_id,
                    entries = record.len(),
                    score = result.score,
                    "submitted attempt"
                );
                Ok(result)
            }
            AttemptRef::Practice => {
                let questions = self.loader.loaded_questions();
                let mut result = score_submission(AttemptRef::Practice, &questions, &record);
                result.duration_secs = Some(self.clock.elapsed_secs_since(session.started_at()));
                tracing::info!(
                    quiz_id = %session.quiz_id(),
                    entries = record.len(),
                    score = result.score,
                    "scored practice run"
                );
                Ok(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FlakyAttempts, RecordingQuestions, question_ids, seeded_repository};
    use chrono::Duration as ChronoDuration;
    use quiz_core::model::{AnswerId, QuestionId, QuizId};
    use quiz_core::time::{fixed_clock, fixed_now};
    use storage::StorageError;

    struct Fixture {
        questions: Arc<RecordingQuestions>,
        attempts: Arc<FlakyAttempts>,
        loader: QuestionPageLoader,
        coordinator: SubmissionCoordinator,
    }

    fn fixture(total: u64, page_size: usize) -> Fixture {
        let questions = Arc::new(RecordingQuestions::seeded(1..=total));
        let attempts = Arc::new(FlakyAttempts::new(seeded_repository(1..=total)));
        let loader = QuestionPageLoader::new(questions.clone(), 5);
        loader.initialize(question_ids(1..=total), page_size, false);
        let coordinator = SubmissionCoordinator::new(attempts.clone(), loader.clone(), fixed_clock());
        Fixture {
            questions,
            attempts,
            loader,
            coordinator,
        }
    }

    fn session(loader: &QuestionPageLoader, attempt: AttemptRef) -> Session {
        let mut session = Session::new(
            QuizId::new(3),
            loader.order(),
            Some(600),
            fixed_now() - ChronoDuration::seconds(90),
        );
        session.set_attempt(attempt);
        session
    }

    #[tokio::test]
    async fn record_covers_every_question_even_when_partially_loaded() {
        let f = fixture(120, 50);
        f.loader.load_more().await.unwrap();
        let attempt = f.attempts.inner.create(QuizId::new(3)).await.unwrap();
        let mut s = session(&f.loader, AttemptRef::Graded(attempt));
        s.select_answer(QuestionId::new(2), AnswerId::new(20)).unwrap();
        s.select_answer(QuestionId::new(110), AnswerId::new(1)).unwrap();

        let result = f.coordinator.submit(&s).await.unwrap();

        let submitted = f.attempts.submissions();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].len(), 120);
        assert_eq!(submitted[0].answered(), 2);
        assert_eq!(result.total, 120);
        assert_eq!(result.correct, 1);

        let requests = f.questions.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1], question_ids(51..=120));
        assert_eq!(f.loader.loaded_count(), 120);
    }

    #[tokio::test]
    async fn fully_loaded_sessions_skip_the_bulk_fetch() {
        let f = fixture(10, 50);
        f.loader.load_more().await.unwrap();
        let attempt = f.attempts.inner.create(QuizId::new(3)).await.unwrap();
        let s = session(&f.loader, AttemptRef::Graded(attempt));

        f.coordinator.submit(&s).await.unwrap();
        assert_eq!(f.questions.request_count(), 1);
    }

    #[tokio::test]
    async fn practice_runs_are_scored_locally_with_duration() {
        let f = fixture(4, 2);
        let mut s = session(&f.loader, AttemptRef::Practice);
        s.select_answer(QuestionId::new(1), AnswerId::new(10)).unwrap();
        s.select_answer(QuestionId::new(3), AnswerId::new(30)).unwrap();
        s.toggle_risk(QuestionId::new(3)).unwrap();

        let result = f.coordinator.submit(&s).await.unwrap();

        assert_eq!(result.attempt, AttemptRef::Practice);
        assert_eq!(result.score, 3);
        assert_eq!(result.max_score, 4);
        assert_eq!(result.duration_secs, Some(90));
        assert!(f.attempts.submissions().is_empty());
    }

    #[tokio::test]
    async fn store_rejection_is_reported() {
        let f = fixture(3, 50);
        let attempt = f.attempts.inner.create(QuizId::new(3)).await.unwrap();
        f.attempts.set_fail_submit(true);
        let s = session(&f.loader, AttemptRef::Graded(attempt));

        let err = f.coordinator.submit(&s).await.unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::Store(StorageError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn failed_bulk_fetch_aborts_the_submission() {
        let f = fixture(3, 50);
        let attempt = f.attempts.inner.create(QuizId::new(3)).await.unwrap();
        f.questions.set_failing(true);
        let s = session(&f.loader, AttemptRef::Graded(attempt));

        let err = f.coordinator.submit(&s).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Load(_)));
        assert!(f.attempts.submissions().is_empty());
    }

    #[tokio::test]
    async fn sessions_without_attempt_cannot_submit() {
        let f = fixture(3, 50);
        let s = Session::new(QuizId::new(3), f.loader.order(), None, fixed_now());
        assert!(matches!(
            f.coordinator.submit(&s).await,
            Err(SubmissionError::NoAttempt)
        ));
    }
}
