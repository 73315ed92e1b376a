use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::model::{
    AnswerId, AttemptId, AutosaveSnapshot, QuestionId, QuizId, SubmissionEntry, SubmissionRecord,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionModelError {
    #[error("question {0} is not part of this attempt")]
    UnknownQuestion(QuestionId),

    #[error("question index {index} out of range for {len} questions")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("snapshot belongs to quiz {found}, expected {expected}")]
    QuizMismatch { expected: QuizId, found: QuizId },
}

//
// ─── ATTEMPT REFERENCE ─────────────────────────────────────────────────────────
//

/// Identity of the attempt a session is working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptRef {
    /// Attempt created by, and submitted to, the attempt store.
    Graded(AttemptId),
    /// Server-less practice run scored locally.
    Practice,
}

impl AttemptRef {
    #[must_use]
    pub fn attempt_id(&self) -> Option<AttemptId> {
        match self {
            AttemptRef::Graded(id) => Some(*id),
            AttemptRef::Practice => None,
        }
    }

    #[must_use]
    pub fn is_practice(&self) -> bool {
        matches!(self, AttemptRef::Practice)
    }
}

impl fmt::Display for AttemptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptRef::Graded(id) => write!(f, "{id}"),
            AttemptRef::Practice => f.write_str("practice"),
        }
    }
}

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

/// Lifecycle state of an attempt session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Loading,
    AwaitingRecovery,
    InProgress,
    Submitting,
    Submitted,
    Error,
}

impl SessionState {
    /// `Submitted` and `Error` accept no further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Submitted | SessionState::Error)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Loading => "loading",
            SessionState::AwaitingRecovery => "awaiting-recovery",
            SessionState::InProgress => "in-progress",
            SessionState::Submitting => "submitting",
            SessionState::Submitted => "submitted",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// Volatile state of one quiz attempt.
///
/// The question order is fixed at construction and cannot be replaced; shuffling
/// happens before a session exists, never after.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    quiz_id: QuizId,
    attempt: Option<AttemptRef>,
    state: SessionState,
    ordered_question_ids: Arc<[QuestionId]>,
    answers: BTreeMap<QuestionId, AnswerId>,
    risked: BTreeSet<QuestionId>,
    current_index: usize,
    time_remaining_secs: Option<u32>,
    started_at: DateTime<Utc>,
}

impl Session {
    /// Create an empty session in the `Loading` state.
    #[must_use]
    pub fn new(
        quiz_id: QuizId,
        ordered_question_ids: impl Into<Arc<[QuestionId]>>,
        time_remaining_secs: Option<u32>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            quiz_id,
            attempt: None,
            state: SessionState::Loading,
            ordered_question_ids: ordered_question_ids.into(),
            answers: BTreeMap::new(),
            risked: BTreeSet::new(),
            current_index: 0,
            time_remaining_secs,
            started_at,
        }
    }

    /// Rehydrate a session from a recovered snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SessionModelError` if the snapshot belongs to another quiz, answers
    /// or flags reference unknown questions, or the index is out of range.
    pub fn from_snapshot(
        snapshot: &AutosaveSnapshot,
        expected_quiz: QuizId,
        started_at: DateTime<Utc>,
    ) -> Result<Self, SessionModelError> {
        if snapshot.quiz_id != expected_quiz {
            return Err(SessionModelError::QuizMismatch {
                expected: expected_quiz,
                found: snapshot.quiz_id,
            });
        }

        let mut session = Self::new(
            snapshot.quiz_id,
            snapshot.ordered_question_ids.clone(),
            snapshot.time_remaining_secs,
            started_at,
        );
        session.attempt = Some(AttemptRef::Graded(snapshot.attempt_id));

        for (question, answer) in &snapshot.answers {
            session.select_answer(*question, *answer)?;
        }
        for question in &snapshot.risked {
            session.ensure_known(*question)?;
            session.risked.insert(*question);
        }
        if !(snapshot.current_index == 0 && session.ordered_question_ids.is_empty()) {
            session.navigate(snapshot.current_index)?;
        }

        Ok(session)
    }

    #[must_use]
    pub fn quiz_id(&self) -> QuizId {
        self.quiz_id
    }

    #[must_use]
    pub fn attempt(&self) -> Option<AttemptRef> {
        self.attempt
    }

    pub fn set_attempt(&mut self, attempt: AttemptRef) {
        self.attempt = Some(attempt);
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    #[must_use]
    pub fn ordered_question_ids(&self) -> &[QuestionId] {
        &self.ordered_question_ids
    }

    /// Shared handle to the fixed order, for the loader.
    #[must_use]
    pub fn ordered_question_ids_shared(&self) -> Arc<[QuestionId]> {
        Arc::clone(&self.ordered_question_ids)
    }

    #[must_use]
    pub fn total_questions(&self) -> usize {
        self.ordered_question_ids.len()
    }

    #[must_use]
    pub fn answers(&self) -> &BTreeMap<QuestionId, AnswerId> {
        &self.answers
    }

    #[must_use]
    pub fn answer_for(&self, question: QuestionId) -> Option<AnswerId> {
        self.answers.get(&question).copied()
    }

    #[must_use]
    pub fn risked(&self) -> &BTreeSet<QuestionId> {
        &self.risked
    }

    #[must_use]
    pub fn is_risked(&self, question: QuestionId) -> bool {
        self.risked.contains(&question)
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    #[must_use]
    pub fn time_remaining_secs(&self) -> Option<u32> {
        self.time_remaining_secs
    }

    pub fn set_time_remaining_secs(&mut self, secs: Option<u32>) {
        self.time_remaining_secs = secs;
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Zero-based position of the first occurrence of `question`.
    #[must_use]
    pub fn position_of(&self, question: QuestionId) -> Option<usize> {
        self.ordered_question_ids.iter().position(|id| *id == question)
    }

    fn ensure_known(&self, question: QuestionId) -> Result<usize, SessionModelError> {
        self.position_of(question)
            .ok_or(SessionModelError::UnknownQuestion(question))
    }

    /// Record an answer, returning the previously selected one.
    ///
    /// # Errors
    ///
    /// Returns `SessionModelError::UnknownQuestion` if the question is not in this attempt.
    pub fn select_answer(
        &mut self,
        question: QuestionId,
        answer: AnswerId,
    ) -> Result<Option<AnswerId>, SessionModelError> {
        self.ensure_known(question)?;
        Ok(self.answers.insert(question, answer))
    }

    /// Remove an answer, returning it if one was set.
    ///
    /// # Errors
    ///
    /// Returns `SessionModelError::UnknownQuestion` if the question is not in this attempt.
    pub fn clear_answer(
        &mut self,
        question: QuestionId,
    ) -> Result<Option<AnswerId>, SessionModelError> {
        self.ensure_known(question)?;
        Ok(self.answers.remove(&question))
    }

    /// Flip the risked flag and return the new value.
    ///
    /// # Errors
    ///
    /// Returns `SessionModelError::UnknownQuestion` if the question is not in this attempt.
    pub fn toggle_risk(&mut self, question: QuestionId) -> Result<bool, SessionModelError> {
        self.ensure_known(question)?;
        if self.risked.remove(&question) {
            Ok(false)
        } else {
            self.risked.insert(question);
            Ok(true)
        }
    }

    /// Move focus to `index`.
    ///
    /// # Errors
    ///
    /// Returns `SessionModelError::IndexOutOfRange` if `index` is past the last question.
    pub fn navigate(&mut self, index: usize) -> Result<(), SessionModelError> {
        let len = self.ordered_question_ids.len();
        if index >= len {
            return Err(SessionModelError::IndexOutOfRange { index, len });
        }
        self.current_index = index;
        Ok(())
    }

    /// Build the immutable submission record, one entry per ordered id.
    #[must_use]
    pub fn submission_record(&self) -> SubmissionRecord {
        let entries = self
            .ordered_question_ids
            .iter()
            .map(|id| SubmissionEntry {
                question_id: *id,
                answer_given: self.answer_for(*id),
                risked: self.is_risked(*id),
            })
            .collect();
        SubmissionRecord::new(entries)
    }

    /// Project the session into a snapshot, if it is a graded attempt.
    #[must_use]
    pub fn snapshot(&self, updated_at: DateTime<Utc>) -> Option<AutosaveSnapshot> {
        let attempt_id = self.attempt?.attempt_id()?;
        Some(AutosaveSnapshot {
            quiz_id: self.quiz_id,
            attempt_id,
            ordered_question_ids: self.ordered_question_ids.to_vec(),
            current_index: self.current_index,
            answers: self.answers.clone(),
            risked: self.risked.clone(),
            time_remaining_secs: self.time_remaining_secs,
            updated_at,
        })
    }
}
