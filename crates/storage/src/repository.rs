use async_trait::async_trait;
use quiz_core::model::{
    AttemptId, AttemptRef, AttemptResult, AutosaveSnapshot, Question, QuestionId, QuizId,
    SubmissionRecord, UserId,
};
use quiz_core::scoring::score_submission;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("rejected by store: {0}")]
    Rejected(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Source of question records.
#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Fetch the questions for `ids`.
    ///
    /// Implementations should preserve the requested order; callers key results by id
    /// and do not rely on it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the records cannot be fetched.
    async fn fetch(&self, ids: &[QuestionId]) -> Result<Vec<Question>, StorageError>;
}

/// Creates graded attempts and scores their submissions.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Open a new attempt for a quiz.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the attempt cannot be created.
    async fn create(&self, quiz_id: QuizId) -> Result<AttemptId, StorageError>;

    /// Submit the final answer set and return the scored result.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for unknown attempts, `StorageError::Conflict`
    /// if the attempt was already submitted, or other storage errors.
    async fn submit(
        &self,
        attempt_id: AttemptId,
        record: &SubmissionRecord,
    ) -> Result<AttemptResult, StorageError>;
}

/// Durable key-value store holding one snapshot per (user, quiz).
#[async_trait]
pub trait AutosaveStore: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn get(
        &self,
        user_id: UserId,
        quiz_id: QuizId,
    ) -> Result<Option<AutosaveSnapshot>, StorageError>;

    /// Write the snapshot, replacing any previous one (last write wins).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    async fn save(
        &self,
        user_id: UserId,
        quiz_id: QuizId,
        snapshot: &AutosaveSnapshot,
    ) -> Result<(), StorageError>;

    /// Remove the snapshot. Deleting a missing snapshot succeeds.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the delete fails.
    async fn delete(&self, user_id: UserId, quiz_id: QuizId) -> Result<(), StorageError>;
}

#[derive(Debug, Clone)]
struct AttemptEntry {
    quiz_id: QuizId,
    submitted: bool,
}

#[derive(Default)]
struct AttemptBook {
    next_id: u64,
    attempts: HashMap<AttemptId, AttemptEntry>,
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    questions: Arc<Mutex<HashMap<QuestionId, Question>>>,
    attempts: Arc<Mutex<AttemptBook>>,
    snapshots: Arc<Mutex<HashMap<(UserId, QuizId), AutosaveSnapshot>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a question record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn upsert_question(&self, question: Question) -> Result<(), StorageError> {
        let mut guard = self
            .questions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(question.id, question);
        Ok(())
    }

    /// Quiz the given attempt was created for, if it exists.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn attempt_quiz(&self, attempt_id: AttemptId) -> Result<Option<QuizId>, StorageError> {
        let guard = self
            .attempts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.attempts.get(&attempt_id).map(|a| a.quiz_id))
    }

    /// Number of attempts created so far.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn attempt_count(&self) -> Result<usize, StorageError> {
        let guard = self
            .attempts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.attempts.len())
    }
}

#[async_trait]
impl QuestionStore for InMemoryRepository {
    async fn fetch(&self, ids: &[QuestionId]) -> Result<Vec<Question>, StorageError> {
        let guard = self
            .questions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            match guard.get(id) {
                Some(question) => found.push(question.clone()),
                None => return Err(StorageError::NotFound),
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl AttemptStore for InMemoryRepository {
    async fn create(&self, quiz_id: QuizId) -> Result<AttemptId, StorageError> {
        let mut guard = self
            .attempts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.next_id += 1;
        let id = AttemptId::new(guard.next_id);
        guard.attempts.insert(
            id,
            AttemptEntry {
                quiz_id,
                submitted: false,
            },
        );
        Ok(id)
    }

    async fn submit(
        &self,
        attempt_id: AttemptId,
        record: &SubmissionRecord,
    ) -> Result<AttemptResult, StorageError> {
        let check = |guard: &AttemptBook| match guard.attempts.get(&attempt_id) {
            None => Err(StorageError::NotFound),
            Some(entry) if entry.submitted => Err(StorageError::Conflict),
            Some(_) => Ok(()),
        };
        check(
            &*self
                .attempts
                .lock()
                .map_err(|e| StorageError::Connection(e.to_string()))?,
        )?;

        let ids: Vec<QuestionId> = record.entries().iter().map(|e| e.question_id).collect();
        let questions = self.fetch(&ids).await?;
        let result = score_submission(AttemptRef::Graded(attempt_id), &questions, record);

        let mut guard = self
            .attempts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        check(&*guard)?;
        if let Some(entry) = guard.attempts.get_mut(&attempt_id) {
            entry.submitted = true;
        }
        Ok(result)
    }
}

#[async_trait]
impl AutosaveStore for InMemoryRepository {
    async fn get(
        &self,
        user_id: UserId,
        quiz_id: QuizId,
    ) -> Result<Option<AutosaveSnapshot>, StorageError> {
        let guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(user_id, quiz_id)).cloned())
    }

    async fn save(
        &self,
        user_id: UserId,
        quiz_id: QuizId,
        snapshot: &AutosaveSnapshot,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert((user_id, quiz_id), snapshot.clone());
        Ok(())
    }

    async fn delete(&self, user_id: UserId, quiz_id: QuizId) -> Result<(), StorageError> {
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(&(user_id, quiz_id));
        Ok(())
    }
}

/// Aggregates the three stores behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub questions: Arc<dyn QuestionStore>,
    pub attempts: Arc<dyn AttemptStore>,
    pub autosave: Arc<dyn AutosaveStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_in_memory(InMemoryRepository::new())
    }

    #[must_use]
    pub fn from_in_memory(repo: InMemoryRepository) -> Self {
        let questions: Arc<dyn QuestionStore> = Arc::new(repo.clone());
        let attempts: Arc<dyn AttemptStore> = Arc::new(repo.clone());
        let autosave: Arc<dyn AutosaveStore> = Arc::new(repo);
        Self {
            questions,
            attempts,
            autosave,
        }
    }
}
