//! In-process store doubles for engine unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use quiz_core::model::{
    AnswerId, AnswerOption, AttemptId, AttemptResult, AutosaveSnapshot, Question, QuestionId,
    QuizId, SubmissionRecord, UserId,
};
use storage::repository::InMemoryRepository;
use storage::{AttemptStore, AutosaveStore, QuestionStore, StorageError};

pub fn question_ids(range: std::ops::RangeInclusive<u64>) -> Vec<QuestionId> {
    range.map(QuestionId::new).collect()
}

/// Question `id` whose correct answer is `id * 10`.
pub fn question(id: u64) -> Question {
    Question::new(QuestionId::new(id), format!("Question {id}"))
        .with_options(vec![
            AnswerOption {
                id: AnswerId::new(id * 10),
                text: "right".into(),
            },
            AnswerOption {
                id: AnswerId::new(id * 10 + 1),
                text: "wrong".into(),
            },
        ])
        .with_correct_answer(AnswerId::new(id * 10))
}

/// Returns the subset of requested questions it knows and records each request.
#[derive(Default)]
pub struct RecordingQuestions {
    questions: HashMap<QuestionId, Question>,
    requests: Mutex<Vec<Vec<QuestionId>>>,
    failing: AtomicBool,
}

impl RecordingQuestions {
    pub fn seeded(range: std::ops::RangeInclusive<u64>) -> Self {
        Self {
            questions: range.map(|id| (QuestionId::new(id), question(id))).collect(),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<Vec<QuestionId>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl QuestionStore for RecordingQuestions {
    async fn fetch(&self, ids: &[QuestionId]) -> Result<Vec<Question>, StorageError> {
        self.requests.lock().unwrap().push(ids.to_vec());
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("question store offline".into()));
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.questions.get(id).cloned())
            .collect())
    }
}

/// Holds every fetch until `release` is called.
pub struct GatedQuestions {
    inner: RecordingQuestions,
    open: watch::Sender<bool>,
    arrived: watch::Sender<usize>,
}

impl GatedQuestions {
    pub fn seeded(range: std::ops::RangeInclusive<u64>) -> Self {
        Self {
            inner: RecordingQuestions::seeded(range),
            open: watch::Sender::new(false),
            arrived: watch::Sender::new(0),
        }
    }

    pub async fn wait_for_requests(&self, n: usize) {
        let mut rx = self.arrived.subscribe();
        while *rx.borrow_and_update() < n {
            rx.changed().await.unwrap();
        }
    }

    pub fn release(&self) {
        self.open.send_replace(true);
    }

    pub fn request_count(&self) -> usize {
        self.inner.request_count()
    }
}

#[async_trait]
impl QuestionStore for GatedQuestions {
    async fn fetch(&self, ids: &[QuestionId]) -> Result<Vec<Question>, StorageError> {
        let mut rx = self.open.subscribe();
        self.arrived.send_modify(|count| *count += 1);
        while !*rx.borrow_and_update() {
            rx.changed()
                .await
                .map_err(|e| StorageError::Connection(e.to_string()))?;
        }
        self.inner.fetch(ids).await
    }
}

/// Autosave store that records writes and can be switched to fail.
#[derive(Default)]
pub struct RecordingAutosave {
    inner: InMemoryRepository,
    saves: Mutex<Vec<AutosaveSnapshot>>,
    deletes: AtomicUsize,
    fail_writes: AtomicBool,
    commit_delay: Mutex<Duration>,
}

impl RecordingAutosave {
    pub fn saves(&self) -> Vec<AutosaveSnapshot> {
        self.saves.lock().unwrap().clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Saves commit first, then hold the caller for `delay` before returning.
    pub fn set_commit_delay(&self, delay: Duration) {
        *self.commit_delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl AutosaveStore for RecordingAutosave {
    async fn get(
        &self,
        user_id: UserId,
        quiz_id: QuizId,
    ) -> Result<Option<AutosaveSnapshot>, StorageError> {
        self.inner.get(user_id, quiz_id).await
    }

    async fn save(
        &self,
        user_id: UserId,
        quiz_id: QuizId,
        snapshot: &AutosaveSnapshot,
    ) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("autosave store offline".into()));
        }
        self.saves.lock().unwrap().push(snapshot.clone());
        self.inner.save(user_id, quiz_id, snapshot).await?;
        let delay = *self.commit_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn delete(&self, user_id: UserId, quiz_id: QuizId) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(user_id, quiz_id).await
    }
}

/// Attempt store backed by `InMemoryRepository` with switchable failures.
pub struct FlakyAttempts {
    pub inner: InMemoryRepository,
    fail_create: AtomicBool,
    fail_submit: AtomicBool,
    submissions: Mutex<Vec<SubmissionRecord>>,
}

impl FlakyAttempts {
    pub fn new(inner: InMemoryRepository) -> Self {
        Self {
            inner,
            fail_create: AtomicBool::new(false),
            fail_submit: AtomicBool::new(false),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttemptStore for FlakyAttempts {
    async fn create(&self, quiz_id: QuizId) -> Result<AttemptId, StorageError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected("attempt limit reached".into()));
        }
        self.inner.create(quiz_id).await
    }

    async fn submit(
        &self,
        attempt_id: AttemptId,
        record: &SubmissionRecord,
    ) -> Result<AttemptResult, StorageError> {
        self.submissions.lock().unwrap().push(record.clone());
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("attempt store offline".into()));
        }
        self.inner.submit(attempt_id, record).await
    }
}

/// Repository seeded with `question(id)` for every id in `range`.
pub fn seeded_repository(range: std::ops::RangeInclusive<u64>) -> InMemoryRepository {
    let repo = InMemoryRepository::new();
    for id in range {
        repo.upsert_question(question(id)).unwrap();
    }
    repo
}
