use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use quiz_core::Clock;
use quiz_core::model::{
    AnswerId, AttemptRef, AttemptResult, AutosaveSnapshot, Question, QuestionId, QuizDefinition,
    Session, SessionState, UserId,
};
use storage::{AttemptStore, Storage};

use crate::autosave::AutosavePersister;
use crate::config::EngineConfig;
use crate::error::{LoadError, PersistError, SessionError};
use crate::loader::{PageLoad, QuestionPageLoader};
use crate::submission::SubmissionCoordinator;
use crate::timer::CountdownTimer;

use super::progress::SessionProgress;

const CATCH_UP_RETRY: Duration = Duration::from_millis(50);

//
// ─── EVENTS & OUTCOMES ─────────────────────────────────────────────────────────
//

/// Event posted by the countdown timer for the session owner to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// One second elapsed; carries the seconds left.
    Tick(u32),
    /// Time ran out; the attempt must be submitted.
    Expired,
}

/// How a call to `start`, `resume` or `restart` ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A snapshot exists; waiting for `resume` or `restart`.
    AwaitingRecovery,
    /// In progress with the first page loaded, or a quiz without questions.
    Ready,
    /// In progress, but the first page did not arrive in time or failed to load.
    Degraded { reason: String },
}

impl StartOutcome {
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, StartOutcome::Degraded { .. })
    }
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// State machine driving one quiz attempt.
///
/// Owns the `Session` and is its only writer. The loader and persister receive
/// snapshots or positions and never mutate the session themselves.
pub struct AttemptSession {
    quiz: QuizDefinition,
    user_id: UserId,
    config: EngineConfig,
    clock: Clock,
    attempts: Arc<dyn AttemptStore>,
    loader: QuestionPageLoader,
    persister: AutosavePersister,
    timer: CountdownTimer,
    timer_tx: mpsc::UnboundedSender<TimerEvent>,
    timer_rx: mpsc::UnboundedReceiver<TimerEvent>,
    session: Session,
    recovered: Option<Session>,
    recovery_snapshot: Option<AutosaveSnapshot>,
    degraded: Option<String>,
    result: Option<AttemptResult>,
    left: bool,
}

impl AttemptSession {
    #[must_use]
    pub fn new(
        storage: &Storage,
        quiz: QuizDefinition,
        user_id: UserId,
        config: EngineConfig,
        clock: Clock,
    ) -> Self {
        let loader =
            QuestionPageLoader::new(Arc::clone(&storage.questions), config.prefetch_threshold);
        let persister = AutosavePersister::new(
            Arc::clone(&storage.autosave),
            user_id,
            quiz.id,
            config.debounce,
            clock,
        );
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let session = Session::new(
            quiz.id,
            Vec::<QuestionId>::new(),
            quiz.time_limit_secs(),
            clock.now(),
        );

        Self {
            quiz,
            user_id,
            config,
            clock,
            attempts: Arc::clone(&storage.attempts),
            loader,
            persister,
            timer: CountdownTimer::disabled(),
            timer_tx,
            timer_rx,
            session,
            recovered: None,
            recovery_snapshot: None,
            degraded: None,
            result: None,
            left: false,
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────────────────

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn quiz(&self) -> &QuizDefinition {
        &self.quiz
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn loader(&self) -> &QuestionPageLoader {
        &self.loader
    }

    #[must_use]
    pub fn persister(&self) -> &AutosavePersister {
        &self.persister
    }

    /// Snapshot waiting on a resume/restart decision.
    #[must_use]
    pub fn recovery_snapshot(&self) -> Option<&AutosaveSnapshot> {
        self.recovery_snapshot.as_ref()
    }

    #[must_use]
    pub fn result(&self) -> Option<&AttemptResult> {
        self.result.as_ref()
    }

    /// True when the session went in progress without its first page.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    #[must_use]
    pub fn degraded_reason(&self) -> Option<&str> {
        self.degraded.as_deref()
    }

    /// The focused question, if its page is loaded.
    #[must_use]
    pub fn current_question(&self) -> Option<Question> {
        let id = self
            .session
            .ordered_question_ids()
            .get(self.session.current_index())?;
        self.loader.question(*id)
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        SessionProgress {
            state: self.session.state(),
            total: self.session.total_questions(),
            answered: self.session.answers().len(),
            risked: self.session.risked().len(),
            loaded: self.loader.loaded_count(),
            current_index: self.session.current_index(),
            time_remaining_secs: self.session.time_remaining_secs(),
            degraded: self.is_degraded(),
            autosave_failed: self.persister.last_error().is_some(),
        }
    }

    /// A fresh coordinator over this session's stores, for a manual retry after a
    /// failed submission.
    #[must_use]
    pub fn coordinator(&self) -> SubmissionCoordinator {
        SubmissionCoordinator::new(Arc::clone(&self.attempts), self.loader.clone(), self.clock)
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────────

    /// Look for a recoverable snapshot, otherwise start a fresh attempt.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` unless the session is loading, or
    /// `SessionError::AttemptCreation` if the attempt store refuses a new attempt.
    pub async fn start(&mut self) -> Result<StartOutcome, SessionError> {
        self.expect_state(SessionState::Loading, "start")?;

        if !self.quiz.is_practice() {
            match self.persister.load().await {
                Ok(Some(snapshot)) => {
                    match Session::from_snapshot(&snapshot, self.quiz.id, self.clock.now()) {
                        Ok(recovered) => {
                            tracing::info!(
                                quiz_id = %self.quiz.id,
                                user_id = %self.user_id,
                                attempt_id = %snapshot.attempt_id,
                                answered = snapshot.answered_count(),
                                "found recoverable attempt"
                            );
                            self.recovered = Some(recovered);
                            self.recovery_snapshot = Some(snapshot);
                            self.session.set_state(SessionState::AwaitingRecovery);
                            return Ok(StartOutcome::AwaitingRecovery);
                        }
                        Err(err) => {
                            tracing::warn!(quiz_id = %self.quiz.id, error = %err, "discarding invalid snapshot");
                            self.clear_autosave().await;
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(quiz_id = %self.quiz.id, error = %err, "autosave unreadable, starting fresh");
                }
            }
        }

        self.begin_fresh().await
    }

    /// Continue the recovered attempt with its saved order, answers, position and time.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` unless a recovery decision is pending.
    pub async fn resume(&mut self) -> Result<StartOutcome, SessionError> {
        self.expect_state(SessionState::AwaitingRecovery, "resume")?;
        let Some(recovered) = self.recovered.take() else {
            return Err(SessionError::InvalidTransition {
                action: "resume",
                state: self.state(),
            });
        };
        self.recovery_snapshot = None;
        self.session = recovered;
        self.loader
            .initialize_fixed(self.session.ordered_question_ids_shared(), self.config.page_size);
        tracing::info!(
            quiz_id = %self.quiz.id,
            current_index = self.session.current_index(),
            "resuming attempt"
        );

        let outcome = self.enter_in_progress().await;
        self.catch_up_to_current();
        Ok(outcome)
    }

    /// Drop the recovered attempt and start over with a new one.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` unless a recovery decision is pending,
    /// or `SessionError::AttemptCreation` if the new attempt cannot be created.
    pub async fn restart(&mut self) -> Result<StartOutcome, SessionError> {
        self.expect_state(SessionState::AwaitingRecovery, "restart")?;
        self.recovered = None;
        self.recovery_snapshot = None;
        self.session.set_state(SessionState::Loading);
        tracing::info!(quiz_id = %self.quiz.id, "restarting attempt");

        self.clear_autosave().await;
        self.begin_fresh().await
    }

    async fn begin_fresh(&mut self) -> Result<StartOutcome, SessionError> {
        let attempt = if self.quiz.is_practice() {
            AttemptRef::Practice
        } else {
            match self.attempts.create(self.quiz.id).await {
                Ok(id) => AttemptRef::Graded(id),
                Err(err) => {
                    tracing::error!(quiz_id = %self.quiz.id, error = %err, "attempt creation failed");
                    self.session.set_state(SessionState::Error);
                    return Err(SessionError::AttemptCreation(err));
                }
            }
        };

        let order = self.loader.initialize(
            self.quiz.question_ids.clone(),
            self.config.page_size,
            self.quiz.randomize,
        );
        let mut session = Session::new(
            self.quiz.id,
            order,
            self.quiz.time_limit_secs(),
            self.clock.now(),
        );
        session.set_attempt(attempt);
        self.session = session;
        tracing::info!(quiz_id = %self.quiz.id, %attempt, "started attempt");

        Ok(self.enter_in_progress().await)
    }

    async fn enter_in_progress(&mut self) -> StartOutcome {
        let outcome = self.await_first_page().await;
        self.session.set_state(SessionState::InProgress);
        self.start_timer();
        self.persister.notify(self.snapshot());
        outcome
    }

    /// Wait for the first page, bounded by the safety timeout.
    async fn await_first_page(&mut self) -> StartOutcome {
        self.degraded = None;
        if self.loader.total_count() == 0 {
            return StartOutcome::Ready;
        }
        let Some(handle) = self.loader.spawn_load_more() else {
            return StartOutcome::Ready;
        };

        let reason = match tokio::time::timeout(self.config.safety_timeout, handle).await {
            Ok(Ok(Ok(_))) => return StartOutcome::Ready,
            Ok(Ok(Err(err))) => format!("first page failed to load: {err}"),
            Ok(Err(join)) => LoadError::Task(join.to_string()).to_string(),
            Err(_) => format!(
                "first page not loaded within {} ms",
                self.config.safety_timeout.as_millis()
            ),
        };
        tracing::warn!(quiz_id = %self.quiz.id, %reason, "proceeding without first page");
        self.degraded = Some(reason.clone());
        StartOutcome::Degraded { reason }
    }

    /// Load pages in the background until the resumed position is covered.
    fn catch_up_to_current(&self) {
        let target = self.session.current_index();
        if target < self.loader.loaded_count() {
            self.loader.check_prefetch(target + 1);
            return;
        }
        let loader = self.loader.clone();
        let quiz_id = self.quiz.id;
        tokio::spawn(async move {
            while loader.loaded_count() <= target && loader.has_more() {
                match loader.load_more().await {
                    Ok(PageLoad::Loaded { .. }) => {}
                    Ok(PageLoad::Busy) => tokio::time::sleep(CATCH_UP_RETRY).await,
                    Ok(_) => break,
                    Err(err) => {
                        tracing::warn!(%quiz_id, error = %err, "could not load resumed position");
                        break;
                    }
                }
            }
        });
    }

    fn start_timer(&mut self) {
        let timer = CountdownTimer::new(
            self.quiz.duration_minutes,
            self.session.time_remaining_secs(),
        );
        let tx = self.timer_tx.clone();
        timer.set_on_tick(move |remaining| {
            let _ = tx.send(TimerEvent::Tick(remaining));
        });
        let tx = self.timer_tx.clone();
        timer.set_on_expire(move || {
            let _ = tx.send(TimerEvent::Expired);
        });
        self.timer = timer;
        self.timer.start();
    }

    async fn clear_autosave(&self) {
        if let Err(err) = self.persister.clear().await {
            tracing::warn!(quiz_id = %self.quiz.id, error = %err, "could not clear autosave");
        }
    }

    // ─── In-progress events ─────────────────────────────────────────────────────

    fn expect_state(
        &self,
        expected: SessionState,
        action: &'static str,
    ) -> Result<(), SessionError> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition { action, state })
        }
    }

    fn ensure_in_progress(&self) -> Result<(), SessionError> {
        if self.left {
            return Err(SessionError::Left);
        }
        match self.state() {
            SessionState::InProgress => Ok(()),
            state => Err(SessionError::NotInProgress(state)),
        }
    }

    fn snapshot(&self) -> Option<AutosaveSnapshot> {
        self.session.snapshot(self.clock.now())
    }

    /// Forward a mutation at `position` to the persister and the prefetcher.
    fn after_mutation(&self, position: usize) {
        self.persister.notify(self.snapshot());
        self.loader.check_prefetch(position + 1);
    }

    fn position(&self, question: QuestionId) -> Result<usize, SessionError> {
        self.session
            .position_of(question)
            .ok_or(SessionError::UnknownQuestion(question))
    }

    /// # Errors
    ///
    /// Returns `SessionError::NotInProgress` outside in-progress or
    /// `SessionError::UnknownQuestion` for ids outside this attempt.
    pub fn select_answer(
        &mut self,
        question: QuestionId,
        answer: AnswerId,
    ) -> Result<(), SessionError> {
        self.ensure_in_progress()?;
        let position = self.position(question)?;
        self.session.select_answer(question, answer)?;
        self.after_mutation(position);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `SessionError::NotInProgress` outside in-progress or
    /// `SessionError::UnknownQuestion` for ids outside this attempt.
    pub fn clear_answer(&mut self, question: QuestionId) -> Result<(), SessionError> {
        self.ensure_in_progress()?;
        let position = self.position(question)?;
        self.session.clear_answer(question)?;
        self.after_mutation(position);
        Ok(())
    }

    /// Flip the risked flag and return its new value.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotInProgress` outside in-progress or
    /// `SessionError::UnknownQuestion` for ids outside this attempt.
    pub fn toggle_risk(&mut self, question: QuestionId) -> Result<bool, SessionError> {
        self.ensure_in_progress()?;
        let position = self.position(question)?;
        let risked = self.session.toggle_risk(question)?;
        self.after_mutation(position);
        Ok(risked)
    }

    /// # Errors
    ///
    /// Returns `SessionError::NotInProgress` outside in-progress or
    /// `SessionError::IndexOutOfRange` past the last question.
    pub fn navigate(&mut self, index: usize) -> Result<(), SessionError> {
        self.ensure_in_progress()?;
        self.session.navigate(index)?;
        self.after_mutation(index);
        Ok(())
    }

    /// Wait for the next timer event. Never resolves for untimed sessions.
    pub async fn next_timer_event(&mut self) -> Option<TimerEvent> {
        self.timer_rx.recv().await
    }

    /// Fold a timer event into the session.
    ///
    /// Ticks update the remaining time; expiry submits. Events arriving outside
    /// in-progress are ignored. Returns the result when expiry submitted the attempt.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Submission` if the forced submission fails.
    pub async fn apply_timer_event(
        &mut self,
        event: TimerEvent,
    ) -> Result<Option<AttemptResult>, SessionError> {
        if self.left || self.state() != SessionState::InProgress {
            return Ok(None);
        }
        match event {
            TimerEvent::Tick(remaining) => {
                self.session.set_time_remaining_secs(Some(remaining));
                self.persister.touch(self.snapshot());
                Ok(None)
            }
            TimerEvent::Expired => {
                self.session.set_time_remaining_secs(Some(0));
                tracing::info!(quiz_id = %self.quiz.id, "time expired, submitting");
                self.submit().await.map(Some)
            }
        }
    }

    /// Apply every timer event queued so far.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Submission` if an expiry-forced submission fails.
    pub async fn drain_timer_events(&mut self) -> Result<Option<AttemptResult>, SessionError> {
        while let Ok(event) = self.timer_rx.try_recv() {
            if let Some(result) = self.apply_timer_event(event).await? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    // ─── Submission & teardown ──────────────────────────────────────────────────

    /// Freeze the session and submit every question's answer.
    ///
    /// On success the autosave is cleared and the session is submitted. On failure the
    /// session moves to error with its answers intact; `coordinator()` allows a manual
    /// retry.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotInProgress` outside in-progress or
    /// `SessionError::Submission` if dispatch fails.
    pub async fn submit(&mut self) -> Result<AttemptResult, SessionError> {
        self.ensure_in_progress()?;
        self.session.set_state(SessionState::Submitting);
        self.timer.pause();

        match self.coordinator().submit(&self.session).await {
            Ok(result) => {
                self.clear_autosave().await;
                self.session.set_state(SessionState::Submitted);
                self.result = Some(result.clone());
                Ok(result)
            }
            Err(err) => {
                tracing::error!(quiz_id = %self.quiz.id, error = %err, "submission failed");
                self.session.set_state(SessionState::Error);
                Err(err.into())
            }
        }
    }

    /// Write the current state now, e.g. before navigating away.
    ///
    /// Returns `false` when nothing needed writing.
    ///
    /// # Errors
    ///
    /// Returns `PersistError` if the write fails.
    pub async fn flush(&self) -> Result<bool, PersistError> {
        if self.left || self.state() != SessionState::InProgress {
            return Ok(false);
        }
        self.persister.notify(self.snapshot());
        self.persister.save_now().await
    }

    /// Tear down: stop the timer and drop any pending autosave write.
    ///
    /// Later mutations fail with `SessionError::Left` and timer events are ignored.
    pub fn leave(&mut self) {
        self.left = true;
        self.timer.pause();
        self.persister.cancel();
        tracing::debug!(quiz_id = %self.quiz.id, state = %self.state(), "left session");
    }
}

impl Drop for AttemptSession {
    fn drop(&mut self) {
        self.persister.cancel();
    }
}
