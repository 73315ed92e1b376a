//! Debounced writer for the resumable snapshot of a graded attempt.
//!
//! Only the most recent notified state is ever written. Each `notify` resets the quiet
//! period instead of stacking another write, and writes are serialized so an older
//! snapshot can never land after a newer one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use quiz_core::Clock;
use quiz_core::model::{AutosaveSnapshot, QuizId, UserId};
use storage::AutosaveStore;

use crate::error::PersistError;

#[derive(Default)]
struct Pending {
    latest: Option<AutosaveSnapshot>,
    last_saved: Option<AutosaveSnapshot>,
    last_error: Option<String>,
    /// Sleeping debounce only. Cleared once the write starts so it is never aborted.
    timer: Option<JoinHandle<()>>,
    writing: bool,
}

struct Inner {
    store: Arc<dyn AutosaveStore>,
    user_id: UserId,
    quiz_id: QuizId,
    debounce: Duration,
    clock: Clock,
    pending: Mutex<Pending>,
    generation: AtomicU64,
    write_lock: tokio::sync::Mutex<()>,
}

/// Snapshot persister for one (user, quiz) pair.
#[derive(Clone)]
pub struct AutosavePersister {
    inner: Arc<Inner>,
}

impl AutosavePersister {
    #[must_use]
    pub fn new(
        store: Arc<dyn AutosaveStore>,
        user_id: UserId,
        quiz_id: QuizId,
        debounce: Duration,
        clock: Clock,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                user_id,
                quiz_id,
                debounce,
                clock,
                pending: Mutex::new(Pending::default()),
                generation: AtomicU64::new(0),
                write_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop any pending debounce and invalidate timers that already woke up.
    fn cancel_timer(&self, pending: &mut Pending) -> u64 {
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Read the stored snapshot, if any.
    ///
    /// A snapshot read here counts as already saved, so resuming it unchanged does not
    /// trigger a rewrite.
    ///
    /// # Errors
    ///
    /// Returns `PersistError::Read` if the store cannot be read.
    pub async fn load(&self) -> Result<Option<AutosaveSnapshot>, PersistError> {
        let snapshot = self
            .inner
            .store
            .get(self.inner.user_id, self.inner.quiz_id)
            .await
            .map_err(PersistError::Read)?;
        if let Some(snapshot) = &snapshot {
            self.pending().last_saved = Some(snapshot.clone());
        }
        Ok(snapshot)
    }

    /// Record the latest session state and schedule a debounced write.
    ///
    /// `None` (practice or not yet created attempts) and untimed snapshots are never
    /// persisted. State equal to the last successful write cancels any pending write,
    /// unless another write is still in flight.
    /// Must be called from within a tokio runtime.
    pub fn notify(&self, snapshot: Option<AutosaveSnapshot>) {
        let Some(snapshot) = snapshot else {
            return;
        };
        if snapshot.time_remaining_secs.is_none() {
            return;
        }

        let mut pending = self.pending();
        if !pending.writing
            && pending
                .last_saved
                .as_ref()
                .is_some_and(|saved| saved.same_content(&snapshot))
        {
            self.cancel_timer(&mut pending);
            pending.latest = None;
            return;
        }

        pending.latest = Some(snapshot);
        let generation = self.cancel_timer(&mut pending);
        let this = self.clone();
        let debounce = self.inner.debounce;
        pending.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            {
                let mut pending = this.pending();
                if this.inner.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                pending.timer = None;
            }
            // Failures are recorded on the flag; the next change retries.
            let _ = this.write_latest().await;
        }));
    }

    /// Like [`notify`](Self::notify), but keeps a running quiet period instead of
    /// restarting it.
    ///
    /// Used for once-per-second timer ticks, which would otherwise postpone the write
    /// indefinitely.
    pub fn touch(&self, snapshot: Option<AutosaveSnapshot>) {
        let Some(snapshot) = snapshot else {
            return;
        };
        {
            let mut pending = self.pending();
            let waiting = pending.latest.is_some()
                && pending.timer.as_ref().is_some_and(|t| !t.is_finished());
            if waiting && snapshot.time_remaining_secs.is_some() {
                pending.latest = Some(snapshot);
                return;
            }
        }
        self.notify(Some(snapshot));
    }

    /// Marks a write in flight. Until it returns, `last_saved` may not match the store.
    fn take_for_write(&self) -> Option<AutosaveSnapshot> {
        let mut pending = self.pending();
        let snapshot = pending.latest.clone()?;
        pending.writing = true;
        Some(snapshot)
    }

    async fn write_latest(&self) -> Result<bool, PersistError> {
        let _write = self.inner.write_lock.lock().await;
        let Some(mut snapshot) = self.take_for_write() else {
            return Ok(false);
        };
        snapshot.updated_at = self.inner.clock.now();

        let result = self
            .inner
            .store
            .save(self.inner.user_id, self.inner.quiz_id, &snapshot)
            .await;

        let mut pending = self.pending();
        pending.writing = false;
        match result {
            Ok(()) => {
                tracing::debug!(
                    quiz_id = %self.inner.quiz_id,
                    attempt_id = %snapshot.attempt_id,
                    answered = snapshot.answered_count(),
                    "autosaved attempt"
                );
                if pending
                    .latest
                    .as_ref()
                    .is_some_and(|latest| latest.same_content(&snapshot))
                {
                    pending.latest = None;
                }
                pending.last_saved = Some(snapshot);
                pending.last_error = None;
                Ok(true)
            }
            Err(err) => {
                tracing::warn!(quiz_id = %self.inner.quiz_id, error = %err, "autosave write failed");
                pending.last_error = Some(err.to_string());
                Err(PersistError::Write(err))
            }
        }
    }

    /// Write the latest notified state immediately, bypassing the debounce.
    ///
    /// Returns `false` when nothing unsaved is pending.
    ///
    /// # Errors
    ///
    /// Returns `PersistError::Write` if the store rejects the write.
    pub async fn save_now(&self) -> Result<bool, PersistError> {
        {
            let mut pending = self.pending();
            self.cancel_timer(&mut pending);
        }
        self.write_latest().await
    }

    /// Cancel pending writes and delete the stored snapshot.
    ///
    /// Waits for an in-flight write so it cannot resurrect the snapshot. Deleting a
    /// missing snapshot succeeds.
    ///
    /// # Errors
    ///
    /// Returns `PersistError::Delete` if the store rejects the delete.
    pub async fn clear(&self) -> Result<(), PersistError> {
        {
            let mut pending = self.pending();
            self.cancel_timer(&mut pending);
            pending.latest = None;
        }
        let _write = self.inner.write_lock.lock().await;
        let result = self
            .inner
            .store
            .delete(self.inner.user_id, self.inner.quiz_id)
            .await;

        let mut pending = self.pending();
        match result {
            Ok(()) => {
                tracing::debug!(quiz_id = %self.inner.quiz_id, "cleared autosave");
                pending.last_saved = None;
                pending.last_error = None;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(quiz_id = %self.inner.quiz_id, error = %err, "autosave delete failed");
                pending.last_error = Some(err.to_string());
                Err(PersistError::Delete(err))
            }
        }
    }

    /// Drop any pending write without touching the store.
    pub fn cancel(&self) {
        let mut pending = self.pending();
        self.cancel_timer(&mut pending);
        pending.latest = None;
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending().latest.is_some()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.pending().last_error.clone()
    }

    #[must_use]
    pub fn last_saved(&self) -> Option<AutosaveSnapshot> {
        self.pending().last_saved.clone()
    }
}
