//! Per-second countdown that drives time-based auto-submission.
//!
//! Callbacks sit in their own cells. Swapping them is observed by the next tick and
//! never restarts the interval; only pausing, resuming or changing the duration does.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

type TickFn = Box<dyn FnMut(u32) + Send>;
type ExpireFn = Box<dyn FnMut() + Send>;

const TICK_PERIOD: Duration = Duration::from_secs(1);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct Countdown {
    enabled: bool,
    remaining: u32,
    expired: bool,
}

/// Outcome of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Counter decremented; more ticks follow.
    Ticked(u32),
    /// Counter reached zero and the expiry callback ran.
    Expired,
    /// Timer is disabled or already expired.
    Idle,
}

#[derive(Clone)]
struct Cells {
    state: Arc<Mutex<Countdown>>,
    on_tick: Arc<Mutex<TickFn>>,
    on_expire: Arc<Mutex<ExpireFn>>,
}

impl Cells {
    fn tick(&self) -> TickOutcome {
        let (remaining, expired_now) = {
            let mut state = lock(&self.state);
            if !state.enabled || state.expired {
                return TickOutcome::Idle;
            }
            state.remaining = state.remaining.saturating_sub(1);
            if state.remaining == 0 {
                state.expired = true;
            }
            (state.remaining, state.expired)
        };

        {
            let mut on_tick = lock(&self.on_tick);
            (*on_tick)(remaining);
        }
        if expired_now {
            let mut on_expire = lock(&self.on_expire);
            (*on_expire)();
            TickOutcome::Expired
        } else {
            TickOutcome::Ticked(remaining)
        }
    }

    /// Fire expiry for a counter that starts at zero.
    fn expire_if_exhausted(&self) -> bool {
        let fire = {
            let mut state = lock(&self.state);
            if state.enabled && !state.expired && state.remaining == 0 {
                state.expired = true;
                true
            } else {
                false
            }
        };
        if fire {
            let mut on_expire = lock(&self.on_expire);
            (*on_expire)();
        }
        fire
    }
}

/// Countdown over whole seconds.
///
/// A duration of zero or `None` minutes disables the timer entirely: it never ticks and
/// never expires. Requires a tokio runtime once started.
pub struct CountdownTimer {
    cells: Cells,
    task: Option<JoinHandle<()>>,
}

impl CountdownTimer {
    /// Build a stopped timer.
    ///
    /// `resumed_secs` overrides the starting point, e.g. the remaining time from a
    /// recovered snapshot.
    #[must_use]
    pub fn new(duration_minutes: Option<u32>, resumed_secs: Option<u32>) -> Self {
        let on_tick: TickFn = Box::new(|_| {});
        let on_expire: ExpireFn = Box::new(|| {});
        Self {
            cells: Cells {
                state: Arc::new(Mutex::new(Self::countdown(duration_minutes, resumed_secs))),
                on_tick: Arc::new(Mutex::new(on_tick)),
                on_expire: Arc::new(Mutex::new(on_expire)),
            },
            task: None,
        }
    }

    /// A timer that never ticks.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    fn countdown(duration_minutes: Option<u32>, resumed_secs: Option<u32>) -> Countdown {
        match duration_minutes.filter(|m| *m > 0) {
            Some(minutes) => Countdown {
                enabled: true,
                remaining: resumed_secs.unwrap_or_else(|| minutes.saturating_mul(60)),
                expired: false,
            },
            None => Countdown {
                enabled: false,
                remaining: 0,
                expired: false,
            },
        }
    }

    /// Replace the per-tick callback. Receives the seconds left after the tick.
    pub fn set_on_tick(&self, f: impl FnMut(u32) + Send + 'static) {
        *lock(&self.cells.on_tick) = Box::new(f);
    }

    /// Replace the expiry callback. Runs at most once per duration.
    pub fn set_on_expire(&self, f: impl FnMut() + Send + 'static) {
        *lock(&self.cells.on_expire) = Box::new(f);
    }

    /// Start ticking. No-op when disabled, expired or already running.
    pub fn start(&mut self) {
        if self.is_running() || !self.is_enabled() || self.is_expired() {
            return;
        }
        if self.cells.expire_if_exhausted() {
            return;
        }

        let cells = self.cells.clone();
        self.task = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match cells.tick() {
                    TickOutcome::Ticked(_) => {}
                    TickOutcome::Expired | TickOutcome::Idle => break,
                }
            }
        }));
    }

    /// Stop ticking, keeping the counter.
    pub fn pause(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Continue from the paused counter.
    pub fn resume(&mut self) {
        self.start();
    }

    /// Reset to a new duration. A running timer restarts from the new value.
    pub fn set_duration(&mut self, duration_minutes: Option<u32>) {
        let was_running = self.is_running();
        self.pause();
        *lock(&self.cells.state) = Self::countdown(duration_minutes, None);
        if was_running {
            self.start();
        }
    }

    /// Advance the counter by one second, invoking the callbacks.
    pub fn tick(&self) -> TickOutcome {
        self.cells.tick()
    }

    #[must_use]
    pub fn remaining_secs(&self) -> Option<u32> {
        let state = lock(&self.cells.state);
        state.enabled.then_some(state.remaining)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        lock(&self.cells.state).enabled
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        lock(&self.cells.state).expired
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.pause();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::sleep;

    fn counters(timer: &CountdownTimer) -> (Arc<AtomicU32>, Arc<AtomicU32>) {
        let ticks = Arc::new(AtomicU32::new(0));
        let expiries = Arc::new(AtomicU32::new(0));
        let t = Arc::clone(&ticks);
        timer.set_on_tick(move |_| {
            t.fetch_add(1, Ordering::SeqCst);
        });
        let e = Arc::clone(&expiries);
        timer.set_on_expire(move || {
            e.fetch_add(1, Ordering::SeqCst);
        });
        (ticks, expiries)
    }

    #[tokio::test(start_paused = true)]
    async fn resumed_timer_expires_once_after_remaining_ticks() {
        let mut timer = CountdownTimer::new(Some(10), Some(5));
        let (ticks, expiries) = counters(&timer);
        timer.start();

        sleep(Duration::from_millis(30_500)).await;

        assert_eq!(ticks.load(Ordering::SeqCst), 5);
        assert_eq!(expiries.load(Ordering::SeqCst), 1);
        assert_eq!(timer.remaining_secs(), Some(0));
        assert!(timer.is_expired());
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_keeps_counter_and_resume_continues() {
        let mut timer = CountdownTimer::new(Some(1), None);
        timer.start();
        sleep(Duration::from_millis(3_500)).await;
        assert_eq!(timer.remaining_secs(), Some(57));

        timer.pause();
        sleep(Duration::from_secs(10)).await;
        assert_eq!(timer.remaining_secs(), Some(57));

        timer.resume();
        sleep(Duration::from_millis(2_500)).await;
        assert_eq!(timer.remaining_secs(), Some(55));
    }

    #[tokio::test(start_paused = true)]
    async fn swapping_callbacks_does_not_reset_the_count() {
        let mut timer = CountdownTimer::new(Some(1), None);
        let first = Arc::new(AtomicU32::new(0));
        let f = Arc::clone(&first);
        timer.set_on_tick(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        timer.start();
        sleep(Duration::from_millis(2_500)).await;

        let seen = Arc::new(AtomicU32::new(0));
        let s = Arc::clone(&seen);
        timer.set_on_tick(move |remaining| {
            s.store(remaining, Ordering::SeqCst);
        });
        sleep(Duration::from_secs(1)).await;

        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 57);
        assert!(timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_or_missing_duration_disables_the_timer() {
        for minutes in [None, Some(0)] {
            let mut timer = CountdownTimer::new(minutes, Some(5));
            let (ticks, expiries) = counters(&timer);
            timer.start();
            sleep(Duration::from_secs(10)).await;
            assert!(!timer.is_enabled());
            assert_eq!(timer.remaining_secs(), None);
            assert_eq!(ticks.load(Ordering::SeqCst), 0);
            assert_eq!(expiries.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_resume_point_expires_immediately() {
        let mut timer = CountdownTimer::new(Some(5), Some(0));
        let (ticks, expiries) = counters(&timer);
        timer.start();
        timer.start();
        sleep(Duration::from_secs(3)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        assert_eq!(expiries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn set_duration_restarts_a_running_timer() {
        let mut timer = CountdownTimer::new(Some(1), None);
        timer.start();
        sleep(Duration::from_millis(4_500)).await;
        timer.set_duration(Some(2));
        assert_eq!(timer.remaining_secs(), Some(120));
        sleep(Duration::from_millis(1_500)).await;
        assert_eq!(timer.remaining_secs(), Some(119));
    }

    #[test]
    fn manual_ticks_count_down_to_expiry() {
        let timer = CountdownTimer::new(Some(1), Some(2));
        assert_eq!(timer.tick(), TickOutcome::Ticked(1));
        assert_eq!(timer.tick(), TickOutcome::Expired);
        assert_eq!(timer.tick(), TickOutcome::Idle);
    }
}
