//! # Update Scheduler
//!
//! Coalesces bursts of "data changed" notifications into bounded-latency
//! flushes. Two timers are involved:
//!
//! - the **deadline** timer, armed by the first call of a burst, caps the
//!   latency of the whole burst at `max_delay`;
//! - the **quiescence** timer, restarted by every call, fires `burst_window`
//!   after calls stop arriving.
//!
//! Whichever fires first flushes; a flush cancels both timers, so one burst
//! yields one flush. A call that arrives after a quiet period either flushes
//! immediately (`flush_first_call`) or just arms the quiescence timer.
//!
//! The flush callback runs outside the scheduler lock. It must not call
//! `update()` synchronously.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::deferred::Deferred;

/// Callback invoked once per flush.
pub type FlushCallback = Arc<dyn Fn() + Send + Sync>;

/// Timing configuration for the `UpdateScheduler`.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Calls closer together than this belong to the same burst.
    pub burst_window: Duration,
    /// Upper bound on the latency of a burst, counted from its first burst call.
    pub max_delay: Duration,
    /// Flush immediately on the first call after a quiet period.
    pub flush_first_call: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            burst_window: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            flush_first_call: false,
        }
    }
}

#[derive(Default)]
struct SchedulerState {
    last_call: Option<Instant>,
    deadline: Option<Deferred>,
    quiescence: Option<Deferred>,
}

impl SchedulerState {
    fn cancel_timers(&mut self) {
        if let Some(timer) = self.deadline.take() {
            timer.cancel();
        }
        if let Some(timer) = self.quiescence.take() {
            timer.cancel();
        }
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    flush: FlushCallback,
    state: Mutex<SchedulerState>,
}

impl SchedulerInner {
    /// Timer entry point. A timer that lost the race against a cancel is a no-op.
    fn fire(&self, token: &CancellationToken) {
        {
            let mut state = self.state.lock().expect("Scheduler lock poisoned");
            if token.is_cancelled() {
                return;
            }
            state.cancel_timers();
        }
        (self.flush)();
    }
}

/// Burst-coalescing scheduler. Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct UpdateScheduler {
    inner: Arc<SchedulerInner>,
}

impl UpdateScheduler {
    /// Creates a scheduler that calls `flush` at most once per burst.
    pub fn new<F>(config: SchedulerConfig, flush: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                flush: Arc::new(flush),
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Records one change notification.
    ///
    /// Must be called from within a tokio runtime, since it may arm timers.
    pub fn update(&self) {
        let now = Instant::now();
        let config = &self.inner.config;

        let flush_now = {
            let mut state = self.inner.state.lock().expect("Scheduler lock poisoned");
            let in_burst = state
                .last_call
                .is_some_and(|last| now.duration_since(last) < config.burst_window);
            state.last_call = Some(now);

            if in_burst {
                if state.deadline.is_none() {
                    state.deadline = Some(self.arm(config.max_delay));
                }
                // Replacing the handle drops (and cancels) the previous timer.
                state.quiescence = Some(self.arm(config.burst_window));
                false
            } else if config.flush_first_call {
                state.cancel_timers();
                true
            } else {
                state.quiescence = Some(self.arm(config.burst_window));
                false
            }
        };

        if flush_now {
            (self.inner.flush)();
        }
    }

    /// Flushes immediately, whatever the timer state.
    pub fn force_update(&self) {
        self.inner
            .state
            .lock()
            .expect("Scheduler lock poisoned")
            .cancel_timers();
        (self.inner.flush)();
    }

    /// Drops the latency guarantee of the pending burst, keeping quiescence detection.
    pub fn pseudo_update(&self) {
        let mut state = self.inner.state.lock().expect("Scheduler lock poisoned");
        if let Some(timer) = state.deadline.take() {
            timer.cancel();
        }
    }

    /// True while either timer is armed.
    pub fn has_pending_flush(&self) -> bool {
        let state = self.inner.state.lock().expect("Scheduler lock poisoned");
        state.deadline.is_some() || state.quiescence.is_some()
    }

    fn arm(&self, delay: Duration) -> Deferred {
        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        Deferred::schedule(delay, move |token| {
            if let Some(inner) = weak.upgrade() {
                inner.fire(&token);
            }
        })
    }
}
