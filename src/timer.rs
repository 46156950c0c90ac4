//! One-shot cancellable timer backing `terminate_after`

use crate::error::{ProcessError, Result};
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Default)]
struct TimerState {
    cancelled: Mutex<bool>,
    wake: Condvar,
    fired: AtomicBool,
}

/// Guard for a pending delayed termination.
///
/// Dropping the guard detaches the timer; it still fires once. Call
/// [`cancel`](Self::cancel) to stop it. The timer thread lives at most for the
/// delay plus the time the action takes, and does not keep the host process
/// alive when `main` returns. A delay too large for `Instant` only ends by
/// cancellation.
pub struct ScheduledTermination {
    pid: u32,
    due: Option<Instant>,
    state: Arc<TimerState>,
    thread: Option<JoinHandle<()>>,
}

impl ScheduledTermination {
    pub(crate) fn spawn<F>(pid: u32, delay: Duration, action: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let state = Arc::new(TimerState::default());
        // A delay past the end of `Instant` never fires on its own
        let due = Instant::now().checked_add(delay);

        let thread_state = Arc::clone(&state);
        let thread = thread::Builder::new()
            .name(format!("terminate-after-{}", pid))
            .spawn(move || {
                let guard = thread_state
                    .cancelled
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let guard = match due {
                    Some(due) => {
                        let remaining = due.saturating_duration_since(Instant::now());
                        thread_state
                            .wake
                            .wait_timeout_while(guard, remaining, |cancelled| !*cancelled)
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .0
                    }
                    None => thread_state
                        .wake
                        .wait_while(guard, |cancelled| !*cancelled)
                        .unwrap_or_else(|poisoned| poisoned.into_inner()),
                };

                if *guard {
                    debug!("Delayed termination of process {} cancelled", pid);
                    return;
                }
                thread_state.fired.store(true, Ordering::SeqCst);
                drop(guard);
                action();
            })
            .map_err(|e| ProcessError::Signal {
                pid,
                reason: format!("could not start timer thread: {}", e),
            })?;

        Ok(Self {
            pid,
            due,
            state,
            thread: Some(thread),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// When the termination request goes out; `None` if only `cancel` can end the wait
    pub fn due(&self) -> Option<Instant> {
        self.due
    }

    pub fn has_fired(&self) -> bool {
        self.state.fired.load(Ordering::SeqCst)
    }

    /// Returns true if the timer was stopped before firing
    pub fn cancel(&self) -> bool {
        let mut cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.state.fired.load(Ordering::SeqCst) {
            return false;
        }
        *cancelled = true;
        self.state.wake.notify_all();
        true
    }

    /// Block until the timer has fired (and its action finished) or been cancelled
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for ScheduledTermination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTermination")
            .field("pid", &self.pid)
            .field("due", &self.due)
            .field("fired", &self.has_fired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_fires_once_after_delay() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let started = Instant::now();

        let timer = ScheduledTermination::spawn(1, Duration::from_millis(50), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(!timer.has_fired());

        timer.join();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_before_firing() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        let timer = ScheduledTermination::spawn(1, Duration::from_secs(30), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        let started = Instant::now();
        assert!(timer.cancel());
        timer.join();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_after_firing_reports_false() {
        let timer = ScheduledTermination::spawn(1, Duration::ZERO, || {}).unwrap();
        while !timer.has_fired() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!timer.cancel());
    }

    #[test]
    fn test_unrepresentable_delay_waits_for_cancel() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        let timer = ScheduledTermination::spawn(1, Duration::MAX, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(timer.due().is_none());
        assert!(!timer.has_fired());

        assert!(timer.cancel());
        timer.join();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dropped_guard_still_fires() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        drop(
            ScheduledTermination::spawn(1, Duration::from_millis(10), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap(),
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while hits.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
