//! Stop and pause signalling between the service and its worker thread

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Worker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Launching on every interval
    Running,
    /// Stop requested, the current cycle is finishing
    StopRequested,
    /// Loop exited; terminal
    Stopped,
}

struct Shared {
    state: WorkerState,
    paused: bool,
}

struct Inner {
    shared: Mutex<Shared>,
    changed: Condvar,
}

/// Cancellation context shared by the service control handler and the worker
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Clone)]
pub struct StopContext {
    inner: Arc<Inner>,
}

impl Default for StopContext {
    fn default() -> Self {
        Self::new()
    }
}

impl StopContext {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    state: WorkerState::Running,
                    paused: false,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.inner.shared.lock().state
    }

    /// Ask the worker to stop after its current cycle
    pub fn request_stop(&self) {
        let mut shared = self.inner.shared.lock();
        if shared.state == WorkerState::Running {
            shared.state = WorkerState::StopRequested;
            self.inner.changed.notify_all();
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.state() != WorkerState::Running
    }

    pub fn pause(&self) {
        self.inner.shared.lock().paused = true;
    }

    pub fn resume(&self) {
        self.inner.shared.lock().paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.inner.shared.lock().paused
    }

    /// Block until the worker has stopped
    pub fn wait_stopped(&self) {
        let mut shared = self.inner.shared.lock();
        while shared.state != WorkerState::Stopped {
            self.inner.changed.wait(&mut shared);
        }
    }

    /// Block until the worker has stopped or `timeout` elapses; true if stopped
    pub fn wait_stopped_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut shared = self.inner.shared.lock();
        while shared.state != WorkerState::Stopped {
            match deadline {
                Some(deadline) => {
                    if self
                        .inner
                        .changed
                        .wait_until(&mut shared, deadline)
                        .timed_out()
                    {
                        return shared.state == WorkerState::Stopped;
                    }
                }
                // Past the end of the clock, so wait without a deadline
                None => self.inner.changed.wait(&mut shared),
            }
        }
        true
    }

    /// Sleep for `interval` unless a stop is requested first; true if stopping
    pub(crate) fn sleep(&self, interval: Duration) -> bool {
        let deadline = Instant::now().checked_add(interval);
        let mut shared = self.inner.shared.lock();
        while shared.state == WorkerState::Running {
            match deadline {
                Some(deadline) => {
                    if self
                        .inner
                        .changed
                        .wait_until(&mut shared, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
                None => self.inner.changed.wait(&mut shared),
            }
        }
        shared.state != WorkerState::Running
    }

    /// Enter `Stopped` and wake waiters; false if already stopped
    pub(crate) fn mark_stopped(&self) -> bool {
        let mut shared = self.inner.shared.lock();
        if shared.state == WorkerState::Stopped {
            return false;
        }
        shared.state = WorkerState::Stopped;
        self.inner.changed.notify_all();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_state_transitions() {
        let ctx = StopContext::new();
        assert_eq!(ctx.state(), WorkerState::Running);
        assert!(!ctx.is_stop_requested());

        ctx.request_stop();
        assert_eq!(ctx.state(), WorkerState::StopRequested);
        assert!(ctx.is_stop_requested());

        assert!(ctx.mark_stopped());
        assert_eq!(ctx.state(), WorkerState::Stopped);

        // Stopped is terminal and signalled once
        assert!(!ctx.mark_stopped());
        ctx.request_stop();
        assert_eq!(ctx.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_sleep_runs_full_interval_without_stop() {
        let ctx = StopContext::new();
        let start = Instant::now();
        assert!(!ctx.sleep(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_sleep_is_interrupted_by_stop() {
        let ctx = StopContext::new();
        let stopper = ctx.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stopper.request_stop();
        });

        let start = Instant::now();
        assert!(ctx.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_stopped_wakes_on_mark() {
        let ctx = StopContext::new();
        assert!(!ctx.wait_stopped_timeout(Duration::from_millis(10)));

        let worker = ctx.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            worker.mark_stopped();
        });

        ctx.wait_stopped();
        assert_eq!(ctx.state(), WorkerState::Stopped);
        assert!(ctx.wait_stopped_timeout(Duration::from_millis(1)));
        handle.join().unwrap();
    }

    #[test]
    fn test_unrepresentable_deadlines_wait_without_panicking() {
        let ctx = StopContext::new();
        let stopper = ctx.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stopper.request_stop();
            thread::sleep(Duration::from_millis(20));
            stopper.mark_stopped();
        });

        assert!(ctx.sleep(Duration::MAX));
        assert!(ctx.wait_stopped_timeout(Duration::MAX));
        handle.join().unwrap();
    }

    #[test]
    fn test_pause_flag() {
        let ctx = StopContext::new();
        assert!(!ctx.is_paused());
        ctx.pause();
        assert!(ctx.is_paused());
        ctx.resume();
        assert!(!ctx.is_paused());
    }
}
