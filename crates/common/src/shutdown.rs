//! Cooperative shutdown signaling for background worker threads.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// Handle used to ask all associated workers to stop.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags all guards cloned from this signal.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Creates a guard for a worker to poll.
    pub fn guard(&self) -> ShutdownGuard {
        ShutdownGuard(Arc::clone(&self.0))
    }
}

/// Worker-side view of a [`ShutdownSignal`].
#[derive(Clone, Debug)]
pub struct ShutdownGuard(Arc<AtomicBool>);

impl ShutdownGuard {
    pub fn should_shutdown(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Sleeps up to `duration`, waking early when shutdown triggers.
    /// Returns false if shutdown interrupted the sleep.
    pub fn sleep_interruptible(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(25);
        let deadline = Instant::now() + duration;
        loop {
            if self.should_shutdown() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(remaining.min(SLICE));
        }
    }
}
