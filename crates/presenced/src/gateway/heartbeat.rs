//! Heartbeat timer.
//!
//! The timer only paces the keep-alive: every tick calls `on_tick`, and the
//! session decides what to send and whether the previous beat was
//! acknowledged.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Smallest interval the timer accepts.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Largest interval the timer accepts.
const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Repeating, cancellable heartbeat timer.
#[derive(Debug, Default)]
pub struct HeartbeatTimer {
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatTimer {
    /// Create a stopped timer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start firing `on_tick` every `interval`, first tick one interval
    /// from now. A running timer is restarted.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(&mut self, interval: Duration, on_tick: F)
    where
        F: Fn() + Send + 'static,
    {
        self.stop();

        let interval = interval.clamp(MIN_INTERVAL, MAX_INTERVAL);
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);

        self.task = Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval_at(Instant::now() + interval, interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                timer.tick().await;

                if !running.load(Ordering::SeqCst) {
                    break;
                }

                on_tick();
            }
        }));
    }

    /// Cancel the timer. Calling this on a stopped timer is a no-op.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Check if the timer is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for HeartbeatTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
