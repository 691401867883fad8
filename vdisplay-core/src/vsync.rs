//! Periodic vsync notifications
//!
//! A timer thread calls back into the host once per display interval. It is
//! independent of the encode path and only exists to keep the host's frame
//! loop ticking.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{DisplayError, Result};

/// Default tick, one 60 Hz frame
pub const DEFAULT_VSYNC_INTERVAL: Duration = Duration::from_micros(16_666);

struct TimerState {
    stopped: Mutex<bool>,
    cond: Condvar,
}

/// Fixed-rate callback thread
pub struct PeriodicTimer {
    state: Arc<TimerState>,
    thread: Option<JoinHandle<()>>,
    interval: Duration,
}

impl PeriodicTimer {
    /// Call `tick` every `interval` until stopped
    pub fn start<F>(interval: Duration, mut tick: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        if interval.is_zero() {
            return Err(DisplayError::invalid("Vsync interval must be non-zero"));
        }
        let state = Arc::new(TimerState {
            stopped: Mutex::new(false),
            cond: Condvar::new(),
        });

        let thread_state = state.clone();
        let thread = std::thread::Builder::new()
            .name("vdisplay-vsync".to_string())
            .spawn(move || {
                let mut next = Instant::now() + interval;
                let mut stopped = thread_state.stopped.lock();
                loop {
                    while !*stopped {
                        if thread_state.cond.wait_until(&mut stopped, next).timed_out() {
                            break;
                        }
                    }
                    if *stopped {
                        break;
                    }
                    drop(stopped);
                    tick();
                    next += interval;
                    // Skip ticks missed while the host was slow
                    let now = Instant::now();
                    if next < now {
                        next = now + interval;
                    }
                    stopped = thread_state.stopped.lock();
                }
            })
            .map_err(|e| DisplayError::config(format!("Failed to spawn vsync thread: {}", e)))?;

        info!("Vsync timer started ({:?})", interval);
        Ok(Self {
            state,
            thread: Some(thread),
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stop and join; returns without waiting out the current interval
    pub fn stop(&mut self) {
        *self.state.stopped.lock() = true;
        self.state.cond.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            debug!("Vsync timer stopped");
        }
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
