//! Keyed mutex for textures shared between processes
//!
//! Mirrors the acquire/release-by-key protocol: the owner releases the
//! resource with a key, and only an acquire with that same key succeeds.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{DisplayError, Result};

#[derive(Debug)]
struct KeyState {
    held: bool,
    key: u64,
}

/// Synchronization object guarding a shared texture
#[derive(Debug)]
pub struct KeyedMutex {
    state: Mutex<KeyState>,
    released: Condvar,
}

impl KeyedMutex {
    /// New mutex, released with key 0
    pub fn new() -> Self {
        Self {
            state: Mutex::new(KeyState {
                held: false,
                key: 0,
            }),
            released: Condvar::new(),
        }
    }

    /// Acquire with `key`, waiting at most `timeout`.
    ///
    /// A timeout is reported as [`DisplayError::SyncTimeout`], which callers
    /// treat as a dropped frame.
    pub fn acquire(&self, key: u64, timeout: Duration) -> Result<KeyedMutexGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.held || state.key != key {
            if self.released.wait_until(&mut state, deadline).timed_out() {
                if !state.held && state.key == key {
                    break;
                }
                return Err(DisplayError::SyncTimeout {
                    key,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }
        state.held = true;
        Ok(KeyedMutexGuard {
            mutex: self,
            release_key: key,
        })
    }

    /// Whether some party currently holds the mutex
    pub fn is_held(&self) -> bool {
        self.state.lock().held
    }

    fn release(&self, key: u64) {
        let mut state = self.state.lock();
        state.held = false;
        state.key = key;
        drop(state);
        self.released.notify_all();
    }
}

impl Default for KeyedMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Held acquisition; releases on drop
#[derive(Debug)]
pub struct KeyedMutexGuard<'a> {
    mutex: &'a KeyedMutex,
    release_key: u64,
}

impl KeyedMutexGuard<'_> {
    /// Release with a different key than the one acquired
    pub fn release_with(mut self, key: u64) {
        self.release_key = key;
    }
}

impl Drop for KeyedMutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.release(self.release_key);
    }
}
