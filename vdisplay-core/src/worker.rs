//! Encode worker thread
//!
//! The render path stages a frame, signals the worker and returns. The
//! worker takes the staged frame, runs it through the encoder adapter and
//! hands the packets to the transport, then marks the cycle finished. The
//! render path waits for that mark before touching the staging surface
//! again, which keeps the two threads off the GPU context at the same time.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::encode::EncoderAdapter;
use crate::error::{DisplayError, Result};
use crate::performance::PipelineMetrics;
use crate::staging::{StagedFrame, StagingSlot};
use crate::transport::Transport;
use crate::types::{time_in_seconds, timestamp_us};

/// Binary event in the style of a Win32 event object
#[derive(Debug)]
pub struct ThreadEvent {
    signaled: Mutex<bool>,
    cond: Condvar,
    auto_reset: bool,
}

impl ThreadEvent {
    /// Event that stays set until [`reset`](Self::reset)
    pub fn manual(initially_set: bool) -> Self {
        Self::new(initially_set, false)
    }

    /// Event that clears itself when a waiter wakes
    pub fn auto() -> Self {
        Self::new(false, true)
    }

    fn new(initially_set: bool, auto_reset: bool) -> Self {
        Self {
            signaled: Mutex::new(initially_set),
            cond: Condvar::new(),
            auto_reset,
        }
    }

    pub fn set(&self) {
        *self.signaled.lock() = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }

    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cond.wait(&mut signaled);
        }
        if self.auto_reset {
            *signaled = false;
        }
    }

    /// Returns false on timeout
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        let was_set = *signaled;
        if was_set && self.auto_reset {
            *signaled = false;
        }
        was_set
    }
}

struct Shared {
    new_frame: ThreadEvent,
    finished: ThreadEvent,
    stopping: AtomicBool,
    target_vsync: Mutex<f64>,
}

/// Dedicated encode thread
pub struct EncodeWorker {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EncodeWorker {
    /// Start the worker thread
    pub fn spawn(
        encoder: Arc<Mutex<EncoderAdapter>>,
        slot: Arc<StagingSlot>,
        transport: Arc<dyn Transport>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            new_frame: ThreadEvent::auto(),
            finished: ThreadEvent::manual(true),
            stopping: AtomicBool::new(false),
            target_vsync: Mutex::new(0.0),
        });

        let thread_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("vdisplay-encode".to_string())
            .spawn(move || {
                raise_priority();
                run(&thread_shared, &encoder, &slot, transport.as_ref(), &metrics);
            })
            .map_err(|e| DisplayError::encoder(format!("Failed to spawn encode thread: {}", e)))?;

        info!("Encode worker started");
        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Hand the staged frame to the worker. Returns immediately.
    pub fn signal_new_frame(&self, target_vsync: f64) {
        self.shared.finished.reset();
        *self.shared.target_vsync.lock() = target_vsync;
        self.shared.new_frame.set();
    }

    /// Block until the last signaled frame has been encoded and sent
    pub fn wait_for_encode(&self) {
        self.shared.finished.wait();
    }

    /// [`wait_for_encode`](Self::wait_for_encode) bounded by `timeout`;
    /// returns false if the cycle is still running
    pub fn wait_for_encode_timeout(&self, timeout: Duration) -> bool {
        self.shared.finished.wait_timeout(timeout)
    }

    pub fn is_running(&self) -> bool {
        !self.shared.stopping.load(Ordering::SeqCst)
    }

    /// Stop and join the thread. Safe to call more than once.
    pub fn stop(&self) {
        if self.shared.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.new_frame.set();
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                error!("Encode worker panicked");
            }
        }
        // Nobody is left to finish a cycle
        self.shared.finished.set();
        info!("Encode worker stopped");
    }
}

impl Drop for EncodeWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    shared: &Shared,
    encoder: &Mutex<EncoderAdapter>,
    slot: &StagingSlot,
    transport: &dyn Transport,
    metrics: &PipelineMetrics,
) {
    loop {
        shared.new_frame.wait();
        if shared.stopping.load(Ordering::SeqCst) {
            break;
        }

        let target_vsync = *shared.target_vsync.lock();
        match slot.take() {
            Some(frame) => encode_frame(frame, target_vsync, encoder, transport, metrics),
            None => debug!("Woken without a staged frame"),
        }
        shared.finished.set();
    }
    shared.finished.set();
}

fn encode_frame(
    frame: StagedFrame,
    target_vsync: f64,
    encoder: &Mutex<EncoderAdapter>,
    transport: &dyn Transport,
    metrics: &PipelineMetrics,
) {
    let start = Instant::now();
    let submission = frame.submission;

    if submission.client_time != 0 {
        let server_time = transport.client_to_server_time(submission.client_time);
        metrics.record_tracking_delay_us(timestamp_us().saturating_sub(server_time));
    }

    let packets = match encoder.lock().transmit(&frame.surface, submission) {
        Ok(packets) => packets,
        Err(e) => {
            metrics.record_frame_dropped();
            if e.is_recoverable() {
                warn!("Dropped frame {}: {}", submission.frame_index, e);
            } else {
                error!("Encode of frame {} failed: {}", submission.frame_index, e);
            }
            return;
        }
    };

    for packet in &packets {
        match transport.send(&packet.data, packet.presentation_time, packet.frame_index) {
            Ok(()) => metrics.record_packet(packet.data.len()),
            Err(e) => warn!("Send of frame {} packet failed: {}", packet.frame_index, e),
        }
    }

    metrics.record_encode(start.elapsed());

    // Zero means the caller did not aim the frame at a vsync
    let sent_at = time_in_seconds();
    if target_vsync > 0.0 && sent_at > target_vsync {
        metrics.record_vsync_miss();
        debug!(
            "Frame {} went out {:.2}ms after its target vsync",
            submission.frame_index,
            (sent_at - target_vsync) * 1000.0
        );
    }

    trace!(
        "Frame {} encoded: {} packets in {:?}",
        submission.frame_index,
        packets.len(),
        start.elapsed()
    );
}

/// Best-effort bump of the calling thread's scheduling priority
fn raise_priority() {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: setpriority with who = 0 only affects the calling thread.
        let result = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, -10) };
        if result != 0 {
            debug!(
                "Could not raise encode thread priority: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}
