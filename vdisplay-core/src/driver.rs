//! Driver context
//!
//! Owns everything a display instance needs for its lifetime: the GPU
//! device, the presentation surface, the encoder adapter and its worker,
//! the vsync timer, timing state and the pose history. The host drives it
//! through `present`, `wait_for_present` and `pose`; `shutdown` (or drop)
//! tears it down in dependency order.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{DriverConfig, PipelineMode};
use crate::display::{
    DirectModeDisplay, DisplayProperties, DisplaySurface, FrameContext, VirtualDisplay,
};
use crate::encode::{EncodeParams, EncoderAdapter, EncoderBackend, default_backend};
use crate::error::{DisplayError, Result, ResultExt};
use crate::gpu::{GpuDevice, SharedHandle};
use crate::performance::{PipelineMetrics, PipelineStats};
use crate::pose::PoseCorrelator;
use crate::staging::StagingSlot;
use crate::timing::{TimingSnapshot, TransmitClock, VsyncReconciler};
use crate::transport::Transport;
use crate::types::{DriverPose, FrameIndexer};
use crate::vsync::PeriodicTimer;
use crate::worker::EncodeWorker;

/// How long shutdown waits for an in-flight encode
const SHUTDOWN_ENCODE_TIMEOUT: Duration = Duration::from_secs(1);

/// Callbacks into the host compositor runtime
pub trait HostRuntime: Send + Sync {
    /// A display vsync elapsed
    fn vsync_event(&self);

    /// A new head pose is available
    fn pose_updated(&self, pose: &DriverPose);
}

/// Driver lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Accepting frames
    Running,
    /// Shut down; presents are rejected
    Stopped,
}

/// One display instance and its encode pipeline
pub struct Driver {
    /// Runtime configuration
    config: DriverConfig,
    /// Remote display link
    transport: Arc<dyn Transport>,
    /// Host callbacks
    host: Arc<dyn HostRuntime>,
    /// Presentation path selected from the pipeline mode
    display: Box<dyn DisplaySurface>,
    /// Encoder adapter, shared with the worker
    encoder: Arc<Mutex<EncoderAdapter>>,
    /// Encode thread
    worker: EncodeWorker,
    /// Vsync pacing
    timing: VsyncReconciler,
    /// Recent tracking samples
    correlator: Arc<PoseCorrelator>,
    /// Frame index source for submissions
    indexer: FrameIndexer,
    /// Tracking sample last handed to the host
    last_referenced: Mutex<(u64, u64)>,
    /// Frame staged by a single-layer present, not yet handed to the worker
    awaiting_signal: bool,
    /// Host vsync notifications
    vsync: Option<PeriodicTimer>,
    /// Pipeline counters
    metrics: Arc<PipelineMetrics>,
    state: DriverState,
}

impl Driver {
    /// Build the driver with the encoder backend matching the configured codec
    pub fn new(
        config: DriverConfig,
        device: Arc<dyn GpuDevice>,
        transport: Arc<dyn Transport>,
        host: Arc<dyn HostRuntime>,
    ) -> Result<Self> {
        let backend = default_backend(config.encoder.codec);
        Self::with_backend(config, device, transport, host, backend)
    }

    /// Build the driver around an explicit encoder backend.
    ///
    /// Invalid dimensions or refresh rate and any GPU or encoder setup
    /// failure are returned as errors; nothing is left running.
    pub fn with_backend(
        config: DriverConfig,
        device: Arc<dyn GpuDevice>,
        transport: Arc<dyn Transport>,
        host: Arc<dyn HostRuntime>,
        backend: Box<dyn EncoderBackend>,
    ) -> Result<Self> {
        config.validate_strict().map_err(DisplayError::invalid)?;
        for warning in config.validate() {
            warn!("{}", warning);
        }

        let metrics = Arc::new(PipelineMetrics::new());
        let correlator = Arc::new(PoseCorrelator::new());
        let slot = Arc::new(StagingSlot::new());

        let display: Box<dyn DisplaySurface> = match config.mode {
            PipelineMode::Virtual => {
                Box::new(VirtualDisplay::new(device.clone(), &config, slot.clone()))
            }
            PipelineMode::Direct => Box::new(DirectModeDisplay::new(
                device.clone(),
                &config,
                slot.clone(),
                correlator.clone(),
            )),
        };
        let (width, height) = display.staging_size();

        let clock = Arc::new(TransmitClock::new());
        let mut encoder = EncoderAdapter::new(device.clone(), backend)
            .with_debug_timestamp(config.debug_timestamp)
            .with_transmit_clock(clock.clone())
            .with_metrics(metrics.clone());
        if let Some(path) = &config.output_file {
            encoder = encoder.with_dump(path);
        }
        encoder
            .initialize(&EncodeParams::from_config(&config, width, height))
            .context("Failed to initialize encoder")?;
        let encoder = Arc::new(Mutex::new(encoder));

        let worker = EncodeWorker::spawn(
            encoder.clone(),
            slot,
            transport.clone(),
            metrics.clone(),
        )?;

        let timing = VsyncReconciler::new(clock, config.frame_interval(), config.additional_latency);

        let tick_host = host.clone();
        let vsync = PeriodicTimer::start(
            Duration::from_secs_f64(config.frame_interval()),
            move || tick_host.vsync_event(),
        )?;

        info!(
            "Driver ready: {:?} mode, {}x{} stream @ {:.2} Hz via {}",
            config.mode,
            width,
            height,
            config.refresh.hz(),
            encoder.lock().backend_name()
        );

        Ok(Self {
            config,
            transport,
            host,
            display,
            encoder,
            worker,
            timing,
            correlator,
            indexer: FrameIndexer::new(),
            last_referenced: Mutex::new((0, 0)),
            awaiting_signal: false,
            vsync: Some(vsync),
            metrics,
            state: DriverState::Running,
        })
    }

    /// Present the frame behind `handle`.
    ///
    /// Returns whether the frame was staged. Per-frame failures (sync
    /// timeouts, encoder hiccups) are counted as drops and reported as
    /// `Ok(false)`; only fatal errors are returned.
    pub fn present(&mut self, handle: SharedHandle) -> Result<bool> {
        if self.state == DriverState::Stopped {
            return Err(DisplayError::Stopped);
        }

        let reference = *self.last_referenced.lock();
        let frame = FrameContext {
            worker: &self.worker,
            indexer: &mut self.indexer,
            metrics: &self.metrics,
            reference,
            target_vsync: self.timing.target_vsync(),
        };

        match self.display.present(handle, frame) {
            Ok(staged) => {
                if staged && self.display.mode() == PipelineMode::Virtual {
                    self.awaiting_signal = true;
                }
                Ok(staged)
            }
            Err(e) if e.is_recoverable() => {
                self.metrics.record_frame_dropped();
                warn!("Dropped frame on present: {}", e);
                Ok(false)
            }
            Err(e) => {
                error!("Present failed: {}", e);
                Err(e)
            }
        }
    }

    /// Wait for the GPU to finish the last present, hand a pending frame to
    /// the worker and advance vsync timing
    pub fn wait_for_present(&mut self) -> TimingSnapshot {
        self.display.wait_for_present();
        if std::mem::take(&mut self.awaiting_signal) {
            self.worker.signal_new_frame(self.timing.target_vsync());
        }
        self.timing.update()
    }

    /// Seconds since the last vsync and the vsync counter
    pub fn time_since_last_vsync(&self) -> (f64, u64) {
        self.timing.time_since_last_vsync()
    }

    /// Current head pose from the latest tracking sample, identity when no
    /// sample has arrived yet
    pub fn pose(&self) -> DriverPose {
        let Some(sample) = self.transport.latest_tracking_sample() else {
            return DriverPose::default();
        };
        if self.correlator.record(sample) {
            debug!("Tracking sample {} recorded", sample.frame_index);
        }
        *self.last_referenced.lock() = (sample.frame_index, sample.client_time);
        DriverPose::from_sample(&sample)
    }

    /// Publish the current pose to the host
    pub fn run_frame(&self) {
        let pose = self.pose();
        self.host.pose_updated(&pose);
    }

    pub fn properties(&self) -> &DisplayProperties {
        self.display.properties()
    }

    /// Per-eye render target size
    pub fn recommended_render_target_size(&self) -> (u32, u32) {
        self.display.recommended_size()
    }

    pub fn mode(&self) -> PipelineMode {
        self.display.mode()
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn stats(&self) -> PipelineStats {
        self.metrics.snapshot()
    }

    pub fn correlator(&self) -> &Arc<PoseCorrelator> {
        &self.correlator
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Layered presentation interface, in direct mode only
    pub fn direct_mode(&mut self) -> Option<&mut DirectModeDisplay> {
        self.display.as_direct_mut()
    }

    /// Stop the worker, flush the encoder to the transport and stop the
    /// vsync timer. Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.state == DriverState::Stopped {
            return Ok(());
        }
        self.state = DriverState::Stopped;

        // A staged frame still waiting on wait_for_present goes out first
        if std::mem::take(&mut self.awaiting_signal) {
            self.worker.signal_new_frame(self.timing.target_vsync());
        }
        // Let a signaled frame reach the encoder before it is flushed
        if !self.worker.wait_for_encode_timeout(SHUTDOWN_ENCODE_TIMEOUT) {
            warn!("Encode still running at shutdown");
        }
        self.worker.stop();
        let flushed = self.encoder.lock().shutdown();
        if let Some(mut vsync) = self.vsync.take() {
            vsync.stop();
        }

        let packets = flushed?;
        for packet in &packets {
            match self
                .transport
                .send(&packet.data, packet.presentation_time, packet.frame_index)
            {
                Ok(()) => self.metrics.record_packet(packet.data.len()),
                Err(e) => warn!("Send of flushed frame {} failed: {}", packet.frame_index, e),
            }
        }

        info!(
            "Driver stopped: {} flushed packets, {}",
            packets.len(),
            self.metrics.snapshot().format_line()
        );
        Ok(())
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Driver shutdown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::SoftwareDevice;
    use crate::types::TrackingSample;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Quiet {
        sample: Mutex<Option<TrackingSample>>,
    }

    impl Transport for Quiet {
        fn send(&self, _: &[u8], _: u64, _: u64) -> Result<()> {
            Ok(())
        }
        fn has_tracking_sample(&self) -> bool {
            self.sample.lock().is_some()
        }
        fn latest_tracking_sample(&self) -> Option<TrackingSample> {
            *self.sample.lock()
        }
        fn client_to_server_time(&self, client_time: u64) -> u64 {
            client_time
        }
    }

    #[derive(Default)]
    struct Host {
        poses: AtomicU32,
    }

    impl HostRuntime for Host {
        fn vsync_event(&self) {}
        fn pose_updated(&self, _: &DriverPose) {
            self.poses.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn driver(config: DriverConfig, transport: Arc<Quiet>, host: Arc<Host>) -> Result<Driver> {
        Driver::with_backend(
            config,
            Arc::new(SoftwareDevice::new()),
            transport,
            host,
            Box::new(crate::encode::RawBackend::new()),
        )
    }

    #[test]
    fn test_zero_render_size_rejected() {
        let config = DriverConfig::default().with_render_size(0, 0);
        let result = driver(config, Arc::default(), Arc::default());
        assert!(matches!(result, Err(DisplayError::InvalidParameters(_))));
    }

    #[test]
    fn test_pose_without_sample_is_identity() {
        let config = DriverConfig::default().with_render_size(4, 4);
        let host = Arc::new(Host::default());
        let mut driver = driver(config, Arc::default(), host.clone()).unwrap();

        assert_eq!(driver.pose(), DriverPose::default());
        driver.run_frame();
        assert_eq!(host.poses.load(Ordering::SeqCst), 1);
        assert!(driver.correlator().is_empty());
        driver.shutdown().unwrap();
    }

    #[test]
    fn test_pose_records_sample() {
        let config = DriverConfig::default().with_render_size(4, 4);
        let transport = Arc::new(Quiet::default());
        *transport.sample.lock() = Some(TrackingSample::new(7, 70));
        let driver = driver(config, transport, Arc::default()).unwrap();

        driver.pose();
        driver.pose();
        assert_eq!(driver.correlator().frame_indices(), vec![7]);
        assert_eq!(*driver.last_referenced.lock(), (7, 70));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let config = DriverConfig::default().with_render_size(4, 4);
        let mut driver = driver(config, Arc::default(), Arc::default()).unwrap();
        driver.shutdown().unwrap();
        driver.shutdown().unwrap();
        assert_eq!(driver.state(), DriverState::Stopped);
        assert!(matches!(driver.present(1), Err(DisplayError::Stopped)));
    }
}
