//! Single-layer presentation
//!
//! The compositor renders the whole frame into a shared backbuffer and
//! presents it by handle. The frame is copied to staging as is; the worker
//! is signaled later from `wait_for_present`, once the GPU has finished.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{DisplayProperties, DisplaySurface, FLUSH_PROBE_SIZE, FrameContext, SYNC_TIMEOUT};
use crate::config::{DriverConfig, PipelineMode};
use crate::error::{Result, ResultExt};
use crate::gpu::{GpuDevice, Region, SharedHandle, Texture, TextureDesc};
use crate::staging::{StagingCompositor, StagingSlot};
use crate::types::{FrameSubmission, timestamp_us};

/// Display that takes one finished backbuffer per frame
pub struct VirtualDisplay {
    device: Arc<dyn GpuDevice>,
    properties: DisplayProperties,
    compositor: StagingCompositor,
    textures: HashMap<SharedHandle, Arc<Texture>>,
    flush_probe: Option<Arc<Texture>>,
}

impl VirtualDisplay {
    pub fn new(device: Arc<dyn GpuDevice>, config: &DriverConfig, slot: Arc<StagingSlot>) -> Self {
        let compositor = StagingCompositor::new(
            device.clone(),
            config.display_width,
            config.display_height,
            slot,
        );
        info!(
            "Virtual display {}x{} @ {:.2} Hz",
            config.display_width,
            config.display_height,
            config.refresh.hz()
        );
        Self {
            device,
            properties: DisplayProperties::from_config(config),
            compositor,
            textures: HashMap::new(),
            flush_probe: None,
        }
    }

    fn open(&mut self, handle: SharedHandle) -> Result<Arc<Texture>> {
        if let Some(texture) = self.textures.get(&handle) {
            return Ok(texture.clone());
        }
        let texture = self
            .device
            .open_shared_texture(handle)
            .context(format!("Failed to open presented texture {:#x}", handle))?;
        debug!(
            "Opened presented texture {:#x}: {}x{} {}",
            handle,
            texture.width(),
            texture.height(),
            texture.format()
        );
        self.textures.insert(handle, texture.clone());
        Ok(texture)
    }

    fn probe_for(&mut self, source: &Texture) -> Result<Arc<Texture>> {
        if let Some(probe) = &self.flush_probe {
            return Ok(probe.clone());
        }
        let desc = TextureDesc::new(FLUSH_PROBE_SIZE, FLUSH_PROBE_SIZE, source.format()).staging();
        let probe = self
            .device
            .create_texture(&desc)
            .context("Failed to create flush probe texture")?;
        self.flush_probe = Some(probe.clone());
        Ok(probe)
    }
}

impl DisplaySurface for VirtualDisplay {
    fn mode(&self) -> PipelineMode {
        PipelineMode::Virtual
    }

    fn properties(&self) -> &DisplayProperties {
        &self.properties
    }

    fn staging_size(&self) -> (u32, u32) {
        self.compositor.size()
    }

    fn present(&mut self, handle: SharedHandle, mut frame: FrameContext<'_>) -> Result<bool> {
        let texture = self.open(handle)?;

        // The staging surface still belongs to the worker until it finishes
        frame.worker.wait_for_encode();

        let _guard = match texture.keyed_mutex() {
            Some(mutex) => match mutex.acquire(0, SYNC_TIMEOUT) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    frame.metrics.record_frame_dropped();
                    warn!("Dropping presented frame {:#x}: {}", handle, e);
                    return Ok(false);
                }
            },
            None => None,
        };

        let (reference_index, client_time) = frame.reference;
        let Some(frame_index) = frame.claim_index(reference_index) else {
            return Ok(false);
        };

        let start = Instant::now();
        let probe = self.probe_for(&texture)?;
        let presentation_time = timestamp_us();

        self.device
            .copy_region(&probe, 0, 0, &texture, Region::new(0, 0, 1, 1))?;
        self.device.flush();

        let submission = FrameSubmission::single(presentation_time, frame_index, client_time);
        let staged = self.compositor.stage(&[&texture], submission)?;
        if staged {
            frame.metrics.record_stage(start.elapsed());
        }
        Ok(staged)
    }

    fn wait_for_present(&mut self) {
        if let Some(probe) = &self.flush_probe {
            if let Err(e) = self.device.map_read(probe) {
                debug!("Flush probe map failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{EncodeParams, EncoderAdapter, RawBackend};
    use crate::gpu::{PixelFormat, ShareMode, SoftwareDevice};
    use crate::performance::PipelineMetrics;
    use crate::transport::Transport;
    use crate::types::{FrameIndexer, TrackingSample};
    use crate::worker::EncodeWorker;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct NullTransport;

    impl Transport for NullTransport {
        fn send(&self, _: &[u8], _: u64, _: u64) -> Result<()> {
            Ok(())
        }
        fn has_tracking_sample(&self) -> bool {
            false
        }
        fn latest_tracking_sample(&self) -> Option<TrackingSample> {
            None
        }
        fn client_to_server_time(&self, client_time: u64) -> u64 {
            client_time
        }
    }

    fn setup() -> (Arc<SoftwareDevice>, VirtualDisplay, Arc<StagingSlot>, EncodeWorker) {
        let device = Arc::new(SoftwareDevice::new());
        let config = DriverConfig::default()
            .with_display_size(8, 4)
            .with_mode(PipelineMode::Virtual);
        let slot = Arc::new(StagingSlot::new());
        let display = VirtualDisplay::new(device.clone(), &config, slot.clone());

        let mut adapter = EncoderAdapter::new(device.clone(), Box::new(RawBackend::new()));
        adapter
            .initialize(&EncodeParams::from_config(&config, 8, 4))
            .unwrap();
        let worker = EncodeWorker::spawn(
            Arc::new(Mutex::new(adapter)),
            slot.clone(),
            Arc::new(NullTransport),
            Arc::new(PipelineMetrics::new()),
        )
        .unwrap();
        (device, display, slot, worker)
    }

    fn backbuffer(device: &SoftwareDevice) -> Arc<Texture> {
        device
            .create_texture(
                &TextureDesc::new(8, 4, PixelFormat::Bgra8)
                    .render_target()
                    .shader_resource()
                    .shared(ShareMode::KeyedMutex),
            )
            .unwrap()
    }

    #[test]
    fn test_present_stages_with_reference() {
        let (device, mut display, slot, worker) = setup();
        let texture = backbuffer(&device);
        let handle = texture.shared_handle().unwrap();
        let metrics = PipelineMetrics::new();
        let mut indexer = FrameIndexer::new();

        let staged = display
            .present(
                handle,
                FrameContext {
                    worker: &worker,
                    indexer: &mut indexer,
                    metrics: &metrics,
                    reference: (42, 777),
                    target_vsync: 0.0,
                },
            )
            .unwrap();
        assert!(staged);

        let frame = slot.take().unwrap();
        assert_eq!(frame.submission.frame_index, 42);
        assert_eq!(frame.submission.client_time, 777);
        assert_eq!(frame.submission.texture_count, 1);
        display.wait_for_present();
        worker.stop();
    }

    #[test]
    fn test_stale_reference_is_not_staged() {
        let (device, mut display, slot, worker) = setup();
        let texture = backbuffer(&device);
        let handle = texture.shared_handle().unwrap();
        let metrics = PipelineMetrics::new();
        let mut indexer = FrameIndexer::new();

        let mut present = |reference: u64| {
            display
                .present(
                    handle,
                    FrameContext {
                        worker: &worker,
                        indexer: &mut indexer,
                        metrics: &metrics,
                        reference: (reference, 0),
                        target_vsync: 0.0,
                    },
                )
                .unwrap()
        };

        assert!(present(42));
        assert_eq!(slot.take().unwrap().submission.frame_index, 42);

        // No new tracking sample since the last frame
        assert!(!present(42));
        assert!(!present(41));
        assert!(slot.is_empty());

        assert!(present(43));
        assert_eq!(slot.take().unwrap().submission.frame_index, 43);
        assert_eq!(metrics.frames_dropped(), 2);
        worker.stop();
    }

    #[test]
    fn test_held_mutex_drops_frame() {
        let (device, mut display, slot, worker) = setup();
        let texture = backbuffer(&device);
        let handle = texture.shared_handle().unwrap();
        let metrics = PipelineMetrics::new();
        let mut indexer = FrameIndexer::new();

        let held = texture
            .keyed_mutex()
            .unwrap()
            .acquire(0, Duration::from_millis(1))
            .unwrap();
        let staged = display
            .present(
                handle,
                FrameContext {
                    worker: &worker,
                    indexer: &mut indexer,
                    metrics: &metrics,
                    reference: (1, 0),
                    target_vsync: 0.0,
                },
            )
            .unwrap();
        drop(held);

        assert!(!staged);
        assert!(slot.is_empty());
        assert_eq!(metrics.frames_dropped(), 1);
        worker.stop();
    }
}
