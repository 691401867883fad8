//! Layered presentation
//!
//! The compositor allocates swap texture sets through us, renders each eye
//! into one of them, submits the pair with the pose it rendered, then
//! presents with a sync texture. Both eyes are composited side by side into
//! the staging surface and the worker is signaled straight away.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use super::{DisplayProperties, DisplaySurface, FrameContext, SYNC_TIMEOUT};
use crate::config::{DriverConfig, PipelineMode};
use crate::error::{DisplayError, Result, ResultExt};
use crate::gpu::{GpuDevice, PixelFormat, SWAP_SET_SIZE, SharedHandle, SwapTextureRegistry, Texture};
use crate::pose::PoseCorrelator;
use crate::staging::{StagingCompositor, StagingSlot};
use crate::types::{FrameSubmission, Matrix34, timestamp_us};

/// Eye textures and tracking reference of the last submitted layer
#[derive(Debug, Clone, Copy)]
struct SubmittedLayer {
    textures: [SharedHandle; 2],
    frame_index: u64,
    client_time: u64,
}

/// Display that composites two submitted eye textures per frame
pub struct DirectModeDisplay {
    device: Arc<dyn GpuDevice>,
    properties: DisplayProperties,
    compositor: StagingCompositor,
    registry: SwapTextureRegistry,
    sync_textures: HashMap<SharedHandle, Arc<Texture>>,
    submitted: Option<SubmittedLayer>,
    correlator: Arc<PoseCorrelator>,
}

impl DirectModeDisplay {
    pub fn new(
        device: Arc<dyn GpuDevice>,
        config: &DriverConfig,
        slot: Arc<StagingSlot>,
        correlator: Arc<PoseCorrelator>,
    ) -> Self {
        let width = config.render_width * 2;
        let height = config.render_height;
        info!(
            "Direct mode display: {}x{} per eye, staging {}x{}",
            config.render_width, config.render_height, width, height
        );
        Self {
            compositor: StagingCompositor::new(device.clone(), width, height, slot),
            registry: SwapTextureRegistry::new(device.clone()),
            device,
            properties: DisplayProperties::from_config(config),
            sync_textures: HashMap::new(),
            submitted: None,
            correlator,
        }
    }

    /// Allocate a swap texture set for `owner_pid`; returns its handles in
    /// slot order
    pub fn create_swap_texture_set(
        &mut self,
        owner_pid: u32,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<[SharedHandle; SWAP_SET_SIZE]> {
        self.registry.create(owner_pid, width, height, format)
    }

    /// Release the set containing `handle`
    pub fn destroy_swap_texture_set(&mut self, handle: SharedHandle) {
        if !self.registry.destroy(handle) {
            debug!("Destroy of unknown swap texture {:#x}", handle);
        }
    }

    /// Release every set owned by `owner_pid`
    pub fn destroy_all_swap_texture_sets(&mut self, owner_pid: u32) -> usize {
        self.registry.destroy_all(owner_pid)
    }

    /// Advance both eyes to their next swap slot
    pub fn next_swap_texture_set_index(&self, indices: [usize; 2]) -> [usize; 2] {
        SwapTextureRegistry::next_index(indices)
    }

    /// Record the eye textures for the next present along with the
    /// tracking sample their pose was rendered from
    pub fn submit_layer(&mut self, textures: [SharedHandle; 2], pose: &Matrix34) {
        let (frame_index, client_time) = self.correlator.correlate(pose);
        trace!(
            "Layer submitted: {:#x}/{:#x} for tracking frame {}",
            textures[0], textures[1], frame_index
        );
        self.submitted = Some(SubmittedLayer {
            textures,
            frame_index,
            client_time,
        });
    }

    pub fn swap_set_count(&self) -> usize {
        self.registry.len()
    }

    fn open_sync(&mut self, handle: SharedHandle) -> Result<Arc<Texture>> {
        if let Some(texture) = self.sync_textures.get(&handle) {
            return Ok(texture.clone());
        }
        let texture = self
            .device
            .open_shared_texture(handle)
            .context(format!("Failed to open sync texture {:#x}", handle))?;
        self.sync_textures.insert(handle, texture.clone());
        Ok(texture)
    }

    fn eye_texture(&self, handle: SharedHandle) -> Result<Arc<Texture>> {
        self.registry
            .lookup(handle)
            .ok_or(DisplayError::UnknownHandle(handle))
    }
}

impl DisplaySurface for DirectModeDisplay {
    fn mode(&self) -> PipelineMode {
        PipelineMode::Direct
    }

    fn properties(&self) -> &DisplayProperties {
        &self.properties
    }

    fn staging_size(&self) -> (u32, u32) {
        self.compositor.size()
    }

    fn present(&mut self, sync_handle: SharedHandle, mut frame: FrameContext<'_>) -> Result<bool> {
        frame.worker.wait_for_encode();

        let sync = self.open_sync(sync_handle)?;
        let _guard = match sync.keyed_mutex() {
            Some(mutex) => match mutex.acquire(0, SYNC_TIMEOUT) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    frame.metrics.record_frame_dropped();
                    warn!("Dropping layered frame: {}", e);
                    return Ok(false);
                }
            },
            None => None,
        };

        let Some(layer) = self.submitted.take() else {
            debug!("Present without a submitted layer");
            return Ok(false);
        };
        let Some(frame_index) = frame.claim_index(layer.frame_index) else {
            return Ok(false);
        };
        let left = self.eye_texture(layer.textures[0])?;
        let right = self.eye_texture(layer.textures[1])?;

        let start = Instant::now();
        self.device.flush();
        let presentation_time = timestamp_us();
        let submission = FrameSubmission::stereo(presentation_time, frame_index, layer.client_time);

        let staged = self.compositor.stage(&[&left, &right], submission)?;
        if staged {
            frame.metrics.record_stage(start.elapsed());
            frame.worker.signal_new_frame(frame.target_vsync);
        }
        Ok(staged)
    }

    fn as_direct_mut(&mut self) -> Option<&mut DirectModeDisplay> {
        Some(self)
    }
}
