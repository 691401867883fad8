//! Stereo staging compositor
//!
//! Assembles the frame handed to the encoder. A single source is copied
//! straight into the staging surface; a stereo pair is drawn side by side
//! with a full-screen quad. All GPU objects are created on first use and
//! live as long as the compositor.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::{DisplayError, Result, ResultExt};
use crate::gpu::{
    Buffer, BufferKind, DrawCall, Filter, GpuDevice, RenderTargetView, Sampler, Shader,
    ShaderStage, Texture, TextureDesc, Vertex,
};
use crate::types::FrameSubmission;

/// Side-by-side composite shader
pub const COMPOSITE_SHADER: &str = r#"
Texture2D txLeft : register(t0);
Texture2D txRight : register(t1);
SamplerState samLinear : register(s0);

struct VS_INPUT
{
    float4 Pos : POSITION;
    float2 Tex : TEXCOORD0;
};

struct PS_INPUT
{
    float4 Pos : SV_POSITION;
    float2 Tex : TEXCOORD0;
};

PS_INPUT vs_main(VS_INPUT input)
{
    PS_INPUT output = (PS_INPUT)0;
    output.Pos = input.Pos;
    output.Tex = input.Tex;
    return output;
}

float4 ps_side_by_side(PS_INPUT input) : SV_Target
{
    if (input.Tex.x < 0.5)
        return txLeft.Sample(samLinear, float2(input.Tex.x * 2.0, input.Tex.y));
    return txRight.Sample(samLinear, float2(input.Tex.x * 2.0 - 1.0, input.Tex.y));
}
"#;

/// Full-target quad; texture v runs top to bottom
const QUAD_VERTICES: [Vertex; 4] = [
    Vertex {
        position: [-1.0, -1.0, 0.5],
        tex_coord: [0.0, 1.0],
    },
    Vertex {
        position: [1.0, 1.0, 0.5],
        tex_coord: [1.0, 0.0],
    },
    Vertex {
        position: [1.0, -1.0, 0.5],
        tex_coord: [1.0, 1.0],
    },
    Vertex {
        position: [-1.0, 1.0, 0.5],
        tex_coord: [0.0, 0.0],
    },
];

const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 3, 1];

/// A staged surface together with the submission it was staged for
#[derive(Debug, Clone)]
pub struct StagedFrame {
    pub surface: Arc<Texture>,
    pub submission: FrameSubmission,
}

/// Hand-off point between the render path and the encode worker.
///
/// Holds at most one staged frame; the worker takes it exactly once.
#[derive(Debug, Default)]
pub struct StagingSlot {
    frame: Mutex<Option<StagedFrame>>,
}

impl StagingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a staged frame, replacing one the worker never picked up
    pub fn put(&self, frame: StagedFrame) -> Option<StagedFrame> {
        self.frame.lock().replace(frame)
    }

    /// Take the staged frame, leaving the slot empty
    pub fn take(&self) -> Option<StagedFrame> {
        self.frame.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.lock().is_none()
    }
}

/// GPU objects for the stereo composite
struct CompositeResources {
    vertex_shader: Shader,
    pixel_shader: Shader,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    sampler: Sampler,
    target: RenderTargetView,
}

/// Builds the staging surface from one or two source textures
pub struct StagingCompositor {
    device: Arc<dyn GpuDevice>,
    width: u32,
    height: u32,
    surface: Option<Arc<Texture>>,
    composite: Option<CompositeResources>,
    slot: Arc<StagingSlot>,
}

impl StagingCompositor {
    /// Compositor producing a `width`x`height` staging surface
    pub fn new(device: Arc<dyn GpuDevice>, width: u32, height: u32, slot: Arc<StagingSlot>) -> Self {
        Self {
            device,
            width,
            height,
            surface: None,
            composite: None,
            slot,
        }
    }

    /// Staging surface, once created
    pub fn surface(&self) -> Option<&Arc<Texture>> {
        self.surface.as_ref()
    }

    /// Staging surface size
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Copy or composite `sources` into the staging surface and publish it
    /// with `submission` for the encode worker.
    ///
    /// Returns `Ok(false)` when the frame was skipped because a source does
    /// not match the staging surface format. GPU object creation failures
    /// are returned as errors and are not retried.
    pub fn stage(&mut self, sources: &[&Arc<Texture>], submission: FrameSubmission) -> Result<bool> {
        let first = match sources {
            [first] | [first, _] => *first,
            _ => {
                return Err(DisplayError::invalid(format!(
                    "Staging takes 1 or 2 textures, got {}",
                    sources.len()
                )));
            }
        };
        let start = Instant::now();

        let surface = match &self.surface {
            Some(surface) => surface.clone(),
            None => self.create_surface(first)?,
        };
        if let Some(src) = sources.iter().find(|s| s.format() != surface.format()) {
            warn!(
                "Skipping frame {}: source format {} does not match staging {}",
                submission.frame_index,
                src.format(),
                surface.format()
            );
            return Ok(false);
        }

        if let [left, right] = sources {
            if self.composite.is_none() {
                self.composite = Some(self.create_composite(&surface)?);
            }
            self.draw_side_by_side(left, right)?;
        } else {
            self.device.copy_resource(&surface, first)?;
        }
        self.device.flush();

        if let Some(stale) = self.slot.put(StagedFrame {
            surface,
            submission,
        }) {
            debug!(
                "Frame {} replaced unencoded frame {}",
                submission.frame_index, stale.submission.frame_index
            );
        }

        trace!(
            "Staged frame {} ({} textures) in {:?}",
            submission.frame_index,
            sources.len(),
            start.elapsed()
        );
        Ok(true)
    }

    fn create_surface(&mut self, first: &Texture) -> Result<Arc<Texture>> {
        if self.surface.is_some() {
            return Err(DisplayError::AlreadyCreated("staging surface"));
        }
        let desc = TextureDesc::new(self.width, self.height, first.format())
            .render_target()
            .shader_resource();
        let surface = self
            .device
            .create_texture(&desc)
            .context("Failed to create staging texture")?;
        info!(
            "Staging texture created: {}x{} {}",
            self.width,
            self.height,
            first.format()
        );
        self.surface = Some(surface.clone());
        Ok(surface)
    }

    fn create_composite(&self, surface: &Arc<Texture>) -> Result<CompositeResources> {
        let device = &self.device;
        let vertex_shader = device
            .compile_shader(COMPOSITE_SHADER, "vs_main", ShaderStage::Vertex)
            .context("Failed to compile vertex shader")?;
        let pixel_shader = device
            .compile_shader(COMPOSITE_SHADER, "ps_side_by_side", ShaderStage::Pixel)
            .context("Failed to compile pixel shader")?;
        let vertex_buffer = device
            .create_buffer(
                BufferKind::Vertex {
                    stride: std::mem::size_of::<Vertex>() as u32,
                },
                bytemuck::cast_slice(&QUAD_VERTICES),
            )
            .context("Failed to create vertex buffer")?;
        let index_buffer = device
            .create_buffer(BufferKind::Index16, bytemuck::cast_slice(&QUAD_INDICES))
            .context("Failed to create index buffer")?;
        let sampler = device
            .create_sampler(Filter::Linear)
            .context("Failed to create sampler")?;
        let target = device
            .create_render_target_view(surface)
            .context("Failed to create render target view")?;

        debug!("Composite pipeline created");
        Ok(CompositeResources {
            vertex_shader,
            pixel_shader,
            vertex_buffer,
            index_buffer,
            sampler,
            target,
        })
    }

    fn draw_side_by_side(&self, left: &Arc<Texture>, right: &Arc<Texture>) -> Result<()> {
        let Some(composite) = &self.composite else {
            return Err(DisplayError::gpu("Composite pipeline not created"));
        };
        let left_view = self.device.create_shader_resource_view(left)?;
        let right_view = self.device.create_shader_resource_view(right)?;

        self.device.draw_indexed(&DrawCall {
            vertex_shader: &composite.vertex_shader,
            pixel_shader: &composite.pixel_shader,
            vertex_buffer: &composite.vertex_buffer,
            index_buffer: &composite.index_buffer,
            index_count: QUAD_INDICES.len() as u32,
            sampler: &composite.sampler,
            resources: &[&left_view, &right_view],
            target: &composite.target,
        })
    }
}
