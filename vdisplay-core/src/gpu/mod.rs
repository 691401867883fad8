//! GPU resource adapter
//!
//! The pipeline talks to the graphics device only through [`GpuDevice`]:
//! texture creation and copies, the handful of raster objects the stereo
//! compositor needs, and the video processor used for NV12 conversion.
//! [`SoftwareDevice`] implements it over CPU memory.
//!
//! The device context is not thread-safe in the driver's model. Callers
//! serialize access (the render thread and the encode worker never touch it
//! concurrently); the software device tolerates concurrent use regardless.

mod convert;
mod registry;
mod software;
mod sync;

pub use convert::Nv12Converter;
pub use registry::{SWAP_SET_SIZE, SwapTextureRegistry};
pub use software::SoftwareDevice;
pub use sync::{KeyedMutex, KeyedMutexGuard};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;

/// Device-local texture identifier
pub type TextureId = u64;

/// Opaque cross-process handle for a shared texture
pub type SharedHandle = u64;

/// Surface pixel formats understood by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit B, G, R, A
    #[default]
    Bgra8,
    /// 8-bit R, G, B, A
    Rgba8,
    /// Planar 4:2:0: full-resolution Y plane followed by interleaved UV
    Nv12,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            Self::Bgra8 | Self::Rgba8 => Some(4),
            Self::Nv12 => None,
        }
    }

    /// Whether this is a planar YUV format
    pub fn is_planar(&self) -> bool {
        matches!(self, Self::Nv12)
    }

    /// Total byte size of one surface
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            Self::Bgra8 | Self::Rgba8 => w * h * 4,
            Self::Nv12 => w * h + 2 * w.div_ceil(2) * h.div_ceil(2),
        }
    }

    /// Row pitch of the first plane
    pub fn row_pitch(&self, width: u32) -> usize {
        match self {
            Self::Bgra8 | Self::Rgba8 => width as usize * 4,
            Self::Nv12 => width as usize,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bgra8 => write!(f, "BGRA8"),
            Self::Rgba8 => write!(f, "RGBA8"),
            Self::Nv12 => write!(f, "NV12"),
        }
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bgra" | "bgra8" | "argb" => Ok(Self::Bgra8),
            "rgba" | "rgba8" | "abgr" => Ok(Self::Rgba8),
            "nv12" => Ok(Self::Nv12),
            _ => Err(format!("Unknown pixel format: {}", s)),
        }
    }
}

/// How the CPU may access a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureUsage {
    /// GPU-only
    #[default]
    Default,
    /// CPU-readable copy target
    Staging,
}

/// Cross-process sharing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShareMode {
    #[default]
    None,
    /// Shared by handle, no synchronization object
    Shared,
    /// Shared by handle and guarded by a keyed mutex
    KeyedMutex,
}

/// Texture creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub usage: TextureUsage,
    pub render_target: bool,
    pub shader_resource: bool,
    pub share: ShareMode,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            usage: TextureUsage::Default,
            render_target: false,
            shader_resource: false,
            share: ShareMode::None,
        }
    }

    /// Bindable as a render target
    pub fn render_target(mut self) -> Self {
        self.render_target = true;
        self
    }

    /// Bindable as a shader resource
    pub fn shader_resource(mut self) -> Self {
        self.shader_resource = true;
        self
    }

    /// CPU-readable staging texture
    pub fn staging(mut self) -> Self {
        self.usage = TextureUsage::Staging;
        self
    }

    /// Shareable across processes by handle
    pub fn shared(mut self, share: ShareMode) -> Self {
        self.share = share;
        self
    }
}

/// A 2D surface owned by a device
#[derive(Debug)]
pub struct Texture {
    id: TextureId,
    desc: TextureDesc,
    shared_handle: Option<SharedHandle>,
    keyed_mutex: Option<KeyedMutex>,
    data: Mutex<Vec<u8>>,
}

impl Texture {
    pub(crate) fn new(id: TextureId, desc: TextureDesc, shared_handle: Option<SharedHandle>) -> Self {
        let keyed_mutex = (desc.share == ShareMode::KeyedMutex).then(KeyedMutex::new);
        Self {
            id,
            desc,
            shared_handle,
            keyed_mutex,
            data: Mutex::new(vec![0; desc.format.frame_size(desc.width, desc.height)]),
        }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn format(&self) -> PixelFormat {
        self.desc.format
    }

    /// Cross-process handle, if the texture was created shared
    pub fn shared_handle(&self) -> Option<SharedHandle> {
        self.shared_handle
    }

    /// Synchronization object guarding a shared texture
    pub fn keyed_mutex(&self) -> Option<&KeyedMutex> {
        self.keyed_mutex.as_ref()
    }

    pub(crate) fn data(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock()
    }
}

/// Rectangle in texel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Shader pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

/// Program a compiled shader runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderProgram {
    /// Forward position and texture coordinate
    Passthrough,
    /// Sample t0 across the whole target
    Sample,
    /// Left half samples t0, right half samples t1
    SideBySide,
}

/// A compiled shader
#[derive(Debug, Clone)]
pub struct Shader {
    pub stage: ShaderStage,
    pub entry: String,
    pub program: ShaderProgram,
}

/// Vertex layout used by the compositor quad
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub tex_coord: [f32; 2],
}

/// What a buffer is bound as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Vertex buffer with the given stride in bytes
    Vertex { stride: u32 },
    /// 16-bit index buffer
    Index16,
}

/// Immutable GPU buffer
#[derive(Debug, Clone)]
pub struct Buffer {
    pub kind: BufferKind,
    pub(crate) contents: Vec<u8>,
}

impl Buffer {
    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

/// Texture filtering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Point,
    Linear,
}

/// Sampler state (clamp addressing)
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    pub filter: Filter,
}

/// Render target view over a texture
#[derive(Debug, Clone)]
pub struct RenderTargetView {
    texture: Arc<Texture>,
}

impl RenderTargetView {
    pub(crate) fn new(texture: Arc<Texture>) -> Self {
        Self { texture }
    }

    pub fn texture(&self) -> &Arc<Texture> {
        &self.texture
    }
}

/// Shader resource view over a texture
#[derive(Debug, Clone)]
pub struct ShaderResourceView {
    texture: Arc<Texture>,
}

impl ShaderResourceView {
    pub(crate) fn new(texture: Arc<Texture>) -> Self {
        Self { texture }
    }

    pub fn texture(&self) -> &Arc<Texture> {
        &self.texture
    }
}

/// Video processor output view over a planar texture
#[derive(Debug, Clone)]
pub struct VideoOutputView {
    texture: Arc<Texture>,
}

impl VideoOutputView {
    pub(crate) fn new(texture: Arc<Texture>) -> Self {
        Self { texture }
    }

    pub fn texture(&self) -> &Arc<Texture> {
        &self.texture
    }
}

/// Everything bound for one indexed draw
#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    pub vertex_shader: &'a Shader,
    pub pixel_shader: &'a Shader,
    pub vertex_buffer: &'a Buffer,
    pub index_buffer: &'a Buffer,
    pub index_count: u32,
    pub sampler: &'a Sampler,
    pub resources: &'a [&'a ShaderResourceView],
    pub target: &'a RenderTargetView,
}

/// Graphics device and its immediate context
pub trait GpuDevice: Send + Sync {
    /// Adapter description
    fn name(&self) -> &str;

    /// Create a texture
    fn create_texture(&self, desc: &TextureDesc) -> Result<Arc<Texture>>;

    /// Open a texture shared by another process
    fn open_shared_texture(&self, handle: SharedHandle) -> Result<Arc<Texture>>;

    /// Drop the device's reference to a shared texture
    fn release_shared_texture(&self, handle: SharedHandle);

    /// Copy the overlapping extent of `src` into `dst`
    fn copy_resource(&self, dst: &Texture, src: &Texture) -> Result<()>;

    /// Copy `region` of `src` to (`dst_x`, `dst_y`) in `dst`
    fn copy_region(&self, dst: &Texture, dst_x: u32, dst_y: u32, src: &Texture, region: Region)
    -> Result<()>;

    /// Upload packed pixels into `region` of a texture
    fn update_region(&self, texture: &Texture, region: Region, pixels: &[u8]) -> Result<()>;

    /// Map a staging texture for reading; blocks until prior GPU work finished
    fn map_read(&self, texture: &Texture) -> Result<Vec<u8>>;

    /// Compile a shader entry point
    fn compile_shader(&self, source: &str, entry: &str, stage: ShaderStage) -> Result<Shader>;

    /// Create an immutable buffer
    fn create_buffer(&self, kind: BufferKind, contents: &[u8]) -> Result<Buffer>;

    /// Create a sampler
    fn create_sampler(&self, filter: Filter) -> Result<Sampler>;

    /// Create a render target view
    fn create_render_target_view(&self, texture: &Arc<Texture>) -> Result<RenderTargetView>;

    /// Create a shader resource view
    fn create_shader_resource_view(&self, texture: &Arc<Texture>) -> Result<ShaderResourceView>;

    /// Issue an indexed draw
    fn draw_indexed(&self, draw: &DrawCall<'_>) -> Result<()>;

    /// Create a video processor output view over an NV12 texture
    fn create_video_output_view(&self, texture: &Arc<Texture>) -> Result<VideoOutputView>;

    /// Colour-convert a packed RGB texture into a video output view
    fn video_blt(&self, input: &Texture, output: &VideoOutputView) -> Result<()>;

    /// Submit queued commands
    fn flush(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        assert_eq!(PixelFormat::Bgra8.frame_size(4, 2), 32);
        assert_eq!(PixelFormat::Nv12.frame_size(4, 2), 8 + 4);
        assert_eq!(PixelFormat::Nv12.frame_size(3, 3), 9 + 8);
    }

    #[test]
    fn test_pixel_format_parse() {
        assert_eq!("nv12".parse::<PixelFormat>(), Ok(PixelFormat::Nv12));
        assert_eq!("BGRA".parse::<PixelFormat>(), Ok(PixelFormat::Bgra8));
        assert!("yuy2".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn test_vertex_layout() {
        assert_eq!(std::mem::size_of::<Vertex>(), 20);
    }
}
