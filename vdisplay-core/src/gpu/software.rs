//! CPU-memory implementation of [`GpuDevice`]
//!
//! Textures live in host memory, draws go through a small triangle
//! rasterizer and the video processor converts with BT.601 coefficients.
//! It runs the same pipeline as a hardware device and lets every path be
//! exercised without a GPU.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use super::{
    Buffer, BufferKind, DrawCall, Filter, GpuDevice, PixelFormat, Region, RenderTargetView,
    Sampler, Shader, ShaderProgram, ShaderResourceView, ShaderStage, ShareMode, Texture,
    TextureDesc, TextureUsage, Vertex, VideoOutputView,
};
use crate::error::{DisplayError, Result};

/// Pixel programs the device can run, by entry point name
const PIXEL_PROGRAMS: &[(&str, ShaderProgram)] = &[
    ("ps_sample", ShaderProgram::Sample),
    ("ps_side_by_side", ShaderProgram::SideBySide),
];

/// First handle value handed out for shared textures
const SHARED_HANDLE_BASE: u64 = 0x4000_0000;

/// Software graphics device
pub struct SoftwareDevice {
    name: String,
    next_id: AtomicU64,
    next_handle: AtomicU64,
    shared: Mutex<HashMap<u64, Arc<Texture>>>,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::with_name("Software Rasterizer")
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_id: AtomicU64::new(1),
            next_handle: AtomicU64::new(SHARED_HANDLE_BASE),
            shared: Mutex::new(HashMap::new()),
        }
    }

    /// Number of shared textures currently open on this device
    pub fn shared_texture_count(&self) -> usize {
        self.shared.lock().len()
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDevice for SoftwareDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Arc<Texture>> {
        if desc.width == 0 || desc.height == 0 {
            return Err(DisplayError::gpu(format!(
                "Cannot create {}x{} texture",
                desc.width, desc.height
            )));
        }
        if desc.format.is_planar() && desc.render_target {
            return Err(DisplayError::gpu("Planar textures cannot be render targets"));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = match desc.share {
            ShareMode::None => None,
            ShareMode::Shared | ShareMode::KeyedMutex => {
                Some(self.next_handle.fetch_add(1, Ordering::Relaxed))
            }
        };

        let texture = Arc::new(Texture::new(id, *desc, handle));
        if let Some(handle) = handle {
            self.shared.lock().insert(handle, texture.clone());
        }

        trace!(
            "Created texture {} ({}x{} {}, handle {:?})",
            id, desc.width, desc.height, desc.format, handle
        );
        Ok(texture)
    }

    fn open_shared_texture(&self, handle: u64) -> Result<Arc<Texture>> {
        self.shared
            .lock()
            .get(&handle)
            .cloned()
            .ok_or(DisplayError::UnknownHandle(handle))
    }

    fn release_shared_texture(&self, handle: u64) {
        if self.shared.lock().remove(&handle).is_some() {
            trace!("Released shared texture {:#x}", handle);
        }
    }

    fn copy_resource(&self, dst: &Texture, src: &Texture) -> Result<()> {
        if dst.id() == src.id() {
            return Ok(());
        }
        if dst.format() != src.format() {
            return Err(DisplayError::gpu(format!(
                "Format mismatch in copy: {} -> {}",
                src.format(),
                dst.format()
            )));
        }

        let width = dst.width().min(src.width());
        let height = dst.height().min(src.height());
        let src_data = src.data();
        let mut dst_data = dst.data();

        match src.format() {
            PixelFormat::Nv12 => {
                copy_plane(
                    &src_data,
                    src.width() as usize,
                    &mut dst_data,
                    dst.width() as usize,
                    width as usize,
                    height as usize,
                );
                let src_luma = (src.width() * src.height()) as usize;
                let dst_luma = (dst.width() * dst.height()) as usize;
                let src_pitch = 2 * (src.width() as usize).div_ceil(2);
                let dst_pitch = 2 * (dst.width() as usize).div_ceil(2);
                let chroma_width = 2 * (width as usize).div_ceil(2);
                let chroma_height = (height as usize).div_ceil(2);
                copy_plane(
                    &src_data[src_luma..],
                    src_pitch,
                    &mut dst_data[dst_luma..],
                    dst_pitch,
                    chroma_width,
                    chroma_height,
                );
            }
            _ => {
                let bpp = 4;
                copy_plane(
                    &src_data,
                    src.width() as usize * bpp,
                    &mut dst_data,
                    dst.width() as usize * bpp,
                    width as usize * bpp,
                    height as usize,
                );
            }
        }
        Ok(())
    }

    fn copy_region(
        &self,
        dst: &Texture,
        dst_x: u32,
        dst_y: u32,
        src: &Texture,
        region: Region,
    ) -> Result<()> {
        let bpp = match (src.format().bytes_per_pixel(), dst.format().bytes_per_pixel()) {
            (Some(a), Some(b)) if src.format() == dst.format() && a == b => a,
            _ => {
                return Err(DisplayError::gpu(format!(
                    "Region copy needs matching packed formats ({} -> {})",
                    src.format(),
                    dst.format()
                )));
            }
        };
        if region.x + region.width > src.width()
            || region.y + region.height > src.height()
            || dst_x + region.width > dst.width()
            || dst_y + region.height > dst.height()
        {
            return Err(DisplayError::gpu("Copy region out of bounds"));
        }
        if dst.id() == src.id() {
            return Err(DisplayError::gpu("Region copy within one texture"));
        }

        let src_data = src.data();
        let mut dst_data = dst.data();
        let src_pitch = src.width() as usize * bpp;
        let dst_pitch = dst.width() as usize * bpp;
        let row_bytes = region.width as usize * bpp;
        for row in 0..region.height as usize {
            let s = (region.y as usize + row) * src_pitch + region.x as usize * bpp;
            let d = (dst_y as usize + row) * dst_pitch + dst_x as usize * bpp;
            dst_data[d..d + row_bytes].copy_from_slice(&src_data[s..s + row_bytes]);
        }
        Ok(())
    }

    fn update_region(&self, texture: &Texture, region: Region, pixels: &[u8]) -> Result<()> {
        let bpp = texture
            .format()
            .bytes_per_pixel()
            .ok_or_else(|| DisplayError::gpu("Region updates need a packed format"))?;
        if region.x + region.width > texture.width() || region.y + region.height > texture.height() {
            return Err(DisplayError::gpu("Update region out of bounds"));
        }
        let row_bytes = region.width as usize * bpp;
        if pixels.len() < row_bytes * region.height as usize {
            return Err(DisplayError::gpu("Update data shorter than region"));
        }

        let pitch = texture.width() as usize * bpp;
        let mut data = texture.data();
        for (row, src) in pixels.chunks_exact(row_bytes).take(region.height as usize).enumerate() {
            let offset = (region.y as usize + row) * pitch + region.x as usize * bpp;
            data[offset..offset + row_bytes].copy_from_slice(src);
        }
        Ok(())
    }

    fn map_read(&self, texture: &Texture) -> Result<Vec<u8>> {
        if texture.desc().usage != TextureUsage::Staging {
            return Err(DisplayError::gpu("Texture is not CPU readable"));
        }
        Ok(texture.data().clone())
    }

    fn compile_shader(&self, source: &str, entry: &str, stage: ShaderStage) -> Result<Shader> {
        if !source.contains(entry) {
            return Err(DisplayError::shader(format!(
                "Entry point '{}' not found in source",
                entry
            )));
        }

        let program = match stage {
            ShaderStage::Vertex => ShaderProgram::Passthrough,
            ShaderStage::Pixel => PIXEL_PROGRAMS
                .iter()
                .find(|(name, _)| *name == entry)
                .map(|(_, program)| *program)
                .ok_or_else(|| {
                    DisplayError::shader(format!("Unsupported pixel entry point '{}'", entry))
                })?,
        };

        debug!("Compiled {:?} shader '{}'", stage, entry);
        Ok(Shader {
            stage,
            entry: entry.to_string(),
            program,
        })
    }

    fn create_buffer(&self, kind: BufferKind, contents: &[u8]) -> Result<Buffer> {
        if contents.is_empty() {
            return Err(DisplayError::gpu("Cannot create an empty buffer"));
        }
        let unit = match kind {
            BufferKind::Vertex { stride } => stride as usize,
            BufferKind::Index16 => 2,
        };
        if unit == 0 || contents.len() % unit != 0 {
            return Err(DisplayError::gpu(format!(
                "Buffer size {} is not a multiple of {}",
                contents.len(),
                unit
            )));
        }
        Ok(Buffer {
            kind,
            contents: contents.to_vec(),
        })
    }

    fn create_sampler(&self, filter: Filter) -> Result<Sampler> {
        Ok(Sampler { filter })
    }

    fn create_render_target_view(&self, texture: &Arc<Texture>) -> Result<RenderTargetView> {
        if !texture.desc().render_target {
            return Err(DisplayError::gpu("Texture not created with render target binding"));
        }
        Ok(RenderTargetView::new(texture.clone()))
    }

    fn create_shader_resource_view(&self, texture: &Arc<Texture>) -> Result<ShaderResourceView> {
        if texture.format().is_planar() {
            return Err(DisplayError::gpu("Planar textures cannot be sampled"));
        }
        Ok(ShaderResourceView::new(texture.clone()))
    }

    fn draw_indexed(&self, draw: &DrawCall<'_>) -> Result<()> {
        if draw.vertex_shader.stage != ShaderStage::Vertex || draw.pixel_shader.stage != ShaderStage::Pixel {
            return Err(DisplayError::gpu("Shader bound to the wrong stage"));
        }
        let BufferKind::Vertex { stride } = draw.vertex_buffer.kind else {
            return Err(DisplayError::gpu("Vertex slot holds a non-vertex buffer"));
        };
        if stride as usize != std::mem::size_of::<Vertex>() {
            return Err(DisplayError::gpu("Unsupported vertex stride"));
        }
        if draw.index_buffer.kind != BufferKind::Index16 {
            return Err(DisplayError::gpu("Index slot holds a non-index buffer"));
        }

        let needed = match draw.pixel_shader.program {
            ShaderProgram::SideBySide => 2,
            ShaderProgram::Sample => 1,
            ShaderProgram::Passthrough => 0,
        };
        if draw.resources.len() < needed {
            return Err(DisplayError::gpu(format!(
                "Pixel shader needs {} resources, {} bound",
                needed,
                draw.resources.len()
            )));
        }

        let vertices: Vec<Vertex> = draw
            .vertex_buffer
            .contents
            .chunks_exact(stride as usize)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        let indices: Vec<u16> = draw
            .index_buffer
            .contents
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        let count = (draw.index_count as usize).min(indices.len());

        let target = draw.target.texture();
        let bound: Vec<(&Arc<Texture>, Vec<u8>)> = draw
            .resources
            .iter()
            .map(|view| {
                let texture = view.texture();
                if texture.id() == target.id() {
                    return Err(DisplayError::gpu("Resource bound as both input and target"));
                }
                Ok((texture, texture.data().clone()))
            })
            .collect::<Result<_>>()?;
        let inputs: Vec<SampledTexture<'_>> = bound
            .iter()
            .map(|(texture, data)| SampledTexture {
                width: texture.width(),
                height: texture.height(),
                format: texture.format(),
                data,
            })
            .collect();

        let width = target.width();
        let height = target.height();
        let format = target.format();
        let mut out = target.data();

        for tri in indices[..count].chunks_exact(3) {
            let corners = [
                vertex_at(&vertices, tri[0])?,
                vertex_at(&vertices, tri[1])?,
                vertex_at(&vertices, tri[2])?,
            ];
            rasterize(&corners, width, height, |x, y, u, v| {
                let rgba = shade(draw.pixel_shader.program, draw.sampler, &inputs, u, v);
                let offset = (y as usize * width as usize + x as usize) * 4;
                write_pixel(&mut out[offset..offset + 4], format, rgba);
            });
        }
        Ok(())
    }

    fn create_video_output_view(&self, texture: &Arc<Texture>) -> Result<VideoOutputView> {
        if texture.format() != PixelFormat::Nv12 {
            return Err(DisplayError::gpu(format!(
                "Video output view needs NV12, got {}",
                texture.format()
            )));
        }
        Ok(VideoOutputView::new(texture.clone()))
    }

    fn video_blt(&self, input: &Texture, output: &VideoOutputView) -> Result<()> {
        let dst = output.texture();
        if input.format().is_planar() {
            return Err(DisplayError::gpu("Video processor input must be packed RGB"));
        }
        let src = input.data();
        let mut out = dst.data();
        rgb_to_nv12(
            &src,
            input.width(),
            input.height(),
            input.format(),
            &mut out,
            dst.width(),
            dst.height(),
        );
        Ok(())
    }

    fn flush(&self) {}
}

fn copy_plane(src: &[u8], src_pitch: usize, dst: &mut [u8], dst_pitch: usize, row_bytes: usize, rows: usize) {
    for row in 0..rows {
        let s = row * src_pitch;
        let d = row * dst_pitch;
        dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
    }
}

fn vertex_at(vertices: &[Vertex], index: u16) -> Result<Vertex> {
    vertices
        .get(index as usize)
        .copied()
        .ok_or_else(|| DisplayError::gpu(format!("Index {} out of range", index)))
}

struct SampledTexture<'a> {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: &'a [u8],
}

impl SampledTexture<'_> {
    fn texel(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        let offset = (y * self.width as usize + x) * 4;
        let p = &self.data[offset..offset + 4];
        let rgba = match self.format {
            PixelFormat::Bgra8 => [p[2], p[1], p[0], p[3]],
            _ => [p[0], p[1], p[2], p[3]],
        };
        rgba.map(|c| c as f32)
    }

    /// Sample with clamp addressing
    fn sample(&self, filter: Filter, u: f32, v: f32) -> [f32; 4] {
        let x = u * self.width as f32 - 0.5;
        let y = v * self.height as f32 - 0.5;
        match filter {
            Filter::Point => self.texel(x.round() as i64, y.round() as i64),
            Filter::Linear => {
                let (x0, y0) = (x.floor(), y.floor());
                let (fx, fy) = (x - x0, y - y0);
                let (x0, y0) = (x0 as i64, y0 as i64);
                let a = self.texel(x0, y0);
                let b = self.texel(x0 + 1, y0);
                let c = self.texel(x0, y0 + 1);
                let d = self.texel(x0 + 1, y0 + 1);
                let mut out = [0.0; 4];
                for i in 0..4 {
                    let top = a[i] + (b[i] - a[i]) * fx;
                    let bottom = c[i] + (d[i] - c[i]) * fx;
                    out[i] = top + (bottom - top) * fy;
                }
                out
            }
        }
    }
}

fn shade(program: ShaderProgram, sampler: &Sampler, inputs: &[SampledTexture<'_>], u: f32, v: f32) -> [f32; 4] {
    match program {
        ShaderProgram::Passthrough => [0.0, 0.0, 0.0, 255.0],
        ShaderProgram::Sample => inputs[0].sample(sampler.filter, u, v),
        // Left half of the target shows t0, right half t1, each stretched over its half
        ShaderProgram::SideBySide => {
            if u < 0.5 {
                inputs[0].sample(sampler.filter, u * 2.0, v)
            } else {
                inputs[1].sample(sampler.filter, u * 2.0 - 1.0, v)
            }
        }
    }
}

fn write_pixel(dst: &mut [u8], format: PixelFormat, rgba: [f32; 4]) {
    let c = rgba.map(|c| c.round().clamp(0.0, 255.0) as u8);
    match format {
        PixelFormat::Bgra8 => dst.copy_from_slice(&[c[2], c[1], c[0], c[3]]),
        _ => dst.copy_from_slice(&c),
    }
}

fn edge(a: (f32, f32), b: (f32, f32), p: (f32, f32)) -> f32 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

/// Rasterize one triangle, calling `plot` with interpolated texture coordinates
/// for every covered pixel center.
fn rasterize(corners: &[Vertex; 3], width: u32, height: u32, mut plot: impl FnMut(u32, u32, f32, f32)) {
    let screen = corners.map(|c| {
        (
            (c.position[0] + 1.0) * 0.5 * width as f32,
            (1.0 - c.position[1]) * 0.5 * height as f32,
        )
    });
    let area = edge(screen[0], screen[1], screen[2]);
    if area == 0.0 {
        return;
    }

    let min_x = screen.iter().map(|p| p.0).fold(f32::MAX, f32::min).floor().max(0.0) as u32;
    let min_y = screen.iter().map(|p| p.1).fold(f32::MAX, f32::min).floor().max(0.0) as u32;
    let max_x = (screen.iter().map(|p| p.0).fold(f32::MIN, f32::max).ceil() as u32).min(width);
    let max_y = (screen.iter().map(|p| p.1).fold(f32::MIN, f32::max).ceil() as u32).min(height);

    for y in min_y..max_y {
        for x in min_x..max_x {
            let p = (x as f32 + 0.5, y as f32 + 0.5);
            let w0 = edge(screen[1], screen[2], p) / area;
            let w1 = edge(screen[2], screen[0], p) / area;
            let w2 = edge(screen[0], screen[1], p) / area;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let u = w0 * corners[0].tex_coord[0] + w1 * corners[1].tex_coord[0] + w2 * corners[2].tex_coord[0];
            let v = w0 * corners[0].tex_coord[1] + w1 * corners[1].tex_coord[1] + w2 * corners[2].tex_coord[1];
            plot(x, y, u, v);
        }
    }
}

/// BT.601 limited-range conversion of a packed RGB surface into NV12
fn rgb_to_nv12(
    src: &[u8],
    src_width: u32,
    src_height: u32,
    format: PixelFormat,
    dst: &mut [u8],
    width: u32,
    height: u32,
) {
    let (w, h) = (width as usize, height as usize);
    let rgb_at = |x: usize, y: usize| -> [i32; 3] {
        let x = x.min(src_width as usize - 1);
        let y = y.min(src_height as usize - 1);
        let offset = (y * src_width as usize + x) * 4;
        let p = &src[offset..offset + 4];
        match format {
            PixelFormat::Bgra8 => [p[2] as i32, p[1] as i32, p[0] as i32],
            _ => [p[0] as i32, p[1] as i32, p[2] as i32],
        }
    };

    for y in 0..h {
        for x in 0..w {
            let [r, g, b] = rgb_at(x, y);
            dst[y * w + x] = (16 + ((66 * r + 129 * g + 25 * b + 128) >> 8)).clamp(0, 255) as u8;
        }
    }

    let chroma_pitch = 2 * w.div_ceil(2);
    let uv = &mut dst[w * h..];
    for cy in 0..h.div_ceil(2) {
        for cx in 0..w.div_ceil(2) {
            let mut sum = [0i32; 3];
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let px = rgb_at((cx * 2 + dx).min(w - 1), (cy * 2 + dy).min(h - 1));
                for i in 0..3 {
                    sum[i] += px[i];
                }
            }
            let [r, g, b] = sum.map(|s| (s + 2) / 4);
            let u = 128 + ((-38 * r - 74 * g + 112 * b + 128) >> 8);
            let v = 128 + ((112 * r - 94 * g - 18 * b + 128) >> 8);
            let offset = cy * chroma_pitch + cx * 2;
            uv[offset] = u.clamp(0, 255) as u8;
            uv[offset + 1] = v.clamp(0, 255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(device: &SoftwareDevice, w: u32, h: u32, bgra: [u8; 4]) -> Arc<Texture> {
        let tex = device
            .create_texture(&TextureDesc::new(w, h, PixelFormat::Bgra8).shader_resource())
            .unwrap();
        let pixels: Vec<u8> = bgra.iter().copied().cycle().take((w * h * 4) as usize).collect();
        device.update_region(&tex, Region::new(0, 0, w, h), &pixels).unwrap();
        tex
    }

    fn read_back(device: &SoftwareDevice, tex: &Texture) -> Vec<u8> {
        let staging = device
            .create_texture(&TextureDesc::new(tex.width(), tex.height(), tex.format()).staging())
            .unwrap();
        device.copy_resource(&staging, tex).unwrap();
        device.map_read(&staging).unwrap()
    }

    #[test]
    fn test_zero_sized_texture_rejected() {
        let device = SoftwareDevice::new();
        assert!(device.create_texture(&TextureDesc::new(0, 4, PixelFormat::Bgra8)).is_err());
    }

    #[test]
    fn test_map_requires_staging() {
        let device = SoftwareDevice::new();
        let tex = filled(&device, 2, 2, [1, 2, 3, 4]);
        assert!(device.map_read(&tex).is_err());
        assert_eq!(&read_back(&device, &tex)[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_shared_texture_round_trip() {
        let device = SoftwareDevice::new();
        let tex = device
            .create_texture(&TextureDesc::new(4, 4, PixelFormat::Bgra8).shared(ShareMode::KeyedMutex))
            .unwrap();
        let handle = tex.shared_handle().unwrap();
        assert!(tex.keyed_mutex().is_some());

        let opened = device.open_shared_texture(handle).unwrap();
        assert_eq!(opened.id(), tex.id());

        device.release_shared_texture(handle);
        assert!(matches!(
            device.open_shared_texture(handle),
            Err(DisplayError::UnknownHandle(h)) if h == handle
        ));
    }

    #[test]
    fn test_compile_unknown_entry_fails() {
        let device = SoftwareDevice::new();
        let err = device.compile_shader("float4 main() {}", "ps_side_by_side", ShaderStage::Pixel);
        assert!(matches!(err, Err(DisplayError::Shader(_))));
    }

    #[test]
    fn test_full_screen_sample_draw() {
        let device = SoftwareDevice::new();
        let src = filled(&device, 4, 4, [10, 20, 30, 255]);
        let dst = device
            .create_texture(&TextureDesc::new(8, 8, PixelFormat::Bgra8).render_target())
            .unwrap();

        let source = "vs_main ps_sample";
        let vs = device.compile_shader(source, "vs_main", ShaderStage::Vertex).unwrap();
        let ps = device.compile_shader(source, "ps_sample", ShaderStage::Pixel).unwrap();
        let quad = [
            Vertex { position: [-1.0, -1.0, 0.5], tex_coord: [0.0, 1.0] },
            Vertex { position: [1.0, 1.0, 0.5], tex_coord: [1.0, 0.0] },
            Vertex { position: [1.0, -1.0, 0.5], tex_coord: [1.0, 1.0] },
            Vertex { position: [-1.0, 1.0, 0.5], tex_coord: [0.0, 0.0] },
        ];
        let vb = device
            .create_buffer(BufferKind::Vertex { stride: 20 }, bytemuck::cast_slice(&quad))
            .unwrap();
        let ib = device
            .create_buffer(BufferKind::Index16, bytemuck::cast_slice(&[0u16, 1, 2, 0, 3, 1]))
            .unwrap();
        let sampler = device.create_sampler(Filter::Linear).unwrap();
        let srv = device.create_shader_resource_view(&src).unwrap();
        let rtv = device.create_render_target_view(&dst).unwrap();

        device
            .draw_indexed(&DrawCall {
                vertex_shader: &vs,
                pixel_shader: &ps,
                vertex_buffer: &vb,
                index_buffer: &ib,
                index_count: 6,
                sampler: &sampler,
                resources: &[&srv],
                target: &rtv,
            })
            .unwrap();

        let pixels = read_back(&device, &dst);
        for px in pixels.chunks_exact(4) {
            assert_eq!(px, &[10, 20, 30, 255]);
        }
    }

    #[test]
    fn test_nv12_conversion_of_white_and_black() {
        let device = SoftwareDevice::new();
        let white = filled(&device, 4, 2, [255, 255, 255, 255]);
        let nv12 = device
            .create_texture(&TextureDesc::new(4, 2, PixelFormat::Nv12))
            .unwrap();
        let view = device.create_video_output_view(&nv12).unwrap();
        device.video_blt(&white, &view).unwrap();

        let out = read_back(&device, &nv12);
        assert!(out[..8].iter().all(|&y| y == 235));
        assert!(out[8..].iter().all(|&c| c == 128));

        let black = filled(&device, 4, 2, [0, 0, 0, 255]);
        device.video_blt(&black, &view).unwrap();
        let out = read_back(&device, &nv12);
        assert!(out[..8].iter().all(|&y| y == 16));
    }
}
