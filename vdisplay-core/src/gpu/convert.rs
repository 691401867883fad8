//! Packed RGB to NV12 conversion through the device's video processor

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{GpuDevice, PixelFormat, Texture, TextureDesc, TextureId, VideoOutputView};
use crate::error::{DisplayError, Result, ResultExt};

/// Converts staged RGB frames into NV12 encoder surfaces.
///
/// The staged surface is first copied into a private input texture so the
/// processor never reads a texture the render path may reuse. Output views
/// are created on first use per destination and cached.
pub struct Nv12Converter {
    device: Arc<dyn GpuDevice>,
    input: Arc<Texture>,
    output_views: HashMap<TextureId, VideoOutputView>,
}

impl Nv12Converter {
    /// Create a converter for `width`x`height` frames in `input_format`
    pub fn new(
        device: Arc<dyn GpuDevice>,
        width: u32,
        height: u32,
        input_format: PixelFormat,
    ) -> Result<Self> {
        if input_format.is_planar() {
            return Err(DisplayError::invalid(format!(
                "Converter input must be packed RGB, got {}",
                input_format
            )));
        }
        let input = device
            .create_texture(&TextureDesc::new(width, height, input_format))
            .context("Failed to create video processor input")?;

        debug!("NV12 converter ready: {}x{} from {}", width, height, input_format);
        Ok(Self {
            device,
            input,
            output_views: HashMap::new(),
        })
    }

    /// Convert `src` into the NV12 texture `dst`
    pub fn convert(&mut self, src: &Texture, dst: &Arc<Texture>) -> Result<()> {
        self.device.copy_resource(&self.input, src)?;

        if !self.output_views.contains_key(&dst.id()) {
            let view = self.device.create_video_output_view(dst)?;
            self.output_views.insert(dst.id(), view);
        }
        let view = &self.output_views[&dst.id()];
        self.device.video_blt(&self.input, view)
    }

    /// Number of cached output views
    pub fn cached_views(&self) -> usize {
        self.output_views.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Region, SoftwareDevice};

    #[test]
    fn test_output_views_are_cached_per_destination() {
        let device: Arc<dyn GpuDevice> = Arc::new(SoftwareDevice::new());
        let mut converter = Nv12Converter::new(device.clone(), 4, 4, PixelFormat::Bgra8).unwrap();

        let src = device
            .create_texture(&TextureDesc::new(4, 4, PixelFormat::Bgra8))
            .unwrap();
        device
            .update_region(&src, Region::new(0, 0, 4, 4), &[255; 64])
            .unwrap();
        let a = device
            .create_texture(&TextureDesc::new(4, 4, PixelFormat::Nv12))
            .unwrap();
        let b = device
            .create_texture(&TextureDesc::new(4, 4, PixelFormat::Nv12))
            .unwrap();

        converter.convert(&src, &a).unwrap();
        converter.convert(&src, &a).unwrap();
        assert_eq!(converter.cached_views(), 1);
        converter.convert(&src, &b).unwrap();
        assert_eq!(converter.cached_views(), 2);
    }

    #[test]
    fn test_planar_input_rejected() {
        let device: Arc<dyn GpuDevice> = Arc::new(SoftwareDevice::new());
        assert!(Nv12Converter::new(device, 4, 4, PixelFormat::Nv12).is_err());
    }
}
