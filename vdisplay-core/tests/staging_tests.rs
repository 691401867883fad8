//! Integration tests for the staging compositor and GPU adapter

mod mocks;

use mocks::{pixel, read_back, solid_texture};
use std::sync::Arc;

use vdisplay_core::gpu::{
    GpuDevice, Nv12Converter, PixelFormat, SWAP_SET_SIZE, SoftwareDevice, SwapTextureRegistry,
    TextureDesc,
};
use vdisplay_core::staging::{StagingCompositor, StagingSlot};
use vdisplay_core::types::FrameSubmission;

const GREEN: [u8; 4] = [0, 255, 0, 255];
const MAGENTA: [u8; 4] = [255, 0, 255, 255];

#[test]
fn test_dual_composite_fills_each_half() {
    let device: Arc<dyn GpuDevice> = Arc::new(SoftwareDevice::new());
    let slot = Arc::new(StagingSlot::new());
    let mut compositor = StagingCompositor::new(device.clone(), 16, 8, slot.clone());
    let left = solid_texture(device.as_ref(), 8, 8, GREEN);
    let right = solid_texture(device.as_ref(), 8, 8, MAGENTA);

    assert!(compositor
        .stage(&[&left, &right], FrameSubmission::stereo(10, 1, 0))
        .unwrap());
    let frame = slot.take().unwrap();
    assert_eq!(frame.submission.texture_count, 2);

    let data = read_back(device.as_ref(), &frame.surface);
    for y in 0..8 {
        for x in 0..8 {
            assert_eq!(pixel(&data, 16, x, y), GREEN, "left ({}, {})", x, y);
            assert_eq!(pixel(&data, 16, x + 8, y), MAGENTA, "right ({}, {})", x + 8, y);
        }
    }
}

#[test]
fn test_composite_resources_reused() {
    let device: Arc<dyn GpuDevice> = Arc::new(SoftwareDevice::new());
    let slot = Arc::new(StagingSlot::new());
    let mut compositor = StagingCompositor::new(device.clone(), 16, 8, slot.clone());
    let left = solid_texture(device.as_ref(), 8, 8, GREEN);
    let right = solid_texture(device.as_ref(), 8, 8, MAGENTA);

    compositor.stage(&[&left, &right], FrameSubmission::stereo(10, 1, 0)).unwrap();
    let surface = compositor.surface().unwrap().id();
    // Swapped eyes on the next frame land on the other halves
    compositor.stage(&[&right, &left], FrameSubmission::stereo(20, 2, 0)).unwrap();
    assert_eq!(compositor.surface().unwrap().id(), surface);

    let frame = slot.take().unwrap();
    assert_eq!(frame.submission.frame_index, 2);
    let data = read_back(device.as_ref(), &frame.surface);
    assert_eq!(pixel(&data, 16, 0, 0), MAGENTA);
    assert_eq!(pixel(&data, 16, 15, 7), GREEN);
}

#[test]
fn test_unclaimed_frame_is_replaced() {
    let device: Arc<dyn GpuDevice> = Arc::new(SoftwareDevice::new());
    let slot = Arc::new(StagingSlot::new());
    let mut compositor = StagingCompositor::new(device.clone(), 4, 4, slot.clone());
    let src = solid_texture(device.as_ref(), 4, 4, GREEN);

    compositor.stage(&[&src], FrameSubmission::single(1, 1, 0)).unwrap();
    compositor.stage(&[&src], FrameSubmission::single(2, 2, 0)).unwrap();
    assert_eq!(slot.take().unwrap().submission.frame_index, 2);
    assert!(slot.take().is_none());
}

#[test]
fn test_nv12_conversion_of_solid_green() {
    let device: Arc<dyn GpuDevice> = Arc::new(SoftwareDevice::new());
    let src = solid_texture(device.as_ref(), 4, 4, GREEN);
    let dst = device
        .create_texture(&TextureDesc::new(4, 4, PixelFormat::Nv12))
        .unwrap();
    let mut converter = Nv12Converter::new(device.clone(), 4, 4, PixelFormat::Bgra8).unwrap();

    converter.convert(&src, &dst).unwrap();
    let data = read_back(device.as_ref(), &dst);
    assert_eq!(data.len(), PixelFormat::Nv12.frame_size(4, 4));
    // Luma is uniform and well above black for pure green
    assert!(data[..16].iter().all(|&y| y == data[0]));
    assert!(data[0] > 100);
}

#[test]
fn test_swap_registry_round_trip() {
    let device = Arc::new(SoftwareDevice::new());
    let mut registry = SwapTextureRegistry::new(device.clone());

    let handles = registry.create(7, 8, 8, PixelFormat::Bgra8).unwrap();
    assert_eq!(handles.len(), SWAP_SET_SIZE);
    for (slot, handle) in handles.iter().enumerate() {
        assert_eq!(registry.owner(*handle), Some((7, slot)));
        // The same texture is reachable from another "process" by handle
        let opened = device.open_shared_texture(*handle).unwrap();
        assert_eq!(opened.id(), registry.lookup(*handle).unwrap().id());
    }

    assert_eq!(registry.destroy_all(7), 1);
    assert!(registry.lookup(handles[0]).is_none());
    assert!(device.open_shared_texture(handles[2]).is_err());
    assert_eq!(device.shared_texture_count(), 0);
}
