//! Staged RGBA8 texture uploads.

use ash::vk;
use trylauncher_gpu::{mip_levels_for, upload_texture_rgba8, GpuError, TEXTURE_FORMAT};
use trylauncher_test::{Command, DeviceOp, Harness, MockDevice};

fn checkerboard(width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let value = if (x + y) % 2 == 0 { 255 } else { 0 };
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    pixels
}

#[test]
fn upload_with_mips_ends_shader_readable() {
    let mut h = Harness::new();
    let mut transfer = h.transfer().unwrap();
    let pixels = checkerboard(16, 16);
    let mips = mip_levels_for(16, 16);

    let texture =
        upload_texture_rgba8(&mut h.resources, &mut transfer, &pixels, 16, 16, mips).unwrap();

    assert!(texture.is_valid());
    assert_eq!(texture.format(), TEXTURE_FORMAT);
    assert_eq!(texture.mip_levels(), 5);
    assert_eq!(h.resources.allocation_count(), 1, "staging buffer released");

    let submissions = h.device.submissions();
    assert_eq!(submissions.len(), 3);

    // Every level enters TRANSFER_DST before the copy.
    match submissions[0].commands.as_slice() {
        [Command::PipelineBarrier { barriers, .. }] => {
            assert_eq!(barriers[0].new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            assert_eq!(barriers[0].range.level_count, 5);
        }
        other => panic!("unexpected commands {other:?}"),
    }
    assert!(matches!(
        submissions[1].commands.as_slice(),
        [Command::CopyBufferToImage { .. }]
    ));

    let blits = submissions[2]
        .commands
        .iter()
        .filter(|c| matches!(c, Command::BlitImage { .. }))
        .count();
    assert_eq!(blits, 4);

    let final_layouts: Vec<_> = submissions[2]
        .commands
        .iter()
        .filter_map(|c| match c {
            Command::PipelineBarrier { barriers, .. } => barriers
                .first()
                .filter(|b| b.new_layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .map(|b| b.range.base_mip_level),
            _ => None,
        })
        .collect();
    assert_eq!(final_layouts, vec![0, 1, 2, 3, 4]);

    drop(transfer);
    h.resources.destroy_image(texture);
    h.check_clean().unwrap();
}

#[test]
fn failed_upload_releases_staging_and_texture() {
    let mut h = Harness::new();
    let mut transfer = h.transfer().unwrap();
    let pixels = checkerboard(4, 2);

    h.device
        .fail_next(DeviceOp::QueueSubmit, vk::Result::ERROR_DEVICE_LOST);
    let result = upload_texture_rgba8(&mut h.resources, &mut transfer, &pixels, 4, 2, 1);
    assert!(result.is_err());

    assert_eq!(h.resources.allocation_count(), 0);
    assert_eq!(h.allocator.live_count(), 0);
    assert_eq!(h.allocator.destroyed_count(), 2);

    // The staging write was flushed before the failing submit.
    let flushed = h.allocator.flushes();
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].size, Some(32));
}

#[test]
fn single_level_upload_uses_the_final_transition() {
    let mut h = Harness::new();
    let mut transfer = h.transfer().unwrap();
    let pixels = checkerboard(8, 8);

    let texture =
        upload_texture_rgba8(&mut h.resources, &mut transfer, &pixels, 8, 8, 1).unwrap();

    let layouts: Vec<_> = h
        .device
        .submitted_commands()
        .iter()
        .filter_map(|c| match c {
            Command::PipelineBarrier { barriers, .. } => {
                Some((barriers[0].old_layout, barriers[0].new_layout))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        layouts,
        vec![
            (
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL
            ),
            (
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            ),
        ]
    );

    drop(transfer);
    h.resources.destroy_image(texture);
}

#[test]
fn short_pixel_data_is_rejected_up_front() {
    let mut h = Harness::new();
    let mut transfer = h.transfer().unwrap();
    let pixels = vec![0u8; 15];

    let result = upload_texture_rgba8(&mut h.resources, &mut transfer, &pixels, 2, 2, 1);
    assert!(matches!(result, Err(GpuError::InvalidArgument(_))));
    assert!(h.device.submissions().is_empty());
    assert_eq!(h.allocator.live_count(), 0);
}

#[test]
fn mip_failure_releases_the_texture() {
    let device = MockDevice::new();
    device.set_format_properties(TEXTURE_FORMAT, vk::FormatProperties::default());
    let mut h = Harness::with_device(device);
    let mut transfer = h.transfer().unwrap();
    let pixels = checkerboard(8, 8);

    let result = upload_texture_rgba8(&mut h.resources, &mut transfer, &pixels, 8, 8, 4);
    assert!(matches!(result, Err(GpuError::UnsupportedFormat { .. })));
    assert_eq!(h.allocator.live_count(), 0);
    assert_eq!(h.allocator.destroyed_count(), 2);

    drop(transfer);
    h.check_clean().unwrap();
}
