//! Synchronous transfers, layout transitions and mip generation.

use ash::vk;
use trylauncher_gpu::{AllocatedImage, DeviceContext, GpuError, QueueFamilyIndices, QueueRole};
use trylauncher_test::{Call, Command, DeviceOp, Harness, MockDevice, TestError};

fn texture(h: &mut Harness, width: u32, height: u32, mips: u32) -> AllocatedImage {
    h.resources
        .create_texture_2d(width, height, vk::Format::R8G8B8A8_SRGB, mips)
        .unwrap()
}

fn barriers(commands: &[Command]) -> Vec<(vk::ImageLayout, vk::ImageLayout, u32, u32)> {
    commands
        .iter()
        .filter_map(|c| match c {
            Command::PipelineBarrier { barriers, .. } => Some(barriers),
            _ => None,
        })
        .flatten()
        .map(|b| {
            (
                b.old_layout,
                b.new_layout,
                b.range.base_mip_level,
                b.range.level_count,
            )
        })
        .collect()
}

#[test]
fn transfer_pool_is_transient_on_the_graphics_family() {
    let h = Harness::new();
    let transfer = h.transfer().unwrap();

    let created = h.device.calls().into_iter().find_map(|call| match call {
        Call::CreateCommandPool {
            queue_family,
            flags,
            ..
        } => Some((queue_family, flags)),
        _ => None,
    });
    let (family, flags) = created.unwrap();
    assert_eq!(family, 0);
    assert!(flags.contains(vk::CommandPoolCreateFlags::TRANSIENT));
    assert!(flags.contains(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER));
    assert!(transfer.command_pool().is_initialized());

    drop(transfer);
    assert_eq!(h.device.live().command_pools, 0);
}

#[test]
fn transfer_requires_a_graphics_family() {
    let device = MockDevice::new();
    device.set_queue_families(QueueFamilyIndices {
        graphics: None,
        present: Some(0),
        transfer: Some(0),
    });
    let h = Harness::with_device(device);
    assert!(matches!(h.transfer(), Err(TestError::Gpu(GpuError::NotInitialized(_)))));
}

#[test]
fn copy_buffer_records_one_region_and_waits() {
    let mut h = Harness::new();
    let src = h.resources.create_staging_buffer(256).unwrap();
    let dst = h.resources.create_vertex_buffer(256, false).unwrap();
    let mut transfer = h.transfer().unwrap();

    transfer.copy_buffer(&src, &dst, 128, 64, 32).unwrap();

    let submissions = h.device.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].queue, h.device.queue(QueueRole::Graphics));
    assert_eq!(submissions[0].fence, vk::Fence::null());
    match submissions[0].commands.as_slice() {
        [Command::CopyBuffer {
            src: s,
            dst: d,
            regions,
        }] => {
            assert_eq!((*s, *d), (src.handle(), dst.handle()));
            assert_eq!(regions.len(), 1);
            assert_eq!(
                (regions[0].src_offset, regions[0].dst_offset, regions[0].size),
                (64, 32, 128)
            );
        }
        other => panic!("unexpected commands {other:?}"),
    }

    let calls = h.device.calls();
    let begin = calls.iter().find_map(|c| match c {
        Call::BeginCommandBuffer { flags, .. } => Some(*flags),
        _ => None,
    });
    assert_eq!(begin, Some(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT));
    assert!(calls.iter().any(|c| matches!(c, Call::QueueWaitIdle(_))));
    assert!(transfer.command_pool().buffers().is_empty());
    assert_eq!(h.device.live().command_buffers, 0);

    drop(transfer);
    h.resources.destroy_buffer(src);
    h.resources.destroy_buffer(dst);
    h.check_clean().unwrap();
}

#[test]
fn copy_out_of_bounds_never_submits() {
    let mut h = Harness::new();
    let src = h.resources.create_staging_buffer(64).unwrap();
    let dst = h.resources.create_vertex_buffer(64, false).unwrap();
    let mut transfer = h.transfer().unwrap();

    assert!(transfer.copy_buffer(&src, &dst, 64, 1, 0).is_err());
    assert!(transfer.copy_buffer(&src, &dst, 0, 0, 0).is_err());
    assert!(h.device.submissions().is_empty());

    drop(transfer);
    h.resources.destroy_buffer(src);
    h.resources.destroy_buffer(dst);
}

#[test]
fn copy_buffer_to_image_targets_level_zero() {
    let mut h = Harness::new();
    let staging = h.resources.create_staging_buffer(64 * 32 * 4).unwrap();
    let image = texture(&mut h, 64, 32, 4);
    let mut transfer = h.transfer().unwrap();

    transfer
        .copy_buffer_to_image(&staging, &image, 64, 32, 1)
        .unwrap();

    match h.device.submitted_commands().as_slice() {
        [Command::CopyBufferToImage {
            dst,
            layout,
            regions,
            ..
        }] => {
            assert_eq!(*dst, image.handle());
            assert_eq!(*layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            let region = regions[0];
            assert_eq!(region.image_subresource.mip_level, 0);
            assert_eq!(region.image_subresource.layer_count, 1);
            assert_eq!(region.buffer_row_length, 0);
            assert_eq!(
                (region.image_extent.width, region.image_extent.height),
                (64, 32)
            );
        }
        other => panic!("unexpected commands {other:?}"),
    }

    drop(transfer);
    h.resources.destroy_buffer(staging);
    h.resources.destroy_image(image);
}

#[test]
fn upload_transition_uses_the_table_masks() {
    let mut h = Harness::new();
    let image = texture(&mut h, 16, 16, 1);
    let mut transfer = h.transfer().unwrap();

    transfer
        .transition_image_layout(
            &image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            1,
            1,
        )
        .unwrap();

    match h.device.submitted_commands().as_slice() {
        [Command::PipelineBarrier {
            src_stage,
            dst_stage,
            barriers,
        }] => {
            assert_eq!(*src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
            assert_eq!(*dst_stage, vk::PipelineStageFlags::TRANSFER);
            assert_eq!(barriers.len(), 1);
            assert_eq!(barriers[0].src_access, vk::AccessFlags::empty());
            assert_eq!(barriers[0].dst_access, vk::AccessFlags::TRANSFER_WRITE);
            assert_eq!(barriers[0].range.aspect_mask, vk::ImageAspectFlags::COLOR);
        }
        other => panic!("unexpected commands {other:?}"),
    }

    drop(transfer);
    h.resources.destroy_image(image);
}

#[test]
fn unsupported_transition_records_nothing() {
    let mut h = Harness::new();
    let image = texture(&mut h, 16, 16, 1);
    let mut transfer = h.transfer().unwrap();
    h.device.clear_calls();

    let result = transfer.transition_image_layout(
        &image,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        1,
        1,
    );
    assert!(matches!(
        result,
        Err(GpuError::UnsupportedTransition { .. })
    ));
    assert!(h.device.calls().is_empty());

    drop(transfer);
    h.resources.destroy_image(image);
}

#[test]
fn depth_transition_covers_stencil_for_combined_formats() {
    let mut h = Harness::new();
    let depth = h
        .resources
        .create_image_2d(
            32,
            32,
            vk::Format::D24_UNORM_S8_UINT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            1,
        )
        .unwrap();
    let mut transfer = h.transfer().unwrap();

    transfer
        .transition_image_layout(
            &depth,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            1,
            1,
        )
        .unwrap();

    match h.device.submitted_commands().as_slice() {
        [Command::PipelineBarrier {
            dst_stage,
            barriers,
            ..
        }] => {
            assert_eq!(*dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
            assert_eq!(
                barriers[0].range.aspect_mask,
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            );
        }
        other => panic!("unexpected commands {other:?}"),
    }

    drop(transfer);
    h.resources.destroy_image(depth);
}

#[test]
fn mip_generation_blits_down_the_chain() {
    let mut h = Harness::new();
    let image = texture(&mut h, 8, 4, 4);
    let mut transfer = h.transfer().unwrap();

    transfer.generate_mipmaps(&image, 8, 4, 4).unwrap();

    let commands = h.device.submitted_commands();
    let blits: Vec<_> = commands
        .iter()
        .filter_map(|c| match c {
            Command::BlitImage {
                regions,
                filter,
                src_layout,
                dst_layout,
                ..
            } => Some((regions[0], *filter, *src_layout, *dst_layout)),
            _ => None,
        })
        .collect();
    assert_eq!(blits.len(), 3);
    for (i, (region, filter, src_layout, dst_layout)) in blits.iter().enumerate() {
        let level = u32::try_from(i).unwrap();
        assert_eq!(region.src_subresource.mip_level, level);
        assert_eq!(region.dst_subresource.mip_level, level + 1);
        assert_eq!(*filter, vk::Filter::LINEAR);
        assert_eq!(*src_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(*dst_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }
    assert_eq!((blits[0].0.dst_offsets[1].x, blits[0].0.dst_offsets[1].y), (4, 2));
    assert_eq!((blits[1].0.dst_offsets[1].x, blits[1].0.dst_offsets[1].y), (2, 1));
    assert_eq!((blits[2].0.dst_offsets[1].x, blits[2].0.dst_offsets[1].y), (1, 1));

    let dst = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
    let src = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
    let read = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
    assert_eq!(
        barriers(&commands),
        vec![
            (dst, src, 0, 1),
            (src, read, 0, 1),
            (dst, src, 1, 1),
            (src, read, 1, 1),
            (dst, src, 2, 1),
            (src, read, 2, 1),
            (dst, read, 3, 1),
        ]
    );

    drop(transfer);
    h.resources.destroy_image(image);
}

#[test]
fn single_level_mip_generation_only_finalizes_the_layout() {
    let mut h = Harness::new();
    let image = texture(&mut h, 8, 8, 1);
    let mut transfer = h.transfer().unwrap();

    transfer.generate_mipmaps(&image, 8, 8, 1).unwrap();

    let commands = h.device.submitted_commands();
    assert_eq!(
        barriers(&commands),
        vec![(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            0,
            1
        )]
    );

    drop(transfer);
    h.resources.destroy_image(image);
}

#[test]
fn mip_generation_requires_linear_filtering() {
    let device = MockDevice::new();
    device.set_format_properties(
        vk::Format::R8G8B8A8_SRGB,
        vk::FormatProperties {
            optimal_tiling_features: vk::FormatFeatureFlags::SAMPLED_IMAGE
                | vk::FormatFeatureFlags::BLIT_SRC
                | vk::FormatFeatureFlags::BLIT_DST,
            ..Default::default()
        },
    );
    let mut h = Harness::with_device(device);
    let image = texture(&mut h, 8, 8, 4);
    let mut transfer = h.transfer().unwrap();

    let result = transfer.generate_mipmaps(&image, 8, 8, 4);
    assert!(matches!(result, Err(GpuError::UnsupportedFormat { .. })));
    assert!(h.device.submissions().is_empty());

    drop(transfer);
    h.resources.destroy_image(image);
}

#[test]
fn ranges_beyond_the_image_are_rejected() {
    let mut h = Harness::new();
    let staging = h.resources.create_staging_buffer(64 * 64 * 4).unwrap();
    let image = texture(&mut h, 64, 64, 2);
    let mut transfer = h.transfer().unwrap();
    h.device.clear_calls();

    assert!(matches!(
        transfer.generate_mipmaps(&image, 64, 64, 6),
        Err(GpuError::InvalidArgument(_))
    ));
    assert!(matches!(
        transfer.generate_mipmaps(&image, 128, 64, 2),
        Err(GpuError::InvalidArgument(_))
    ));
    assert!(matches!(
        transfer.transition_image_layout(
            &image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            3,
            1
        ),
        Err(GpuError::InvalidArgument(_))
    ));
    assert!(matches!(
        transfer.transition_image_layout(
            &image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            2,
            2
        ),
        Err(GpuError::InvalidArgument(_))
    ));
    assert!(matches!(
        transfer.copy_buffer_to_image(&staging, &image, 64, 65, 1),
        Err(GpuError::InvalidArgument(_))
    ));
    assert!(matches!(
        transfer.copy_buffer_to_image(&staging, &image, 64, 64, 2),
        Err(GpuError::InvalidArgument(_))
    ));
    assert!(h.device.calls().is_empty());

    transfer.generate_mipmaps(&image, 64, 64, 2).unwrap();
    assert_eq!(h.device.submissions().len(), 1);

    drop(transfer);
    h.resources.destroy_buffer(staging);
    h.resources.destroy_image(image);
}

#[test]
fn invalid_resources_are_rejected() {
    let h = Harness::new();
    let mut transfer = h.transfer().unwrap();
    let sentinel = AllocatedImage::default();

    assert!(matches!(
        transfer.generate_mipmaps(&sentinel, 8, 8, 4),
        Err(GpuError::InvalidResource(_))
    ));
    assert!(matches!(
        transfer.transition_image_layout(
            &sentinel,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            1,
            1
        ),
        Err(GpuError::InvalidResource(_))
    ));
    assert!(h.device.submissions().is_empty());
    drop(transfer);
    h.check_clean().unwrap();
}

#[test]
fn failed_submission_still_frees_the_buffer() {
    let mut h = Harness::new();
    let src = h.resources.create_staging_buffer(16).unwrap();
    let dst = h.resources.create_vertex_buffer(16, false).unwrap();
    let mut transfer = h.transfer().unwrap();

    h.device
        .fail_next(DeviceOp::QueueSubmit, vk::Result::ERROR_DEVICE_LOST);
    assert!(transfer.copy_buffer(&src, &dst, 16, 0, 0).is_err());
    assert_eq!(h.device.live().command_buffers, 0);
    assert!(transfer.command_pool().buffers().is_empty());

    drop(transfer);
    h.resources.destroy_buffer(src);
    h.resources.destroy_buffer(dst);
    h.check_clean().unwrap();
}
