//! Resource manager behavior against the mock device and allocator.

use ash::vk;
use std::sync::Arc;
use trylauncher_gpu::{
    AllocatedBuffer, AllocatedImage, AllocationFlags, GpuError, MemoryUsage, ResourceManager,
};
use trylauncher_test::{Call, DeviceOp, Harness, MockAllocator, MockDevice};

#[test]
fn vertex_buffer_policies() {
    let mut h = Harness::new();

    let device_local = h.resources.create_vertex_buffer(1024, false).unwrap();
    assert!(device_local.is_valid());
    assert_eq!(device_local.memory_usage(), MemoryUsage::DeviceLocal);
    assert!(device_local.mapped_ptr().is_none());
    assert!(device_local
        .usage()
        .contains(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST));

    let host_visible = h.resources.create_vertex_buffer(1024, true).unwrap();
    assert_eq!(host_visible.memory_usage(), MemoryUsage::Upload);
    assert!(host_visible.mapped_ptr().is_some());

    assert_eq!(h.resources.allocation_count(), 2);
    assert_eq!(h.resources.statistics().allocated_bytes, 2048);

    h.resources.destroy_buffer(device_local);
    h.resources.destroy_buffer(host_visible);
    assert_eq!(h.resources.allocation_count(), 0);
    h.check_clean().unwrap();
}

#[test]
fn index_buffer_policies() {
    let mut h = Harness::new();

    let device_local = h.resources.create_index_buffer(512, false).unwrap();
    assert_eq!(device_local.memory_usage(), MemoryUsage::DeviceLocal);
    assert!(device_local.mapped_ptr().is_none());
    assert!(device_local
        .usage()
        .contains(vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST));
    assert!(!device_local
        .usage()
        .contains(vk::BufferUsageFlags::VERTEX_BUFFER));

    let host_visible = h.resources.create_index_buffer(512, true).unwrap();
    assert_eq!(host_visible.memory_usage(), MemoryUsage::Upload);
    assert!(host_visible.mapped_ptr().is_some());

    h.resources.destroy_buffer(device_local);
    h.resources.destroy_buffer(host_visible);
    h.check_clean().unwrap();
}

#[test]
fn staging_buffers_are_mapped_transfer_sources() {
    let mut h = Harness::new();
    let staging = h.resources.create_staging_buffer(256).unwrap();

    assert!(staging.usage().contains(vk::BufferUsageFlags::TRANSFER_SRC));
    assert_eq!(staging.memory_usage(), MemoryUsage::Readback);
    assert!(staging.flags().contains(AllocationFlags::MAPPED));
    assert!(staging.mapped_ptr().is_some());

    h.resources.destroy_buffer(staging);
}

#[test]
fn zero_sized_buffer_is_rejected_without_allocating() {
    let mut h = Harness::new();
    let result = h.resources.create_buffer(
        0,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        MemoryUsage::DeviceLocal,
        AllocationFlags::empty(),
    );
    assert!(matches!(result, Err(GpuError::InvalidArgument(_))));
    assert_eq!(h.allocator.live_count(), 0);
}

#[test]
fn write_then_read_round_trips_through_mapped_memory() {
    let mut h = Harness::new();
    let buffer = h.resources.create_uniform_buffer(64).unwrap();

    let values: [u32; 4] = [1, 2, 3, 0xDEAD_BEEF];
    h.resources.write_buffer(&buffer, 16, &values).unwrap();

    let flushes = h.allocator.flushes();
    assert_eq!(flushes.len(), 1);
    assert_eq!(flushes[0].offset, 16);
    assert_eq!(flushes[0].size, Some(16));

    let bytes = h.resources.read_buffer(&buffer, 16, 16).unwrap();
    assert_eq!(bytes, bytemuck::cast_slice::<u32, u8>(&values));
    assert_eq!(h.allocator.invalidations().len(), 1);

    let contents = h.allocator.buffer_contents(buffer.handle()).unwrap();
    assert!(contents[..16].iter().all(|&b| b == 0));

    h.resources.destroy_buffer(buffer);
}

#[test]
fn explicit_map_is_balanced_by_write() {
    let mut h = Harness::new();
    let buffer = h
        .resources
        .create_buffer(
            32,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryUsage::Upload,
            AllocationFlags::empty(),
        )
        .unwrap();
    assert!(buffer.mapped_ptr().is_none());

    h.resources.write_buffer(&buffer, 0, &[7u8; 32]).unwrap();
    assert_eq!(h.allocator.open_maps(), 0);
    assert_eq!(
        h.allocator.buffer_contents(buffer.handle()).unwrap(),
        vec![7u8; 32]
    );

    h.resources.destroy_buffer(buffer);
}

#[test]
fn writes_outside_the_buffer_are_rejected() {
    let mut h = Harness::new();
    let buffer = h.resources.create_uniform_buffer(16).unwrap();

    let result = h.resources.write_buffer(&buffer, 8, &[0u8; 16]);
    assert!(matches!(result, Err(GpuError::InvalidArgument(_))));
    assert!(h.allocator.flushes().is_empty());

    h.resources.destroy_buffer(buffer);
}

#[test]
fn device_local_buffers_cannot_be_written() {
    let mut h = Harness::new();
    let buffer = h.resources.create_vertex_buffer(16, false).unwrap();
    assert!(h.resources.write_buffer(&buffer, 0, &[1u8; 4]).is_err());
    h.resources.destroy_buffer(buffer);
}

#[test]
fn map_failure_propagates() {
    let mut h = Harness::new();
    let buffer = h
        .resources
        .create_buffer(
            16,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryUsage::Upload,
            AllocationFlags::empty(),
        )
        .unwrap();

    h.allocator.fail_next_map();
    assert!(h.resources.map_buffer(&buffer).is_err());
    assert!(h.resources.map_buffer(&buffer).is_ok());
    h.resources.unmap_buffer(&buffer);

    h.resources.destroy_buffer(buffer);
}

#[test]
fn allocation_failure_leaves_nothing_behind() {
    let mut h = Harness::new();
    h.allocator.fail_next_allocation();

    let result = h.resources.create_image_2d(
        64,
        64,
        vk::Format::R8G8B8A8_UNORM,
        vk::ImageUsageFlags::SAMPLED,
        1,
    );
    assert!(matches!(result, Err(GpuError::AllocationFailed(_))));
    assert_eq!(h.resources.allocation_count(), 0);
    assert_eq!(h.device.live().image_views, 0);
}

#[test]
fn image_view_failure_releases_the_image() {
    let mut h = Harness::new();
    h.device
        .fail_next(DeviceOp::CreateImageView, vk::Result::ERROR_OUT_OF_HOST_MEMORY);

    let result = h.resources.create_texture_2d(32, 32, vk::Format::R8G8B8A8_SRGB, 1);
    assert!(result.is_err());
    assert_eq!(h.allocator.live_count(), 0);
    assert_eq!(h.allocator.destroyed_count(), 1);
    assert_eq!(h.resources.allocation_count(), 0);
}

#[test]
fn images_carry_a_full_view() {
    let mut h = Harness::new();
    let image = h
        .resources
        .create_texture_2d(128, 64, vk::Format::R8G8B8A8_SRGB, 8)
        .unwrap();

    assert!(image.is_valid());
    assert_eq!(image.mip_levels(), 8);
    assert_eq!(image.array_layers(), 1);
    assert!(image.usage().contains(
        vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::SAMPLED
    ));

    let view = image.view();
    let created = h.device.calls().into_iter().any(|call| {
        matches!(call, Call::CreateImageView { view: v, image: i, aspect }
            if v == view && i == image.handle() && aspect == vk::ImageAspectFlags::COLOR)
    });
    assert!(created);

    h.resources.destroy_image(image);
    h.check_clean().unwrap();
}

#[test]
fn depth_images_use_the_depth_aspect() {
    let mut h = Harness::new();
    let depth = h
        .resources
        .create_image_2d(
            64,
            64,
            vk::Format::D32_SFLOAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            1,
        )
        .unwrap();

    let aspect = h.device.calls().into_iter().find_map(|call| match call {
        Call::CreateImageView { aspect, .. } => Some(aspect),
        _ => None,
    });
    assert_eq!(aspect, Some(vk::ImageAspectFlags::DEPTH));

    h.resources.destroy_image(depth);
}

#[test]
fn invalid_image_requests_are_rejected() {
    let mut h = Harness::new();
    for (w, hgt, mips) in [(0, 16, 1), (16, 0, 1), (16, 16, 0)] {
        let result = h.resources.create_image_2d(
            w,
            hgt,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
            mips,
        );
        assert!(matches!(result, Err(GpuError::InvalidArgument(_))));
    }
    assert_eq!(h.allocator.live_count(), 0);
}

#[test]
fn destroying_sentinels_is_a_no_op() {
    let mut h = Harness::new();
    h.resources.destroy_buffer(AllocatedBuffer::default());
    h.resources.destroy_image(AllocatedImage::default());
    assert_eq!(h.allocator.destroyed_count(), 0);
    h.check_clean().unwrap();
}

#[test]
fn resources_from_another_manager_are_ignored() {
    let mut h = Harness::new();
    let other_allocator = MockAllocator::new();
    let mut other = ResourceManager::new(Arc::clone(&h.device), other_allocator.clone());

    let foreign = other.create_uniform_buffer(16).unwrap();
    let foreign_handle = foreign.handle();
    h.resources.destroy_buffer(foreign);

    assert_eq!(other_allocator.live_count(), 1);
    assert_eq!(h.allocator.destroyed_count(), 0);
    assert!(other_allocator.buffer_contents(foreign_handle).is_some());
}

#[test]
fn uninitialized_manager_refuses_work() {
    let device = Arc::new(MockDevice::new());
    let mut resources: ResourceManager<MockDevice, MockAllocator> =
        ResourceManager::uninitialized(device);

    assert!(!resources.is_initialized());
    assert!(matches!(
        resources.create_uniform_buffer(16),
        Err(GpuError::NotInitialized(_))
    ));
    assert_eq!(resources.statistics().allocation_count, 0);
    assert!(resources.heap_budgets().is_empty());
}

#[test]
fn heap_budgets_report_usage_per_heap() {
    let mut h = Harness::new();
    let vertex = h.resources.create_vertex_buffer(4096, false).unwrap();
    let uniform = h.resources.create_uniform_buffer(256).unwrap();

    let budgets = h.resources.heap_budgets();
    let device_heap = budgets.iter().find(|b| b.device_local).unwrap();
    let host_heap = budgets.iter().find(|b| !b.device_local).unwrap();
    assert_eq!(device_heap.usage, 4096);
    assert_eq!(host_heap.usage, 256);
    assert!(device_heap.budget <= device_heap.size);

    h.resources.destroy_buffer(vertex);
    h.resources.destroy_buffer(uniform);
}

#[test]
fn shutdown_reports_leaks_and_closes_the_manager() {
    let mut h = Harness::new();
    let _leaked = h.resources.create_uniform_buffer(16).unwrap();

    h.resources.shutdown();
    assert!(h.allocator.is_shut_down());
    assert_eq!(h.allocator.leaked_at_shutdown(), 1);
    assert!(!h.resources.is_initialized());
    assert_eq!(h.resources.allocation_count(), 0);
    assert!(h.device.count_calls(|c| matches!(c, Call::WaitIdle)) >= 1);

    // Second shutdown does nothing.
    h.resources.shutdown();
}
