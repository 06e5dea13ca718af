//! Command pool lifecycle and submission.

use ash::vk;
use std::sync::Arc;
use trylauncher_gpu::{
    CommandPool, CommandPoolDesc, DeviceContext, GpuError, QueueRole, SubmitBatch,
};
use trylauncher_test::{init_test_logging, Call, DeviceOp, MockDevice};

fn device() -> Arc<MockDevice> {
    init_test_logging();
    Arc::new(MockDevice::new())
}

fn pool(device: &Arc<MockDevice>, initial_buffers: u32) -> CommandPool<MockDevice> {
    CommandPool::new(
        Arc::clone(device),
        CommandPoolDesc {
            initial_buffers,
            ..CommandPoolDesc::default()
        },
    )
    .unwrap()
}

#[test]
fn initial_buffers_are_allocated_up_front() {
    let device = device();
    let pool = pool(&device, 3);

    assert_eq!(pool.buffers().len(), 3);
    assert_eq!(pool.queue_family(), 0);
    assert_eq!(device.live().command_buffers, 3);

    drop(pool);
    assert_eq!(device.live().total(), 0);
    assert!(device.violations().is_empty());
}

#[test]
fn failed_initial_allocation_destroys_the_pool() {
    let device = device();
    device.fail_next(
        DeviceOp::AllocateCommandBuffers,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
    );

    let result = CommandPool::new(
        Arc::clone(&device),
        CommandPoolDesc {
            initial_buffers: 2,
            ..CommandPoolDesc::default()
        },
    );
    assert!(result.is_err());
    assert_eq!(device.live().command_pools, 0);
}

#[test]
fn pool_creation_failure_is_reported() {
    let device = device();
    device.fail_next(
        DeviceOp::CreateCommandPool,
        vk::Result::ERROR_INITIALIZATION_FAILED,
    );
    let result = CommandPool::new(Arc::clone(&device), CommandPoolDesc::default());
    assert!(matches!(
        result,
        Err(GpuError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED))
    ));
}

#[test]
fn free_ignores_buffers_from_elsewhere() {
    let device = device();
    let mut a = pool(&device, 1);
    let b = pool(&device, 1);
    let foreign = b.buffers()[0];

    a.free(foreign);
    assert_eq!(b.buffers(), [foreign]);
    assert_eq!(device.live().command_buffers, 2);

    let own = a.buffers()[0];
    a.free(own);
    assert!(a.buffers().is_empty());
    assert_eq!(device.live().command_buffers, 1);

    drop(a);
    drop(b);
    assert!(device.violations().is_empty());
}

#[test]
fn mismatched_wait_lists_never_reach_the_queue() {
    let device = device();
    let mut pool = pool(&device, 0);
    let cmd = pool.allocate(vk::CommandBufferLevel::PRIMARY).unwrap();
    pool.begin(cmd, vk::CommandBufferUsageFlags::empty()).unwrap();
    pool.end(cmd).unwrap();

    let semaphore = unsafe { device.create_semaphore() }.unwrap();
    let command_buffers = [cmd];
    let waits = [semaphore];
    let result = pool.submit(&SubmitBatch {
        command_buffers: &command_buffers,
        wait_semaphores: &waits,
        wait_stages: &[],
        ..SubmitBatch::default()
    });

    assert!(matches!(result, Err(GpuError::SubmitValidation(_))));
    assert_eq!(
        device.count_calls(|c| matches!(c, Call::QueueSubmit { .. })),
        0
    );

    unsafe { device.destroy_semaphore(semaphore) };
}

#[test]
fn submit_forwards_semaphores_and_fence() {
    let device = device();
    let mut pool = pool(&device, 0);
    let cmd = pool.allocate(vk::CommandBufferLevel::PRIMARY).unwrap();
    pool.begin(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
        .unwrap();
    pool.end(cmd).unwrap();

    let (wait, signal, fence) = unsafe {
        (
            device.create_semaphore().unwrap(),
            device.create_semaphore().unwrap(),
            device.create_fence(false).unwrap(),
        )
    };
    let command_buffers = [cmd];
    pool.submit(&SubmitBatch {
        command_buffers: &command_buffers,
        wait_semaphores: &[wait],
        wait_stages: &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
        signal_semaphores: &[signal],
        fence,
        queue: None,
    })
    .unwrap();

    let submissions = device.submissions();
    let submission = &submissions[0];
    assert_eq!(submission.queue, device.queue(QueueRole::Graphics));
    assert_eq!(submission.command_buffers, vec![cmd]);
    assert_eq!(submission.wait_semaphores, vec![wait]);
    assert_eq!(
        submission.wait_stages,
        vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT]
    );
    assert_eq!(submission.signal_semaphores, vec![signal]);
    assert!(device.is_fence_signaled(fence));

    unsafe {
        device.destroy_semaphore(wait);
        device.destroy_semaphore(signal);
        device.destroy_fence(fence);
    }
    drop(pool);
    assert_eq!(device.live().total(), 0);
    assert!(device.violations().is_empty());
}

#[test]
fn single_time_execution_waits_and_frees() {
    let device = device();
    let mut pool = pool(&device, 0);

    let mut recorded = None;
    pool.execute_single_time(|cmd| recorded = Some(cmd)).unwrap();

    let cmd = recorded.unwrap();
    let calls = device.calls();
    let submitted = calls
        .iter()
        .position(|c| matches!(c, Call::QueueSubmit { .. }))
        .unwrap();
    let waited = calls
        .iter()
        .position(|c| matches!(c, Call::QueueWaitIdle(_)))
        .unwrap();
    let freed = calls
        .iter()
        .position(|c| matches!(c, Call::FreeCommandBuffers(b) if b.as_slice() == [cmd]))
        .unwrap();
    assert!(submitted < waited && waited < freed);
    assert!(pool.buffers().is_empty());
}

#[test]
fn begin_failure_frees_the_one_time_buffer() {
    let device = device();
    let mut pool = pool(&device, 0);
    device.fail_next(DeviceOp::BeginCommandBuffer, vk::Result::ERROR_OUT_OF_HOST_MEMORY);

    assert!(pool.begin_single_time_commands().is_err());
    assert!(pool.buffers().is_empty());
    assert_eq!(device.live().command_buffers, 0);
}

#[test]
fn reset_returns_buffers_to_the_initial_state() {
    let device = device();
    let mut pool = pool(&device, 0);
    let cmd = pool.allocate(vk::CommandBufferLevel::PRIMARY).unwrap();
    pool.begin(cmd, vk::CommandBufferUsageFlags::empty()).unwrap();
    pool.end(cmd).unwrap();

    pool.reset(vk::CommandPoolResetFlags::empty()).unwrap();
    pool.begin(cmd, vk::CommandBufferUsageFlags::empty()).unwrap();
    pool.end(cmd).unwrap();
    pool.reset_buffer(cmd).unwrap();

    assert!(device.violations().is_empty());
}

#[test]
fn destroyed_pool_refuses_work() {
    let device = device();
    let mut pool = pool(&device, 2);

    pool.destroy();
    assert!(!pool.is_initialized());
    assert!(pool.buffers().is_empty());
    assert!(matches!(
        pool.allocate(vk::CommandBufferLevel::PRIMARY),
        Err(GpuError::NotInitialized(_))
    ));

    // Destroying again is harmless.
    pool.destroy();
    assert_eq!(
        device.count_calls(|c| matches!(c, Call::DestroyCommandPool(_))),
        1
    );
    assert!(device.violations().is_empty());
}
