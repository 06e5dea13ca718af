//! Test doubles for the TryLauncher GPU layer.
//!
//! - [`MockDevice`]: handle-issuing, call-recording [`DeviceContext`](trylauncher_gpu::DeviceContext)
//! - [`MockAllocator`]: host-memory [`MemoryAllocator`](trylauncher_gpu::MemoryAllocator)
//! - [`MockWindow`]: scripted [`FramebufferSource`](trylauncher_gpu::FramebufferSource)
//!
//! [`Harness`] wires the three together the way the application does.

pub mod allocator;
pub mod device;
pub mod harness;
pub mod window;

pub use allocator::{AllocationRecord, MockAllocator, RangeOp, ResourceKind};
pub use device::{
    AcquireOutcome, BarrierRecord, Call, Command, DeviceOp, LiveObjects, MockDevice, Submission,
    SwapchainRecord,
};
pub use harness::{init_test_logging, Harness, TestError};
pub use window::MockWindow;
