//! Vulkan resource, transfer and presentation layer for the TryLauncher engine.
//!
//! This crate provides:
//! - A device seam ([`DeviceContext`]) and its Vulkan implementation ([`GpuContext`])
//! - Buffer and image lifetime management via [`ResourceManager`] over gpu-allocator
//! - Synchronous transfers, layout transitions and mip generation ([`Transfer`])
//! - Command pool management with one-time submission helpers
//! - Swapchain handling with a fixed ring of frames in flight

pub mod allocator;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod device;
pub mod error;
pub mod instance;
pub mod layout;
pub mod memory;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod transfer;

pub use allocator::GpuAllocator;
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use command::{CommandPool, CommandPoolDesc, SubmitBatch};
pub use context::{GpuContext, GpuContextBuilder};
pub use device::{DeviceContext, FramebufferSource, QueueFamilyIndices, QueueRole, SurfaceCapabilities};
pub use error::{GpuError, Result};
pub use layout::{mip_levels_for, TransitionMasks};
pub use memory::{
    AllocatedBuffer, AllocatedImage, AllocationFlags, AllocationHandle, AllocationInfo,
    AllocationRequest, HeapBudget, MemoryAllocator, MemoryStatistics, MemoryUsage,
    ResourceManager,
};
pub use surface::SurfaceContext;
pub use swapchain::{FrameStats, Swapchain, SwapchainConfig, SwapchainState};
pub use sync::{FrameSync, FrameSyncRing, MAX_FRAMES_IN_FLIGHT};
pub use texture::{upload_texture_rgba8, TEXTURE_FORMAT};
pub use transfer::Transfer;

/// Resource manager backed by the Vulkan device and gpu-allocator.
pub type VulkanResources = ResourceManager<GpuContext, GpuAllocator>;
