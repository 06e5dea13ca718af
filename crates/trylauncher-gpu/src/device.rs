//! Device context seam.
//!
//! Everything the resource, transfer and presentation layers need from a
//! logical device goes through [`DeviceContext`]. [`GpuContext`](crate::GpuContext)
//! implements it over `ash`; tests drive the same code through a recording mock.

use crate::error::{GpuError, Result};
use ash::vk;

/// Role a queue plays for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Graphics,
    Present,
    Transfer,
}

/// Queue family indices chosen for a physical device.
///
/// One family may serve several roles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueFamilyIndices {
    /// All three roles have a family.
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some() && self.transfer.is_some()
    }

    /// Family index for a role.
    pub fn get(&self, role: QueueRole) -> Option<u32> {
        match role {
            QueueRole::Graphics => self.graphics,
            QueueRole::Present => self.present,
            QueueRole::Transfer => self.transfer,
        }
    }

    /// Graphics family, required by every command pool the engine creates.
    pub fn graphics_family(&self) -> Result<u32> {
        self.graphics.ok_or(GpuError::NotInitialized("graphics queue family"))
    }

    /// Distinct family indices in role order.
    pub fn unique(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(3);
        for family in [self.graphics, self.present, self.transfer].into_iter().flatten() {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }
}

/// Surface capabilities query result.
#[derive(Debug, Clone, Default)]
pub struct SurfaceCapabilities {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceCapabilities {
    /// A surface is usable when it offers at least one format and one present mode.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Window-side collaborator used for extent selection and minimized-window handling.
pub trait FramebufferSource {
    /// Current framebuffer size in pixels. Zero area means minimized.
    fn framebuffer_size(&self) -> (u32, u32);

    /// Block until the window system has new events.
    fn wait_events(&self);
}

/// Device operations consumed by the engine core.
///
/// Methods taking raw handles are `unsafe`: the handles must have been created
/// from this device and must not be in use by the GPU where Vulkan
/// forbids it.
pub trait DeviceContext {
    /// Queue families selected for this device.
    fn queue_families(&self) -> QueueFamilyIndices;

    /// Queue handle for a role. Null when the role has no queue.
    fn queue(&self, role: QueueRole) -> vk::Queue;

    /// Format support of the physical device.
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;

    /// Presentation surface, if the device was created for a window.
    fn surface(&self) -> Option<vk::SurfaceKHR>;

    /// Capabilities, formats and present modes of the presentation surface.
    fn surface_capabilities(&self) -> Result<SurfaceCapabilities>;

    /// Block until the whole device is idle.
    fn wait_idle(&self) -> Result<()>;

    /// Block until a queue is idle.
    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> Result<()>;

    unsafe fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>)
        -> Result<vk::ImageView>;
    unsafe fn destroy_image_view(&self, view: vk::ImageView);

    unsafe fn create_command_pool(
        &self,
        info: &vk::CommandPoolCreateInfo<'_>,
    ) -> Result<vk::CommandPool>;
    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool);
    unsafe fn reset_command_pool(
        &self,
        pool: vk::CommandPool,
        flags: vk::CommandPoolResetFlags,
    ) -> Result<()>;

    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> Result<Vec<vk::CommandBuffer>>;
    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    unsafe fn reset_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferResetFlags,
    ) -> Result<()>;
    unsafe fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo<'_>,
    ) -> Result<()>;
    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> Result<()>;

    unsafe fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    );
    unsafe fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );
    unsafe fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );
    #[allow(clippy::too_many_arguments)]
    unsafe fn cmd_blit_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    );
    unsafe fn cmd_clear_color_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    );

    unsafe fn create_semaphore(&self) -> Result<vk::Semaphore>;
    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    unsafe fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    unsafe fn destroy_fence(&self, fence: vk::Fence);
    unsafe fn wait_for_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> Result<()>;
    unsafe fn reset_fences(&self, fences: &[vk::Fence]) -> Result<()>;

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> Result<vk::SwapchainKHR>;
    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>>;
    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    /// Returns the image index and whether the swapchain is suboptimal.
    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(u32, bool)>;

    /// Returns whether the swapchain is suboptimal.
    unsafe fn queue_present(&self, queue: vk::Queue, info: &vk::PresentInfoKHR<'_>)
        -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_requires_all_roles() {
        let mut indices = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(0),
            transfer: None,
        };
        assert!(!indices.is_complete());

        indices.transfer = Some(1);
        assert!(indices.is_complete());
    }

    #[test]
    fn unique_families_deduplicate_shared_roles() {
        let indices = QueueFamilyIndices {
            graphics: Some(0),
            present: Some(0),
            transfer: Some(2),
        };
        assert_eq!(indices.unique(), vec![0, 2]);
        assert_eq!(indices.get(QueueRole::Transfer), Some(2));
    }

    #[test]
    fn missing_graphics_family_is_reported() {
        let indices = QueueFamilyIndices::default();
        assert!(matches!(
            indices.graphics_family(),
            Err(GpuError::NotInitialized(_))
        ));
    }
}
