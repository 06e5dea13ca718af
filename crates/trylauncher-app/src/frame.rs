//! Per-frame context for rendering.

use ash::vk;

/// Context for the current frame being recorded.
pub struct FrameContext {
    /// Command buffer for recording rendering commands.
    pub command_buffer: vk::CommandBuffer,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// The swapchain image for this frame.
    pub swapchain_image: vk::Image,
    /// View of the swapchain image.
    pub swapchain_view: vk::ImageView,
    /// Extent of the swapchain image.
    pub extent: vk::Extent2D,
    /// Delta time since last frame in seconds.
    pub dt: f32,
    /// Current frame number.
    pub frame_number: u64,
    /// Frame-in-flight slot.
    pub frame_slot: usize,
}
