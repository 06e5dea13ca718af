//! Swapchain management.
//!
//! [`Swapchain`] owns the presentable image chain, one view per image and
//! the ring of per-frame synchronization objects. Its lifecycle is
//! `Uninitialized -> Ready <-> OutOfDate -> Recreating -> Ready`, ending in
//! `Destroyed`.

use crate::device::{DeviceContext, FramebufferSource, QueueRole, SurfaceCapabilities};
use crate::error::{GpuError, Result};
use crate::sync::{FrameSync, FrameSyncRing, MAX_FRAMES_IN_FLIGHT};
use ash::vk;
use std::sync::Arc;

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    Uninitialized,
    Ready,
    OutOfDate,
    Recreating,
    Destroyed,
}

/// Swapchain creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainConfig {
    /// Always use FIFO when set.
    pub vsync: bool,
    /// Overrides the framebuffer size when the surface leaves the extent to us.
    pub preferred_extent: Option<vk::Extent2D>,
    /// Usage of the presentable images.
    pub image_usage: vk::ImageUsageFlags,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            preferred_extent: None,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
        }
    }
}

/// Frame loop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub acquires: u64,
    pub fence_waits: u64,
    pub presents: u64,
    pub recreations: u64,
}

/// Swapchain wrapper.
pub struct Swapchain<D: DeviceContext, W: FramebufferSource> {
    device: Arc<D>,
    window: Arc<W>,
    config: SwapchainConfig,
    state: SwapchainState,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    sync: FrameSyncRing,
    out_of_date: bool,
    stats: FrameStats,
}

impl<D: DeviceContext, W: FramebufferSource> Swapchain<D, W> {
    /// An uninitialized swapchain; call [`initialize`](Self::initialize) next.
    pub fn new(device: Arc<D>, window: Arc<W>, config: SwapchainConfig) -> Self {
        Self {
            device,
            window,
            config,
            state: SwapchainState::Uninitialized,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            surface_format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            sync: FrameSyncRing::default(),
            out_of_date: false,
            stats: FrameStats::default(),
        }
    }

    /// Build the image chain, its views and the frame sync ring.
    ///
    /// Anything created before a failure is destroyed again.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != SwapchainState::Uninitialized {
            return Err(GpuError::InvalidState(format!(
                "swapchain initialize in state {:?}",
                self.state
            )));
        }

        self.create_chain()?;

        match unsafe { FrameSyncRing::new(&*self.device, MAX_FRAMES_IN_FLIGHT) } {
            Ok(ring) => self.sync = ring,
            Err(e) => {
                self.destroy_chain();
                return Err(e);
            }
        }

        self.state = SwapchainState::Ready;
        tracing::info!(
            "Swapchain ready: {}x{} {:?}, {} images, {:?}",
            self.extent.width,
            self.extent.height,
            self.surface_format.format,
            self.images.len(),
            self.present_mode
        );
        Ok(())
    }

    fn create_chain(&mut self) -> Result<()> {
        let surface = self
            .device
            .surface()
            .ok_or(GpuError::NotInitialized("presentation surface"))?;
        let caps = self.device.surface_capabilities()?;

        let surface_format = caps.recommended_format().ok_or_else(|| {
            tracing::error!("Surface reports no formats");
            GpuError::SwapchainCreation("surface reports no formats".to_string())
        })?;
        if caps.present_modes.is_empty() {
            tracing::error!("Surface reports no present modes");
            return Err(GpuError::SwapchainCreation(
                "surface reports no present modes".to_string(),
            ));
        }
        let present_mode = caps.recommended_present_mode(self.config.vsync);
        let extent = choose_extent(
            &caps.capabilities,
            self.window.framebuffer_size(),
            self.config.preferred_extent,
        );
        let image_count = choose_image_count(&caps.capabilities);

        let families = self.device.queue_families();
        let graphics = families.graphics_family()?;
        let present = families.present.unwrap_or(graphics);
        let shared_families = [graphics, present];

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(self.config.image_usage)
            .pre_transform(caps.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());
        create_info = if graphics == present {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&shared_families)
        };

        let swapchain = unsafe { self.device.create_swapchain(&create_info) }.map_err(|e| {
            tracing::error!("Failed to create swapchain: {e}");
            GpuError::SwapchainCreation(e.to_string())
        })?;

        let images = match unsafe { self.device.swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                tracing::error!("Failed to get swapchain images: {e}");
                unsafe { self.device.destroy_swapchain(swapchain) };
                return Err(e);
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );

            match unsafe { self.device.create_image_view(&view_info) } {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    tracing::error!("Failed to create swapchain image view: {e}");
                    unsafe {
                        for view in image_views {
                            self.device.destroy_image_view(view);
                        }
                        self.device.destroy_swapchain(swapchain);
                    }
                    return Err(e);
                }
            }
        }

        self.swapchain = swapchain;
        self.images = images;
        self.image_views = image_views;
        self.surface_format = surface_format;
        self.present_mode = present_mode;
        self.extent = extent;
        Ok(())
    }

    fn destroy_chain(&mut self) {
        unsafe {
            for view in self.image_views.drain(..) {
                self.device.destroy_image_view(view);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.device.destroy_swapchain(self.swapchain);
            }
        }
        self.swapchain = vk::SwapchainKHR::null();
        self.images.clear();
    }

    fn ensure_live(&self) -> Result<()> {
        match self.state {
            SwapchainState::Uninitialized | SwapchainState::Destroyed => {
                Err(GpuError::NotInitialized("swapchain"))
            }
            _ => Ok(()),
        }
    }

    /// Acquire and present need an image chain; a failed recreation leaves none.
    fn ensure_chain(&self) -> Result<()> {
        self.ensure_live()?;
        if self.swapchain == vk::SwapchainKHR::null() {
            return Err(GpuError::SwapchainOutOfDate);
        }
        Ok(())
    }

    /// Wait for the current frame slot to retire and acquire the next image.
    ///
    /// On `ERROR_OUT_OF_DATE_KHR` the swapchain is flagged out of date and
    /// the slot's fence stays signaled so the next attempt does not block.
    pub fn acquire_next_image(&mut self) -> Result<u32> {
        self.ensure_chain()?;
        self.stats.acquires += 1;

        let frame = *self.sync.current();
        unsafe { self.device.wait_for_fences(&[frame.in_flight], u64::MAX) }.map_err(|e| {
            tracing::error!("Failed waiting for in-flight fence: {e}");
            e
        })?;
        self.stats.fence_waits += 1;

        let acquired = unsafe {
            self.device.acquire_next_image(
                self.swapchain,
                u64::MAX,
                frame.image_available,
                vk::Fence::null(),
            )
        };

        match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    tracing::debug!("Acquired image {index} from a suboptimal swapchain");
                }
                unsafe { self.device.reset_fences(&[frame.in_flight]) }?;
                Ok(index)
            }
            Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)) => {
                tracing::debug!("Swapchain out of date on acquire");
                self.mark_out_of_date();
                Err(GpuError::SwapchainOutOfDate)
            }
            Err(e) => {
                tracing::error!("Failed to acquire swapchain image: {e}");
                Err(e)
            }
        }
    }

    /// Present `image_index`, waiting on the current slot's render-finished semaphore.
    ///
    /// Out-of-date and suboptimal results flag the swapchain for recreation
    /// and return [`GpuError::SwapchainOutOfDate`].
    pub fn present(&mut self, image_index: u32) -> Result<()> {
        self.ensure_chain()?;
        self.stats.presents += 1;

        let wait_semaphores = [self.sync.current().render_finished];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let queue = self.device.queue(QueueRole::Present);
        match unsafe { self.device.queue_present(queue, &present_info) } {
            Ok(false) => Ok(()),
            Ok(true) | Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)) => {
                tracing::debug!("Swapchain out of date or suboptimal on present");
                self.mark_out_of_date();
                Err(GpuError::SwapchainOutOfDate)
            }
            Err(e) => {
                tracing::error!("Failed to present swapchain image: {e}");
                Err(e)
            }
        }
    }

    /// Rebuild the image chain for the current window size.
    ///
    /// Blocks while the window is minimized, then waits for the device to
    /// idle. The frame sync ring is kept.
    pub fn recreate(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.state = SwapchainState::Recreating;

        loop {
            let (width, height) = self.window.framebuffer_size();
            if width > 0 && height > 0 {
                break;
            }
            self.window.wait_events();
        }

        if let Err(e) = self.device.wait_idle() {
            self.state = SwapchainState::OutOfDate;
            return Err(e);
        }

        self.destroy_chain();
        if let Err(e) = self.create_chain() {
            tracing::error!("Failed to recreate swapchain: {e}");
            self.out_of_date = true;
            self.state = SwapchainState::OutOfDate;
            return Err(e);
        }

        self.out_of_date = false;
        self.state = SwapchainState::Ready;
        self.stats.recreations += 1;
        tracing::info!(
            "Swapchain recreated: {}x{}",
            self.extent.width,
            self.extent.height
        );
        Ok(())
    }

    /// Move to the next frame slot. Call once per frame, whether or not
    /// present succeeded.
    pub fn advance_frame(&mut self) {
        self.sync.advance();
    }

    /// Flag the swapchain for recreation, e.g. after a window resize.
    pub fn mark_out_of_date(&mut self) {
        self.out_of_date = true;
        if self.state == SwapchainState::Ready {
            self.state = SwapchainState::OutOfDate;
        }
    }

    pub fn is_out_of_date(&self) -> bool {
        self.out_of_date
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Index of the current frame slot.
    pub fn current_frame(&self) -> usize {
        self.sync.current_index()
    }

    /// Sync objects of the current frame slot.
    pub fn frame_sync(&self) -> Result<&FrameSync> {
        if self.sync.is_empty() {
            return Err(GpuError::NotInitialized("frame sync ring"));
        }
        Ok(self.sync.current())
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Wait for the device, then destroy the sync ring and the image chain.
    pub fn destroy(&mut self) {
        if self.state == SwapchainState::Destroyed {
            return;
        }

        if let Err(e) = self.device.wait_idle() {
            tracing::warn!("Device wait idle failed before swapchain teardown: {e}");
        }
        unsafe { self.sync.destroy(&*self.device) };
        self.destroy_chain();
        self.state = SwapchainState::Destroyed;
        tracing::debug!("Swapchain destroyed");
    }
}

impl<D: DeviceContext, W: FramebufferSource> Drop for Swapchain<D, W> {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Select the best surface format.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    // Prefer SRGB
    available
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
}

/// Select the best present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        // Prefer FIFO (vsync)
        vk::PresentModeKHR::FIFO
    } else {
        // Prefer mailbox (triple buffering without vsync)
        for &mode in available {
            if mode == vk::PresentModeKHR::MAILBOX {
                return mode;
            }
        }
        // Fall back to immediate
        for &mode in available {
            if mode == vk::PresentModeKHR::IMMEDIATE {
                return mode;
            }
        }
        // Fall back to FIFO (always supported)
        vk::PresentModeKHR::FIFO
    }
}

/// Pick the swapchain extent.
///
/// A defined current extent wins. Otherwise the framebuffer size, replaced
/// by `preferred` when given, clamped to the surface limits.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    framebuffer: (u32, u32),
    preferred: Option<vk::Extent2D>,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let desired = preferred.unwrap_or(vk::Extent2D {
        width: framebuffer.0,
        height: framebuffer.1,
    });
    vk::Extent2D {
        width: desired.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: desired.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One image more than the minimum, capped at the maximum (0 = unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

impl SurfaceCapabilities {
    /// Preferred format among those the surface reports.
    pub fn recommended_format(&self) -> Option<vk::SurfaceFormatKHR> {
        select_surface_format(&self.formats)
    }

    /// Present mode for the vsync setting among those the surface reports.
    pub fn recommended_present_mode(&self, vsync: bool) -> vk::PresentModeKHR {
        select_present_mode(&self.present_modes, vsync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_srgb_bgra() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(
            select_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_SRGB)
        );
        assert_eq!(
            select_surface_format(&formats[..1]).map(|f| f.format),
            Some(vk::Format::R8G8B8A8_UNORM)
        );
        assert!(select_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_fallbacks() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(select_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(select_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            select_present_mode(&all[..2], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            select_present_mode(&all[..1], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn recommendations_follow_reported_support() {
        let surface = SurfaceCapabilities {
            capabilities: caps((640, 480)),
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };
        assert_eq!(
            surface.recommended_format().map(|f| f.format),
            Some(vk::Format::B8G8R8A8_SRGB)
        );
        assert_eq!(surface.recommended_present_mode(true), vk::PresentModeKHR::FIFO);
        assert_eq!(surface.recommended_present_mode(false), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn defined_current_extent_wins() {
        let extent = choose_extent(&caps((800, 600)), (1024, 768), None);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn undefined_extent_uses_clamped_framebuffer() {
        let caps = caps((u32::MAX, u32::MAX));
        let extent = choose_extent(&caps, (4000, 10), None);
        assert_eq!((extent.width, extent.height), (1920, 64));

        let preferred = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let extent = choose_extent(&caps, (4000, 10), Some(preferred));
        assert_eq!((extent.width, extent.height), (1280, 720));
    }

    #[test]
    fn image_count_is_capped() {
        let mut caps = caps((800, 600));
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);

        caps.max_image_count = 0;
        assert_eq!(choose_image_count(&caps), 3);
    }
}
