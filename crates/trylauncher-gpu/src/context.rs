//! GPU context management.

use crate::capabilities::GpuCapabilities;
use crate::device::{
    DeviceContext, QueueFamilyIndices, QueueRole, SurfaceCapabilities,
};
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device, DebugMessenger};
use crate::surface::SurfaceContext;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::ffi::c_char;

/// Main GPU context holding Vulkan resources.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    surface: Option<SurfaceContext>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    swapchain_loader: Option<ash::khr::swapchain::Device>,
    capabilities: GpuCapabilities,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    memory_budget_enabled: bool,

    queue_families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    transfer_queue: vk::Queue,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Memory types and heaps of the physical device.
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Whether `VK_EXT_memory_budget` was enabled on the device.
    pub fn memory_budget_enabled(&self) -> bool {
        self.memory_budget_enabled
    }

    /// Find a memory type index matching `type_filter` with all of `properties`.
    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        find_memory_type(&self.memory_properties, type_filter, properties).ok_or_else(|| {
            GpuError::AllocationFailed(format!(
                "no memory type for filter {type_filter:#x} with {properties:?}"
            ))
        })
    }

    /// First candidate format supporting `features` with `tiling`.
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Result<vk::Format> {
        select_supported_format(candidates, tiling, features, |format| {
            self.format_properties(format)
        })
        .ok_or_else(|| GpuError::Other(format!("no supported format among {candidates:?}")))
    }

    /// Best depth attachment format.
    pub fn find_depth_format(&self) -> Result<vk::Format> {
        self.find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    fn swapchain_loader(&self) -> Result<&ash::khr::swapchain::Device> {
        self.swapchain_loader
            .as_ref()
            .ok_or(GpuError::NotInitialized("swapchain loader"))
    }
}

impl DeviceContext for GpuContext {
    fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    fn queue(&self, role: QueueRole) -> vk::Queue {
        match role {
            QueueRole::Graphics => self.graphics_queue,
            QueueRole::Present => self.present_queue,
            QueueRole::Transfer => self.transfer_queue,
        }
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    fn surface(&self) -> Option<vk::SurfaceKHR> {
        self.surface.as_ref().map(|surface| surface.surface)
    }

    fn surface_capabilities(&self) -> Result<SurfaceCapabilities> {
        let surface = self
            .surface
            .as_ref()
            .ok_or(GpuError::NotInitialized("presentation surface"))?;
        unsafe { surface.capabilities(self.physical_device) }
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }

    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> Result<()> {
        unsafe { self.device.queue_wait_idle(queue) }?;
        Ok(())
    }

    unsafe fn create_image_view(
        &self,
        info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView> {
        Ok(unsafe { self.device.create_image_view(info, None) }?)
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    unsafe fn create_command_pool(
        &self,
        info: &vk::CommandPoolCreateInfo<'_>,
    ) -> Result<vk::CommandPool> {
        Ok(unsafe { self.device.create_command_pool(info, None) }?)
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    unsafe fn reset_command_pool(
        &self,
        pool: vk::CommandPool,
        flags: vk::CommandPoolResetFlags,
    ) -> Result<()> {
        Ok(unsafe { self.device.reset_command_pool(pool, flags) }?)
    }

    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> Result<Vec<vk::CommandBuffer>> {
        Ok(unsafe { self.device.allocate_command_buffers(info) }?)
    }

    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) };
    }

    unsafe fn reset_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferResetFlags,
    ) -> Result<()> {
        Ok(unsafe { self.device.reset_command_buffer(cmd, flags) }?)
    }

    unsafe fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo<'_>,
    ) -> Result<()> {
        Ok(unsafe { self.device.begin_command_buffer(cmd, info) }?)
    }

    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        Ok(unsafe { self.device.end_command_buffer(cmd) }?)
    }

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> Result<()> {
        Ok(unsafe { self.device.queue_submit(queue, submits, fence) }?)
    }

    unsafe fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                image_barriers,
            );
        }
    }

    unsafe fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, regions) };
    }

    unsafe fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(cmd, src, dst, dst_layout, regions);
        }
    }

    unsafe fn cmd_blit_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        unsafe {
            self.device
                .cmd_blit_image(cmd, src, src_layout, dst, dst_layout, regions, filter);
        }
    }

    unsafe fn cmd_clear_color_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        unsafe {
            self.device
                .cmd_clear_color_image(cmd, image, layout, color, ranges);
        }
    }

    unsafe fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::default();
        Ok(unsafe { self.device.create_semaphore(&create_info, None) }?)
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    unsafe fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        Ok(unsafe { self.device.create_fence(&create_info, None) }?)
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    unsafe fn wait_for_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> Result<()> {
        Ok(unsafe { self.device.wait_for_fences(fences, true, timeout_ns) }?)
    }

    unsafe fn reset_fences(&self, fences: &[vk::Fence]) -> Result<()> {
        Ok(unsafe { self.device.reset_fences(fences) }?)
    }

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> Result<vk::SwapchainKHR> {
        let loader = self.swapchain_loader()?;
        Ok(unsafe { loader.create_swapchain(info, None) }?)
    }

    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        let loader = self.swapchain_loader()?;
        Ok(unsafe { loader.get_swapchain_images(swapchain) }?)
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        if let Some(loader) = &self.swapchain_loader {
            unsafe { loader.destroy_swapchain(swapchain, None) };
        }
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(u32, bool)> {
        let loader = self.swapchain_loader()?;
        Ok(unsafe { loader.acquire_next_image(swapchain, timeout_ns, semaphore, fence) }?)
    }

    unsafe fn queue_present(
        &self,
        queue: vk::Queue,
        info: &vk::PresentInfoKHR<'_>,
    ) -> Result<bool> {
        let loader = self.swapchain_loader()?;
        Ok(unsafe { loader.queue_present(queue, info) }?)
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
            if let Some(surface) = self.surface.take() {
                surface.destroy();
            }
            if let Some(debug) = self.debug.take() {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First of `candidates` whose `tiling` features contain `features`.
pub fn select_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    properties: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| {
        let props = properties(format);
        match tiling {
            vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
            vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
            _ => false,
        }
    })
}

/// Find a memory type index matching `type_filter` with all of `properties`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        type_filter & (1 << i) != 0
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(properties)
    })
}

/// Instance-level objects created during bootstrap, destroyed on drop
/// unless handed over to a [`GpuContext`].
struct InstanceGuard {
    instance: Option<ash::Instance>,
    debug: Option<DebugMessenger>,
    surface: Option<SurfaceContext>,
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        unsafe {
            if let Some(surface) = self.surface.take() {
                surface.destroy();
            }
            if let Some(debug) = self.debug.take() {
                debug.destroy();
            }
            if let Some(instance) = self.instance.take() {
                instance.destroy_instance(None);
            }
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "TryLauncher".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build a context without a presentation surface.
    pub fn build(self) -> Result<GpuContext> {
        self.build_inner(None)
    }

    /// Build a context presenting to `window`.
    pub fn build_for_window<W>(self, window: &W) -> Result<GpuContext>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        self.build_inner(Some((display.as_raw(), window_handle.as_raw())))
    }

    fn build_inner(self, window: Option<(RawDisplayHandle, RawWindowHandle)>) -> Result<GpuContext> {
        // Load Vulkan entry point
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        let instance = unsafe {
            create_instance(
                &entry,
                &self.app_name,
                self.enable_validation,
                window.map(|(display, _)| display),
            )
        }
        .map_err(|e| {
            tracing::error!("Failed to create Vulkan instance: {e}");
            e
        })?;

        let mut guard = InstanceGuard {
            instance: Some(instance),
            debug: None,
            surface: None,
        };
        let Some(instance) = guard.instance.clone() else {
            return Err(GpuError::NotInitialized("instance"));
        };

        if self.enable_validation {
            match unsafe { DebugMessenger::new(&entry, &instance) } {
                Ok(debug) => guard.debug = Some(debug),
                Err(e) => tracing::warn!("Validation messages unavailable: {e}"),
            }
        }

        if let Some((display, window)) = window {
            guard.surface = Some(unsafe { SurfaceContext::new(&entry, &instance, display, window) }?);
        }

        // Select best physical device
        let candidate = unsafe { select_physical_device(&instance, guard.surface.as_ref()) }
            .map_err(|e| {
                tracing::error!("No suitable GPU: {e}");
                e
            })?;
        let physical_device = candidate.physical_device;
        let capabilities = candidate.capabilities;
        let queue_families = candidate.queue_families;

        tracing::info!("Selected GPU: {}", capabilities.summary());

        let memory_budget_enabled = capabilities.supports_memory_budget;
        let device = unsafe {
            create_device(
                &instance,
                physical_device,
                &queue_families,
                guard.surface.is_some(),
                memory_budget_enabled,
            )
        }?;

        let queue_of = |family: Option<u32>| {
            family.map_or(vk::Queue::null(), |family| unsafe {
                device.get_device_queue(family, 0)
            })
        };
        let graphics_queue = queue_of(queue_families.graphics);
        let present_queue = queue_of(queue_families.present);
        let transfer_queue = queue_of(queue_families.transfer);

        let swapchain_loader = guard
            .surface
            .is_some()
            .then(|| ash::khr::swapchain::Device::new(&instance, &device));
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        // Ownership moves to the context from here on.
        let debug = guard.debug.take();
        let surface = guard.surface.take();
        guard.instance = None;

        Ok(GpuContext {
            entry,
            instance,
            debug,
            surface,
            physical_device,
            device,
            swapchain_loader,
            capabilities,
            memory_properties,
            memory_budget_enabled,
            queue_families,
            graphics_queue,
            present_queue,
            transfer_queue,
        })
    }
}

/// Create the logical device with one queue per unique family.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: &QueueFamilyIndices,
    presenting: bool,
    memory_budget: bool,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let mut extension_names: Vec<*const c_char> = Vec::new();
    if presenting {
        extension_names.push(ash::khr::swapchain::NAME.as_ptr());
    }
    if memory_budget {
        extension_names.push(ash::ext::memory_budget::NAME.as_ptr());
    }
    #[cfg(target_os = "macos")]
    extension_names.push(ash::khr::portability_subset::NAME.as_ptr());

    let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(physical_device, &device_create_info, None) }
        .map_err(|e| {
            tracing::error!("Failed to create logical device: {e}");
            GpuError::from(e)
        })?;

    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties() -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        props.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        props.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        props.memory_types[2].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE
            | vk::MemoryPropertyFlags::HOST_COHERENT
            | vk::MemoryPropertyFlags::HOST_CACHED;
        props
    }

    #[test]
    fn memory_type_respects_filter_and_flags() {
        let props = memory_properties();
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Some(1)
        );
        assert_eq!(
            find_memory_type(&props, 0b100, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Some(2)
        );
        assert_eq!(
            find_memory_type(&props, 0b001, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
    }

    #[test]
    fn depth_format_falls_back_to_first_supported_candidate() {
        let attachment = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        let only_d24 = |format| {
            if format == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatProperties {
                    optimal_tiling_features: attachment,
                    ..Default::default()
                }
            } else {
                vk::FormatProperties {
                    linear_tiling_features: attachment,
                    ..Default::default()
                }
            }
        };

        assert_eq!(
            select_supported_format(
                &DEPTH_FORMAT_CANDIDATES,
                vk::ImageTiling::OPTIMAL,
                attachment,
                only_d24
            ),
            Some(vk::Format::D24_UNORM_S8_UINT)
        );
        assert_eq!(
            select_supported_format(
                &DEPTH_FORMAT_CANDIDATES,
                vk::ImageTiling::LINEAR,
                attachment,
                only_d24
            ),
            Some(vk::Format::D32_SFLOAT)
        );
        assert_eq!(
            select_supported_format(
                &DEPTH_FORMAT_CANDIDATES,
                vk::ImageTiling::OPTIMAL,
                attachment,
                |_| vk::FormatProperties::default()
            ),
            None
        );
    }
}
