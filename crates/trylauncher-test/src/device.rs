//! Recording device double.
//!
//! [`MockDevice`] implements [`DeviceContext`] without a GPU. It hands out
//! unique handles, tracks which objects are alive, records every call and
//! every command recorded into a command buffer, and snapshots command
//! streams at submission. Misuse that a validation layer would flag is
//! collected in [`MockDevice::violations`] instead of failing the call.

use ash::vk::{self, Handle};
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use std::collections::VecDeque;
use trylauncher_gpu::{
    DeviceContext, GpuError, QueueFamilyIndices, QueueRole, Result, SurfaceCapabilities,
};

/// Device calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceOp {
    WaitIdle,
    QueueWaitIdle,
    CreateImageView,
    CreateCommandPool,
    AllocateCommandBuffers,
    BeginCommandBuffer,
    EndCommandBuffer,
    QueueSubmit,
    CreateSemaphore,
    CreateFence,
    WaitForFences,
    CreateSwapchain,
    SwapchainImages,
}

/// One call made against the device.
#[derive(Debug, Clone)]
pub enum Call {
    WaitIdle,
    QueueWaitIdle(vk::Queue),
    CreateImageView {
        view: vk::ImageView,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
    },
    DestroyImageView(vk::ImageView),
    CreateCommandPool {
        pool: vk::CommandPool,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    },
    DestroyCommandPool(vk::CommandPool),
    ResetCommandPool(vk::CommandPool),
    AllocateCommandBuffers(Vec<vk::CommandBuffer>),
    FreeCommandBuffers(Vec<vk::CommandBuffer>),
    ResetCommandBuffer(vk::CommandBuffer),
    BeginCommandBuffer {
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    },
    EndCommandBuffer(vk::CommandBuffer),
    QueueSubmit {
        queue: vk::Queue,
        fence: vk::Fence,
    },
    CreateSemaphore(vk::Semaphore),
    DestroySemaphore(vk::Semaphore),
    CreateFence {
        fence: vk::Fence,
        signaled: bool,
    },
    DestroyFence(vk::Fence),
    WaitForFences(Vec<vk::Fence>),
    ResetFences(Vec<vk::Fence>),
    CreateSwapchain(vk::SwapchainKHR),
    DestroySwapchain(vk::SwapchainKHR),
    AcquireNextImage {
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
    },
    QueuePresent {
        queue: vk::Queue,
        image_index: u32,
    },
}

/// Image barrier fields, copied out of the raw barrier.
#[derive(Debug, Clone, Copy)]
pub struct BarrierRecord {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub range: vk::ImageSubresourceRange,
}

/// One command recorded into a command buffer.
#[derive(Debug, Clone)]
pub enum Command {
    PipelineBarrier {
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barriers: Vec<BarrierRecord>,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        layout: vk::ImageLayout,
        regions: Vec<vk::BufferImageCopy>,
    },
    BlitImage {
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: Vec<vk::ImageBlit>,
        filter: vk::Filter,
    },
    ClearColorImage {
        image: vk::Image,
        layout: vk::ImageLayout,
    },
}

/// A queue submission with the commands its buffers held at submit time.
#[derive(Debug, Clone)]
pub struct Submission {
    pub queue: vk::Queue,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    pub signal_semaphores: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
    pub commands: Vec<Command>,
}

/// Parameters a swapchain was created with.
#[derive(Debug, Clone)]
pub struct SwapchainRecord {
    pub handle: vk::SwapchainKHR,
    pub min_image_count: u32,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
    pub old_swapchain: vk::SwapchainKHR,
}

/// Scripted result of one acquire.
#[derive(Debug, Clone, Copy)]
pub enum AcquireOutcome {
    Image { index: u32, suboptimal: bool },
    Error(vk::Result),
}

/// Counts of objects created and not yet destroyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveObjects {
    pub image_views: usize,
    pub command_pools: usize,
    pub command_buffers: usize,
    pub semaphores: usize,
    pub fences: usize,
    pub swapchains: usize,
}

impl LiveObjects {
    pub fn total(&self) -> usize {
        self.image_views
            + self.command_pools
            + self.command_buffers
            + self.semaphores
            + self.fences
            + self.swapchains
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordingState {
    Initial,
    Recording,
    Executable,
}

#[derive(Debug)]
struct CommandBufferState {
    pool: vk::CommandPool,
    state: RecordingState,
    commands: Vec<Command>,
}

struct Failure {
    op: DeviceOp,
    skip: usize,
    result: vk::Result,
}

struct State {
    next_handle: u64,
    queue_families: QueueFamilyIndices,
    surface: Option<SurfaceCapabilities>,
    format_properties: HashMap<vk::Format, vk::FormatProperties>,

    calls: Vec<Call>,
    submissions: Vec<Submission>,
    swapchain_records: Vec<SwapchainRecord>,
    violations: Vec<String>,
    failures: Vec<Failure>,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<std::result::Result<bool, vk::Result>>,

    image_views: HashSet<vk::ImageView>,
    command_pools: HashSet<vk::CommandPool>,
    command_buffers: HashMap<vk::CommandBuffer, CommandBufferState>,
    semaphores: HashSet<vk::Semaphore>,
    fences: HashMap<vk::Fence, bool>,
    swapchains: HashMap<vk::SwapchainKHR, Vec<vk::Image>>,
    next_image_index: u32,
}

impl State {
    fn handle<H: Handle>(&mut self) -> H {
        self.next_handle += 1;
        H::from_raw(self.next_handle)
    }

    fn fail(&mut self, op: DeviceOp) -> Result<()> {
        let Some(pos) = self.failures.iter().position(|f| f.op == op) else {
            return Ok(());
        };
        if self.failures[pos].skip > 0 {
            self.failures[pos].skip -= 1;
            return Ok(());
        }
        let failure = self.failures.remove(pos);
        Err(GpuError::Vulkan(failure.result))
    }

    fn violation(&mut self, message: String) {
        tracing::warn!("mock device violation: {message}");
        self.violations.push(message);
    }

    fn record(&mut self, cmd: vk::CommandBuffer, command: Command) {
        match self.command_buffers.get_mut(&cmd) {
            Some(buffer) if buffer.state == RecordingState::Recording => {
                buffer.commands.push(command);
                return;
            }
            Some(_) => {}
            None => {
                self.violation(format!("recording into unknown command buffer {cmd:?}"));
                return;
            }
        }
        self.violation(format!("recording into {cmd:?} outside begin/end"));
    }
}

/// Handle-issuing, call-recording stand-in for a Vulkan device.
pub struct MockDevice {
    state: Mutex<State>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// Surface capabilities of a resizable window: the extent follows the
/// framebuffer, two to eight images, sRGB BGRA8, FIFO and MAILBOX.
pub fn default_surface() -> SurfaceCapabilities {
    SurfaceCapabilities {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_DST,
        },
        formats: vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    }
}

/// Format support reported for formats without an override.
pub fn full_format_support() -> vk::FormatProperties {
    let features = vk::FormatFeatureFlags::SAMPLED_IMAGE
        | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR
        | vk::FormatFeatureFlags::BLIT_SRC
        | vk::FormatFeatureFlags::BLIT_DST
        | vk::FormatFeatureFlags::TRANSFER_SRC
        | vk::FormatFeatureFlags::TRANSFER_DST
        | vk::FormatFeatureFlags::COLOR_ATTACHMENT
        | vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
    vk::FormatProperties {
        linear_tiling_features: features,
        optimal_tiling_features: features,
        buffer_features: vk::FormatFeatureFlags::empty(),
    }
}

/// Copy a raw `(pointer, count)` pair out of a Vulkan info struct.
unsafe fn raw_slice<T: Copy>(ptr: *const T, len: u32) -> Vec<T> {
    if ptr.is_null() || len == 0 {
        return Vec::new();
    }
    unsafe { std::slice::from_raw_parts(ptr, len as usize) }.to_vec()
}

const QUEUE_HANDLE_BASE: u64 = 0xC0DE_0000;

impl MockDevice {
    /// One universal queue family with present support and a window surface.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_handle: 0x1000,
                queue_families: QueueFamilyIndices {
                    graphics: Some(0),
                    present: Some(0),
                    transfer: Some(0),
                },
                surface: Some(default_surface()),
                format_properties: HashMap::new(),
                calls: Vec::new(),
                submissions: Vec::new(),
                swapchain_records: Vec::new(),
                violations: Vec::new(),
                failures: Vec::new(),
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                image_views: HashSet::new(),
                command_pools: HashSet::new(),
                command_buffers: HashMap::new(),
                semaphores: HashSet::new(),
                fences: HashMap::new(),
                swapchains: HashMap::new(),
                next_image_index: 0,
            }),
        }
    }

    /// A device with no presentation surface.
    pub fn headless() -> Self {
        let device = Self::new();
        device.set_surface(None);
        device
    }

    pub fn set_queue_families(&self, families: QueueFamilyIndices) {
        self.state.lock().queue_families = families;
    }

    pub fn set_surface(&self, surface: Option<SurfaceCapabilities>) {
        self.state.lock().surface = surface;
    }

    /// Update the surface's current extent, as a window manager would on resize.
    pub fn set_current_extent(&self, extent: vk::Extent2D) {
        if let Some(surface) = self.state.lock().surface.as_mut() {
            surface.capabilities.current_extent = extent;
        }
    }

    pub fn set_format_properties(&self, format: vk::Format, properties: vk::FormatProperties) {
        self.state.lock().format_properties.insert(format, properties);
    }

    /// Fail the call to `op` after `skip` successful calls.
    pub fn fail_nth(&self, op: DeviceOp, skip: usize, result: vk::Result) {
        self.state.lock().failures.push(Failure { op, skip, result });
    }

    /// Fail the next call to `op`.
    pub fn fail_next(&self, op: DeviceOp, result: vk::Result) {
        self.fail_nth(op, 0, result);
    }

    /// Queue the result of an upcoming acquire. Unscripted acquires cycle
    /// through the swapchain's images.
    pub fn script_acquire(&self, outcome: AcquireOutcome) {
        self.state.lock().acquire_script.push_back(outcome);
    }

    /// Queue the result of an upcoming present: `Ok(suboptimal)` or an error.
    pub fn script_present(&self, result: std::result::Result<bool, vk::Result>) {
        self.state.lock().present_script.push_back(result);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn count_calls(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn clear_calls(&self) {
        let mut state = self.state.lock();
        state.calls.clear();
        state.submissions.clear();
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().submissions.clone()
    }

    /// All commands of every submission, in submission order.
    pub fn submitted_commands(&self) -> Vec<Command> {
        self.state
            .lock()
            .submissions
            .iter()
            .flat_map(|s| s.commands.iter().cloned())
            .collect()
    }

    pub fn swapchain_records(&self) -> Vec<SwapchainRecord> {
        self.state.lock().swapchain_records.clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn live(&self) -> LiveObjects {
        let state = self.state.lock();
        LiveObjects {
            image_views: state.image_views.len(),
            command_pools: state.command_pools.len(),
            command_buffers: state.command_buffers.len(),
            semaphores: state.semaphores.len(),
            fences: state.fences.len(),
            swapchains: state.swapchains.len(),
        }
    }

    /// Whether `fence` is alive and signaled.
    pub fn is_fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state.lock().fences.get(&fence).copied().unwrap_or(false)
    }

    /// Fences created and not yet waited on since their last reset or
    /// submission, i.e. frames the CPU has not yet fenced.
    pub fn unsignaled_fences(&self) -> usize {
        self.state.lock().fences.values().filter(|s| !**s).count()
    }

    fn queue_for_family(family: u32) -> vk::Queue {
        vk::Queue::from_raw(QUEUE_HANDLE_BASE + u64::from(family))
    }
}

impl DeviceContext for MockDevice {
    fn queue_families(&self) -> QueueFamilyIndices {
        self.state.lock().queue_families
    }

    fn queue(&self, role: QueueRole) -> vk::Queue {
        self.state
            .lock()
            .queue_families
            .get(role)
            .map_or_else(vk::Queue::null, Self::queue_for_family)
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        self.state
            .lock()
            .format_properties
            .get(&format)
            .copied()
            .unwrap_or_else(full_format_support)
    }

    fn surface(&self) -> Option<vk::SurfaceKHR> {
        self.state
            .lock()
            .surface
            .as_ref()
            .map(|_| vk::SurfaceKHR::from_raw(0x5_0000))
    }

    fn surface_capabilities(&self) -> Result<SurfaceCapabilities> {
        self.state
            .lock()
            .surface
            .clone()
            .ok_or(GpuError::NotInitialized("presentation surface"))
    }

    fn wait_idle(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::WaitIdle);
        state.fail(DeviceOp::WaitIdle)
    }

    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::QueueWaitIdle(queue));
        state.fail(DeviceOp::QueueWaitIdle)
    }

    unsafe fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> Result<vk::ImageView> {
        let mut state = self.state.lock();
        state.fail(DeviceOp::CreateImageView)?;
        if info.image == vk::Image::null() {
            state.violation("image view over a null image".to_string());
        }
        let view = state.handle();
        state.image_views.insert(view);
        state.calls.push(Call::CreateImageView {
            view,
            image: info.image,
            aspect: info.subresource_range.aspect_mask,
        });
        Ok(view)
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state.lock();
        if !state.image_views.remove(&view) {
            state.violation(format!("destroying unknown image view {view:?}"));
        }
        state.calls.push(Call::DestroyImageView(view));
    }

    unsafe fn create_command_pool(
        &self,
        info: &vk::CommandPoolCreateInfo<'_>,
    ) -> Result<vk::CommandPool> {
        let mut state = self.state.lock();
        state.fail(DeviceOp::CreateCommandPool)?;
        let pool = state.handle();
        state.command_pools.insert(pool);
        state.calls.push(Call::CreateCommandPool {
            pool,
            queue_family: info.queue_family_index,
            flags: info.flags,
        });
        Ok(pool)
    }

    unsafe fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.lock();
        if !state.command_pools.remove(&pool) {
            state.violation(format!("destroying unknown command pool {pool:?}"));
        }
        // Buffers allocated from the pool go with it.
        state.command_buffers.retain(|_, cb| cb.pool != pool);
        state.calls.push(Call::DestroyCommandPool(pool));
    }

    unsafe fn reset_command_pool(
        &self,
        pool: vk::CommandPool,
        _flags: vk::CommandPoolResetFlags,
    ) -> Result<()> {
        let mut state = self.state.lock();
        for cb in state.command_buffers.values_mut().filter(|cb| cb.pool == pool) {
            cb.state = RecordingState::Initial;
            cb.commands.clear();
        }
        state.calls.push(Call::ResetCommandPool(pool));
        Ok(())
    }

    unsafe fn allocate_command_buffers(
        &self,
        info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        state.fail(DeviceOp::AllocateCommandBuffers)?;
        if !state.command_pools.contains(&info.command_pool) {
            state.violation(format!(
                "allocating from unknown command pool {:?}",
                info.command_pool
            ));
        }
        let buffers: Vec<vk::CommandBuffer> =
            (0..info.command_buffer_count).map(|_| state.handle()).collect();
        for &cmd in &buffers {
            state.command_buffers.insert(
                cmd,
                CommandBufferState {
                    pool: info.command_pool,
                    state: RecordingState::Initial,
                    commands: Vec::new(),
                },
            );
        }
        state.calls.push(Call::AllocateCommandBuffers(buffers.clone()));
        Ok(buffers)
    }

    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.lock();
        for cmd in buffers {
            match state.command_buffers.remove(cmd) {
                Some(cb) if cb.pool != pool => {
                    state.violation(format!("freeing {cmd:?} through the wrong pool"));
                }
                Some(_) => {}
                None => state.violation(format!("freeing unknown command buffer {cmd:?}")),
            }
        }
        state.calls.push(Call::FreeCommandBuffers(buffers.to_vec()));
    }

    unsafe fn reset_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _flags: vk::CommandBufferResetFlags,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(cb) = state.command_buffers.get_mut(&cmd) {
            cb.state = RecordingState::Initial;
            cb.commands.clear();
        } else {
            state.violation(format!("resetting unknown command buffer {cmd:?}"));
        }
        state.calls.push(Call::ResetCommandBuffer(cmd));
        Ok(())
    }

    unsafe fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        info: &vk::CommandBufferBeginInfo<'_>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.fail(DeviceOp::BeginCommandBuffer)?;
        match state.command_buffers.get(&cmd).map(|cb| cb.state) {
            Some(RecordingState::Recording) => {
                state.violation(format!("begin on {cmd:?} while already recording"));
            }
            Some(_) => {
                if let Some(cb) = state.command_buffers.get_mut(&cmd) {
                    cb.state = RecordingState::Recording;
                    cb.commands.clear();
                }
            }
            None => state.violation(format!("begin on unknown command buffer {cmd:?}")),
        }
        state.calls.push(Call::BeginCommandBuffer {
            cmd,
            flags: info.flags,
        });
        Ok(())
    }

    unsafe fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        state.fail(DeviceOp::EndCommandBuffer)?;
        match state.command_buffers.get(&cmd).map(|cb| cb.state) {
            Some(RecordingState::Recording) => {
                if let Some(cb) = state.command_buffers.get_mut(&cmd) {
                    cb.state = RecordingState::Executable;
                }
            }
            Some(_) => state.violation(format!("end on {cmd:?} while not recording")),
            None => state.violation(format!("end on unknown command buffer {cmd:?}")),
        }
        state.calls.push(Call::EndCommandBuffer(cmd));
        Ok(())
    }

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.fail(DeviceOp::QueueSubmit)?;
        if queue == vk::Queue::null() {
            state.violation("submit to a null queue".to_string());
        }

        for info in submits {
            let (command_buffers, wait_semaphores, wait_stages, signal_semaphores) = unsafe {
                (
                    raw_slice(info.p_command_buffers, info.command_buffer_count),
                    raw_slice(info.p_wait_semaphores, info.wait_semaphore_count),
                    raw_slice(info.p_wait_dst_stage_mask, info.wait_semaphore_count),
                    raw_slice(info.p_signal_semaphores, info.signal_semaphore_count),
                )
            };

            let mut commands = Vec::new();
            for cmd in &command_buffers {
                let recorded = state
                    .command_buffers
                    .get(cmd)
                    .map(|cb| (cb.state, cb.commands.clone()));
                match recorded {
                    Some((RecordingState::Executable, recorded)) => commands.extend(recorded),
                    Some(_) => state.violation(format!("submitting {cmd:?} before it was ended")),
                    None => state.violation(format!("submitting unknown command buffer {cmd:?}")),
                }
            }

            state.submissions.push(Submission {
                queue,
                command_buffers,
                wait_semaphores,
                wait_stages,
                signal_semaphores,
                fence,
                commands,
            });
        }

        if fence != vk::Fence::null() {
            match state.fences.get(&fence).copied() {
                Some(true) => {
                    state.violation(format!("submitting with already signaled fence {fence:?}"));
                }
                // Work completes immediately.
                Some(false) => {
                    state.fences.insert(fence, true);
                }
                None => state.violation(format!("submitting with unknown fence {fence:?}")),
            }
        }

        state.calls.push(Call::QueueSubmit { queue, fence });
        Ok(())
    }

    unsafe fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        let barriers = image_barriers
            .iter()
            .map(|b| BarrierRecord {
                image: b.image,
                old_layout: b.old_layout,
                new_layout: b.new_layout,
                src_access: b.src_access_mask,
                dst_access: b.dst_access_mask,
                range: b.subresource_range,
            })
            .collect();
        self.state.lock().record(
            cmd,
            Command::PipelineBarrier {
                src_stage,
                dst_stage,
                barriers,
            },
        );
    }

    unsafe fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        self.state.lock().record(
            cmd,
            Command::CopyBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    unsafe fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.state.lock().record(
            cmd,
            Command::CopyBufferToImage {
                src,
                dst,
                layout: dst_layout,
                regions: regions.to_vec(),
            },
        );
    }

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
    ) {
        self.state.lock().record(
            cmd,
            Command::BlitImage {
                src,
                src_layout,
                dst,
                dst_layout,
                regions: regions.to_vec(),
                filter,
            },
        );
    }

    unsafe fn cmd_clear_color_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        _color: &vk::ClearColorValue,
        _ranges: &[vk::ImageSubresourceRange],
    ) {
        self.state
            .lock()
            .record(cmd, Command::ClearColorImage { image, layout });
    }

    unsafe fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let mut state = self.state.lock();
        state.fail(DeviceOp::CreateSemaphore)?;
        let semaphore = state.handle();
        state.semaphores.insert(semaphore);
        state.calls.push(Call::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        if !state.semaphores.remove(&semaphore) {
            state.violation(format!("destroying unknown semaphore {semaphore:?}"));
        }
        state.calls.push(Call::DestroySemaphore(semaphore));
    }

    unsafe fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let mut state = self.state.lock();
        state.fail(DeviceOp::CreateFence)?;
        let fence = state.handle();
        state.fences.insert(fence, signaled);
        state.calls.push(Call::CreateFence { fence, signaled });
        Ok(fence)
    }

    unsafe fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        if state.fences.remove(&fence).is_none() {
            state.violation(format!("destroying unknown fence {fence:?}"));
        }
        state.calls.push(Call::DestroyFence(fence));
    }

    unsafe fn wait_for_fences(&self, fences: &[vk::Fence], _timeout_ns: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::WaitForFences(fences.to_vec()));
        state.fail(DeviceOp::WaitForFences)?;
        for fence in fences {
            match state.fences.get(fence).copied() {
                Some(true) => {}
                Some(false) => {
                    // Nothing will ever signal it.
                    state.violation(format!("waiting on unsignaled fence {fence:?} would hang"));
                    return Err(GpuError::Vulkan(vk::Result::TIMEOUT));
                }
                None => {
                    state.violation(format!("waiting on unknown fence {fence:?}"));
                    return Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
                }
            }
        }
        Ok(())
    }

    unsafe fn reset_fences(&self, fences: &[vk::Fence]) -> Result<()> {
        let mut state = self.state.lock();
        for fence in fences {
            if state.fences.contains_key(fence) {
                state.fences.insert(*fence, false);
            } else {
                state.violation(format!("resetting unknown fence {fence:?}"));
            }
        }
        state.calls.push(Call::ResetFences(fences.to_vec()));
        Ok(())
    }

    unsafe fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> Result<vk::SwapchainKHR> {
        let mut state = self.state.lock();
        state.fail(DeviceOp::CreateSwapchain)?;
        if state.surface.is_none() {
            state.violation("swapchain created without a surface".to_string());
        }

        let handle = state.handle();
        let images: Vec<vk::Image> = (0..info.min_image_count).map(|_| state.handle()).collect();
        state.swapchains.insert(handle, images);
        state.next_image_index = 0;

        let queue_family_indices =
            unsafe { raw_slice(info.p_queue_family_indices, info.queue_family_index_count) };
        state.swapchain_records.push(SwapchainRecord {
            handle,
            min_image_count: info.min_image_count,
            format: info.image_format,
            extent: info.image_extent,
            present_mode: info.present_mode,
            sharing_mode: info.image_sharing_mode,
            queue_family_indices,
            old_swapchain: info.old_swapchain,
        });
        state.calls.push(Call::CreateSwapchain(handle));
        Ok(handle)
    }

    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        let mut state = self.state.lock();
        state.fail(DeviceOp::SwapchainImages)?;
        state
            .swapchains
            .get(&swapchain)
            .cloned()
            .ok_or(GpuError::Vulkan(vk::Result::ERROR_UNKNOWN))
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        if state.swapchains.remove(&swapchain).is_none() {
            state.violation(format!("destroying unknown swapchain {swapchain:?}"));
        }
        state.calls.push(Call::DestroySwapchain(swapchain));
    }

    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        semaphore: vk::Semaphore,
        _fence: vk::Fence,
    ) -> Result<(u32, bool)> {
        let mut state = self.state.lock();
        state.calls.push(Call::AcquireNextImage {
            swapchain,
            semaphore,
        });
        if !state.semaphores.contains(&semaphore) {
            state.violation(format!("acquire signaling unknown semaphore {semaphore:?}"));
        }
        let Some(image_count) = state.swapchains.get(&swapchain).map(Vec::len) else {
            state.violation(format!("acquire from unknown swapchain {swapchain:?}"));
            return Err(GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR));
        };

        match state.acquire_script.pop_front() {
            Some(AcquireOutcome::Image { index, suboptimal }) => Ok((index, suboptimal)),
            Some(AcquireOutcome::Error(result)) => Err(GpuError::Vulkan(result)),
            None => {
                let count = u32::try_from(image_count).unwrap_or(u32::MAX).max(1);
                let index = state.next_image_index % count;
                state.next_image_index = state.next_image_index.wrapping_add(1);
                Ok((index, false))
            }
        }
    }

    unsafe fn queue_present(&self, queue: vk::Queue, info: &vk::PresentInfoKHR<'_>) -> Result<bool> {
        let mut state = self.state.lock();
        let indices = unsafe { raw_slice(info.p_image_indices, info.swapchain_count) };
        let image_index = indices.first().copied().unwrap_or(u32::MAX);
        let swapchains = unsafe { raw_slice(info.p_swapchains, info.swapchain_count) };
        state.calls.push(Call::QueuePresent { queue, image_index });
        if queue == vk::Queue::null() {
            state.violation("present on a null queue".to_string());
        }
        for swapchain in swapchains {
            if !state.swapchains.contains_key(&swapchain) {
                state.violation(format!("present to unknown swapchain {swapchain:?}"));
                return Err(GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR));
            }
        }
        match state.present_script.pop_front() {
            Some(Ok(suboptimal)) => Ok(suboptimal),
            Some(Err(result)) => Err(GpuError::Vulkan(result)),
            None => Ok(false),
        }
    }
}
