//! Application context.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use tracing::{error, info};
use trylauncher_core::{EngineContext, ModuleGraph, SceneManager};
use trylauncher_gpu::{
    AllocatedImage, CommandPool, CommandPoolDesc, DeviceContext, GpuAllocator, GpuContext,
    ResourceManager, Swapchain, SwapchainConfig, Transfer, VulkanResources,
    MAX_FRAMES_IN_FLIGHT,
};
use winit::window::Window;

use crate::assets::{self, AssetManager};
use crate::window::WinitWindow;

/// Application context shared across all app methods.
///
/// Owns the GPU services the frame loop drives and the engine services
/// (events, settings, modules, scenes, assets) the application builds on.
pub struct AppContext {
    /// The window handle.
    pub window: Arc<Window>,
    /// GPU context with device and queues.
    pub gpu: Arc<GpuContext>,
    /// Buffer and image lifetimes.
    pub resources: VulkanResources,
    /// One-shot uploads and layout transitions.
    pub transfer: Transfer<GpuContext>,
    /// Presentable image chain and frame sync ring.
    pub swapchain: Swapchain<GpuContext, WinitWindow>,
    /// Event bus and settings store.
    pub engine: EngineContext,
    /// Engine modules, initialized after [`LauncherApp::init`](crate::LauncherApp::init).
    pub modules: ModuleGraph,
    /// Scene registry and navigation history.
    pub scenes: SceneManager,
    /// Texture cache.
    pub assets: AssetManager,
    /// One primary command buffer per frame in flight.
    pub(crate) frame_pool: CommandPool<GpuContext>,
    /// Total frames rendered.
    pub frame_count: u64,
    /// Time of last frame (for delta time calculation).
    pub(crate) last_frame_time: Instant,
}

impl AppContext {
    /// Create the GPU services for `window`.
    pub(crate) fn new(
        window: Arc<Window>,
        gpu: GpuContext,
        engine: EngineContext,
        vsync: bool,
    ) -> anyhow::Result<Self> {
        let gpu = Arc::new(gpu);

        let allocator = GpuAllocator::new(Arc::clone(&gpu))?;
        let resources = ResourceManager::new(Arc::clone(&gpu), allocator);
        let transfer = Transfer::new(Arc::clone(&gpu))?;

        let mut swapchain = Swapchain::new(
            Arc::clone(&gpu),
            Arc::new(WinitWindow(Arc::clone(&window))),
            SwapchainConfig {
                vsync,
                ..SwapchainConfig::default()
            },
        );
        swapchain.initialize()?;

        let frame_pool = CommandPool::new(
            Arc::clone(&gpu),
            CommandPoolDesc {
                queue_family: gpu.queue_families().graphics_family()?,
                flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                initial_buffers: u32::try_from(MAX_FRAMES_IN_FLIGHT)?,
            },
        )?;

        let assets = AssetManager::new(engine.settings.config().asset_path.clone());

        Ok(Self {
            window,
            gpu,
            resources,
            transfer,
            swapchain,
            engine,
            modules: ModuleGraph::new(),
            scenes: SceneManager::new(),
            assets,
            frame_pool,
            frame_count: 0,
            last_frame_time: Instant::now(),
        })
    }

    /// Get the current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Get the aspect ratio (width / height).
    #[allow(clippy::cast_precision_loss)]
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.swapchain.extent();
        extent.width as f32 / extent.height.max(1) as f32
    }

    /// Load a texture through the asset cache.
    pub fn load_texture(&mut self, path: impl AsRef<Path>) -> assets::Result<&AllocatedImage> {
        self.assets
            .load_texture(&mut self.resources, &mut self.transfer, path)
    }

    /// Command buffer of the current frame slot.
    pub(crate) fn frame_command_buffer(&self) -> anyhow::Result<vk::CommandBuffer> {
        self.frame_pool
            .buffers()
            .get(self.swapchain.current_frame())
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no command buffer for frame slot"))
    }

    /// Tear down engine services, then GPU objects.
    ///
    /// The GPU must be idle.
    pub(crate) fn cleanup(&mut self) {
        self.scenes.clear(&mut self.engine);
        self.modules.shutdown(&mut self.engine);

        self.assets.unload_all(&mut self.resources);

        if let Err(e) = self.engine.settings.save() {
            error!("Failed to save settings: {e}");
        }

        self.frame_pool.destroy();
        self.swapchain.destroy();
        self.resources.shutdown();

        info!("Context resources released");
    }
}
