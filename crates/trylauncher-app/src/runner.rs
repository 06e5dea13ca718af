//! Application runner and event loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ash::vk;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use trylauncher_core::{EngineConfig, EngineContext};
use trylauncher_gpu::{DeviceContext, GpuContextBuilder, GpuError, SubmitBatch};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, DeviceId, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::LauncherApp;
use crate::context::AppContext;
use crate::frame::FrameContext;
use crate::input::InputTranslator;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Settings file loaded at startup and saved at exit.
    pub settings_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "TryLauncher".to_string(),
            width: 1280,
            height: 720,
            target_fps: None,
            vsync: true,
            validation: cfg!(debug_assertions),
            settings_path: PathBuf::from("config.json"),
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Window and device settings taken from an engine configuration.
    pub fn from_engine_config(title: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            title: title.into(),
            width: config.graphics.window_width,
            height: config.graphics.window_height,
            vsync: config.graphics.vsync,
            validation: config.graphics.enable_validation,
            settings_path: config.config_path.clone(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    #[must_use]
    pub const fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target FPS.
    #[must_use]
    pub const fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Enable or disable vsync.
    #[must_use]
    pub const fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub const fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the settings file.
    #[must_use]
    pub fn with_settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = path.into();
        self
    }

    fn target_frame_time(&self) -> Option<Duration> {
        self.target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }
}

/// Install the `tracing` subscriber used by the runner.
///
/// Reads `RUST_LOG`, defaulting to `info`. Does nothing if a subscriber is
/// already installed.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

/// Run a `LauncherApp` with the given configuration.
///
/// Initializes logging, creates the window, GPU context and engine
/// services, and runs the event loop until the application exits.
pub fn run_app<A: LauncherApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    init_logging();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        failure: None,
    };

    event_loop.run_app(&mut runner)?;

    match runner.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: LauncherApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    failure: Option<anyhow::Error>,
}

/// Internal application state.
struct AppState<A: LauncherApp> {
    ctx: AppContext,
    app: A,
    input: InputTranslator,
    target_frame_time: Option<Duration>,
    fps: FpsStats,
}

/// Running frame rate extremes and mean.
#[derive(Debug, Clone, Copy)]
struct FpsStats {
    min: f64,
    max: f64,
    sum: f64,
    samples: u64,
}

impl Default for FpsStats {
    fn default() -> Self {
        Self {
            min: f64::MAX,
            max: 0.0,
            sum: 0.0,
            samples: 0,
        }
    }
}

impl FpsStats {
    fn record(&mut self, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        let fps = 1.0 / f64::from(dt);
        self.min = self.min.min(fps);
        self.max = self.max.max(fps);
        self.sum += fps;
        self.samples += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    fn mean(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.sum / self.samples as f64)
    }
}

impl<A: LauncherApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.failure = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else {
            return;
        };

        for input in state.input.translate(&event) {
            state.ctx.engine.events.publish(input);
        }

        if state.app.on_event(&mut state.ctx, &event) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.shutdown(event_loop);
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = state.render_frame() {
                    error!("Render error: {e:#}");
                    self.failure = Some(e);
                    self.shutdown(event_loop);
                }
            }
            WindowEvent::Resized(size) => {
                if size.width > 0 && size.height > 0 {
                    state.ctx.swapchain.mark_out_of_date();
                }
            }
            _ => {}
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        device_id: DeviceId,
        event: DeviceEvent,
    ) {
        if let Some(state) = &mut self.state {
            state.app.on_device_event(&mut state.ctx, device_id, &event);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            // Minimized windows get no frames; wait for a resize instead of spinning.
            if state.is_minimized() {
                event_loop.set_control_flow(ControlFlow::Wait);
            } else {
                event_loop.set_control_flow(ControlFlow::Poll);
                state.ctx.window.request_redraw();
            }
        }
    }
}

impl<A: LauncherApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let mut engine = EngineContext::new(&self.config.settings_path);
        match engine.settings.load() {
            Ok(true) => info!("Settings loaded from {}", self.config.settings_path.display()),
            Ok(false) => {}
            Err(e) => warn!("Ignoring unreadable settings: {e}"),
        }

        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let gpu = GpuContextBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation)
            .build_for_window(window.as_ref())?;

        info!("GPU: {}", gpu.capabilities().summary());

        let mut ctx = AppContext::new(window, gpu, engine, self.config.vsync)?;

        let mut app = A::init(&mut ctx)?;

        if let Err(e) = ctx.modules.initialize(&mut ctx.engine) {
            error!("Module initialization failed: {e}");
            if let Err(e) = ctx.gpu.wait_idle() {
                error!("Failed to wait idle: {e}");
            }
            app.cleanup(&mut ctx);
            ctx.cleanup();
            return Err(e.into());
        }
        info!("Modules initialized: {:?}", ctx.modules.order());

        Ok(AppState {
            ctx,
            app,
            input: InputTranslator::new(),
            target_frame_time: self.config.target_frame_time(),
            fps: FpsStats::default(),
        })
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
        event_loop.exit();
    }
}

impl<A: LauncherApp> AppState<A> {
    fn is_minimized(&self) -> bool {
        let size = self.ctx.window.inner_size();
        size.width == 0 || size.height == 0
    }

    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();

        let now = Instant::now();
        let dt = now.duration_since(self.ctx.last_frame_time).as_secs_f32();
        self.ctx.last_frame_time = now;

        self.fps.record(dt);

        self.ctx.engine.events.process();
        self.ctx.modules.update(&mut self.ctx.engine, dt);
        self.ctx.scenes.update(&mut self.ctx.engine, dt);
        self.app.update(&mut self.ctx, dt);

        if self.is_minimized() {
            return Ok(());
        }

        if self.ctx.swapchain.is_out_of_date() {
            self.recreate_swapchain()?;
        }

        let image_index = match self.ctx.swapchain.acquire_next_image() {
            Ok(index) => index,
            // Recreated at the start of the next frame.
            Err(GpuError::SwapchainOutOfDate) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let sync = *self.ctx.swapchain.frame_sync()?;
        let command_buffer = self.ctx.frame_command_buffer()?;

        self.ctx.frame_pool.reset_buffer(command_buffer)?;
        self.ctx
            .frame_pool
            .begin(command_buffer, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        let mut frame = FrameContext {
            command_buffer,
            image_index,
            swapchain_image: self.ctx.swapchain.images()[image_index as usize],
            swapchain_view: self.ctx.swapchain.image_views()[image_index as usize],
            extent: self.ctx.swapchain.extent(),
            dt,
            frame_number: self.ctx.frame_count,
            frame_slot: self.ctx.swapchain.current_frame(),
        };
        // A failed recording is still submitted so the slot's fence and
        // semaphores complete their cycle.
        let rendered = self.app.render(&self.ctx, &mut frame);

        self.ctx.frame_pool.end(command_buffer)?;

        let command_buffers = [command_buffer];
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::TRANSFER
            | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];
        self.ctx.frame_pool.submit(&SubmitBatch {
            command_buffers: &command_buffers,
            wait_semaphores: &wait_semaphores,
            wait_stages: &wait_stages,
            signal_semaphores: &signal_semaphores,
            fence: sync.in_flight,
            queue: None,
        })?;

        let presented = self.ctx.swapchain.present(image_index);
        self.ctx.swapchain.advance_frame();
        self.ctx.frame_count += 1;

        match presented {
            Ok(()) | Err(GpuError::SwapchainOutOfDate) => {}
            Err(e) => return Err(e.into()),
        }
        rendered?;

        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    fn recreate_swapchain(&mut self) -> anyhow::Result<()> {
        self.ctx.swapchain.recreate()?;

        let extent = self.ctx.swapchain.extent();
        self.app
            .on_resize(&mut self.ctx, extent.width, extent.height)?;

        info!("Resized to {}x{}", extent.width, extent.height);
        Ok(())
    }

    fn cleanup(&mut self) {
        if let Some(mean) = self.fps.mean() {
            info!(
                "{} frames, fps min {:.1} / max {:.1} / mean {mean:.1}",
                self.ctx.frame_count, self.fps.min, self.fps.max
            );
        }
        info!("Swapchain counters: {:?}", self.ctx.swapchain.stats());

        if let Err(e) = self.ctx.gpu.wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        // Application resources go before the services they were created from.
        self.app.cleanup(&mut self.ctx);
        self.ctx.cleanup();

        info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_drives_window_settings() {
        let mut engine = EngineConfig::default();
        engine.graphics.window_width = 1024;
        engine.graphics.window_height = 768;
        engine.graphics.vsync = false;

        let config = AppConfig::from_engine_config("Launcher", &engine);
        assert_eq!(config.title, "Launcher");
        assert_eq!((config.width, config.height), (1024, 768));
        assert!(!config.vsync);
        assert_eq!(config.settings_path, engine.config_path);
    }

    #[test]
    fn fps_stats_ignore_empty_frames() {
        let mut fps = FpsStats::default();
        assert_eq!(fps.mean(), None);

        fps.record(0.0);
        fps.record(0.5);
        fps.record(0.25);
        assert_eq!(fps.samples, 2);
        assert!((fps.min - 2.0).abs() < f64::EPSILON);
        assert!((fps.max - 4.0).abs() < f64::EPSILON);
        assert!((fps.mean().unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn target_fps_sets_frame_budget() {
        let config = AppConfig::new("t").with_target_fps(50);
        assert_eq!(config.target_frame_time(), Some(Duration::from_millis(20)));
        assert_eq!(AppConfig::new("t").with_target_fps(0).target_frame_time(), None);
        assert_eq!(AppConfig::default().target_frame_time(), None);
    }
}
