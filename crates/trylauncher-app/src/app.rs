//! `LauncherApp` trait definition.

use crate::context::AppContext;
use crate::frame::FrameContext;
use winit::event::{DeviceEvent, DeviceId, WindowEvent};

/// Trait for TryLauncher applications.
///
/// The framework owns the window, the GPU context, the swapchain and the
/// frame loop. Applications record into the per-frame command buffer and
/// react to input.
pub trait LauncherApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the GPU context, swapchain and engine services
    /// exist. Modules registered on `ctx.modules` here are initialized
    /// right after this returns.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every frame after queued events, modules and the current
    /// scene have been updated.
    ///
    /// # Arguments
    /// * `ctx` - Application context
    /// * `dt` - Delta time in seconds since last frame
    fn update(&mut self, ctx: &mut AppContext, dt: f32);

    /// Record the frame.
    ///
    /// The command buffer is already recording and the swapchain image is
    /// in `UNDEFINED` layout. The application must leave the image in
    /// `PRESENT_SRC_KHR`.
    fn render(&mut self, ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()>;

    /// Called after the swapchain was recreated for a new window size.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle a window event. Return `true` to stop the framework from
    /// processing it further.
    #[allow(unused_variables)]
    fn on_event(&mut self, ctx: &mut AppContext, event: &WindowEvent) -> bool {
        false
    }

    /// Handle raw device input.
    #[allow(unused_variables)]
    fn on_device_event(&mut self, ctx: &mut AppContext, device_id: DeviceId, event: &DeviceEvent) {}

    /// Release application resources. The GPU is idle when this is called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
