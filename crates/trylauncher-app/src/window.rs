//! winit window adapter for the swapchain.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use trylauncher_gpu::FramebufferSource;
use winit::window::Window;

/// Shares a winit window with the swapchain.
#[derive(Debug, Clone)]
pub struct WinitWindow(pub Arc<Window>);

impl FramebufferSource for WinitWindow {
    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.0.inner_size();
        (size.width, size.height)
    }

    // winit delivers events through the running event loop, so there is no
    // blocking pump to call here. The runner never recreates while
    // minimized; this only backs off if a caller does.
    fn wait_events(&self) {
        thread::sleep(Duration::from_millis(10));
    }
}
