//! Application framework for the TryLauncher engine.
//!
//! This crate provides a trait-based application framework that handles:
//! - Window creation and input routing onto the engine event bus
//! - GPU context, allocator and swapchain setup
//! - The per-frame loop: acquire, record, submit, present, advance
//! - Swapchain recreation on resize, skipped while minimized
//! - Texture loading through a per-path asset cache
//!
//! # Example
//!
//! ```no_run
//! use trylauncher_app::{run_app, AppConfig, AppContext, FrameContext, LauncherApp};
//!
//! struct MyApp;
//!
//! impl LauncherApp for MyApp {
//!     fn init(_ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, _ctx: &mut AppContext, _dt: f32) {}
//!
//!     fn render(&mut self, _ctx: &AppContext, _frame: &mut FrameContext) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::default())
//! }
//! ```

mod app;
pub mod assets;
mod context;
mod frame;
pub mod input;
mod runner;
mod window;

pub use app::LauncherApp;
pub use assets::{AssetError, AssetManager, MipPolicy};
pub use context::AppContext;
pub use frame::FrameContext;
pub use input::InputTranslator;
pub use runner::{init_logging, run_app, AppConfig};
pub use window::WinitWindow;

// Re-export commonly used types for convenience
pub use trylauncher_gpu::{GpuContext, GpuContextBuilder};
pub use winit::event::{DeviceEvent, DeviceId, WindowEvent};
