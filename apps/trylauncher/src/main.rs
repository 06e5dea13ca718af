//! TryLauncher
//!
//! Opens the launcher window, uploads a generated texture and clears the
//! swapchain image every frame with the current scene's color.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p trylauncher -- [--config <PATH>]
//! ```
//!
//! ## Controls
//!
//! - `Tab`: open the settings scene
//! - `Escape`: navigate back
//! - `KeyV`: toggle vsync (applied on next start)
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod launcher;
mod scenes;

use std::path::PathBuf;

use trylauncher_app::{init_logging, run_app, AppConfig};
use trylauncher_core::SettingsStore;

use crate::launcher::Launcher;

const TARGET_FPS: u32 = 144;

fn main() -> anyhow::Result<()> {
    init_logging();

    let config_path = parse_config_path(std::env::args().skip(1))?;

    let mut settings = SettingsStore::new(&config_path);
    if let Err(e) = settings.load() {
        tracing::warn!("Using default settings: {e}");
    }

    let config = AppConfig::from_engine_config("TryLauncher", settings.config())
        .with_settings_path(config_path)
        .with_target_fps(TARGET_FPS);

    run_app::<Launcher>(config)
}

fn parse_config_path(mut args: impl Iterator<Item = String>) -> anyhow::Result<PathBuf> {
    let mut path = PathBuf::from("config.json");
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("{arg} needs a path"))?;
                path = PathBuf::from(value);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(path)
}
