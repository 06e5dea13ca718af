//! Core services for the TryLauncher engine.
//!
//! This crate provides the engine-level plumbing that sits around the GPU core:
//! - Engine configuration with validation and JSON persistence
//! - A typed event bus
//! - Module lifecycle ordered by declared dependencies
//! - Scene registry and navigation history

pub mod config;
pub mod error;
pub mod event;
pub mod module;
pub mod scene;

pub use config::{EngineConfig, SettingPath, SettingValue, SettingsChanged, SettingsStore};
pub use error::{Error, Result};
pub use event::{EventBus, InputEvent};
pub use module::{EngineContext, EngineModule, ModuleGraph};
pub use scene::{Scene, SceneChanged, SceneManager};
