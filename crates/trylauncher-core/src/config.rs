//! Engine configuration and the persistent settings store.
//!
//! [`EngineConfig`] is a plain serde struct stored as JSON. Individual
//! values are addressed by [`SettingPath`], parsed once from dotted names
//! such as `graphics.vsync`; every path maps to exactly one field.

use crate::error::{Error, Result};
use crate::event::EventBus;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

pub const MIN_WINDOW_WIDTH: u32 = 800;
pub const MAX_WINDOW_WIDTH: u32 = 7680;
pub const MIN_WINDOW_HEIGHT: u32 = 600;
pub const MAX_WINDOW_HEIGHT: u32 = 4320;
pub const MSAA_SAMPLE_COUNTS: [u32; 5] = [1, 2, 4, 8, 16];
pub const MIN_VOLUME: f32 = 0.0;
pub const MAX_VOLUME: f32 = 1.0;
pub const MIN_MOUSE_SENSITIVITY: f32 = 0.1;
pub const MAX_MOUSE_SENSITIVITY: f32 = 5.0;

/// Window and device settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub window_width: u32,
    pub window_height: u32,
    pub fullscreen: bool,
    pub vsync: bool,
    pub msaa_samples: u32,
    pub enable_validation: bool,
    /// Device name to prefer, or `auto`.
    pub preferred_gpu: String,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            window_width: 1920,
            window_height: 1080,
            fullscreen: false,
            vsync: true,
            msaa_samples: 1,
            enable_validation: false,
            preferred_gpu: "auto".to_string(),
        }
    }
}

/// Volume levels and output device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub master_volume: f32,
    pub music_volume: f32,
    pub sfx_volume: f32,
    pub device: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            master_volume: 1.0,
            music_volume: 0.8,
            sfx_volume: 1.0,
            device: "default".to_string(),
        }
    }
}

/// Key bindings and pointer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Action name to physical key name.
    pub key_bindings: BTreeMap<String, String>,
    pub mouse_sensitivity: f32,
}

impl Default for InputConfig {
    fn default() -> Self {
        let key_bindings = [
            ("navigate_up", "ArrowUp"),
            ("navigate_down", "ArrowDown"),
            ("navigate_left", "ArrowLeft"),
            ("navigate_right", "ArrowRight"),
            ("confirm", "Enter"),
            ("back", "Escape"),
        ]
        .into_iter()
        .map(|(action, key)| (action.to_string(), key.to_string()))
        .collect();

        Self {
            key_bindings,
            mouse_sensitivity: 1.0,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub graphics: GraphicsConfig,
    pub audio: AudioConfig,
    pub input: InputConfig,
    pub asset_path: PathBuf,
    pub config_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            graphics: GraphicsConfig::default(),
            audio: AudioConfig::default(),
            input: InputConfig::default(),
            asset_path: PathBuf::from("assets"),
            config_path: PathBuf::from("config.json"),
        }
    }
}

impl EngineConfig {
    /// Check every value against its allowed range.
    pub fn validate(&self) -> Result<()> {
        for path in SettingPath::ALL {
            validate_value(path, &self.get(path))?;
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Current value at `path`.
    pub fn get(&self, path: SettingPath) -> SettingValue {
        match path {
            SettingPath::WindowWidth => SettingValue::Int(self.graphics.window_width),
            SettingPath::WindowHeight => SettingValue::Int(self.graphics.window_height),
            SettingPath::Fullscreen => SettingValue::Bool(self.graphics.fullscreen),
            SettingPath::Vsync => SettingValue::Bool(self.graphics.vsync),
            SettingPath::MsaaSamples => SettingValue::Int(self.graphics.msaa_samples),
            SettingPath::EnableValidation => SettingValue::Bool(self.graphics.enable_validation),
            SettingPath::PreferredGpu => SettingValue::Text(self.graphics.preferred_gpu.clone()),
            SettingPath::MasterVolume => SettingValue::Float(self.audio.master_volume),
            SettingPath::MusicVolume => SettingValue::Float(self.audio.music_volume),
            SettingPath::SfxVolume => SettingValue::Float(self.audio.sfx_volume),
            SettingPath::AudioDevice => SettingValue::Text(self.audio.device.clone()),
            SettingPath::MouseSensitivity => SettingValue::Float(self.input.mouse_sensitivity),
            SettingPath::AssetPath => {
                SettingValue::Text(self.asset_path.to_string_lossy().into_owned())
            }
            SettingPath::ConfigPath => {
                SettingValue::Text(self.config_path.to_string_lossy().into_owned())
            }
        }
    }

    /// Validate and store `value` at `path`, returning the previous value.
    ///
    /// The config is unchanged when the value is rejected.
    pub fn set(&mut self, path: SettingPath, value: SettingValue) -> Result<SettingValue> {
        validate_value(path, &value)?;
        let old = self.get(path);

        match path {
            SettingPath::WindowWidth => self.graphics.window_width = value.expect_int(path)?,
            SettingPath::WindowHeight => self.graphics.window_height = value.expect_int(path)?,
            SettingPath::Fullscreen => self.graphics.fullscreen = value.expect_bool(path)?,
            SettingPath::Vsync => self.graphics.vsync = value.expect_bool(path)?,
            SettingPath::MsaaSamples => self.graphics.msaa_samples = value.expect_int(path)?,
            SettingPath::EnableValidation => {
                self.graphics.enable_validation = value.expect_bool(path)?;
            }
            SettingPath::PreferredGpu => self.graphics.preferred_gpu = value.expect_text(path)?,
            SettingPath::MasterVolume => self.audio.master_volume = value.expect_float(path)?,
            SettingPath::MusicVolume => self.audio.music_volume = value.expect_float(path)?,
            SettingPath::SfxVolume => self.audio.sfx_volume = value.expect_float(path)?,
            SettingPath::AudioDevice => self.audio.device = value.expect_text(path)?,
            SettingPath::MouseSensitivity => {
                self.input.mouse_sensitivity = value.expect_float(path)?;
            }
            SettingPath::AssetPath => self.asset_path = PathBuf::from(value.expect_text(path)?),
            SettingPath::ConfigPath => self.config_path = PathBuf::from(value.expect_text(path)?),
        }

        Ok(old)
    }
}

/// A single addressable setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SettingPath {
    WindowWidth,
    WindowHeight,
    Fullscreen,
    Vsync,
    MsaaSamples,
    EnableValidation,
    PreferredGpu,
    MasterVolume,
    MusicVolume,
    SfxVolume,
    AudioDevice,
    MouseSensitivity,
    AssetPath,
    ConfigPath,
}

impl SettingPath {
    pub const ALL: [Self; 14] = [
        Self::WindowWidth,
        Self::WindowHeight,
        Self::Fullscreen,
        Self::Vsync,
        Self::MsaaSamples,
        Self::EnableValidation,
        Self::PreferredGpu,
        Self::MasterVolume,
        Self::MusicVolume,
        Self::SfxVolume,
        Self::AudioDevice,
        Self::MouseSensitivity,
        Self::AssetPath,
        Self::ConfigPath,
    ];

    /// Dotted name, matching the JSON layout.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WindowWidth => "graphics.window_width",
            Self::WindowHeight => "graphics.window_height",
            Self::Fullscreen => "graphics.fullscreen",
            Self::Vsync => "graphics.vsync",
            Self::MsaaSamples => "graphics.msaa_samples",
            Self::EnableValidation => "graphics.enable_validation",
            Self::PreferredGpu => "graphics.preferred_gpu",
            Self::MasterVolume => "audio.master_volume",
            Self::MusicVolume => "audio.music_volume",
            Self::SfxVolume => "audio.sfx_volume",
            Self::AudioDevice => "audio.device",
            Self::MouseSensitivity => "input.mouse_sensitivity",
            Self::AssetPath => "asset_path",
            Self::ConfigPath => "config_path",
        }
    }
}

impl fmt::Display for SettingPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|path| path.as_str() == s)
            .ok_or_else(|| Error::UnknownSetting(s.to_string()))
    }
}

/// A typed setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(u32),
    Float(f32),
    Text(String),
}

impl SettingValue {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "string",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<u32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Floats, and integers widened to float.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    fn mismatch(path: SettingPath, expected: &'static str) -> Error {
        Error::TypeMismatch {
            path: path.to_string(),
            expected,
        }
    }

    fn expect_bool(&self, path: SettingPath) -> Result<bool> {
        self.as_bool().ok_or_else(|| Self::mismatch(path, "bool"))
    }

    fn expect_int(&self, path: SettingPath) -> Result<u32> {
        self.as_int().ok_or_else(|| Self::mismatch(path, "integer"))
    }

    fn expect_float(&self, path: SettingPath) -> Result<f32> {
        self.as_float().ok_or_else(|| Self::mismatch(path, "float"))
    }

    fn expect_text(&self, path: SettingPath) -> Result<String> {
        self.as_text()
            .map(str::to_string)
            .ok_or_else(|| Self::mismatch(path, "string"))
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u32> for SettingValue {
    fn from(v: u32) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for SettingValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Check `value` against the type and range allowed at `path`.
pub fn validate_value(path: SettingPath, value: &SettingValue) -> Result<()> {
    let out_of_range = |reason: String| {
        Err(Error::InvalidSetting {
            path: path.to_string(),
            reason,
        })
    };

    match path {
        SettingPath::WindowWidth => {
            let v = value.expect_int(path)?;
            if !(MIN_WINDOW_WIDTH..=MAX_WINDOW_WIDTH).contains(&v) {
                return out_of_range(format!(
                    "{v} outside {MIN_WINDOW_WIDTH}..={MAX_WINDOW_WIDTH}"
                ));
            }
        }
        SettingPath::WindowHeight => {
            let v = value.expect_int(path)?;
            if !(MIN_WINDOW_HEIGHT..=MAX_WINDOW_HEIGHT).contains(&v) {
                return out_of_range(format!(
                    "{v} outside {MIN_WINDOW_HEIGHT}..={MAX_WINDOW_HEIGHT}"
                ));
            }
        }
        SettingPath::MsaaSamples => {
            let v = value.expect_int(path)?;
            if !MSAA_SAMPLE_COUNTS.contains(&v) {
                return out_of_range(format!("{v} is not one of {MSAA_SAMPLE_COUNTS:?}"));
            }
        }
        SettingPath::MasterVolume | SettingPath::MusicVolume | SettingPath::SfxVolume => {
            let v = value.expect_float(path)?;
            if !(MIN_VOLUME..=MAX_VOLUME).contains(&v) {
                return out_of_range(format!("{v} outside {MIN_VOLUME}..={MAX_VOLUME}"));
            }
        }
        SettingPath::MouseSensitivity => {
            let v = value.expect_float(path)?;
            if !(MIN_MOUSE_SENSITIVITY..=MAX_MOUSE_SENSITIVITY).contains(&v) {
                return out_of_range(format!(
                    "{v} outside {MIN_MOUSE_SENSITIVITY}..={MAX_MOUSE_SENSITIVITY}"
                ));
            }
        }
        SettingPath::Fullscreen | SettingPath::Vsync | SettingPath::EnableValidation => {
            value.expect_bool(path)?;
        }
        SettingPath::PreferredGpu | SettingPath::AudioDevice => {
            value.expect_text(path)?;
        }
        SettingPath::AssetPath | SettingPath::ConfigPath => {
            if value.expect_text(path)?.is_empty() {
                return out_of_range("path must not be empty".to_string());
            }
        }
    }

    Ok(())
}

/// Published on the event bus after a setting changes.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsChanged {
    pub path: SettingPath,
    pub old: SettingValue,
    pub new: SettingValue,
}

type ChangeCallback = Box<dyn Fn(SettingPath, &SettingValue) + Send + Sync>;

/// Owns the live configuration, persists it and reports changes.
pub struct SettingsStore {
    config: EngineConfig,
    path: PathBuf,
    callbacks: HashMap<SettingPath, Vec<ChangeCallback>>,
    events: Option<Arc<EventBus>>,
}

impl SettingsStore {
    /// A store holding the default configuration, persisted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = EngineConfig {
            config_path: path.clone(),
            ..EngineConfig::default()
        };
        Self {
            config,
            path,
            callbacks: HashMap::new(),
            events: None,
        }
    }

    /// Publish [`SettingsChanged`] on `events` for every change.
    #[must_use]
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load from the store's path. A missing file keeps the current
    /// configuration and returns `false`.
    pub fn load(&mut self) -> Result<bool> {
        let path = self.path.clone();
        self.load_from(&path)
    }

    /// Load from `path`, replacing the configuration only when the file
    /// parses and validates.
    pub fn load_from(&mut self, path: &Path) -> Result<bool> {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No settings at {}, using defaults", path.display());
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let config = EngineConfig::from_json(&json).map_err(|e| {
            tracing::error!("Rejected settings file {}: {e}", path.display());
            e
        })?;
        self.apply(config);
        tracing::info!("Loaded settings from {}", path.display());
        Ok(true)
    }

    /// Save to the store's path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&self.path)
    }

    /// Write the configuration as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.config.to_json()?)?;
        tracing::debug!("Saved settings to {}", path.display());
        Ok(())
    }

    pub fn get(&self, path: SettingPath) -> SettingValue {
        self.config.get(path)
    }

    /// Set one value. Returns whether it changed.
    pub fn set(&mut self, path: SettingPath, value: impl Into<SettingValue>) -> Result<bool> {
        let old = self.config.set(path, value.into()).map_err(|e| {
            tracing::warn!("Rejected setting {path}: {e}");
            e
        })?;
        let new = self.config.get(path);
        if old == new {
            return Ok(false);
        }
        tracing::debug!("Setting {path}: {old} -> {new}");
        self.notify(path, old, new);
        Ok(true)
    }

    /// Replace the whole configuration, notifying every path that changed.
    pub fn set_config(&mut self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        self.apply(config);
        Ok(())
    }

    /// Restore the defaults, keeping the store's path.
    pub fn reset_to_defaults(&mut self) {
        let config = EngineConfig {
            config_path: self.path.clone(),
            ..EngineConfig::default()
        };
        self.apply(config);
    }

    /// Call `callback` after every change of `path`.
    pub fn on_change<F>(&mut self, path: SettingPath, callback: F)
    where
        F: Fn(SettingPath, &SettingValue) + Send + Sync + 'static,
    {
        self.callbacks.entry(path).or_default().push(Box::new(callback));
    }

    /// Remove every callback registered for `path`.
    pub fn clear_callbacks(&mut self, path: SettingPath) {
        self.callbacks.remove(&path);
    }

    fn apply(&mut self, config: EngineConfig) {
        let previous = std::mem::replace(&mut self.config, config);
        for path in SettingPath::ALL {
            let old = previous.get(path);
            let new = self.config.get(path);
            if old != new {
                self.notify(path, old, new);
            }
        }
    }

    fn notify(&self, path: SettingPath, old: SettingValue, new: SettingValue) {
        if let Some(callbacks) = self.callbacks.get(&path) {
            for callback in callbacks {
                callback(path, &new);
            }
        }
        if let Some(events) = &self.events {
            events.publish(SettingsChanged { path, old, new });
        }
    }
}

impl fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsStore")
            .field("config", &self.config)
            .field("path", &self.path)
            .field("callbacks", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}
