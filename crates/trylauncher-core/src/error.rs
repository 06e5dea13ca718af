//! Error types for the engine.

use thiserror::Error;

/// Engine-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configuration value outside its allowed range
    #[error("Invalid setting {path}: {reason}")]
    InvalidSetting { path: String, reason: String },

    /// A dotted setting path that names no field
    #[error("Unknown setting: {0}")]
    UnknownSetting(String),

    /// A value of the wrong type for a setting
    #[error("Type mismatch for {path}: expected {expected}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
    },

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A module names a dependency nobody registered
    #[error("Module {module} depends on unknown module {dependency}")]
    UnknownDependency { module: String, dependency: String },

    /// Module dependencies form a cycle
    #[error("Module dependency cycle involving: {0}")]
    DependencyCycle(String),

    /// Two modules share a name
    #[error("Duplicate module: {0}")]
    DuplicateModule(String),

    /// A module failed to initialize
    #[error("Module {module} failed to initialize: {reason}")]
    ModuleInit { module: String, reason: String },

    /// A scene name registered twice
    #[error("Duplicate scene: {0}")]
    DuplicateScene(String),

    /// An operation issued in the wrong lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
