//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Vulkan loader could not be found.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Operation invoked before setup or after teardown.
    #[error("Not initialized: {0}")]
    NotInitialized(&'static str),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Resource handle is null or not owned by the caller.
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// Argument outside the accepted range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Layout transition pair outside the supported table.
    #[error("Unsupported layout transition: {old:?} -> {new:?}")]
    UnsupportedTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// Format lacks a feature the operation requires.
    #[error("Format {format:?} does not support {feature:?}")]
    UnsupportedFormat {
        format: vk::Format,
        feature: vk::FormatFeatureFlags,
    },

    /// Submission rejected before reaching the queue.
    #[error("Submit validation failed: {0}")]
    SubmitValidation(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// The swapchain no longer matches the surface and must be recreated.
    #[error("Swapchain out of date")]
    SwapchainOutOfDate,

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl GpuError {
    /// Whether this error asks the caller to rebuild the swapchain.
    pub fn is_out_of_date(&self) -> bool {
        matches!(
            self,
            Self::SwapchainOutOfDate | Self::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)
        )
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
