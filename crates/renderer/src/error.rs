//! Runtime error types.

use ash::vk;
use lumen_rhi::RhiError;
use thiserror::Error;

/// Error type for the frame runtime.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Error raised by the Vulkan object layer
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Raw Vulkan error from a command the runtime issued directly
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Staged push constants would exceed the device limit
    #[error("Push constant overflow: {size} bytes exceeds the {limit} byte limit")]
    PushConstantOverflow { size: usize, limit: u32 },

    /// A cached object could not be created
    #[error("Failed to build {resource}: {source}")]
    CacheBuild {
        resource: &'static str,
        #[source]
        source: RhiError,
    },

    /// Waiting on a frame's fences did not succeed
    #[error("Fence wait failed: {0}")]
    FenceTimeout(vk::Result),

    /// Swapchain image acquisition failed
    #[error("Failed to acquire swapchain image: {0}")]
    Acquire(vk::Result),

    /// An operation was called in a state that does not allow it
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias for runtime operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;
