//! Vulkan layer error types.

use thiserror::Error;

/// Error type for the Vulkan object layer.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load the Vulkan loader library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No physical device satisfies the requirements
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// A required extension or feature is absent
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Shader parsing, validation or SPIR-V generation failed
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface query or creation failed
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain creation failed
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Pipeline, pipeline layout or render pass creation failed
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// A caller supplied arguments the operation cannot honor
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type alias for Vulkan layer operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
