//! Vulkan object layer.
//!
//! Safe wrappers over `ash` for everything the frame runtime builds on:
//! - Instance, physical device selection and logical device
//! - Buffers, images and samplers backed by `gpu-allocator`
//! - Fence and semaphore pools, command pools, query pools
//! - GLSL compilation and reflection through `naga`
//! - Descriptor set layouts, pools and sets
//! - Pipeline state, pipeline layouts, render passes and pipelines
//! - Swapchain property selection and presentation

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod pipeline_state;
pub mod query;
pub mod render_pass;
pub mod sampler;
pub mod shader;
pub mod shader_compiler;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};

pub use ash::vk;
