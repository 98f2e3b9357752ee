//! Frame-level rendering runtime.
//!
//! This crate sits between the Vulkan object layer and an application:
//! - [`RenderContext`] owns the swapchain and drives acquire, submit and
//!   present over one [`RenderFrame`] per swapchain image
//! - [`CommandRecorder`] records with lazily flushed pipeline state and
//!   descriptor bindings
//! - [`ResourceCache`] deduplicates shader modules, layouts, render passes,
//!   framebuffers and pipelines by content hash
//! - [`RenderPipeline`] records a list of [`Subpass`]es as one render pass

pub mod binding_state;
pub mod buffer_pool;
pub mod command_recorder;
pub mod error;
pub mod hashing;
pub mod lighting;
pub mod render_context;
pub mod render_frame;
pub mod render_pipeline;
pub mod render_target;
pub mod resource_cache;
pub mod subpass;
pub mod subpasses;
pub mod ubo;

pub use buffer_pool::{BufferAllocation, BufferPool};
pub use command_recorder::CommandRecorder;
pub use error::{RenderError, RenderResult};
pub use lighting::LightingState;
pub use render_context::{FrameStatus, RenderContext, RenderContextDesc};
pub use render_frame::{FrameConfig, RenderFrame};
pub use render_pipeline::RenderPipeline;
pub use render_target::RenderTarget;
pub use resource_cache::{CacheStats, ResourceCache};
pub use subpass::{FrameContext, SceneView, Subpass, SubpassCore};
pub use subpasses::{ForwardSubpass, GeometrySubpass, LightingSubpass};
