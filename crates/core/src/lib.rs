//! Shared foundation for the Lumen workspace.
//!
//! Everything in here is backend-agnostic:
//! - [`Error`] and [`Result`] used by the application-facing layers
//! - [`init_logging`] which wires `tracing` to stdout
//! - [`Config`] loaded from `lumen.toml`
//! - [`FrameTimer`] for per-frame delta and FPS reporting

mod config;
mod error;
mod logging;
mod timer;

pub use config::{
    BufferAllocationStrategy, CommandBufferResetMode, Config, DescriptorManagementStrategy,
    PipelineKind, PresentModePreference, RendererConfig, SampleConfig, WindowConfig,
};
pub use error::{Error, Result};
pub use logging::{DEFAULT_FILTER, init_logging};
pub use timer::FrameTimer;
