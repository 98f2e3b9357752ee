//! Configuration loaded from `lumen.toml`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub sample: SampleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Enable the Khronos validation layer and debug messenger
    #[serde(default = "default_true")]
    pub validation: bool,
    /// Render into an offscreen image instead of a swapchain
    #[serde(default)]
    pub headless: bool,
    /// Present modes in priority order
    #[serde(default = "default_present_modes")]
    pub present_modes: Vec<PresentModePreference>,
    /// Number of recording threads each render frame provisions pools for
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,
    /// Swapchain acquire timeout in milliseconds
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Block size in KiB of each per-frame dynamic buffer pool
    #[serde(default = "default_buffer_block_kib")]
    pub buffer_block_kib: u64,
    #[serde(default)]
    pub buffer_allocation_strategy: BufferAllocationStrategy,
    #[serde(default)]
    pub descriptor_management_strategy: DescriptorManagementStrategy,
    #[serde(default)]
    pub command_buffer_reset_mode: CommandBufferResetMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleConfig {
    #[serde(default)]
    pub pipeline: PipelineKind,
}

/// Present mode names accepted in `present_modes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModePreference {
    Fifo,
    Mailbox,
    Immediate,
}

/// How a render frame hands out dynamic buffer memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferAllocationStrategy {
    /// Sub-allocate many ranges from each backing block
    #[default]
    MultipleAllocationsPerBuffer,
    /// Every allocation gets its own minimally sized block
    OneAllocationPerBuffer,
}

/// How a render frame manages descriptor sets across frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorManagementStrategy {
    /// Keep sets keyed by their bindings and rewrite only what changed
    #[default]
    StoreInCache,
    /// Allocate and fully write a new set for every request
    CreateDirectly,
}

/// How command buffers are recycled when their frame is reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandBufferResetMode {
    /// Reset the whole pool at once
    #[default]
    ResetPool,
    /// Reset each command buffer when it is begun again
    ResetIndividually,
    /// Free command buffers on reset and allocate new ones
    AlwaysAllocate,
}

/// Which render pipeline the sample application builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    #[default]
    Forward,
    Deferred,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            width: default_width(),
            height: default_height(),
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            validation: default_true(),
            headless: false,
            present_modes: default_present_modes(),
            thread_count: default_thread_count(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            buffer_block_kib: default_buffer_block_kib(),
            buffer_allocation_strategy: BufferAllocationStrategy::default(),
            descriptor_management_strategy: DescriptorManagementStrategy::default(),
            command_buffer_reset_mode: CommandBufferResetMode::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid TOML,
    /// or contains values rejected by [`Config::validate`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from `path` if it exists, otherwise return defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the renderer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window extent must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        if self.renderer.thread_count == 0 {
            return Err(Error::Config("renderer.thread_count must be at least 1".into()));
        }
        if self.renderer.buffer_block_kib == 0 {
            return Err(Error::Config("renderer.buffer_block_kib must be non-zero".into()));
        }
        if self.renderer.present_modes.is_empty() {
            return Err(Error::Config("renderer.present_modes must not be empty".into()));
        }
        Ok(())
    }
}

fn default_title() -> String {
    "Lumen".to_string()
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_true() -> bool {
    true
}

fn default_present_modes() -> Vec<PresentModePreference> {
    vec![
        PresentModePreference::Fifo,
        PresentModePreference::Mailbox,
        PresentModePreference::Immediate,
    ]
}

fn default_thread_count() -> usize {
    1
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_buffer_block_kib() -> u64 {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.renderer.acquire_timeout_ms, 5_000);
        assert_eq!(config.renderer.present_modes[0], PresentModePreference::Fifo);
        assert_eq!(config.sample.pipeline, PipelineKind::Forward);
    }

    #[test]
    fn test_parse_renderer_section() {
        let config = Config::from_toml_str(
            r#"
            [renderer]
            headless = true
            thread_count = 4
            buffer_allocation_strategy = "one_allocation_per_buffer"
            descriptor_management_strategy = "create_directly"
            command_buffer_reset_mode = "always_allocate"
            present_modes = ["mailbox", "fifo"]

            [sample]
            pipeline = "deferred"
            "#,
        )
        .unwrap();

        assert!(config.renderer.headless);
        assert_eq!(config.renderer.thread_count, 4);
        assert_eq!(
            config.renderer.buffer_allocation_strategy,
            BufferAllocationStrategy::OneAllocationPerBuffer
        );
        assert_eq!(
            config.renderer.descriptor_management_strategy,
            DescriptorManagementStrategy::CreateDirectly
        );
        assert_eq!(
            config.renderer.command_buffer_reset_mode,
            CommandBufferResetMode::AlwaysAllocate
        );
        assert_eq!(
            config.renderer.present_modes,
            vec![PresentModePreference::Mailbox, PresentModePreference::Fifo]
        );
        assert_eq!(config.sample.pipeline, PipelineKind::Deferred);
    }

    #[test]
    fn test_zero_thread_count_rejected() {
        let result = Config::from_toml_str("[renderer]\nthread_count = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let result = Config::from_toml_str("[window\nwidth = 3");
        assert!(matches!(result, Err(Error::ConfigParse(_))));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load_or_default("definitely/not/here/lumen.toml").unwrap();
        assert_eq!(config.window.height, 720);
    }
}
