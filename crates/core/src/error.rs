//! Error types shared by the application-facing crates.

use thiserror::Error;

/// Main error type for the non-GPU layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or event-loop failure
    #[error("Window error: {0}")]
    Window(String),

    /// Vulkan surface could not be created for a window
    #[error("Surface error: {0}")]
    Surface(String),

    /// Configuration values are present but invalid
    #[error("Config error: {0}")]
    Config(String),

    /// Configuration file is not valid TOML for [`crate::Config`]
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
