//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,lumen=debug,naga=warn";

/// Install a `tracing` subscriber for the process.
///
/// Filtering comes from `RUST_LOG` and falls back to [`DEFAULT_FILTER`].
/// Vulkan validation output is routed through the same subscriber by the
/// debug messenger in `lumen_rhi`.
///
/// Calling this twice is harmless; the second call leaves the first
/// subscriber in place.
///
/// # Example
/// ```
/// lumen_core::init_logging();
/// tracing::info!("renderer starting");
/// ```
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
