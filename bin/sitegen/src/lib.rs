//! sitegen CLI Library
//!
//! Command implementations, the development server and the source watcher
//! behind the `sitegen` binary.
//!
//! # Modules
//!
//! - [`cmd`] - Command implementations (build, watch, serve, check)
//! - [`server`] - Development file server for the output tree
//! - [`watcher`] - Change detection and debounced rebuilds
//! - [`shutdown`] - Ctrl-C / SIGTERM driven cancellation
//!
//! # Example
//!
//! ```no_run
//! let config = sitegen::load_config(None).unwrap();
//! sitegen::cmd::build::run(&config, false).unwrap();
//! ```

use std::path::Path;

use color_eyre::eyre::{Result, WrapErr, bail};

pub mod cmd;
pub mod server;
pub mod shutdown;
pub mod watcher;

// Re-export core types for convenience
pub use sitegen_core::Config;
pub use sitegen_generator::{BuildStats, Builder};

/// Initialize tracing with the specified verbosity level.
///
/// # Arguments
///
/// * `verbose` - Verbosity level (0 = WARN, 1 = INFO, 2 = DEBUG, 3+ = TRACE)
///
/// # Example
///
/// ```no_run
/// sitegen::init_tracing(2); // Enable DEBUG level logging
/// ```
pub fn init_tracing(verbose: u8) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

/// Load configuration layered with `SITEGEN__*` environment overrides.
///
/// Without `path`, `sitegen.toml` in the working directory is used when it
/// exists. An explicit `path` must exist.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => {
            if !path.is_file() {
                bail!("Configuration file not found: {}", path.display());
            }
            path
        }
        None => Path::new(sitegen_core::config::DEFAULT_CONFIG_FILE),
    };

    Config::load_with_env(path)
        .wrap_err_with(|| format!("Failed to load configuration from {}", path.display()))
}
