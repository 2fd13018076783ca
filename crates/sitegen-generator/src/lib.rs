//! sitegen Generator Library
//!
//! Build pipeline for sitegen.
//!
//! # Modules
//!
//! - [`assets`] - CSS/JS bundling and the asset manifest
//! - [`template`] - Include and asset directives with cycle detection
//! - [`build`] - Source tree walk and build orchestration

/// Log per-entry progress at INFO when `verbose` is set, TRACE otherwise.
macro_rules! progress {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+);
        } else {
            tracing::trace!($($arg)+);
        }
    };
}

pub mod assets;
pub mod build;
pub mod template;

pub use assets::{AssetError, AssetManifest, AssetPipeline, Bundle, BundleConfig, BundleError};
pub use build::{BuildError, BuildStats, Builder};
pub use template::{Template, TemplateError, TemplateRenderer};
