//! sitegen Core Library
//!
//! Configuration, source layout and path-safety primitives shared by the
//! sitegen build pipeline, dev server and watcher.

pub mod config;
pub mod error;
pub mod pathsafe;

pub use config::{BuildConfig, Config, DetectorKind, LayoutConfig, ServeConfig, WatchConfig};
pub use error::{CoreError, Result};
pub use pathsafe::PathError;
