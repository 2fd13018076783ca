//! Site configuration and source layout.
//!
//! Every well-known name the pipeline relies on (bundle config location,
//! manifest filename, reserved directories, template extension, metadata
//! files) lives in [`LayoutConfig`] so components receive it instead of
//! reaching for literals.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Default configuration filename looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "sitegen.toml";

/// Prefix for environment variable overrides (`SITEGEN__SERVE__PORT=9000`).
pub const ENV_PREFIX: &str = "SITEGEN";

/// Main configuration structure for sitegen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Build settings.
    #[serde(default)]
    pub build: BuildConfig,

    /// Source tree layout.
    #[serde(default)]
    pub layout: LayoutConfig,

    /// Watch mode settings.
    #[serde(default)]
    pub watch: WatchConfig,

    /// Development server settings.
    #[serde(default)]
    pub serve: ServeConfig,
}

/// Build configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Source directory holding templates, bundle inputs and static files.
    #[serde(default = "default_input_dir")]
    pub input_dir: String,

    /// Output directory for the generated site.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Remove the output directory before building.
    #[serde(default)]
    pub clean: bool,
}

/// Well-known names inside the source and output trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    /// Bundle configuration file, relative to the source root.
    #[serde(default = "default_asset_config")]
    pub asset_config: String,

    /// Manifest filename, relative to the output root.
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,

    /// Source prefixes holding raw pipeline inputs; never copied to output.
    #[serde(default = "default_reserved_prefixes")]
    pub reserved_prefixes: Vec<String>,

    /// Extension (without the dot) of files routed through the renderer.
    #[serde(default = "default_template_extension")]
    pub template_extension: String,

    /// Exact entry names treated as OS/editor metadata.
    #[serde(default = "default_ignored_names")]
    pub ignored_names: Vec<String>,

    /// Entry name prefixes treated as OS/editor metadata.
    #[serde(default = "default_ignored_prefixes")]
    pub ignored_prefixes: Vec<String>,
}

/// Change detection strategy for watch mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// Periodic snapshot diffing.
    #[default]
    Poll,
    /// OS file notifications.
    Notify,
}

/// Watch mode configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    /// Polling interval in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Quiet period in milliseconds before a rebuild runs.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// How changes are detected.
    #[serde(default)]
    pub detector: DetectorKind,
}

/// Development server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServeConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound in seconds for draining requests on shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

// Default value functions
fn default_input_dir() -> String {
    "src".to_string()
}

fn default_output_dir() -> String {
    "html".to_string()
}

fn default_asset_config() -> String {
    "_assets/bundles.json".to_string()
}

fn default_manifest_file() -> String {
    "assets-manifest.json".to_string()
}

fn default_reserved_prefixes() -> Vec<String> {
    vec!["_assets".to_string(), "_css".to_string(), "_js".to_string()]
}

fn default_template_extension() -> String {
    "html".to_string()
}

fn default_ignored_names() -> Vec<String> {
    vec![".DS_Store".to_string(), "Thumbs.db".to_string()]
}

fn default_ignored_prefixes() -> Vec<String> {
    vec!["._".to_string()]
}

fn default_interval_ms() -> u64 {
    250
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            clean: false,
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            asset_config: default_asset_config(),
            manifest_file: default_manifest_file(),
            reserved_prefixes: default_reserved_prefixes(),
            template_extension: default_template_extension(),
            ignored_names: default_ignored_names(),
            ignored_prefixes: default_ignored_prefixes(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            debounce_ms: default_debounce_ms(),
            detector: DetectorKind::default(),
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl LayoutConfig {
    /// Whether an entry name is OS/editor metadata.
    #[must_use]
    pub fn is_ignored(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }

        self.ignored_names.iter().any(|ignored| ignored == name)
            || self
                .ignored_prefixes
                .iter()
                .any(|prefix| name.starts_with(prefix.as_str()))
    }

    /// Whether a slash-separated source-relative path sits under a reserved
    /// pipeline prefix.
    #[must_use]
    pub fn is_reserved(&self, relative: &str) -> bool {
        if relative.is_empty() {
            return false;
        }

        self.reserved_prefixes.iter().any(|prefix| {
            relative == prefix
                || relative
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// Whether a file should be rendered as a template.
    #[must_use]
    pub fn is_template(&self, path: &Path) -> bool {
        let wanted = self.template_extension.trim_start_matches('.');
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
    }

    fn validate(&self) -> Result<()> {
        if self.template_extension.trim_start_matches('.').is_empty() {
            return Err(CoreError::config("layout.template_extension cannot be empty"));
        }

        for (key, value) in [
            ("layout.asset_config", &self.asset_config),
            ("layout.manifest_file", &self.manifest_file),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::config(format!("{key} cannot be empty")));
            }
            if value.starts_with('/') || value.split('/').any(|segment| segment == "..") {
                return Err(CoreError::config(format!(
                    "{key} must be a relative path without '..' segments: {value:?}"
                )));
            }
        }

        Ok(())
    }
}

impl WatchConfig {
    /// Polling interval, falling back to the default when unset.
    #[must_use]
    pub fn interval(&self) -> Duration {
        match self.interval_ms {
            0 => Duration::from_millis(default_interval_ms()),
            ms => Duration::from_millis(ms),
        }
    }

    /// Debounce period, falling back to the default when unset.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        match self.debounce_ms {
            0 => Duration::from_millis(default_debounce_ms()),
            ms => Duration::from_millis(ms),
        }
    }
}

impl ServeConfig {
    /// Shutdown drain timeout.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file that must exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CoreError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            CoreError::config_with_source(
                format!("Failed to parse config file: {}", path.display()),
                e,
            )
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional TOML file layered with
    /// `SITEGEN__SECTION__KEY` environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.build.input_dir.trim().is_empty() {
            return Err(CoreError::config("build.input_dir cannot be empty"));
        }

        if self.build.output_dir.trim().is_empty() {
            return Err(CoreError::config("build.output_dir cannot be empty"));
        }

        self.layout.validate()?;

        if self.watch.interval_ms == 0 || self.watch.debounce_ms == 0 {
            tracing::warn!("watch intervals of 0 fall back to the defaults");
        }

        Ok(())
    }
}
