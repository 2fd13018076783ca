//! Asset bundling and manifest generation.
//!
//! Reads the optional bundle configuration, concatenates each bundle's inputs
//! into a single output file, and records every bundle in an
//! [`AssetManifest`] that templates resolve `asset` directives against.

use std::{
    collections::{BTreeMap, HashSet},
    fmt, fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use sitegen_core::{
    LayoutConfig,
    pathsafe::{self, PathError},
};
use thiserror::Error;
use tracing::{debug, info};

/// Asset pipeline errors.
#[derive(Debug, Error)]
pub enum AssetError {
    /// The bundle configuration exists but could not be read.
    #[error("read asset config {}: {source}", path.display())]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The bundle configuration is malformed or has unknown fields.
    #[error("decode asset config {}: {source}", path.display())]
    DecodeConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A single bundle failed validation or could not be built.
    #[error("build {kind} bundle {name:?}: {source}")]
    Bundle {
        kind: BundleKind,
        name: String,
        #[source]
        source: BundleError,
    },

    /// Manifest serialization failed.
    #[error("marshal manifest: {0}")]
    SerializeManifest(#[source] serde_json::Error),

    /// Manifest could not be written.
    #[error("write asset manifest {}: {source}", path.display())]
    WriteManifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors scoped to one bundle declaration.
#[derive(Debug, Error)]
pub enum BundleError {
    /// Blank bundle name.
    #[error("bundle name is required")]
    MissingName,

    /// Bundle name starts with `/`.
    #[error("bundle name must be relative: {0:?}")]
    AbsoluteName(String),

    /// Bundle name contains a `..` segment.
    #[error("bundle name cannot contain a '..' segment: {0:?}")]
    ParentSegment(String),

    /// Bundle name does not end in a file name.
    #[error("bundle name must name a file: {0:?}")]
    NotAFile(String),

    /// Bundle name has empty or `.` segments, so it differs from the path it
    /// is written to.
    #[error("bundle name must not contain empty or '.' segments: {0:?}")]
    NonCanonicalName(String),

    /// Same name declared by more than one bundle.
    #[error("bundle name {0:?} is declared more than once")]
    Duplicate(String),

    /// Bundle has no inputs.
    #[error("bundle {0:?} must include at least one input")]
    NoInputs(String),

    /// Blank input entry.
    #[error("bundle input cannot be empty")]
    EmptyInput,

    /// Input escapes the source root.
    #[error("resolve input {input:?}: {source}")]
    ResolveInput {
        input: String,
        #[source]
        source: PathError,
    },

    /// Input is reached through a symlink.
    #[error("reject symlink input {input:?}: {source}")]
    SymlinkInput {
        input: String,
        #[source]
        source: PathError,
    },

    /// Input metadata could not be read.
    #[error("stat input {input:?}: {source}")]
    StatInput {
        input: String,
        #[source]
        source: io::Error,
    },

    /// Input is a directory.
    #[error("input {0:?} is a directory")]
    InputIsDirectory(String),

    /// Input contents could not be read.
    #[error("read input {input:?}: {source}")]
    ReadInput {
        input: String,
        #[source]
        source: io::Error,
    },

    /// Output path escapes the output root.
    #[error("resolve output path: {0}")]
    ResolveOutput(#[source] PathError),

    /// Output path is reached through a symlink.
    #[error("validate output path: {0}")]
    UnsafeOutput(#[source] PathError),

    /// Output parent directory could not be created.
    #[error("create output directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Output file could not be written.
    #[error("write bundle output {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for asset operations.
pub type Result<T> = std::result::Result<T, AssetError>;

/// Which list a bundle was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleKind {
    Css,
    Js,
}

impl fmt::Display for BundleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css => f.write_str("css"),
            Self::Js => f.write_str("js"),
        }
    }
}

/// A named group of source files concatenated into one output file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bundle {
    /// Bundle identifier, also its output path relative to the output root.
    #[serde(default)]
    pub name: String,

    /// Source-root-relative input files, concatenated in order.
    #[serde(default)]
    pub inputs: Vec<String>,
}

impl Bundle {
    /// Create a bundle declaration.
    pub fn new<I, S>(name: impl Into<String>, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
        }
    }

    /// Validate the declaration and return the normalized bundle name.
    pub fn validated_name(&self) -> std::result::Result<&str, BundleError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(BundleError::MissingName);
        }
        if name.starts_with('/') {
            return Err(BundleError::AbsoluteName(name.to_string()));
        }
        if name.split('/').any(|segment| segment == "..") {
            return Err(BundleError::ParentSegment(name.to_string()));
        }
        if matches!(name.rsplit('/').next(), Some("" | ".")) {
            return Err(BundleError::NotAFile(name.to_string()));
        }
        // The manifest key doubles as the output path, so both must match.
        if name.split('/').any(|segment| segment.is_empty() || segment == ".") {
            return Err(BundleError::NonCanonicalName(name.to_string()));
        }
        if self.inputs.is_empty() {
            return Err(BundleError::NoInputs(name.to_string()));
        }
        if self.inputs.iter().any(|input| input.trim().is_empty()) {
            return Err(BundleError::EmptyInput);
        }
        Ok(name)
    }
}

/// Bundle declarations loaded from the asset configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleConfig {
    /// Stylesheet bundles, built first.
    #[serde(default)]
    pub css_bundles: Vec<Bundle>,

    /// Script bundles, built after stylesheets.
    #[serde(default)]
    pub js_bundles: Vec<Bundle>,
}

impl BundleConfig {
    /// Load the bundle configuration for `source_root`.
    ///
    /// Returns `Ok(None)` when the configuration file does not exist.
    pub fn load(source_root: &Path, layout: &LayoutConfig) -> Result<Option<Self>> {
        let path = source_root.join(&layout.asset_config);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(AssetError::ReadConfig { path, source }),
        };

        let config = Self::from_slice(&data)
            .map_err(|source| AssetError::DecodeConfig { path, source })?;
        Ok(Some(config))
    }

    /// Decode a configuration document, rejecting unknown fields.
    pub fn from_slice(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    /// All bundles, stylesheets first, in declaration order.
    pub fn bundles(&self) -> impl Iterator<Item = (BundleKind, &Bundle)> {
        self.css_bundles
            .iter()
            .map(|bundle| (BundleKind::Css, bundle))
            .chain(self.js_bundles.iter().map(|bundle| (BundleKind::Js, bundle)))
    }

    /// Number of declared bundles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.css_bundles.len() + self.js_bundles.len()
    }

    /// Whether no bundles are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check every declaration without touching the filesystem.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();

        for (kind, bundle) in self.bundles() {
            let wrap = |source| AssetError::Bundle {
                kind,
                name: bundle.name.trim().to_string(),
                source,
            };

            let name = bundle.validated_name().map_err(wrap)?;
            if !seen.insert(name) {
                return Err(wrap(BundleError::Duplicate(name.to_string())));
            }
        }

        Ok(())
    }
}

/// Mapping from bundle name to its output-relative path.
///
/// Today every bundle is written under its own name, but consumers must go
/// through [`AssetManifest::get`] rather than assume the two are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest {
    assets: BTreeMap<String, String>,
}

impl AssetManifest {
    /// Create a new empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a bundle and its output path.
    pub fn add(&mut self, name: impl Into<String>, output: impl Into<String>) {
        self.assets.insert(name.into(), output.into());
    }

    /// Output path for a bundle name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.assets.get(name).map(String::as_str)
    }

    /// Whether some bundle is written to `relative` (slash-separated).
    #[must_use]
    pub fn contains_output(&self, relative: &str) -> bool {
        self.assets.values().any(|output| output == relative)
    }

    /// All entries, ordered by bundle name.
    #[must_use]
    pub fn assets(&self) -> &BTreeMap<String, String> {
        &self.assets
    }

    /// Number of bundles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Whether the manifest is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Serialize to indented, newline-terminated JSON.
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self).map_err(AssetError::SerializeManifest)?;
        json.push('\n');
        Ok(json)
    }

    /// Write the manifest into `output_root` and return its path.
    pub fn write(&self, output_root: &Path, layout: &LayoutConfig) -> Result<PathBuf> {
        let path = output_root.join(&layout.manifest_file);
        let json = self.to_json()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| AssetError::WriteManifest {
                path: path.clone(),
                source,
            })?;
        }
        fs::write(&path, json).map_err(|source| AssetError::WriteManifest {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), "wrote asset manifest");
        Ok(path)
    }
}

/// Builds every declared bundle and the manifest.
#[derive(Debug, Clone, Default)]
pub struct AssetPipeline {
    layout: LayoutConfig,
    verbose: bool,
}

impl AssetPipeline {
    /// Create a pipeline for the given layout.
    #[must_use]
    pub fn new(layout: LayoutConfig) -> Self {
        Self {
            layout,
            verbose: false,
        }
    }

    /// Report each bundle at INFO level.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Bundle all assets from `source_root` into `output_root`.
    ///
    /// The manifest file is written even when no configuration exists.
    pub fn build(&self, source_root: &Path, output_root: &Path) -> Result<AssetManifest> {
        info!(
            source = %source_root.display(),
            dest = %output_root.display(),
            "processing assets"
        );

        let mut manifest = AssetManifest::new();

        let Some(config) = BundleConfig::load(source_root, &self.layout)? else {
            debug!(
                config = %self.layout.asset_config,
                "no bundle configuration, writing empty manifest"
            );
            manifest.write(output_root, &self.layout)?;
            return Ok(manifest);
        };

        config.validate()?;

        for (kind, bundle) in config.bundles() {
            let name = bundle.name.trim();
            let output = build_bundle(source_root, output_root, name, &bundle.inputs).map_err(
                |source| AssetError::Bundle {
                    kind,
                    name: name.to_string(),
                    source,
                },
            )?;

            progress!(
                self.verbose,
                bundle = name,
                inputs = bundle.inputs.len(),
                output = %output.display(),
                "bundled {kind} asset"
            );
            manifest.add(name, name);
        }

        manifest.write(output_root, &self.layout)?;

        info!(count = manifest.len(), "assets bundled");
        Ok(manifest)
    }

    /// Validate the bundle configuration and read every input without
    /// writing anything. Returns the number of declared bundles.
    pub fn check(&self, source_root: &Path) -> Result<usize> {
        let Some(config) = BundleConfig::load(source_root, &self.layout)? else {
            return Ok(0);
        };

        config.validate()?;

        for (kind, bundle) in config.bundles() {
            let name = bundle.name.trim();
            concat_inputs(source_root, &bundle.inputs).map_err(|source| AssetError::Bundle {
                kind,
                name: name.to_string(),
                source,
            })?;
            debug!(bundle = name, "bundle inputs ok");
        }

        Ok(config.len())
    }
}

fn build_bundle(
    source_root: &Path,
    output_root: &Path,
    name: &str,
    inputs: &[String],
) -> std::result::Result<PathBuf, BundleError> {
    let content = concat_inputs(source_root, inputs)?;

    let output = pathsafe::resolve_within_root(output_root, name).map_err(BundleError::ResolveOutput)?;
    pathsafe::ensure_no_symlink_traversal(output_root, &output)
        .map_err(BundleError::UnsafeOutput)?;

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|source| BundleError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(&output, content).map_err(|source| BundleError::Write {
        path: output.clone(),
        source,
    })?;

    Ok(output)
}

fn concat_inputs(source_root: &Path, inputs: &[String]) -> std::result::Result<Vec<u8>, BundleError> {
    let mut out = Vec::new();

    for input in inputs {
        let declared = input.trim();
        if declared.is_empty() {
            return Err(BundleError::EmptyInput);
        }

        let path = pathsafe::resolve_within_root(source_root, declared).map_err(|source| {
            BundleError::ResolveInput {
                input: declared.to_string(),
                source,
            }
        })?;
        pathsafe::ensure_no_symlink_traversal(source_root, &path).map_err(|source| {
            BundleError::SymlinkInput {
                input: declared.to_string(),
                source,
            }
        })?;

        let metadata = fs::metadata(&path).map_err(|source| BundleError::StatInput {
            input: declared.to_string(),
            source,
        })?;
        if metadata.is_dir() {
            return Err(BundleError::InputIsDirectory(declared.to_string()));
        }

        let data = fs::read(&path).map_err(|source| BundleError::ReadInput {
            input: declared.to_string(),
            source,
        })?;
        append_input(&mut out, &data);
    }

    Ok(out)
}

/// Append one input so that consecutive inputs are separated by exactly one
/// newline and a non-empty input always leaves the buffer newline-terminated.
fn append_input(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(data);
    if data.last().is_some_and(|&byte| byte != b'\n') {
        out.push(b'\n');
    }
}
