//! Build orchestration.
//!
//! Runs the asset pipeline, then walks the source tree once and copies,
//! renders, skips or recreates each entry.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    time::Instant,
};

use sitegen_core::{Config, LayoutConfig, pathsafe};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::{
    assets::{AssetError, AssetManifest, AssetPipeline},
    template::{TemplateError, TemplateRenderer},
};

/// Permission bits used when the source reports none.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Build errors.
#[derive(Debug, Error)]
pub enum BuildError {
    /// An input or output directory was not supplied.
    #[error("{0} directory is required")]
    MissingDir(&'static str),

    /// The input path is not a directory.
    #[error("input path {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// Input and output resolve to the same directory.
    #[error("input and output directories must differ: {}", .0.display())]
    SameDirectories(PathBuf),

    /// The output directory lies inside the input directory.
    #[error("output directory {} is inside input directory {}", output.display(), input.display())]
    NestedOutput { input: PathBuf, output: PathBuf },

    /// Cleaning the output would delete the input.
    #[error("refusing to clean {}: it contains input directory {}", output.display(), input.display())]
    CleanRemovesInput { input: PathBuf, output: PathBuf },

    /// A filesystem operation failed.
    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Asset bundling failed.
    #[error(transparent)]
    Assets(#[from] AssetError),

    /// A template failed to render.
    #[error("render {}: {source}", path.display())]
    Render {
        path: PathBuf,
        #[source]
        source: TemplateError,
    },

    /// The source tree contains a symlink.
    #[error("symlink is not supported: {}", .0.display())]
    Symlink(PathBuf),

    /// The source tree contains something that is neither file nor directory.
    #[error("unsupported file type: {}", .0.display())]
    UnsupportedFileType(PathBuf),

    /// The tree walk failed.
    #[error("walk source tree: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Result type for build operations.
pub type Result<T> = std::result::Result<T, BuildError>;

fn io_error<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> BuildError + 'a {
    move |source| BuildError::Io {
        op,
        path: path.to_path_buf(),
        source,
    }
}

/// Build statistics.
#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    /// Number of bundles written by the asset pipeline.
    pub bundles: usize,

    /// Number of templates rendered.
    pub rendered: usize,

    /// Number of files copied verbatim.
    pub copied: usize,

    /// Number of directories created.
    pub directories: usize,

    /// Number of entries skipped (metadata, reserved, shadowed).
    pub skipped: usize,

    /// Build duration in milliseconds.
    pub duration_ms: u64,
}

impl BuildStats {
    /// Files written by the tree walk.
    #[must_use]
    pub fn files(&self) -> usize {
        self.rendered + self.copied
    }
}

/// Why a source entry was left out of the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    Metadata,
    Reserved,
    BundleOutput,
    Manifest,
}

impl Skip {
    fn as_str(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Reserved => "reserved",
            Self::BundleOutput => "shadowed by bundle",
            Self::Manifest => "shadowed by manifest",
        }
    }
}

/// Site builder that orchestrates the build process.
#[derive(Debug, Clone)]
pub struct Builder {
    input_dir: PathBuf,
    output_dir: PathBuf,
    clean: bool,
    verbose: bool,
    layout: LayoutConfig,
}

impl Builder {
    /// Create a new builder.
    #[must_use]
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            clean: false,
            verbose: false,
            layout: LayoutConfig::default(),
        }
    }

    /// Create a builder from the `[build]` and `[layout]` configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.build.input_dir, &config.build.output_dir)
            .clean(config.build.clean)
            .with_layout(config.layout.clone())
    }

    /// Remove the output tree before building.
    #[must_use]
    pub fn clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    /// Report every entry at INFO level.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Use a custom source layout.
    #[must_use]
    pub fn with_layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = layout;
        self
    }

    /// Get the input directory as configured.
    #[must_use]
    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Get the output directory as configured.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Get the layout.
    #[must_use]
    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    /// Validate the directories and return their absolute forms.
    pub fn resolve_dirs(&self) -> Result<(PathBuf, PathBuf)> {
        if self.input_dir.as_os_str().is_empty() {
            return Err(BuildError::MissingDir("input"));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(BuildError::MissingDir("output"));
        }

        let input = pathsafe::absolutize(&self.input_dir)
            .map_err(io_error("resolve input", &self.input_dir))?;
        let output = pathsafe::absolutize(&self.output_dir)
            .map_err(io_error("resolve output", &self.output_dir))?;

        let metadata = fs::metadata(&input).map_err(io_error("stat input", &input))?;
        if !metadata.is_dir() {
            return Err(BuildError::NotADirectory(input));
        }

        if input == output {
            return Err(BuildError::SameDirectories(input));
        }
        if output.starts_with(&input) {
            return Err(BuildError::NestedOutput { input, output });
        }
        if self.clean && input.starts_with(&output) {
            return Err(BuildError::CleanRemovesInput { input, output });
        }

        Ok((input, output))
    }

    /// Execute the full build.
    pub fn build(&self) -> Result<BuildStats> {
        let start = Instant::now();
        let (input, output) = self.resolve_dirs()?;

        info!(
            input = %input.display(),
            output = %output.display(),
            clean = self.clean,
            "starting build"
        );

        if self.clean {
            clean_output(&output)?;
        }
        fs::create_dir_all(&output).map_err(io_error("create output", &output))?;

        let manifest = AssetPipeline::new(self.layout.clone())
            .verbose(self.verbose)
            .build(&input, &output)?;

        let mut stats = self.walk(&input, &output, &manifest)?;
        stats.bundles = manifest.len();
        stats.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            bundles = stats.bundles,
            rendered = stats.rendered,
            copied = stats.copied,
            skipped = stats.skipped,
            duration_ms = stats.duration_ms,
            "build complete"
        );

        Ok(stats)
    }

    fn walk(&self, input: &Path, output: &Path, manifest: &AssetManifest) -> Result<BuildStats> {
        let mut stats = BuildStats::default();
        let renderer = TemplateRenderer::new(input, manifest);

        let mut entries = WalkDir::new(input)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = entries.next() {
            let entry = entry?;
            let relative = entry.path().strip_prefix(input).unwrap_or(entry.path());
            let relative_slash = slash_path(relative);
            let file_type = entry.file_type();

            if let Some(reason) = self.skip_reason(&entry, &relative_slash, manifest) {
                progress!(self.verbose, path = %relative_slash, reason = reason.as_str(), "skipping");
                stats.skipped += 1;
                if file_type.is_dir() {
                    entries.skip_current_dir();
                }
                continue;
            }

            let target = output.join(relative);

            if file_type.is_dir() {
                fs::create_dir_all(&target).map_err(io_error("create directory", &target))?;
                stats.directories += 1;
                continue;
            }

            if file_type.is_symlink() {
                return Err(BuildError::Symlink(entry.path().to_path_buf()));
            }

            if !file_type.is_file() {
                return Err(BuildError::UnsupportedFileType(entry.path().to_path_buf()));
            }

            let mode = file_mode(&entry)?;

            if self.layout.is_template(entry.path()) {
                let rendered = renderer.render(entry.path()).map_err(|source| BuildError::Render {
                    path: entry.path().to_path_buf(),
                    source,
                })?;
                write_file(&target, &rendered, mode)?;
                progress!(self.verbose, path = %relative_slash, "rendered");
                stats.rendered += 1;
            } else {
                copy_file(entry.path(), &target, mode)?;
                progress!(self.verbose, path = %relative_slash, "copied");
                stats.copied += 1;
            }
        }

        Ok(stats)
    }

    fn skip_reason(&self, entry: &DirEntry, relative: &str, manifest: &AssetManifest) -> Option<Skip> {
        let name = entry.file_name().to_string_lossy();

        if self.layout.is_ignored(&name) {
            Some(Skip::Metadata)
        } else if self.layout.is_reserved(relative) {
            Some(Skip::Reserved)
        } else if manifest.contains_output(relative) {
            Some(Skip::BundleOutput)
        } else if relative == self.layout.manifest_file.trim_start_matches('/') {
            Some(Skip::Manifest)
        } else {
            None
        }
    }
}

fn clean_output(output: &Path) -> Result<()> {
    match fs::remove_dir_all(output) {
        Ok(()) => {
            debug!(path = %output.display(), "cleaned output directory");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(BuildError::Io {
            op: "clean output",
            path: output.to_path_buf(),
            source,
        }),
    }
}

fn slash_path(relative: &Path) -> String {
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn file_mode(entry: &DirEntry) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = entry.metadata()?;
    Ok(match metadata.permissions().mode() & 0o777 {
        0 => DEFAULT_FILE_MODE,
        mode => mode,
    })
}

#[cfg(not(unix))]
fn file_mode(_entry: &DirEntry) -> Result<u32> {
    Ok(DEFAULT_FILE_MODE)
}

fn create_file(path: &Path, mode: u32) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;

    options.open(path).map_err(io_error("create", path))
}

/// Reapply the mode when the file already existed before the build.
#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(io_error("chmod", path))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

fn write_file(path: &Path, data: &[u8], mode: u32) -> Result<()> {
    let mut file = create_file(path, mode)?;
    file.write_all(data).map_err(io_error("write", path))?;
    set_mode(path, mode)
}

fn copy_file(source: &Path, target: &Path, mode: u32) -> Result<()> {
    let mut reader = File::open(source).map_err(io_error("open", source))?;
    let mut writer = create_file(target, mode)?;
    io::copy(&mut reader, &mut writer).map_err(io_error("copy", source))?;
    set_mode(target, mode)
}
