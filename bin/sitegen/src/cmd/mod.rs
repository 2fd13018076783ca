//! Command implementations.

use std::path::PathBuf;

use sitegen_core::Config;

pub mod build;
pub mod check;
pub mod serve;
pub mod watch;

/// Directory flags shared by every command. Unset flags keep the configured
/// values.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct DirArgs {
    /// Source directory [default: build.input_dir, "src"]
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output directory [default: build.output_dir, "html"]
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl DirArgs {
    /// Override the configured directories with any flags that were given.
    pub fn apply(&self, config: &mut Config) {
        if let Some(input) = &self.input {
            config.build.input_dir = input.to_string_lossy().into_owned();
        }
        if let Some(output) = &self.output {
            config.build.output_dir = output.to_string_lossy().into_owned();
        }
    }
}
