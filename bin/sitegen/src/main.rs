//! sitegen CLI
//!
//! Static site builder with template includes, CSS/JS bundles, a watcher and
//! a development server.
//!
//! This is the binary entry point. The library functionality is in `lib.rs`.

use clap::Parser;
use color_eyre::eyre::Result;
use sitegen::cmd::{self, DirArgs};

/// Command-line interface for sitegen.
#[derive(Parser)]
#[command(
    name = "sitegen",
    version,
    about = "Build a static site from templated HTML, CSS and JS"
)]
struct Cli {
    /// Path to configuration file [default: sitegen.toml, if present]
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(clap::Subcommand)]
enum Commands {
    /// Build the output tree once
    Build {
        #[command(flatten)]
        dirs: DirArgs,
        /// Remove the output directory before building
        #[arg(long)]
        clean: bool,
    },
    /// Build, then rebuild on every source change
    Watch {
        #[command(flatten)]
        dirs: DirArgs,
        /// Also serve the output on this port
        #[arg(short, long)]
        port: Option<u16>,
        /// Open browser automatically (requires --port)
        #[arg(long, requires = "port")]
        open: bool,
    },
    /// Build, then serve the output tree
    Serve {
        #[command(flatten)]
        dirs: DirArgs,
        /// Remove the output directory before building
        #[arg(long)]
        clean: bool,
        /// Port to listen on [default: serve.port, 8080]
        #[arg(short, long)]
        port: Option<u16>,
        /// Open browser automatically
        #[arg(long)]
        open: bool,
    },
    /// Validate configuration, bundles and templates without writing output
    Check {
        #[command(flatten)]
        dirs: DirArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    sitegen::init_tracing(cli.verbose);

    let mut config = sitegen::load_config(cli.config.as_deref())?;
    let verbose = cli.verbose > 0;

    match cli.command {
        Commands::Build { dirs, clean } => {
            dirs.apply(&mut config);
            config.build.clean |= clean;
            cmd::build::run(&config, verbose)?;
        }
        Commands::Watch { dirs, port, open } => {
            dirs.apply(&mut config);
            cmd::watch::run(config, verbose, port, open).await?;
        }
        Commands::Serve {
            dirs,
            clean,
            port,
            open,
        } => {
            dirs.apply(&mut config);
            config.build.clean |= clean;
            cmd::serve::run(config, verbose, port, open).await?;
        }
        Commands::Check { dirs } => {
            dirs.apply(&mut config);
            cmd::check::run(&config)?;
        }
    }

    Ok(())
}
