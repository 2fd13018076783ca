//! Build command - generates the output tree

use std::time::Instant;

use color_eyre::eyre::{Result, WrapErr};
use sitegen_core::Config;
use sitegen_generator::{BuildStats, Builder};

/// Run the build command.
///
/// Bundles assets, renders templates and copies everything else from the
/// input directory to the output directory.
pub fn run(config: &Config, verbose: bool) -> Result<BuildStats> {
    let start = Instant::now();
    tracing::info!(
        input = %config.build.input_dir,
        output = %config.build.output_dir,
        clean = config.build.clean,
        "Starting build"
    );
    tracing::debug!(?config, "Loaded configuration");

    let stats = Builder::from_config(config)
        .verbose(verbose)
        .build()
        .wrap_err("Build failed")?;

    let duration = start.elapsed();

    println!();
    println!("  Build completed successfully!");
    println!();
    println!("  Bundles:     {:>6}", stats.bundles);
    println!("  Rendered:    {:>6}", stats.rendered);
    println!("  Copied:      {:>6}", stats.copied);
    println!("  Directories: {:>6}", stats.directories);
    println!("  Skipped:     {:>6}", stats.skipped);
    println!();
    println!("  Duration:    {:.2}s", duration.as_secs_f64());
    println!("  Output:      {}", config.build.output_dir);
    println!();

    tracing::info!(?stats, ?duration, "Build completed successfully");

    Ok(stats)
}

/// Rebuild from a clean output tree, as triggered by the watcher.
pub fn rebuild(config: &Config, verbose: bool) -> Result<BuildStats> {
    let stats = Builder::from_config(config)
        .clean(true)
        .verbose(verbose)
        .build()
        .wrap_err("Build failed")?;

    println!(
        "  ✓ Rebuilt {} files in {}ms",
        stats.files(),
        stats.duration_ms
    );

    Ok(stats)
}
