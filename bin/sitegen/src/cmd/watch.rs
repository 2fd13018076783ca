//! Watch command - rebuild on source changes, optionally serving the output

use std::path::PathBuf;

use color_eyre::eyre::{Result, WrapErr};
use sitegen_core::Config;

use crate::{shutdown::Shutdown, watcher};

/// Run the watch command.
///
/// Performs an initial build, then rebuilds from a clean output tree after
/// every debounced burst of changes. With a `port` the output is also served.
pub async fn run(config: Config, verbose: bool, port: Option<u16>, open_browser: bool) -> Result<()> {
    tracing::info!(input = %config.build.input_dir, ?port, "Starting watch mode");

    super::build::run(&config, verbose)?;

    let shutdown = Shutdown::on_signal();

    let server = match port {
        Some(port) => Some(super::serve::start(&config, Some(port), open_browser, shutdown.clone()).await?),
        None => None,
    };

    let input = PathBuf::from(&config.build.input_dir);
    let mut detector = watcher::open_detector(config.watch.detector, &input, &config.layout)?;
    println!("  Watching {} for changes", input.display());

    let watch_shutdown = shutdown.clone();
    let watched = tokio::task::spawn_blocking(move || {
        watcher::run(detector.as_mut(), &config.watch, &watch_shutdown, || {
            super::build::rebuild(&config, verbose).map(|_| ())
        })
    })
    .await
    .wrap_err("watcher task failed")?;
    watched?;

    if let Some(server) = server {
        server.await.wrap_err("dev server task failed")??;
    }

    Ok(())
}
