//! Serve command - build once, then serve the output tree

use std::path::Path;

use color_eyre::eyre::{Result, WrapErr};
use sitegen_core::Config;
use tokio::task::JoinHandle;

use crate::{server, shutdown::Shutdown};

/// Run the serve command.
pub async fn run(config: Config, verbose: bool, port: Option<u16>, open_browser: bool) -> Result<()> {
    super::build::run(&config, verbose)?;

    let shutdown = Shutdown::on_signal();
    let task = start(&config, port, open_browser, shutdown).await?;

    task.await.wrap_err("dev server task failed")?
}

/// Bind and spawn the dev server for the configured output directory.
///
/// Binding happens before this returns so address errors surface
/// immediately.
pub async fn start(
    config: &Config,
    port: Option<u16>,
    open_browser: bool,
    shutdown: Shutdown,
) -> Result<JoinHandle<Result<()>>> {
    let root = Path::new(&config.build.output_dir);
    let router = server::create_router(root)?;

    let port = port.unwrap_or(config.serve.port);
    let (listener, local) = server::bind(&config.serve.host, port).await?;
    let url = format!("http://{local}/");

    println!();
    println!("  Dev server running at {url}");
    println!("  Press Ctrl+C to stop");
    println!();
    tracing::info!(root = %root.display(), %local, "dev server started");

    if open_browser {
        if let Err(err) = open::that(&url) {
            tracing::warn!(error = %err, %url, "failed to open browser");
        }
    }

    Ok(tokio::spawn(server::serve(
        listener,
        router,
        shutdown,
        config.serve.shutdown_timeout(),
    )))
}
