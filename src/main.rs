//! Mediabridge CLI - serves local media to a remote controller.
//!
//! See the `mediabridge` library for the protocol engine.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mediabridge::connection::Connection;
use mediabridge::media::{FsByteSource, FsCatalog, ImageThumbnailProvider, LocatorResolver};
use mediabridge::{Config, ConnectionManager, Dispatcher, TransferEngine, WsTransport};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "mediabridge")]
#[command(version)]
#[command(about = "Serve local media to a remote controller over WebSocket")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the controller and serve requests until Ctrl-C
    Run {
        /// Controller URL (overrides config)
        #[arg(long)]
        server_url: Option<String>,
        /// Directory to serve (overrides config)
        #[arg(long)]
        media_root: Option<PathBuf>,
    },
    /// Print the SHA-256 of a file
    Hash {
        /// Path or file:// URI
        locator: String,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        save: bool,
    },
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Ok(path) = std::env::var("MEDIABRIDGE_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.format_timestamp_secs().init();
    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")
}

async fn serve(config: Config) -> Result<()> {
    let catalog = FsCatalog::new(&config.media_root).with_context(|| {
        format!("Media root {} is not accessible", config.media_root.display())
    })?;
    let resolver = LocatorResolver::confined(catalog.root())?;
    let transfer = TransferEngine::new(
        Arc::new(FsByteSource::new(resolver.clone())),
        Arc::new(ImageThumbnailProvider::new(resolver)),
    );

    let url = config.websocket_url()?;
    log::info!(
        "Serving {} to {} as {}",
        catalog.root().display(),
        url,
        config.device_id
    );

    let (manager, events) =
        ConnectionManager::new(WsTransport::new(url), config.ping_interval());
    let dispatcher = Dispatcher::new(
        Arc::new(manager.clone()),
        Arc::new(catalog),
        Arc::new(transfer),
        config.sdk,
    );
    let dispatch = tokio::spawn(dispatcher.run(events));

    manager.ensure_connected();
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    log::info!("Shutting down");
    manager.close();
    dispatch.abort();
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run {
        server_url: None,
        media_root: None,
    }) {
        Commands::Run {
            server_url,
            media_root,
        } => {
            let mut config = Config::load()?;
            if let Some(url) = server_url {
                config.server_url = url;
            }
            if let Some(root) = media_root {
                config.media_root = root;
            }
            runtime()?.block_on(serve(config))?;
        }
        Commands::Hash { locator } => {
            let transfer = TransferEngine::new(
                Arc::new(FsByteSource::new(LocatorResolver::unrestricted())),
                Arc::new(mediabridge::media::NoThumbnails),
            );
            let digest = runtime()?.block_on(transfer.compute_hash(&locator))?;
            println!("{digest}  {locator}");
        }
        Commands::Config { save } => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                config.save()?;
            }
        }
    }

    Ok(())
}
