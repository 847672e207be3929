//! Command line surface.

use std::path::PathBuf;

use anyhow::{Context, Result};
use cb_core::config::ClipboardBackend;
use cb_core::{ClipboardSnapshot, FormatTag, ServerConfig};
use cb_platform::clipboard::factory_for;
use cb_platform::{ClipboardGateway, GatewayError, GatewayOptions, RetryPolicy};
use cb_server::ClipboardServer;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::bootstrap;

#[derive(Debug, Parser)]
#[command(name = "clipbridge", version, about = "Share the local clipboard with networked peers")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Put standard input on the clipboard
    Copy,
    /// Write one clipboard format to standard output
    Paste {
        #[arg(short, long, default_value = FormatTag::TEXT)]
        format: String,
    },
    /// Serve the clipboard to peers
    Server(ServerArgs),
}

#[derive(Debug, Default, clap::Args)]
pub struct ServerArgs {
    #[arg(short = 'H', long)]
    pub host: Option<String>,
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Use a headless in-process clipboard instead of the system one
    #[arg(long)]
    pub memory: bool,
}

impl ServerArgs {
    /// Apply flags on top of the loaded configuration.
    pub fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.memory {
            config.clipboard.backend = ClipboardBackend::Memory;
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let mut config = bootstrap::resolve_config(self.config.as_deref())?;

        match self.command {
            Command::Copy => copy(&config).await,
            Command::Paste { format } => paste(&config, FormatTag::new(format)).await,
            Command::Server(args) => {
                args.apply(&mut config);
                serve(&config).await
            }
        }
    }
}

async fn local_gateway(config: &ServerConfig) -> Result<ClipboardGateway> {
    ClipboardGateway::spawn(
        factory_for(config.clipboard.backend),
        GatewayOptions {
            retry: RetryPolicy::from_settings(&config.clipboard),
            ..GatewayOptions::default()
        },
    )
    .await
}

async fn copy(config: &ServerConfig) -> Result<()> {
    let mut input = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut input)
        .await
        .context("Failed to read standard input")?;

    let snapshot = ClipboardSnapshot::parse_input(&String::from_utf8_lossy(&input));
    debug!(items = snapshot.len(), bytes = snapshot.total_size_bytes(), "copying");

    let gateway = local_gateway(config).await?;
    let result = commit(&gateway, snapshot).await;
    gateway.shutdown().await;
    result
}

/// Write `snapshot`. A write the clipboard keeps refusing is dropped.
async fn commit(gateway: &ClipboardGateway, snapshot: ClipboardSnapshot) -> Result<()> {
    match gateway.write(snapshot, None).await {
        Ok(()) => Ok(()),
        Err(err @ GatewayError::Closed) => {
            Err(anyhow::Error::new(err).context("Failed to write the clipboard"))
        }
        Err(err) => {
            warn!(error = %err, "clipboard write dropped");
            Ok(())
        }
    }
}

async fn paste(config: &ServerConfig, format: FormatTag) -> Result<()> {
    let gateway = local_gateway(config).await?;
    let result = gateway.read(format.clone()).await;
    gateway.shutdown().await;

    let bytes = result.with_context(|| format!("Failed to read {format} from the clipboard"))?;
    if bytes.is_empty() {
        debug!(%format, "format not on the clipboard");
        return Ok(());
    }

    let mut stdout = tokio::io::stdout();
    stdout.write_all(&bytes).await?;
    stdout.flush().await?;
    Ok(())
}

async fn serve(config: &ServerConfig) -> Result<()> {
    let server = ClipboardServer::bind(config, factory_for(config.clipboard.backend))
        .await
        .with_context(|| format!("Failed to start server on {}", config.server.address()))?;

    let registry = server.registry().clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupted, shutting down");
                registry.request_stop();
            }
            Err(err) => warn!(error = %err, "cannot listen for Ctrl-C"),
        }
    });

    server.run().await
}
