use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use slackcord_channels::{DiscordDispatcher, SlackSource};
use slackcord_core::card::CardPolicy;
use slackcord_core::engine::{EngineOptions, ReconciliationEngine};
use slackcord_files::FileStore;
use slackcord_gateway::{GatewayConfig, RelayGateway};
use slackcord_store::MappingStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::SlackcordConfig;

/// Buffered raw events between the gateway and the normalizer.
const EVENT_QUEUE_SIZE: usize = 256;

#[derive(Parser)]
#[command(name = "slackcord")]
#[command(version)]
#[command(about = "slackcord — mirror Slack conversations into Discord")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay
    Start,

    /// Initialize config directory and default config
    Init,

    /// Show current configuration (secrets masked)
    Config,

    /// Show mapping store statistics
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config),
        Commands::Status => cmd_status(&cli.config),
        Commands::Start => cmd_start(&cli.config).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        info!("Created default config at {}", config_path.display());
    }

    tokio::fs::create_dir_all(config_dir.join("downloads")).await?;

    println!("slackcord initialized at {}", config_dir.display());
    println!(
        "Edit {} to configure your Slack and Discord tokens.",
        config_path.display()
    );
    Ok(())
}

fn cmd_config(path: &Option<PathBuf>) -> Result<()> {
    let config = SlackcordConfig::load(path.as_deref())?;
    println!("{:#?}", config);
    Ok(())
}

fn cmd_status(path: &Option<PathBuf>) -> Result<()> {
    let config = SlackcordConfig::load(path.as_deref())?;
    let store = MappingStore::open(config.storage.db_path())?;
    let stats = store.stats()?;
    println!("Mapping store at {}", config.storage.db_path().display());
    println!("  messages: {}", stats.messages);
    println!("  threads:  {}", stats.threads);
    println!("  channels: {}", stats.channels);
    println!("  files:    {}", stats.files);
    Ok(())
}

async fn cmd_start(path: &Option<PathBuf>) -> Result<()> {
    let config = SlackcordConfig::load(path.as_deref())?;
    info!("============= Starting Up =============");

    let store = Arc::new(
        MappingStore::open(config.storage.db_path()).context("Failed to open mapping store")?,
    );

    let files = Arc::new(FileStore::new(
        config.storage.downloads_dir(),
        config.slack.bot_token.clone(),
        config.server.public_url.clone(),
        config.storage.keep_files,
    )?);

    // Both platform connections are fatal when they fail: no useful work
    // can proceed without them.
    let guild_id: u64 = config
        .discord
        .guild_id
        .parse()
        .with_context(|| format!("Invalid Discord guild id '{}'", config.discord.guild_id))?;
    let dispatcher = Arc::new(
        DiscordDispatcher::connect(&config.discord.bot_token, guild_id)
            .await
            .context("Discord startup failed")?,
    );

    let source = Arc::new(SlackSource::new(
        config.slack.bot_token.clone(),
        files.clone(),
    )?);
    source
        .start(config.slack.join_channels)
        .await
        .context("Slack startup failed")?;

    let engine = Arc::new(ReconciliationEngine::new(
        store,
        dispatcher,
        EngineOptions {
            card: CardPolicy {
                inline_limit_bytes: config.inline_limit_bytes(),
                ..CardPolicy::default()
            },
            keep_files: config.storage.keep_files,
        },
    ));

    let (events_tx, mut events_rx) = mpsc::channel::<Value>(EVENT_QUEUE_SIZE);
    let bind: SocketAddr = ([0, 0, 0, 0], config.server.port).into();
    let gateway = RelayGateway::new(
        GatewayConfig {
            bind,
            signing_secret: config.slack.signing_secret.clone(),
            downloads_dir: config.storage.downloads_dir(),
            serve_files: config.server.serve_files,
            list_files: config.server.list_files,
        },
        events_tx,
    );
    let gateway_handle = gateway.spawn();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                cancel.cancel();
            }
        });
    }

    info!("========== Start Up Complete ==========");

    // One task per inbound event; events interleave freely and consistency
    // comes from the mapping store. A failure in one event's processing is
    // logged and never unwinds the relay.
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            maybe_event = events_rx.recv() => {
                let Some(raw) = maybe_event else { break };
                let source = source.clone();
                let engine = engine.clone();
                tokio::spawn(async move {
                    match source.normalize(&raw).await {
                        Ok(Some(event)) => {
                            let action = event.action();
                            if let Err(e) = engine.process(event).await {
                                error!("Failed to process {} event: {:#}", action, e);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => error!("Failed to normalize Slack event: {:#}", e),
                    }
                });
            }
        }
    }

    gateway_handle.abort();
    info!("======= Disconnecting. Goodbye! =======");
    Ok(())
}
