use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use mirror_channels::{RelayLoop, SlackPlatform, install_crypto_provider};
use mirror_core::{ChatPlatform, MirrorConfig};

#[derive(Parser, Debug)]
#[command(
    name = "slack-mirror",
    version,
    about = "Mirror one conversation across Slack channels in separate workspaces"
)]
struct Cli {
    /// Config file (YAML, or TOML when it ends in .toml)
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Connect every channel, then exit without relaying.
    #[arg(long, default_value_t = false)]
    check: bool,
}

fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

/// `--config`, then `CONFIG_PATH`, then the per-user config directory
fn config_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => default_config_path(),
    }
}

fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("slack-mirror").join("config.yaml"))
        .ok_or_else(|| anyhow!("No config directory on this platform; pass --config"))
}

fn slack_platform(channel: &mirror_core::ChannelConfig) -> mirror_core::Result<Arc<dyn ChatPlatform>> {
    Ok(Arc::new(SlackPlatform::new(channel.credential.clone())?))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);
    install_crypto_provider();

    let path = config_path(&cli)?;
    let config = MirrorConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    info!(
        "Loaded {} channels from {}",
        config.channels.len(),
        path.display()
    );

    let mut relay = RelayLoop::connect(&config, slack_platform)
        .await
        .context("Failed to connect channels")?;

    if cli.check {
        info!("All channels resolved; exiting (--check)");
        relay.shutdown();
        return Ok(());
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl-C, shutting down"),
                Err(e) => warn!("Cannot listen for Ctrl-C: {e}"),
            }
            cancel.cancel();
        }
    });

    relay.run(cancel).await;
    Ok(())
}
