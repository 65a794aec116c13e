//! Bridgebot CLI entry point.

use anyhow::Context as _;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bridgebot")]
#[command(about = "HTTP bridge that relays conversations through Discord channels")]
struct Cli {
    /// Path to config file (optional)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("starting bridgebot");

    // Load configuration
    let config = if let Some(config_path) = cli.config {
        bridgebot::config::Config::load_from_path(&config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()))?
    } else {
        bridgebot::config::Config::load().context("failed to load configuration")?
    };

    tracing::info!(instance_dir = %config.instance_dir.display(), "configuration loaded");

    // Connect the transport and hand its event stream to the correlator
    let transport: Arc<dyn bridgebot::transport::ChatTransportDyn> =
        Arc::new(bridgebot::transport::DiscordTransport::new(
            &config.discord.token,
            config.discord.server_id,
        ));

    tracing::info!(transport = transport.name(), "connecting transport");

    let events = transport
        .start()
        .await
        .context("failed to start discord transport")?;

    let ledger = Arc::new(bridgebot::conversation::ActivityLedger::new());
    let correlator = Arc::new(bridgebot::conversation::ReplyCorrelator::new());
    let dispatcher = correlator.run(events, ledger.clone());

    let gateway = Arc::new(bridgebot::gateway::ConversationGateway::new(
        transport.clone(),
        correlator.clone(),
        ledger.clone(),
        config.discord.responder_id,
        config.reply_timeout_secs.map(Duration::from_secs),
    ));

    // Background pruning keeps the server under the platform channel limit
    let pruner = Arc::new(bridgebot::pruner::ChannelPruner::new(
        transport.clone(),
        ledger,
        config.prune.channel_ceiling,
        config.prune.policy,
    ));
    let pruner_task = pruner.spawn(
        Duration::from_secs(config.prune.interval_secs),
        transport.state(),
    );

    // HTTP server
    let state = Arc::new(bridgebot::api::ApiState::new(
        gateway,
        transport.state(),
        config.http.ratelimit_max_rps,
    ));

    let bind: std::net::SocketAddr = format!("{}:{}", config.http.bind, config.http.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid http bind address {}:{}",
                config.http.bind, config.http.port
            )
        })?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let server = bridgebot::api::start_http_server(
        bind,
        state,
        config.http.cors_origin.clone(),
        shutdown_rx,
    )
    .await
    .context("failed to start HTTP server")?;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutdown signal received");

    // Graceful shutdown. Closing the correlator fails any request still
    // parked on a reply, otherwise the HTTP drain below never finishes.
    let _ = shutdown_tx.send(true);
    pruner_task.abort();
    dispatcher.abort();
    correlator.close();
    transport.shutdown().await?;
    let _ = server.await;

    tracing::info!("bridgebot stopped");
    Ok(())
}
