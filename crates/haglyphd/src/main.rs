use anyhow::Context;
use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

use haglyphd::hub::rest::RestClient;
use haglyphd::{Config, LogLevel, SimulatedSurface, SyncEngine, WsDialer};

#[derive(Parser)]
#[command(version, about = "Home Assistant state sync for a glyph-matrix display")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "haglyphd.toml")]
    config: String,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;

    let level = args.log_level.unwrap_or(config.logging.level);
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(level))
        .init();

    tracing::info!("haglyphd starting");
    tracing::info!("Loaded config from: {}", args.config);
    tracing::info!(
        "Watching {} entity rules against {}",
        config.watch.len(),
        config.hub.url
    );

    let api_config = config.api.clone().filter(|a| a.enabled);
    let rest = RestClient::new(&config.hub.url, &config.hub.access_token);

    let engine = SyncEngine::new(
        config,
        Box::new(WsDialer),
        Box::new(|| Box::new(SimulatedSurface::new())),
    );
    let mut handle = engine.start();

    // The HTTP API runs alongside the engine and shuts down with it
    let mut api_shutdown = None;
    let api_join = api_config.map(|api| {
        let (tx, rx) = tokio::sync::oneshot::channel();
        api_shutdown = Some(tx);
        let status = handle.status();
        tokio::spawn(async move {
            if let Err(e) = haglyphd::api::serve(api.bind, api.port, status, rest, rx).await {
                tracing::error!("HTTP API server failed: {}", e);
            }
        })
    });

    tracing::info!("Press Ctrl+C to exit");

    let mut fatal = Ok(());
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => tracing::info!("Received shutdown signal"),
                Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
            }
        }
        result = handle.finished() => {
            if let Err(e) = &result {
                tracing::error!("Engine failed: {}", e);
            }
            fatal = result;
        }
    }

    handle.stop().await?;

    if let Some(tx) = api_shutdown {
        let _ = tx.send(());
    }
    if let Some(join) = api_join {
        let _ = join.await;
    }

    tracing::info!("haglyphd shutdown complete");
    fatal?;
    Ok(())
}
