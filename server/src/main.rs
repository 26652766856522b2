use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vidgate_core::{Config, SchedulerConfig};
use vidgate_server::{build_router, AppState, APP_NAME, APP_VERSION};

/// Command line arguments for the vidgate streaming server
#[derive(Parser, Debug)]
#[command(name = "vidgate-server")]
#[command(about = "Self-contained HTTP video streaming server for trusted networks")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "VIDGATE_CONFIG")]
    config: Option<String>,

    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    config
        .ensure_directories()
        .context("failed to prepare media directories")?;

    init_tracing(&config);

    info!("starting {APP_NAME} v{APP_VERSION}");
    for dir in &config.video.directories {
        info!(
            "media root {}: {} ({})",
            dir.name,
            dir.path.display(),
            if dir.enabled { "enabled" } else { "disabled" }
        );
    }
    info!(
        max_connections = config.server.max_connections,
        tokens_per_second = config.server.effective_tokens_per_second(),
        max_upload_size = config.video.max_upload_size,
        "admission configuration in effect"
    );

    let graceful_timeout = config.server.graceful_timeout;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid host/port combination")?;

    let state = AppState::new(config, SchedulerConfig::default())
        .context("failed to initialize application state")?;
    state.scheduler.start().await;

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {addr}");

    let shutdown = CancellationToken::new();
    let server = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        })
    };

    shutdown_signal().await;
    info!("graceful shutdown initiated");

    // Stop background work first so no new deletions land mid-teardown,
    // then drain in-flight requests within the configured deadline.
    state.scheduler.stop().await;
    shutdown.cancel();

    match tokio::time::timeout(graceful_timeout, server).await {
        Ok(Ok(Ok(()))) => info!("server stopped"),
        Ok(Ok(Err(e))) => warn!("server error during shutdown: {e}"),
        Ok(Err(e)) => warn!("server task failed: {e}"),
        Err(_) => warn!(
            "graceful shutdown deadline ({}s) exceeded, exiting",
            graceful_timeout.as_secs()
        ),
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let default_filter = format!(
        "vidgate_server={level},vidgate_core={level},tower_http=warn",
        level = config.logging.level
    );
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install ctrl-c handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
