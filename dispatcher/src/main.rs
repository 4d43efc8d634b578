//! Shipiru dispatcher binary.

use std::net::{IpAddr, SocketAddr};

use clap::Parser;

use shipiru_dispatcher::config::DispatcherConfig;
use shipiru_dispatcher::routes::{self, AppState};

#[derive(Parser)]
#[command(name = "shipiru-dispatcher", about = "Push webhook build dispatcher")]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "SHIPIRU_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Server port
    #[arg(short, long, env = "SHIPIRU_PORT", default_value = "3333")]
    port: u16,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "SHIPIRU_METRICS_PORT")]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    tracing::info!("Starting Shipiru dispatcher...");

    let config = DispatcherConfig::from_env()?;
    tracing::info!(
        path = %config.endpoint.path,
        script = %config.command.script_path.display(),
        "Configuration loaded"
    );

    if let Some(port) = cli.metrics_port {
        shipiru_dispatcher::metrics::init_metrics(SocketAddr::new(cli.host, port));
    }

    let state = AppState::new(config);
    let supervisor = state.supervisor.clone();
    let app = routes::router(state);

    // Start server
    let addr = SocketAddr::new(cli.host, cli.port);
    tracing::info!("Webhook listener running on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let in_flight = supervisor.active_jobs();
    if in_flight > 0 {
        tracing::warn!(in_flight, "Shutting down with builds in flight, they will be killed");
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Plain text logs by default, one JSON object per line with `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => builder.json().init(),
        _ => builder.init(),
    }
}

/// Resolves on SIGINT or SIGTERM. A handler that cannot be installed is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    };
    tracing::info!(signal = received, "Shutting down, no longer accepting webhooks");
}
