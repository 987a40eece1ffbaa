use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use vita_gateway::app;

#[derive(Parser)]
#[command(name = "vita-gateway", about = "AI life-log backend")]
struct Cli {
    /// Path to vita.toml (env vars still override).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "vita_gateway=info,vita_pipeline=info,vita_ai=info,tower_http=warn".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let settings = vita_core::config::Settings::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        vita_core::config::Settings::default()
    });

    let bind = settings.bind.clone();
    let port = settings.port;
    let state = Arc::new(app::AppState::new(settings)?);

    // Startup reconciliation runs in the background; serving never waits.
    {
        let state = state.clone();
        tokio::spawn(async move {
            if let Some(report) = state
                .pipeline
                .indexer()
                .reconcile_if_needed(state.pipeline.records())
                .await
            {
                info!(
                    indexed = report.indexed,
                    failed = report.failed,
                    "startup vector reconcile done"
                );
            }
        });
    }

    let router = app::build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("vita gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
