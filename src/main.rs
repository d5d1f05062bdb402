use anyhow::{Context, Result};
use clap::Parser;
use podlive::{create_router, AppState, Config, ConnectionManager, FfmpegTranscoder, FsEventStore};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Live podcast room server
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Config file, without extension
    #[arg(long, default_value = "config/podlive")]
    config: String,

    /// Override the HTTP port from the config
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config))?;

    info!("Podlive v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Recordings: {}", cfg.storage.lives_dir.display());
    info!("Teardown policy: {:?}", cfg.rooms.teardown);

    let store = Arc::new(FsEventStore::new(&cfg.storage));
    let transcoder = Arc::new(FfmpegTranscoder::new(&cfg.transcode));
    let manager = Arc::new(ConnectionManager::new(&cfg, store, transcoder));

    let app = create_router(AppState::new(manager));

    let port = args.port.unwrap_or(cfg.service.http.port);
    let addr = format!("{}:{}", cfg.service.http.bind, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
