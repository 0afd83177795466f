use anyhow::Result;
use clap::Parser;
use habrsearch_core::{Repository, RepositoryOptions};
use habrsearch_server::{build_app, spawn_resync, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Storage directory
    #[arg(long, default_value = "./data/habr")]
    db: PathBuf,
    /// Ranking config file
    #[arg(long, default_value = "./repo.cfg")]
    config: PathBuf,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8881)]
    port: u16,
    /// Directory of article images served under /images
    #[arg(long)]
    images_dir: Option<PathBuf>,
    /// Dump directory reloaded on every resync
    #[arg(long)]
    dump_path: Option<PathBuf>,
    /// Minutes between resyncs, 0 disables
    #[arg(long, default_value_t = 30)]
    sync_minutes: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let repo = Arc::new(Repository::new(RepositoryOptions::new(args.db, args.config)));
    let init = repo.clone();
    tokio::task::spawn_blocking(move || init.init()).await??;

    if args.sync_minutes > 0 {
        spawn_resync(repo.clone(), args.dump_path, Duration::from_secs(args.sync_minutes * 60));
    }

    let mut state = AppState::from_env(repo.clone());
    if let Some(dir) = args.images_dir {
        state = state.with_images(dir);
    }
    let app = build_app(state);
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    tokio::task::spawn_blocking(move || repo.shutdown()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
    }
}
