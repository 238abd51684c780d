mod net;
mod routes;
mod ui;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use quickdrop_core::{spawn_reaper, BlobStore, ReaperConfig, TransferManager};
use tracing::{error, info};

use crate::routes::{create_router, AppState};

/// quickdrop: hand a file to someone on the same network, once.
#[derive(Parser)]
#[command(name = "quickdrop")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value = "8989", env = "QUICKDROP_PORT")]
    port: u16,

    /// Address to bind the server to.
    #[arg(long, default_value = "0.0.0.0", env = "QUICKDROP_BIND")]
    bind: String,

    /// Directory holding files that are waiting to be downloaded.
    #[arg(long, default_value = "uploads", env = "QUICKDROP_UPLOAD_DIR")]
    upload_dir: PathBuf,

    /// Seconds an upload may wait for its download before it is destroyed.
    #[arg(long, default_value = "3600", env = "QUICKDROP_TTL_SECS")]
    ttl_secs: u64,

    /// Seconds between expiry sweeps.
    #[arg(long, default_value = "60", env = "QUICKDROP_SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: u64,

    /// Host used in download links and QR codes. Defaults to the first
    /// non-loopback IPv4 address.
    #[arg(long, env = "QUICKDROP_PUBLIC_HOST")]
    public_host: Option<String>,

    /// Serve the web UI from this directory instead of the built-in copy.
    #[arg(long, env = "QUICKDROP_WEB_DIR")]
    web_dir: Option<PathBuf>,

    /// Reject uploads larger than this many bytes. Unlimited by default.
    #[arg(long, env = "QUICKDROP_MAX_UPLOAD_BYTES")]
    max_upload_bytes: Option<usize>,

    /// Don't open the UI in a browser on startup.
    #[arg(long, env = "QUICKDROP_NO_BROWSER")]
    no_browser: bool,
}

fn configure_logging() {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_line_number(true)
        .with_target(false)
        .with_file(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() {
    configure_logging();
    let args = Args::parse();

    info!("quickdrop starting");

    if args.sweep_interval_secs == 0 {
        error!("--sweep-interval-secs must be greater than zero");
        std::process::exit(1);
    }

    info!("Storing uploads in {}", args.upload_dir.display());
    let transfers = Arc::new(TransferManager::new(BlobStore::new(args.upload_dir.clone())));

    let reaper = spawn_reaper(
        transfers.clone(),
        ReaperConfig {
            ttl: Duration::from_secs(args.ttl_secs),
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
        },
    );

    let host = args.public_host.clone().unwrap_or_else(net::local_ip);
    let public_base_url = format!("http://{host}:{}", args.port);

    let state = Arc::new(AppState {
        transfers,
        public_base_url: public_base_url.clone(),
    });
    let app = create_router(state, args.web_dir.as_deref(), args.max_upload_bytes);
    let addr = format!("{}:{}", args.bind, args.port);

    info!("Binding to {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {addr}: {e}");
            std::process::exit(1);
        });

    println!();
    println!("QuickDrop is running at: {public_base_url}");
    println!("OPEN THIS URL IN YOUR BROWSER");
    println!();

    if !args.no_browser {
        net::open_browser(&public_base_url);
    }

    info!("quickdrop listening on http://{addr}");
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    reaper.shutdown().await;

    if let Err(e) = result {
        error!("Server error: {e}");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
