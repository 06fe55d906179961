//! wfx server
//!
//! Serves the northbound (management) and southbound (client) APIs on two
//! listeners backed by one SQLite database and one event bus.

use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use wfxrs_database::Database;

mod config;
mod routes;
mod state;

use config::{Config, LogFormat};
use state::AppState;

/// wfx workflow executor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Northbound (management) address, overrides the configuration
    #[arg(long)]
    north_addr: Option<String>,

    /// Southbound (client) address, overrides the configuration
    #[arg(long)]
    south_addr: Option<String>,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,wfx=debug".into());

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Parse CLI args
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(addr) = args.north_addr {
        config.north_addr = addr;
    }
    if let Some(addr) = args.south_addr {
        config.south_addr = addr;
    }

    init_tracing(config.log_format);
    info!(
        north = %config.north_addr,
        south = %config.south_addr,
        "Starting wfx"
    );

    // Initialize database
    let database = Database::new(&config.database_url).await?;
    database.migrate().await?;

    let north_listener = TcpListener::bind(&config.north_addr).await?;
    let south_listener = TcpListener::bind(&config.south_addr).await?;

    let state = AppState::new(config, database.clone());
    let north = routes::northbound_routes(state.clone());
    let south = routes::southbound_routes(state.clone());

    tokio::spawn({
        let state = state.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown requested, closing event streams");
            state.shutdown();
        }
    });

    info!(addr = %state.config.north_addr, "Northbound listening");
    info!(addr = %state.config.south_addr, "Southbound listening");

    let (north_result, south_result) = tokio::join!(
        serve(north_listener, north, &state),
        serve(south_listener, south, &state),
    );
    north_result?;
    south_result?;

    database.close().await?;
    info!("Server stopped");
    Ok(())
}

async fn serve(listener: TcpListener, app: Router, state: &AppState) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| {
            error!(error = %e, "Listener failed");
            e.into()
        })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
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
                error!(error = %e, "Failed to listen for SIGTERM");
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
