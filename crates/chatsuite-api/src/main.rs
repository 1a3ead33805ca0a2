use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use chatsuite_core::Config;
use clap::{ArgAction, Args, Parser};
use tracing_subscriber::EnvFilter;

mod auth;
mod error;
mod routes;
mod state;

use state::AppState;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.common.verbose);

    let config_path = cli
        .common
        .config
        .unwrap_or_else(Config::default_config_path);
    let mut config = Config::ensure_at(&config_path)?;
    config.apply_env_overrides();
    tracing::info!(
        config = %config_path.display(),
        database = %config.database.display(),
        environment = ?config.environment,
        "Loaded configuration"
    );

    let state = AppState::from_config(config).await?;
    let app = routes::router(state);

    let addr = SocketAddr::new(cli.common.host.parse()?, cli.common.port);
    tracing::info!("Starting API server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{fallback},tower_http=info,sqlx=warn,hyper=warn"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[derive(Debug, Parser)]
#[command(author, version, about = "HTTP API server for ChatSuite")]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", env = "CHATSUITE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "3000", env = "CHATSUITE_PORT")]
    port: u16,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}
