//! ttyshare server binary.
//!
//! Parses the command line, merges it with the settings file, and serves the
//! HTTP/WebSocket API until Ctrl+C.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ttyshare::{
    api,
    config::{self, CliOverrides, ConfigError, FileSettings, Settings},
    pty::NativePtySpawner,
    session::SessionRegistry,
};

/// ttyshare - share a terminal over WebSockets
///
/// Every session identifier names one shell. Browsers and other clients
/// attach to `/ws/{id}` to type into it or `/ws-ro/{id}` to watch it.
#[derive(Parser, Debug)]
#[command(name = "ttyshare", version, about, long_about = None)]
struct Cli {
    /// Address to bind the HTTP/WebSocket server
    #[arg(long, env = "TTYSHARE_BIND")]
    bind: Option<SocketAddr>,

    /// Require HTTP Basic auth with this `user:pass`
    #[arg(short = 'c', long, env = "TTYSHARE_CREDENTIAL")]
    credential: Option<String>,

    /// Settings file (defaults to $XDG_CONFIG_HOME/ttyshare/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log the commands typed by read-write clients
    #[arg(long)]
    command_log: bool,

    /// Maximum clients attached to one session
    #[arg(long)]
    max_clients: Option<usize>,

    /// Command each session runs (defaults to $SHELL)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[derive(Error, Debug)]
enum TtyshareError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), TtyshareError> {
    let cli = Cli::parse();
    init_tracing();

    let file = match cli.config.clone().or_else(config::default_config_path) {
        Some(path) => FileSettings::load(&path)?.unwrap_or_default(),
        None => FileSettings::default(),
    };
    let settings = Settings::resolve(
        file,
        CliOverrides {
            bind: cli.bind,
            credential: cli.credential,
            command: cli.command,
            command_log: cli.command_log,
            max_clients_per_session: cli.max_clients,
        },
    )?;

    run_server(settings).await
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ttyshare=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_server(settings: Settings) -> Result<(), TtyshareError> {
    tracing::info!(
        command = %settings.command.display(),
        command_log = settings.command_log,
        max_clients = settings.session.max_clients,
        "ttyshare server starting"
    );
    if settings.credential.is_some() {
        tracing::info!("basic auth credential configured");
    }

    let sessions = SessionRegistry::new(Arc::new(NativePtySpawner), settings.session);
    let state = api::AppState {
        sessions: sessions.clone(),
        command: settings.command,
        command_log: settings.command_log,
    };
    let app = api::router(
        state,
        api::RouterConfig {
            credential: settings.credential,
        },
    );

    let listener = tokio::net::TcpListener::bind(settings.bind)
        .await
        .map_err(|source| TtyshareError::Bind {
            addr: settings.bind,
            source,
        })?;
    tracing::info!(addr = %settings.bind, "HTTP/WS server listening");

    let registry = sessions.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            tracing::info!("received Ctrl+C");
            // Closing every session ends its connections, letting the
            // server finish its graceful shutdown.
            let closed = registry.shutdown().await;
            tracing::info!(sessions = closed, "sessions terminated");
        })
        .await
        .map_err(TtyshareError::Serve)?;

    tracing::info!("ttyshare server exiting");
    Ok(())
}
