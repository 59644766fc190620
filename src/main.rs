//! quillkv - An In-Memory Key-Value Server
//!
//! This is the main entry point for the quillkv server.
//! It parses the configuration, replays the append-only log, and serves
//! connections until Ctrl+C or SIGTERM.

use anyhow::Context;
use clap::Parser;
use quillkv::config::Config;
use quillkv::db::Database;
use quillkv::server::Server;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn print_banner(config: &Config) {
    println!(
        r#"
                  _ _ _ _
   __ _ _   _(_) | | | ____   __
  / _` | | | | | | | |/ /\ \ / /
 | (_| | |_| | | | |   <  \ V /
  \__, |\__,_|_|_|_|_|\_\  \_/
     |_|

quillkv v{} - In-Memory Key-Value Server
──────────────────────────────────────────────────────────────
Server starting on {}
AOF: {}

Use Ctrl+C to shutdown gracefully.
"#,
        quillkv::VERSION,
        config.bind_address(),
        match config.aof_config() {
            Some(aof) => aof.path.display().to_string(),
            None => "disabled".to_string(),
        }
    );
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::parse();

    // Set up logging; RUST_LOG takes precedence over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Print the banner
    print_banner(&config);

    // Create the database (shared across all connections), replaying the AOF
    let db = match config.aof_config() {
        Some(aof) => {
            let path = aof.path.display().to_string();
            let db = tokio::task::spawn_blocking(move || Database::open(&aof))
                .await
                .context("AOF load task failed")?
                .with_context(|| format!("failed to open AOF {}", path))?;
            info!(path = %path, keys = db.len(), "Database loaded from AOF");
            db
        }
        None => {
            info!("AOF disabled, running memory only");
            Database::new()
        }
    };

    let server = Server::bind(&config.bind_address(), Arc::new(db))
        .await?
        .with_timeouts(config.close_timeout(), config.shutdown_timeout());
    info!("Listening on {}", server.local_addr()?);

    server.run(shutdown_signal()).await
}
