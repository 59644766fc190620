//! Acceptor and shutdown coordination
//!
//! [`Server::run`] accepts connections until the shutdown future resolves, then:
//!
//! 1. drops the listener so no new connections are accepted,
//! 2. marks the session registry as closing and closes every live session
//!    (each waits, bounded, for its in-flight reply),
//! 3. waits, bounded, for every connection task to finish,
//! 4. drains and syncs the append-only log.

use crate::connection::{handle_connection, ConnectionStats, SessionRegistry, DEFAULT_CLOSE_TIMEOUT};
use crate::db::Database;
use anyhow::Context;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Upper bound on waiting for connection tasks during shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Server {
    listener: TcpListener,
    db: Arc<Database>,
    sessions: Arc<SessionRegistry>,
    stats: Arc<ConnectionStats>,
    tasks: TaskTracker,
    close_timeout: Duration,
    shutdown_timeout: Duration,
}

impl Server {
    /// Binds the listening socket.
    pub async fn bind(addr: &str, db: Arc<Database>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;

        Ok(Self {
            listener,
            db,
            sessions: Arc::new(SessionRegistry::new()),
            stats: Arc::new(ConnectionStats::new()),
            tasks: TaskTracker::new(),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        })
    }

    /// Overrides the per-session close timeout and the overall shutdown timeout.
    pub fn with_timeouts(mut self, close_timeout: Duration, shutdown_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    pub fn sessions(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.sessions)
    }

    /// Accepts connections until `shutdown` resolves, then shuts down
    /// gracefully.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let Server {
            listener,
            db,
            sessions,
            stats,
            tasks,
            close_timeout,
            shutdown_timeout,
        } = self;

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        tasks.spawn(handle_connection(
                            stream,
                            addr,
                            Arc::clone(&db),
                            Arc::clone(&sessions),
                            Arc::clone(&stats),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        info!("Shutdown signal received, stopping server...");
        drop(listener);

        sessions.close_all(close_timeout).await;

        tasks.close();
        if tokio::time::timeout(shutdown_timeout, tasks.wait()).await.is_err() {
            warn!(
                remaining = tasks.len(),
                timeout_ms = shutdown_timeout.as_millis() as u64,
                "Timed out waiting for connections to finish"
            );
        }

        // Joining the AOF writer blocks on file I/O
        tokio::task::spawn_blocking(move || db.close())
            .await
            .context("AOF close task failed")?;

        info!("Server shutdown complete");
        Ok(())
    }
}
