//! Sessions and the live-session registry
//!
//! A [`Session`] is the shared half of a client connection: the write side of
//! the socket behind a lock, the in-flight counter and a close signal. The
//! connection task owns the read side and polls the close signal between
//! frames. The [`SessionRegistry`] tracks every live session so shutdown can
//! close them all.

use crate::connection::wait::{InFlight, InFlightGuard};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long a session waits for its in-flight dispatch when closed.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Session {
    id: u64,
    addr: SocketAddr,

    /// One writer at a time
    writer: tokio::sync::Mutex<BufWriter<OwnedWriteHalf>>,

    in_flight: InFlight,

    /// Cancelled once the session has been asked to close
    closed: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("in_flight", &self.in_flight.current())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Session {
    pub fn new(id: u64, addr: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            id,
            addr,
            writer: tokio::sync::Mutex::new(BufWriter::new(writer)),
            in_flight: InFlight::new(),
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Writes and flushes `bytes` as one unit.
    pub async fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await
    }

    /// Marks a frame as dispatching until the guard is dropped.
    pub fn begin_dispatch(&self) -> InFlightGuard<'_> {
        self.in_flight.begin()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.current()
    }

    /// Resolves once [`Session::close`] has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Asks the connection to stop.
    ///
    /// Waits up to `timeout` for the frame being dispatched (if any) to finish
    /// writing its reply, then signals the connection task, which stops reading
    /// and shuts the socket down.
    pub async fn close(&self, timeout: Duration) {
        if !self.in_flight.wait_idle(timeout).await {
            warn!(
                client = %self.addr,
                in_flight = self.in_flight.current(),
                "Timed out waiting for in-flight command, closing anyway"
            );
        }
        self.closed.cancel();
    }

    /// Shuts down the write side of the socket.
    pub async fn shutdown_writer(&self) -> std::io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

#[derive(Debug, Default)]
struct Registry {
    sessions: HashMap<u64, Arc<Session>>,
    closing: bool,
}

/// The set of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: Mutex<Registry>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a session id.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers `session`. Returns `false` once the registry is closing, in
    /// which case the caller must drop the connection.
    pub fn insert(&self, session: Arc<Session>) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.closing {
            return false;
        }
        inner.sessions.insert(session.id(), session);
        true
    }

    pub fn remove(&self, id: u64) -> Option<Arc<Session>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions
            .remove(&id)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sessions
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closing(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closing
    }

    /// Stops accepting sessions and closes every registered one concurrently,
    /// each bounded by `timeout`.
    pub async fn close_all(&self, timeout: Duration) {
        let sessions: Vec<Arc<Session>> = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.closing = true;
            inner.sessions.values().cloned().collect()
        };

        debug!(sessions = sessions.len(), "Closing sessions");

        let mut closing = JoinSet::new();
        for session in sessions {
            closing.spawn(async move { session.close(timeout).await });
        }
        while closing.join_next().await.is_some() {}
    }
}
