//! Connection Handler Module
//!
//! This module handles individual client connections to quillkv.
//! Each client gets its own handler task that runs in a loop,
//! decoding frames and sending replies.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. Session registered, ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read bytes from socket  │◄├── session closed? ──► stop
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Decode frame            │─├── protocol error ──► reply, close
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Execute (in flight)     │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Send reply              │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects / error / server shutdown
//!        │
//!        ▼
//! 5. Socket shut down, session unregistered
//! ```
//!
//! ## Buffer Management
//!
//! We use a BytesMut buffer to accumulate incoming data. TCP is a stream
//! protocol, so a read may hold part of a frame or several frames; the decoder
//! keeps its place between reads.

use crate::connection::session::{Session, SessionRegistry};
use crate::db::Database;
use crate::protocol::{Decoder, Frame, ProtocolError, RespValue};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
///
/// Owns the read half of the socket and the decoder state; replies go out
/// through the shared [`Session`].
pub struct ConnectionHandler {
    reader: OwnedReadHalf,

    session: Arc<Session>,

    /// Buffer for incoming data
    buffer: BytesMut,

    decoder: Decoder,

    /// The database (shared across connections)
    db: Arc<Database>,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        session: Arc<Session>,
        db: Arc<Database>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            reader,
            session,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            decoder: Decoder::new(),
            db,
            stats,
        }
    }

    /// Runs the main connection loop until the client disconnects, an error
    /// occurs or the session is closed, then shuts the socket down.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        let addr = self.session.addr();
        info!(client = %addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %addr, "Connection closed by server"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %addr, "Client disconnected")
            }
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %addr, error = %e, "Connection error"),
        }

        if let Err(e) = self.session.shutdown_writer().await {
            trace!(client = %addr, error = %e, "Socket shutdown failed");
        }
        self.stats.connection_closed();
        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(frame) = self.next_frame().await? {
                if self.session.is_closed() {
                    return Ok(());
                }
                self.dispatch(frame).await?;
            }

            if !self.read_more_data().await? {
                return Ok(());
            }
        }
    }

    /// Decodes the next frame from the buffer.
    ///
    /// A protocol error is reported to the client and then ends the
    /// connection: once a length is wrong there is no telling where the next
    /// frame starts.
    async fn next_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        match self.decoder.decode(&mut self.buffer) {
            Ok(frame) => Ok(frame),
            Err(e) => {
                warn!(client = %self.session.addr(), error = %e, "Protocol error");
                let reply = RespValue::error(format!("ERR Protocol error: {}", e));
                self.send_response(&reply).await?;
                Err(ConnectionError::Protocol(e))
            }
        }
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        let session = Arc::clone(&self.session);
        let _in_flight = session.begin_dispatch();

        trace!(client = %session.addr(), args = frame.len(), "Dispatching frame");
        let response = self.db.execute(&frame);
        self.stats.command_processed();

        self.send_response(&response).await
    }

    /// Reads more data from the socket into the buffer.
    ///
    /// Returns `Ok(false)` if the session was closed while waiting.
    async fn read_more_data(&mut self) -> Result<bool, ConnectionError> {
        // Ensure we have some capacity
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = tokio::select! {
            _ = self.session.closed() => return Ok(false),
            read = self.reader.read_buf(&mut self.buffer) => read?,
        };

        if n == 0 {
            // Connection closed by client
            if self.buffer.is_empty() && !self.decoder.is_mid_frame() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                // Partial command in buffer
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.session.addr(), bytes = n, "Read data");

        Ok(true)
    }

    /// Sends a response to the client.
    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.session.write(&bytes).await?;
        self.stats.bytes_written(bytes.len());
        trace!(
            client = %self.session.addr(),
            bytes = bytes.len(),
            "Sent response"
        );
        Ok(())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame; the connection is dropped after replying
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial command)
    #[error("Unexpected end of stream")]
    UnexpectedEof,
}

/// Handles a client connection from accept to close.
///
/// Registers the session (or turns the client away if the server is shutting
/// down), runs the handler to completion, and unregisters it.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    db: Arc<Database>,
    sessions: Arc<SessionRegistry>,
    stats: Arc<ConnectionStats>,
) {
    let (reader, writer) = stream.into_split();
    let session = Arc::new(Session::new(sessions.next_id(), addr, writer));

    if !sessions.insert(Arc::clone(&session)) {
        debug!(client = %addr, "Server is closing, dropping connection");
        let _ = session.shutdown_writer().await;
        return;
    }

    let handler = ConnectionHandler::new(reader, Arc::clone(&session), db, stats);
    // The handler logs its own outcome
    let _ = handler.run().await;

    sessions.remove(session.id());
}
