//! Connection Handler Module
//!
//! This module manages individual client connections to quillkv.
//! Each client connection is handled by its own async task, which owns its
//! decoder state; nothing about decoding is shared between connections.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Server (accept loop)                    │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐      ┌──────────────────┐
//!           │  Session registered    │─────►│ SessionRegistry  │
//!           └────────────┬───────────┘      │  close_all()     │
//!                        │ spawn task       └──────────────────┘
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read bytes  │───>│ Decode      │───>│ Execute cmd │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                                               ▼             │
//! │                                  ┌────────────────────────┐ │
//! │                                  │ Session::write (locked)│ │
//! │                                  └────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Pipelining**: several frames in one read are answered in order
//! - **Serialized writes**: each reply is written and flushed under the session lock
//! - **Graceful close**: closing a session waits (bounded) for the reply in flight
//! - **Statistics**: Tracks connection and command metrics

pub mod handler;
pub mod session;
pub mod wait;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
pub use session::{Session, SessionRegistry, DEFAULT_CLOSE_TIMEOUT};
pub use wait::{InFlight, InFlightGuard};
