//! # quillkv - An In-Memory Key-Value Server with an Append-Only Log
//!
//! quillkv is a small Redis-compatible key-value server written in Rust. It
//! keeps its dataset in memory and records every mutating command to an
//! append-only file (AOF), which is replayed on startup.
//!
//! ## Features
//!
//! - **Redis-Compatible Framing**: inline commands and `*N`/`$L` arrays
//! - **Sharded Storage**: 64 RwLock shards for concurrent access
//! - **TTL Support**: `SET ... EX|PX` with lazy expiry on access
//! - **Durability**: asynchronous AOF writer with pause and replay support
//! - **Graceful Shutdown**: bounded waits for in-flight replies and connections
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              quillkv                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │   Server    │───>│ Connection  │───>│  Command    │                  │
//! │  │ (acceptor)  │    │  Handler    │    │  Registry   │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  ▼                         │
//! │                     ┌──────┴──────┐    ┌─────────────┐    ┌──────────┐  │
//! │                     │   Decoder   │    │  Database   │───>│   AOF    │  │
//! │                     └──────┬──────┘    │  data + ttl │    │  writer  │  │
//! │                            │           └─────────────┘    └────┬─────┘  │
//! │                            │                  ▲                │        │
//! │                            │   replay         │                ▼        │
//! │                            └──────────── AOF loader ◄──── appendonly.aof│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use quillkv::aof::AofConfig;
//! use quillkv::db::Database;
//! use quillkv::server::Server;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Replays appendonly.aof (if present) before serving
//!     let db = Arc::new(Database::open(&AofConfig::default())?);
//!
//!     let server = Server::bind("127.0.0.1:6379", db).await?;
//!     server.run(async { tokio::signal::ctrl_c().await.ok(); }).await
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING [message]`
//! - `GET key`
//! - `SET key value [NX|XX] [EX seconds|PX milliseconds]`
//! - `PEXPIREAT key epoch-ms`
//!
//! ## Module Overview
//!
//! - [`protocol`]: frame decoder and reply encoding
//! - [`storage`]: sharded map and the stop-the-world gate
//! - [`db`]: database engine with lazy expiry
//! - [`commands`]: command registry and handlers
//! - [`aof`]: append-only log writer and replay
//! - [`connection`]: per-client sessions
//! - [`server`]: acceptor and graceful shutdown
//! - [`config`]: command-line configuration

pub mod aof;
pub mod commands;
pub mod config;
pub mod connection;
pub mod db;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use aof::{Aof, AofConfig, AofError};
pub use commands::{CommandError, CommandRegistry};
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats, SessionRegistry};
pub use db::{Database, Entity};
pub use protocol::{Decoder, Frame, ProtocolError, RespValue};
pub use server::Server;
pub use storage::{Gate, StorageEngine};

/// The default port quillkv listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host quillkv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of quillkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
