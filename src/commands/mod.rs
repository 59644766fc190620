//! Command Module
//!
//! This module implements the command layer: a registry mapping verbs to handler
//! functions, the command-level error taxonomy, and the handlers themselves.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Decoder        │  (protocol module)
//! └────────┬────────┘
//!          │ Frame
//!          ▼
//! ┌─────────────────┐
//! │ CommandRegistry │  (this module)
//! │  verb → handler │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐       ┌───────────┐
//! │   Database      │──────►│    AOF    │
//! └─────────────────┘       └───────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `PING [message]`
//! - `GET key`
//! - `SET key value [NX|XX] [EX seconds|PX milliseconds]`
//! - `PEXPIREAT key epoch-ms` (what the log records for TTLs)

pub mod error;
pub mod registry;
pub mod server;
pub mod string;

pub use error::{CommandError, CommandResult};
pub use registry::{CommandFn, CommandRegistry};
