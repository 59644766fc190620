//! Database Engine
//!
//! The [`Database`] sits between the command handlers and storage. It owns:
//!
//! - the entity map and a parallel map of absolute expiry instants,
//! - the stop-the-world [`Gate`](crate::storage::Gate) reads pass through,
//! - the command registry used to dispatch frames,
//! - the optional append-only log that mutating commands are recorded to.
//!
//! ## Expiry
//!
//! Expiry is lazy: nothing sweeps the TTL map in the background. Any access to a
//! key first checks its TTL record and, if the deadline has passed, removes both
//! the entity and the record before proceeding as if the key were absent. A
//! read can therefore turn into a write.
//!
//! ## Logging
//!
//! Handlers call [`Database::add_to_log`] after a successful mutation. Logging is
//! switched off while the log itself is being replayed, so replay never writes
//! back what it reads.

mod database;
mod entity;

pub use database::Database;
pub use entity::Entity;
