//! Storage Module
//!
//! This module provides the containers the database is built on:
//!
//! - [`StorageEngine`]: a sharded, thread-safe map with upsert / insert-only /
//!   update-only writes. The database uses one for entities and one for TTLs.
//! - [`Gate`]: a closable barrier that storage reads pass through.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod gate;

pub use engine::StorageEngine;
pub use gate::Gate;
