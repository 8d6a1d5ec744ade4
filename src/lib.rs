//! # emberdb
//!
//! A shard-per-core key/value store: an in-memory LRU cache tier layered
//! over per-shard append-only disk logs, fronted by a small HTTP/JSON API.
//!
//! ```text
//!   HTTP (axum)
//!       │
//!  ┌────▼───────────────────────────┐
//!  │ Database (ordered tiers)       │
//!  └────┬──────────────────────┬────┘
//!       │ tier 0               │ tier 1 (authoritative)
//!  ┌────▼─────────┐      ┌─────▼────────┐
//!  │ cache Router │      │ disk Router  │
//!  └────┬─────────┘      └─────┬────────┘
//!       │ hash(key) mod N      │ hash(key) mod N
//!  ┌────▼─────────┐      ┌─────▼────────┐
//!  │ CacheShard … │      │ DiskShard …  │   one worker thread each
//!  └──────────────┘      └──────────────┘
//! ```
//!
//! Reads consult tiers in order and stop at the first hit; writes go
//! through every tier; prefix queries are answered by the authoritative
//! disk tier alone, as a set-union across its shards. Each shard is owned
//! by a single worker thread, reached only through its request queue, so
//! shard state needs no locking and per-shard operations are totally
//! ordered.

pub mod cache;
pub mod config;
pub mod db;
pub mod disk;
pub mod error;
pub mod flock;
pub mod hash;
pub mod server;
pub mod shard;
pub mod storage;
pub mod tmpfs;

pub use config::Config;
pub use db::Database;
pub use error::{Error, Result};
pub use storage::Storage;
