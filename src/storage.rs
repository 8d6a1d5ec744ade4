use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::Result;

/// The operations every storage tier supports. The tiered [`Database`], the
/// per-tier shard [`Router`]s, and (synchronously, via [`Shard`]) the shards
/// themselves all speak this same contract, so tiers compose freely.
///
/// Absence is a first-class `None` from `get`; the empty value is a
/// legitimate stored value, not an absence marker.
///
/// [`Database`]: crate::db::Database
/// [`Router`]: crate::shard::Router
/// [`Shard`]: crate::shard::Shard
#[async_trait]
pub trait Storage: Send + Sync {
    /// Prepares the tier for use. Must be called once before any other
    /// operation; idempotence is not required.
    async fn start(&self) -> Result<()>;

    /// Flushes and releases resources. Safe to call exactly once after
    /// `start`; the tier must not be reused afterwards.
    async fn stop(&self) -> Result<()>;

    /// Looks up a key by exact match.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Inserts or overwrites a key.
    async fn set(&self, key: &[u8], value: Vec<u8>) -> Result<()>;

    /// Removes a key. Deleting a missing key is not an error.
    async fn del(&self, key: &[u8]) -> Result<()>;

    /// Returns every key currently present that starts with `prefix`.
    async fn query(&self, prefix: &[u8]) -> Result<BTreeSet<Vec<u8>>>;
}
