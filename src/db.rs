//! The tiered database: an ordered composition of storage tiers.
//!
//! Reads consult tiers in order and stop at the first hit; writes go
//! through every tier in order; prefix queries are answered by the last
//! (authoritative) tier alone, since upper tiers forget records through
//! eviction. Every key present in a non-authoritative tier is also present,
//! with the same value, in the authoritative tier.

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::cache::CacheShard;
use crate::config::Config;
use crate::disk::{record, DiskShard};
use crate::errinput;
use crate::error::Result;
use crate::flock::FileLock;
use crate::shard::Router;
use crate::storage::Storage;

const LOCK_FILE: &str = "emberdb.lock";

/// A database composed of storage tiers, itself a [`Storage`].
pub struct Database {
    tiers: Vec<Box<dyn Storage>>,
    lock: Mutex<Option<FileLock>>,
}

impl Database {
    /// Composes a database from already-built tiers, first to last in read
    /// order. The last tier is authoritative.
    pub fn new(tiers: Vec<Box<dyn Storage>>) -> Self {
        assert!(!tiers.is_empty(), "database needs at least one tier");
        Self {
            tiers,
            lock: Mutex::new(None),
        }
    }

    /// Builds the standard two-tier database for the given config: a cache
    /// router over a disk router, N shards each, and takes the data
    /// directory lock so only one process appends to the shard files.
    pub fn open(config: Config) -> Result<Self> {
        if config.shards == 0 {
            return errinput!("shard count must be at least 1");
        }
        if config.cache_capacity == 0 {
            return errinput!("cache capacity must be at least 1");
        }
        std::fs::create_dir_all(&config.dir)?;
        let lock = FileLock::lock(config.dir.join(LOCK_FILE))?;

        let capacity = config.cache_capacity;
        let cache = Router::new("cache", config.shards, move |_| Ok(CacheShard::new(capacity)));

        let dir = config.dir.clone();
        let direct_io = config.direct_io;
        let disk = Router::new("disk", config.shards, move |id| {
            DiskShard::open(&dir, id, direct_io)
        });

        let db = Self::new(vec![Box::new(cache), Box::new(disk)]);
        *db.lock.lock()? = Some(lock);
        Ok(db)
    }

    fn authoritative(&self) -> &dyn Storage {
        self.tiers.last().expect("tiers are never empty").as_ref()
    }

    fn check_key(key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return errinput!("key must not be empty");
        }
        if key.len() > record::MAX_KEY_SIZE {
            return errinput!("key length {} exceeds {}", key.len(), record::MAX_KEY_SIZE);
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for Database {
    async fn start(&self) -> Result<()> {
        for tier in &self.tiers {
            tier.start().await?;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        // Stop every tier even if one fails, then report the failure.
        let mut result = Ok(());
        for tier in &self.tiers {
            if let Err(e) = tier.stop().await {
                result = Err(e);
            }
        }
        // Release the directory to other processes only once every tier has
        // let go of its files.
        if let Some(lock) = self.lock.lock()?.take() {
            lock.unlock()?;
        }
        result
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Self::check_key(key)?;
        for tier in &self.tiers {
            if let Some(value) = tier.get(key).await? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    async fn set(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        Self::check_key(key)?;
        // Upper tiers first: a concurrent reader observes the fresh value
        // even while a lower tier write is still in flight. A mid-list
        // failure is not rolled back; the next successful set or del on the
        // key repairs the lower tiers.
        for tier in &self.tiers {
            tier.set(key, value.clone()).await?;
        }
        Ok(())
    }

    async fn del(&self, key: &[u8]) -> Result<()> {
        Self::check_key(key)?;
        for tier in &self.tiers {
            tier.del(key).await?;
        }
        Ok(())
    }

    async fn query(&self, prefix: &[u8]) -> Result<BTreeSet<Vec<u8>>> {
        // Upper tiers forget via eviction; only the last tier holds every
        // live key.
        self.authoritative().query(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::tmpfs::TempDir;
    use std::path::Path;

    fn small_config(dir: &Path) -> Config {
        Config::new(dir).shards(2).cache_capacity(2)
    }

    async fn open_started(dir: &Path) -> Result<Database> {
        let db = Database::open(small_config(dir))?;
        db.start().await?;
        Ok(db)
    }

    #[tokio::test]
    async fn test_read_your_write() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let db = open_started(dir.path()).await?;

        db.set(b"k", b"v".to_vec()).await?;
        assert_eq!(db.get(b"k").await?, Some(b"v".to_vec()));

        db.stop().await
    }

    #[tokio::test]
    async fn test_overwrite() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let db = open_started(dir.path()).await?;

        db.set(b"k", b"v1".to_vec()).await?;
        db.set(b"k", b"v2".to_vec()).await?;
        assert_eq!(db.get(b"k").await?, Some(b"v2".to_vec()));

        db.stop().await
    }

    #[tokio::test]
    async fn test_delete_semantics() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let db = open_started(dir.path()).await?;

        db.del(b"missing").await?; // not an error
        db.set(b"k", b"v".to_vec()).await?;
        db.del(b"k").await?;
        assert_eq!(db.get(b"k").await?, None);
        db.del(b"k").await?; // still not an error

        db.stop().await
    }

    #[tokio::test]
    async fn test_eviction_does_not_lose_data() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let config = Config::new(dir.path()).shards(1).cache_capacity(2);
        let db = Database::open(config)?;
        db.start().await?;

        // Three writes through a capacity-2 cache evict the first key from
        // the cache; the read must come back from the disk tier.
        db.set(b"a", b"value-a".to_vec()).await?;
        db.set(b"b", b"value-b".to_vec()).await?;
        db.set(b"c", b"value-c".to_vec()).await?;

        assert_eq!(db.get(b"a").await?, Some(b"value-a".to_vec()));
        assert_eq!(db.get(b"b").await?, Some(b"value-b".to_vec()));
        assert_eq!(db.get(b"c").await?, Some(b"value-c".to_vec()));

        db.stop().await
    }

    #[tokio::test]
    async fn test_query_sees_evicted_keys() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let config = Config::new(dir.path()).shards(1).cache_capacity(2);
        let db = Database::open(config)?;
        db.start().await?;

        for i in 0..10u32 {
            db.set(format!("key{i}").as_bytes(), b"v".to_vec()).await?;
        }
        // Authoritative tier answers, so eviction cannot shrink the result.
        assert_eq!(db.query(b"key").await?.len(), 10);

        db.stop().await
    }

    #[tokio::test]
    async fn test_prefix_completeness_and_soundness() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let db = open_started(dir.path()).await?;

        let keys: Vec<Vec<u8>> = ["2222", "2233", "23", "3222"]
            .iter()
            .map(|k| k.as_bytes().to_vec())
            .collect();
        for key in &keys {
            db.set(key, b"v".to_vec()).await?;
        }

        let matches = db.query(b"22").await?;
        assert_eq!(
            matches,
            BTreeSet::from([b"2222".to_vec(), b"2233".to_vec()])
        );
        for key in &matches {
            assert!(key.starts_with(b"22"));
            assert!(db.get(key).await?.is_some());
        }

        db.stop().await
    }

    #[tokio::test]
    async fn test_restart_recovers_live_keys() -> Result<()> {
        let dir = TempDir::new().unwrap();
        {
            let db = open_started(dir.path()).await?;
            db.set(b"keep", b"v1".to_vec()).await?;
            db.set(b"drop", b"v2".to_vec()).await?;
            db.set(b"keep", b"v3".to_vec()).await?;
            db.del(b"drop").await?;
            db.stop().await?;
        }

        let db = open_started(dir.path()).await?;
        assert_eq!(db.get(b"keep").await?, Some(b"v3".to_vec()));
        assert_eq!(db.get(b"drop").await?, None);
        assert_eq!(db.query(b"").await?, BTreeSet::from([b"keep".to_vec()]));

        db.stop().await
    }

    #[tokio::test]
    async fn test_second_open_is_locked_out() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let db = open_started(dir.path()).await?;

        assert!(Database::open(small_config(dir.path())).is_err());

        // The lock is released at stop, so a reopen then succeeds.
        db.stop().await?;
        let db = Database::open(small_config(dir.path()))?;
        db.start().await?;
        db.stop().await
    }

    #[tokio::test]
    async fn test_empty_key_rejected() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let db = open_started(dir.path()).await?;

        assert!(matches!(
            db.set(b"", b"v".to_vec()).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(db.get(b"").await, Err(Error::InvalidInput(_))));

        db.stop().await
    }

    #[tokio::test]
    async fn test_empty_value_is_a_value() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let db = open_started(dir.path()).await?;

        db.set(b"empty", Vec::new()).await?;
        assert_eq!(db.get(b"empty").await?, Some(Vec::new()));
        assert_eq!(db.query(b"empty").await?.len(), 1);

        db.stop().await
    }
}
