use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::error::Result;
use crate::shard::Shard;

/// A bounded in-memory cache shard: a key/value map plus a recency list.
///
/// The front of the recency list is the next eviction candidate. Writes move
/// a key to the back; reads leave the list untouched, so a key that is only
/// ever read ages out the same as one never touched at all. Eviction is
/// silent and never propagates to other tiers: the authoritative tier still
/// holds the record.
pub struct CacheShard {
    data: HashMap<Vec<u8>, Vec<u8>>,
    recency: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl CacheShard {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be at least 1");
        Self {
            data: HashMap::new(),
            recency: VecDeque::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn forget_recency(&mut self, key: &[u8]) {
        if let Some(i) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(i);
        }
    }
}

impl Shard for CacheShard {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        // No promotion on reads: only writes refresh recency.
        Ok(self.data.get(key).cloned())
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        if self.data.contains_key(key) {
            self.data.insert(key.to_vec(), value);
            self.forget_recency(key);
            self.recency.push_back(key.to_vec());
            return Ok(());
        }

        if self.data.len() == self.capacity {
            if let Some(evicted) = self.recency.pop_front() {
                self.data.remove(&evicted);
            }
        }
        self.data.insert(key.to_vec(), value);
        self.recency.push_back(key.to_vec());
        Ok(())
    }

    fn del(&mut self, key: &[u8]) -> Result<()> {
        if self.data.remove(key).is_some() {
            self.forget_recency(key);
        }
        Ok(())
    }

    fn query(&mut self, prefix: &[u8]) -> Result<BTreeSet<Vec<u8>>> {
        Ok(self
            .data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
