use crc::{Algorithm, Crc};

/// CRC-64 is overkill for routing, but it is stable across restarts, so a
/// reopened data directory maps every key back onto the shard file that
/// already holds it.
pub const CRC_64_ECMA: Algorithm<u64> = crc::CRC_64_ECMA_182;

pub const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA);

/// Hashes a key for shard routing.
pub fn key_hash(key: &[u8]) -> u64 {
    CRC64.checksum(key)
}

/// Returns the shard owning the given key.
pub fn shard_id(key: &[u8], shards: usize) -> usize {
    (key_hash(key) % shards as u64) as usize
}
