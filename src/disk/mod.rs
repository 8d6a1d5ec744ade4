//! The on-disk storage tier: one append-only log file per shard with an
//! in-memory offset index.
//!
//! Mutations only ever append records or flip a status byte to a tombstone,
//! so the log is prefix-consistent: whatever survives a crash is a valid
//! log up to the first torn record, and index reconstruction simply walks
//! forward until the records stop.

pub mod aligned;
pub mod record;

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::errdata;
use crate::error::Result;
use crate::shard::Shard;

use aligned::{align_down, align_up, AlignedBuf, BLOCK_SIZE};
use record::{Header, HEADER_SIZE, STATUS_DELETED, STATUS_VALID};

/// Data file for the given shard: `kvdb_data.NNN.bin`.
pub fn file_name(id: usize) -> String {
    format!("kvdb_data.{id:03}.bin")
}

/// Where a live record's value bytes sit in the log.
#[derive(Debug, Clone, Copy)]
struct ValueLocation {
    offset: u64,
    len: u64,
}

/// One shard of the disk tier.
///
/// `end_offset` is the byte position after the last record; anything beyond
/// it is block-padding slack from aligned writes, zero-filled so a reopened
/// log reads it as the terminator. The slack is truncated away at close.
pub struct DiskShard {
    id: usize,
    file: File,
    path: PathBuf,
    index: HashMap<Vec<u8>, ValueLocation>,
    end_offset: u64,
}

impl DiskShard {
    /// Opens (or creates) the shard's log file and rebuilds the index by
    /// walking the log from the start.
    pub fn open(dir: &Path, id: usize, direct_io: bool) -> Result<Self> {
        use std::os::unix::fs::OpenOptionsExt;

        let path = dir.join(file_name(id));
        let mut options = File::options();
        options.create(true).read(true).write(true);

        #[cfg(target_os = "linux")]
        if direct_io {
            options.custom_flags(libc::O_DIRECT);
        }
        #[cfg(not(target_os = "linux"))]
        let _ = direct_io;

        let file = options.open(&path)?;

        let mut shard = Self {
            id,
            file,
            path,
            index: HashMap::new(),
            end_offset: 0,
        };
        shard.build_index()?;
        Ok(shard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    /// Walks the log from offset 0 and rebuilds the key index. Stops at the
    /// first status byte that is neither VALID nor DELETED, or at a record
    /// whose declared length runs past the end of the file; both mean the
    /// log ends here.
    fn build_index(&mut self) -> Result<()> {
        self.index.clear();
        let size = self.file.metadata()?.len();
        let mut pos = 0;
        let mut tombstones = 0u64;

        while pos + HEADER_SIZE as u64 <= size {
            let header = Header::decode(&self.read_span(pos, HEADER_SIZE as u64)?);
            if !header.is_record() {
                break;
            }
            let end = pos + header.record_len();
            if end > size {
                // Torn tail record: the log is valid up to here.
                break;
            }
            if header.status == STATUS_VALID {
                let key = self.read_span(pos + HEADER_SIZE as u64, header.key_len as u64)?;
                // Insertion overwrites: if an interrupted overwrite left two
                // live records for one key, the later one wins.
                self.index.insert(
                    key,
                    ValueLocation {
                        offset: pos + HEADER_SIZE as u64 + header.key_len as u64,
                        len: header.value_len,
                    },
                );
            } else {
                tombstones += 1;
            }
            pos = end;
        }
        self.end_offset = pos;

        tracing::info!(
            shard = self.id,
            file_size = size,
            end_offset = self.end_offset,
            live = self.index.len(),
            tombstones,
            "rebuilt disk shard index"
        );
        Ok(())
    }

    /// Reads `len` bytes at an arbitrary offset through an aligned bounce
    /// buffer, as direct I/O only transfers whole blocks at block offsets.
    fn read_span(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let start = align_down(offset);
        let lead = (offset - start) as usize;
        let wanted = lead + len as usize;
        let span = align_up(offset - start + len) as usize;
        let mut buf = AlignedBuf::zeroed(span);

        let mut filled = 0;
        while filled < wanted {
            let n = self.file.read_at(&mut buf[filled..span], start + filled as u64)?;
            if n == 0 {
                return errdata!(
                    "shard {} log ends short of offset {}",
                    self.id,
                    offset + len
                );
            }
            filled += n;
        }
        Ok(buf[lead..wanted].to_vec())
    }

    /// Reads one whole block for a read-modify-write cycle, zero-filling
    /// whatever lies past the end of the file: a cleanly truncated log ends
    /// mid-block, and the missing tail is exactly the padding that was cut.
    fn read_block(&self, start: u64) -> Result<AlignedBuf> {
        let mut buf = AlignedBuf::zeroed(BLOCK_SIZE);
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            let n = self.file.read_at(&mut buf[filled..], start + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(buf)
    }
}

impl Shard for DiskShard {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(loc) = self.index.get(key).copied() else {
            return Ok(None);
        };
        Ok(Some(self.read_span(loc.offset, loc.len)?))
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        let header = Header::valid(key, &value)?;
        if self.index.contains_key(key) {
            // Tombstone the old record first, so the reconstructable log
            // holds at most one live record per key.
            self.del(key)?;
        }

        let pos = self.end_offset;
        let record_len = header.record_len() as usize;
        let start = align_down(pos);
        let lead = (pos - start) as usize;
        // The span is measured from `pos`, not from the block start: a
        // record crossing into a new block needs the extra block counted.
        let span = align_up(lead as u64 + record_len as u64) as usize;

        let mut buf = AlignedBuf::zeroed(span);
        if lead > 0 {
            // Read-modify-write of the partially filled first block.
            let block = self.read_block(start)?;
            buf[..lead].copy_from_slice(&block[..lead]);
        }

        header.encode(&mut buf[lead..lead + HEADER_SIZE]);
        buf[lead + HEADER_SIZE..lead + HEADER_SIZE + key.len()].copy_from_slice(key);
        buf[lead + HEADER_SIZE + key.len()..lead + record_len].copy_from_slice(&value);

        self.file.write_all_at(&buf[..span], start)?;
        self.file.sync_all()?;

        self.index.insert(
            key.to_vec(),
            ValueLocation {
                offset: pos + HEADER_SIZE as u64 + key.len() as u64,
                len: value.len() as u64,
            },
        );
        self.end_offset = pos + record_len as u64;
        Ok(())
    }

    fn del(&mut self, key: &[u8]) -> Result<()> {
        let Some(loc) = self.index.get(key).copied() else {
            return Ok(());
        };
        let record_pos = loc.offset - HEADER_SIZE as u64 - key.len() as u64;
        let start = align_down(record_pos);

        // Flip the status byte in place; the record body stays where it is
        // and `end_offset` is unchanged.
        let mut block = self.read_block(start)?;
        block[(record_pos - start) as usize] = STATUS_DELETED;
        self.file.write_all_at(&block[..], start)?;
        self.file.sync_all()?;

        self.index.remove(key);
        Ok(())
    }

    fn query(&mut self, prefix: &[u8]) -> Result<BTreeSet<Vec<u8>>> {
        // The index tracks exactly the live keys, so no disk I/O is needed.
        Ok(self
            .index
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn close(&mut self) -> Result<()> {
        let size = self.file.metadata()?.len();
        if size > self.end_offset {
            tracing::info!(
                shard = self.id,
                from = size,
                to = self.end_offset,
                "truncating block padding"
            );
            self.file.set_len(self.end_offset)?;
            self.file.sync_all()?;
        }
        Ok(())
    }
}
