//! Hash index mapping (key, value prefix) buckets to chain heads.

use crate::config::Config;
use crate::error::{IndexError, Result};
use bytes::{BufMut, BytesMut};
use rustc_hash::FxHasher;
use std::fs::{File, OpenOptions};
use std::hash::Hasher;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const INDEX_MAGIC: &[u8] = b"OSMKVIDX";
const INDEX_VERSION: u8 = 1;

/// Lookup table from a hashed (key, value) pair to the offset of the first
/// record of its collision chain.
///
/// Offset `0` means "no chain"; it can never be a record offset because the
/// store header occupies the first bytes of the file.
pub trait BucketIndex {
    /// Head offset of the chain for the pair, or 0 when there is none.
    fn offset(&self, key: &str, value: &str) -> u32;

    /// Register `offset` as the chain head for the pair's bucket.
    fn add(&mut self, key: &str, value: &str, offset: u32);

    /// Number of leading value characters that select the bucket.
    fn prefix_length(&self) -> usize;

    /// Forget every chain head.
    fn clear(&mut self);
}

/// Fixed-size table of `u32` chain heads.
///
/// The bucket of a pair hashes the key and the first `prefix_length`
/// characters of the value, so values sharing a key and a prefix always land
/// in the same chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashBucketIndex {
    buckets: Vec<u32>,
    prefix_length: usize,
}

impl HashBucketIndex {
    pub fn new(bucket_count: usize, prefix_length: usize) -> Self {
        Self {
            buckets: vec![0; bucket_count.max(1)],
            prefix_length,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.bucket_count, config.prefix_length)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of buckets that hold a chain.
    pub fn occupied(&self) -> usize {
        self.buckets.iter().filter(|&&head| head != 0).count()
    }

    fn bucket(&self, key: &str, value: &str) -> usize {
        let prefix_end = value
            .char_indices()
            .nth(self.prefix_length)
            .map_or(value.len(), |(i, _)| i);

        let mut hasher = FxHasher::default();
        hasher.write(key.as_bytes());
        // 0xff never occurs in UTF-8, so it cleanly separates key from value.
        hasher.write_u8(0xff);
        hasher.write(value[..prefix_end].as_bytes());

        (hasher.finish() % self.buckets.len() as u64) as usize
    }

    /// Check that a loaded table matches the configuration it will serve.
    pub fn ensure_matches(&self, config: &Config) -> Result<()> {
        if self.prefix_length != config.prefix_length {
            return Err(IndexError::IndexMismatch(format!(
                "prefix length {} != configured {}",
                self.prefix_length, config.prefix_length
            )));
        }
        if self.buckets.len() != config.bucket_count {
            return Err(IndexError::IndexMismatch(format!(
                "bucket count {} != configured {}",
                self.buckets.len(),
                config.bucket_count
            )));
        }
        Ok(())
    }

    pub fn save<W: Write>(&self, mut writer: W) -> Result<()> {
        let mut buf = BytesMut::with_capacity(INDEX_MAGIC.len() + 9 + self.buckets.len() * 4);
        buf.put_slice(INDEX_MAGIC);
        buf.put_u8(INDEX_VERSION);
        buf.put_u32_le(self.buckets.len() as u32);
        buf.put_u32_le(self.prefix_length as u32);
        for &head in &self.buckets {
            buf.put_u32_le(head);
        }

        writer.write_all(&buf)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<R: Read>(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; INDEX_MAGIC.len()];
        reader.read_exact(&mut magic)?;
        if magic != INDEX_MAGIC {
            return Err(IndexError::InvalidFormat);
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != INDEX_VERSION {
            return Err(IndexError::InvalidFormat);
        }

        let bucket_count = read_u32(&mut reader)? as usize;
        let prefix_length = read_u32(&mut reader)? as usize;
        if bucket_count == 0 {
            return Err(IndexError::InvalidFormat);
        }

        // The count is untrusted: read what is present, then compare.
        let expected = bucket_count as u64 * 4;
        let mut raw = Vec::new();
        reader.take(expected).read_to_end(&mut raw)?;
        if raw.len() as u64 != expected {
            return Err(IndexError::InvalidFormat);
        }
        let buckets = raw
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self {
            buckets,
            prefix_length,
        })
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        self.save(&mut writer)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load(BufReader::new(File::open(path.as_ref())?))
    }
}

impl BucketIndex for HashBucketIndex {
    fn offset(&self, key: &str, value: &str) -> u32 {
        self.buckets[self.bucket(key, value)]
    }

    fn add(&mut self, key: &str, value: &str, offset: u32) {
        let bucket = self.bucket(key, value);
        self.buckets[bucket] = offset;
    }

    fn prefix_length(&self) -> usize {
        self.prefix_length
    }

    fn clear(&mut self) {
        self.buckets.fill(0);
    }
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}
