//! Attribute storage for map features.
//!
//! Tags are deduplicated into an append-only record file ([`KeyValueStore`])
//! whose collision chains are found through a separate hash table
//! ([`HashBucketIndex`], behind the [`BucketIndex`] trait). The byte offset
//! returned for a pair is a stable foreign key: records never move.
//!
//! The store is single-writer. Concurrent inserts would race on the
//! "find tail, patch its next field" sequence, which the `&mut self` receivers
//! rule out at compile time.

mod entry;
mod hash_index;
mod kv_store;

pub use entry::{Entry, HEADER_LEN, MAX_STRING_BYTES, truncate};
pub use hash_index::{BucketIndex, HashBucketIndex};
pub use kv_store::{Entries, KeyValueStore, Search};

/// Counters for the current session of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Records appended to the file
    pub records_written: u64,
    /// Inserts answered with an existing record
    pub duplicate_hits: u64,
    /// Appends that extended an existing chain
    pub chain_appends: u64,
}
