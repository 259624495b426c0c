//! Thread-safe wrapper for concurrent index access.
//!
//! `SyncMapIndex` wraps [`MapIndex`] in `Arc<RwLock<_>>`. Spatial queries
//! share a read lock. Anything touching the attribute store seeks its file
//! and therefore takes the write lock, including tag resolution.
//!
//! Enable the `sync` feature to use this module:
//!
//! ```toml
//! [dependencies]
//! osm-index = { version = "0.1", features = ["sync"] }
//! ```
//!
//! ```rust
//! use osm_index::{Envelope, SyncMapIndex};
//! use std::thread;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let index = SyncMapIndex::<u64>::memory()?;
//!
//! let writer = index.clone();
//! let handle = thread::spawn(move || {
//!     writer
//!         .insert(1, Envelope::from_point(13.4, 52.5), [("amenity", "cafe")])
//!         .unwrap();
//! });
//! handle.join().unwrap();
//!
//! assert_eq!(index.query(&Envelope::new(13.0, 52.0, 14.0, 53.0)), vec![1]);
//! # Ok(())
//! # }
//! ```

use crate::config::{Config, Envelope};
use crate::error::Result;
use crate::index::MapIndex;
use crate::storage::StoreStats;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

/// Thread-safe wrapper around [`MapIndex`] using `Arc<RwLock<MapIndex>>`.
///
/// Cloning is cheap and shares the same index. Query results are cloned out
/// of the lock, so elements should be small handles such as feature ids.
pub struct SyncMapIndex<T> {
    inner: Arc<RwLock<MapIndex<T>>>,
}

impl<T> Clone for SyncMapIndex<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SyncMapIndex<T> {
    pub fn new(index: MapIndex<T>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(index)),
        }
    }

    /// Creates a new in-memory index with default configuration.
    pub fn memory() -> Result<Self> {
        Ok(Self::new(MapIndex::memory()?))
    }

    pub fn memory_with_config(config: Config) -> Result<Self> {
        Ok(Self::new(MapIndex::memory_with_config(config)?))
    }

    /// Opens or creates a file-backed index in `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self>
    where
        T: Serialize + DeserializeOwned,
    {
        Self::open_with_config(dir, Config::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(dir: P, config: Config) -> Result<Self>
    where
        T: Serialize + DeserializeOwned,
    {
        let index = MapIndex::<T>::builder()
            .path(dir.as_ref())
            .config(config)
            .build()?;
        Ok(Self::new(index))
    }

    pub fn insert<I, K, V>(&self, element: T, bounds: Envelope, tags: I) -> Result<Vec<u32>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.inner.write().insert(element, bounds, tags)
    }

    /// Elements whose bounds intersect `envelope`.
    pub fn query(&self, envelope: &Envelope) -> Vec<T>
    where
        T: Clone,
    {
        self.inner
            .read()
            .query(envelope)
            .into_iter()
            .map(|indexed| indexed.element.clone())
            .collect()
    }

    pub fn query_with_tags(&self, envelope: &Envelope) -> Result<Vec<(T, Vec<(String, String)>)>>
    where
        T: Clone,
    {
        let mut index = self.inner.write();
        let hits = index.query_with_tags(envelope)?;
        Ok(hits
            .into_iter()
            .map(|(element, tags)| (element.clone(), tags))
            .collect())
    }

    pub fn tags(&self, offsets: &[u32]) -> Result<Vec<(String, String)>> {
        self.inner.write().tags(offsets)
    }

    pub fn search_tags(&self, key: &str, value: &str) -> Result<Vec<(String, String)>> {
        self.inner.write().search_tags(key, value)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn store_stats(&self) -> StoreStats {
        self.inner.read().store_stats().clone()
    }

    pub fn flush(&self) -> Result<()> {
        self.inner.write().flush()
    }

    pub fn close(&self) -> Result<()> {
        self.inner.write().close()
    }

    /// Acquires a read lock for several spatial queries in a row.
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, MapIndex<T>> {
        self.inner.read()
    }

    /// Acquires a write lock for batched inserts or tag lookups.
    pub fn write(&self) -> parking_lot::RwLockWriteGuard<'_, MapIndex<T>> {
        self.inner.write()
    }
}
