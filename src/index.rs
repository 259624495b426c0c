//! Map feature index combining the R-tree and the attribute store.
//!
//! The build stage calls [`MapIndex::insert`] for every feature: its tags are
//! deduplicated into the attribute store and the returned record offsets ride
//! along with the feature in the R-tree. The query stage calls
//! [`MapIndex::query`] for candidates and resolves or filters their tags
//! through the store.

use crate::builder::IndexBuilder;
use crate::config::{Config, Envelope};
use crate::error::{IndexError, Result};
use crate::spatial::RTree;
use crate::storage::{HashBucketIndex, KeyValueStore, StoreStats};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};

/// Record store file inside an index directory.
pub const STORE_FILE: &str = "attributes.dat";
/// Persisted hash index inside an index directory.
pub const INDEX_FILE: &str = "attributes.idx";
/// Spatial snapshot inside an index directory.
pub const TREE_FILE: &str = "spatial.tree";

/// Byte stream backing an attribute store.
pub trait RecordStream: Read + Write + Seek + Send + Sync {}

impl<S: Read + Write + Seek + Send + Sync> RecordStream for S {}

pub(crate) type AttributeStore = KeyValueStore<Box<dyn RecordStream>, HashBucketIndex>;

/// A feature as stored in the R-tree: the caller's reference plus the offsets
/// of its tag records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedElement<T> {
    pub element: T,
    pub tags: Vec<u32>,
}

pub(crate) struct Persistence<T> {
    pub(crate) dir: PathBuf,
    /// Monomorphized by the builder, where `T: Serialize` is known.
    pub(crate) save_tree: fn(&RTree<IndexedElement<T>>, &Path) -> Result<()>,
}

/// Geographic index over map features and their tags.
///
/// Single-writer: build it on one thread, then share `&MapIndex` for spatial
/// queries. Tag resolution reads the store file and needs `&mut self`; see
/// `SyncMapIndex` (feature `sync`) for a shareable wrapper.
///
/// ```rust
/// use osm_index::{Envelope, MapIndex};
///
/// let mut index = MapIndex::memory()?;
/// index.insert(
///     1001u64,
///     Envelope::new(13.37, 52.51, 13.38, 52.52),
///     [("highway", "residential"), ("name", "Wilhelmstraße")],
/// )?;
///
/// let hits = index.query_with_tags(&Envelope::new(13.0, 52.0, 14.0, 53.0))?;
/// assert_eq!(hits.len(), 1);
/// assert_eq!(*hits[0].0, 1001);
/// assert_eq!(hits[0].1[0], ("highway".to_string(), "residential".to_string()));
/// # Ok::<(), osm_index::IndexError>(())
/// ```
pub struct MapIndex<T> {
    tree: RTree<IndexedElement<T>>,
    store: AttributeStore,
    config: Config,
    persistence: Option<Persistence<T>>,
    tree_dirty: bool,
    closed: bool,
}

impl<T> MapIndex<T> {
    /// In-memory index with the default configuration.
    pub fn memory() -> Result<Self> {
        Self::memory_with_config(Config::default())
    }

    pub fn memory_with_config(config: Config) -> Result<Self> {
        config.validate().map_err(IndexError::InvalidConfig)?;

        let index = HashBucketIndex::from_config(&config);
        let stream: Box<dyn RecordStream> = Box::new(Cursor::new(Vec::new()));
        let store = KeyValueStore::new(stream, index)?;
        let tree = RTree::with_max_entries(config.max_node_entries);

        Ok(Self::from_parts(tree, store, config, None))
    }

    /// Builder for file-backed indexes.
    pub fn builder() -> IndexBuilder {
        IndexBuilder::new()
    }

    pub(crate) fn from_parts(
        tree: RTree<IndexedElement<T>>,
        store: AttributeStore,
        config: Config,
        persistence: Option<Persistence<T>>,
    ) -> Self {
        Self {
            tree,
            store,
            config,
            persistence,
            tree_dirty: false,
            closed: false,
        }
    }

    /// Index `element` under `bounds` with its tags.
    ///
    /// Returns the tag record offsets in input order; repeated tags across
    /// features share one record.
    pub fn insert<I, K, V>(&mut self, element: T, bounds: Envelope, tags: I) -> Result<Vec<u32>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.ensure_open()?;

        let offsets = tags
            .into_iter()
            .map(|(key, value)| self.store.insert(key.as_ref(), value.as_ref()))
            .collect::<Result<Vec<u32>>>()?;

        self.tree.insert(
            IndexedElement {
                element,
                tags: offsets.clone(),
            },
            bounds,
        );
        self.tree_dirty = true;
        Ok(offsets)
    }

    /// Features whose bounds intersect `envelope`.
    pub fn query(&self, envelope: &Envelope) -> Vec<&IndexedElement<T>> {
        self.tree.search(envelope)
    }

    /// Features whose bounds intersect `envelope`, with their tags resolved.
    pub fn query_with_tags(
        &mut self,
        envelope: &Envelope,
    ) -> Result<Vec<(&T, Vec<(String, String)>)>> {
        self.ensure_open()?;

        let store = &mut self.store;
        self.tree
            .search(envelope)
            .into_iter()
            .map(|indexed| Ok((&indexed.element, resolve(store, &indexed.tags)?)))
            .collect()
    }

    /// Resolve tag record offsets to (key, value) pairs.
    pub fn tags(&mut self, offsets: &[u32]) -> Result<Vec<(String, String)>> {
        self.ensure_open()?;
        resolve(&mut self.store, offsets)
    }

    /// Stored tags matching `key` exactly or sharing the value prefix.
    pub fn search_tags(&mut self, key: &str, value: &str) -> Result<Vec<(String, String)>> {
        self.ensure_open()?;
        self.store.search(key, value).collect()
    }

    /// Offset of the stored (key, value) record, if present.
    pub fn tag_offset(&mut self, key: &str, value: &str) -> Result<Option<u32>> {
        self.ensure_open()?;
        self.store.find(key, value)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Bounding envelope of every indexed feature.
    pub fn envelope(&self) -> Envelope {
        self.tree.envelope()
    }

    pub fn tree(&self) -> &RTree<IndexedElement<T>> {
        &self.tree
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store_stats(&self) -> &StoreStats {
        self.store.stats()
    }

    /// Size of the attribute record area in bytes.
    pub fn attribute_bytes(&self) -> u64 {
        self.store.len_bytes()
    }

    /// Directory of a file-backed index.
    pub fn path(&self) -> Option<&Path> {
        self.persistence.as_ref().map(|p| p.dir.as_path())
    }

    /// Write the attribute store, its hash index and the spatial snapshot.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.flush_attributes()?;

        if let Some(persistence) = &self.persistence
            && self.tree_dirty
        {
            (persistence.save_tree)(&self.tree, &persistence.dir.join(TREE_FILE))?;
            self.tree_dirty = false;
        }
        Ok(())
    }

    /// Flush and reject further use.
    pub fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.closed = true;
        Ok(())
    }

    fn flush_attributes(&mut self) -> Result<()> {
        self.store.flush()?;
        if let Some(persistence) = &self.persistence {
            self.store
                .index()
                .save_to_path(persistence.dir.join(INDEX_FILE))?;
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(IndexError::Closed);
        }
        Ok(())
    }
}

fn resolve(store: &mut AttributeStore, offsets: &[u32]) -> Result<Vec<(String, String)>> {
    offsets.iter().map(|&offset| store.get(offset)).collect()
}

impl<T> Drop for MapIndex<T> {
    fn drop(&mut self) {
        if self.closed || self.persistence.is_none() {
            return;
        }

        // Best-effort flush on final drop
        if let Err(e) = self.flush() {
            log::warn!("failed to flush map index on drop: {}", e);
        }
    }
}
