//! Index builder for in-memory and directory-backed indexes
//!
//! A file-backed index lives in one directory holding the attribute records
//! (`attributes.dat`), the persisted hash table (`attributes.idx`) and the
//! R-tree snapshot (`spatial.tree`). Opening an existing directory picks up
//! where the last flush left off.

use crate::config::Config;
use crate::error::{IndexError, Result};
use crate::index::{
    INDEX_FILE, IndexedElement, MapIndex, Persistence, RecordStream, STORE_FILE, TREE_FILE,
};
use crate::spatial::RTree;
use crate::storage::{HashBucketIndex, KeyValueStore};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// Builder for [`MapIndex`] with an optional backing directory.
#[derive(Debug)]
pub struct IndexBuilder {
    path: Option<PathBuf>,
    config: Config,
    rebuild_attribute_index: bool,
}

impl IndexBuilder {
    /// Create a new builder with default in-memory configuration.
    pub fn new() -> Self {
        Self {
            path: None,
            config: Config::default(),
            rebuild_attribute_index: false,
        }
    }

    /// Back the index with `dir`. The directory is created if needed and any
    /// existing index inside it is loaded.
    pub fn path<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.path = Some(dir.into());
        self
    }

    /// Configure for in-memory storage with no persistence.
    pub fn in_memory(mut self) -> Self {
        self.path = None;
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Ignore a persisted hash table and rescan the record file on open.
    pub fn rebuild_attribute_index(mut self, rebuild: bool) -> Self {
        self.rebuild_attribute_index = rebuild;
        self
    }

    /// Build the index, loading persisted state when a path is set.
    pub fn build<T>(self) -> Result<MapIndex<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let Some(dir) = self.path else {
            return MapIndex::memory_with_config(self.config);
        };

        self.config.validate().map_err(IndexError::InvalidConfig)?;
        fs::create_dir_all(&dir)?;

        let store = open_store(&dir, &self.config, self.rebuild_attribute_index)?;
        let tree = open_tree::<T>(&dir, &self.config)?;

        log::info!(
            "opened map index at {} with {} features",
            dir.display(),
            tree.len()
        );

        let persistence = Persistence {
            dir,
            save_tree: |tree: &RTree<IndexedElement<T>>, path: &Path| tree.save_to_path(path),
        };
        Ok(MapIndex::from_parts(
            tree,
            store,
            self.config,
            Some(persistence),
        ))
    }
}

impl Default for IndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn open_store(
    dir: &Path,
    config: &Config,
    force_rebuild: bool,
) -> Result<KeyValueStore<Box<dyn RecordStream>, HashBucketIndex>> {
    let index_path = dir.join(INDEX_FILE);
    let loaded = if force_rebuild || !index_path.exists() {
        None
    } else {
        let index = HashBucketIndex::load_from_path(&index_path)?;
        index.ensure_matches(config)?;
        Some(index)
    };

    // A rebuild also relinks chains written under another layout.
    let needs_rebuild = loaded.is_none();
    let index = loaded.unwrap_or_else(|| HashBucketIndex::from_config(config));

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(dir.join(STORE_FILE))?;
    let stream: Box<dyn RecordStream> = Box::new(file);
    let mut store = KeyValueStore::new(stream, index)?;

    if needs_rebuild && !store.is_empty() {
        store.rebuild_index()?;
    }
    Ok(store)
}

fn open_tree<T: DeserializeOwned>(dir: &Path, config: &Config) -> Result<RTree<IndexedElement<T>>> {
    let tree_path = dir.join(TREE_FILE);
    if !tree_path.exists() {
        return Ok(RTree::with_max_entries(config.max_node_entries));
    }

    let tree = RTree::load_from_path(&tree_path)?;
    if tree.max_entries() != config.max_node_entries.max(4) {
        log::warn!(
            "spatial snapshot uses {} entries per node, configured {}; keeping the snapshot layout",
            tree.max_entries(),
            config.max_node_entries
        );
    }
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Envelope;
    use tempfile::TempDir;

    #[test]
    fn test_builder_default() {
        let builder = IndexBuilder::new();
        assert!(builder.path.is_none());
        assert!(!builder.rebuild_attribute_index);
    }

    #[test]
    fn test_builder_in_memory() {
        let mut index: MapIndex<u32> = IndexBuilder::new().in_memory().build().unwrap();
        index
            .insert(1, Envelope::from_point(1.0, 2.0), [("shop", "bakery")])
            .unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.path().is_none());
    }

    #[test]
    fn test_builder_in_memory_overrides_path() {
        let temp_dir = TempDir::new().unwrap();
        let builder = IndexBuilder::new().path(temp_dir.path()).in_memory();
        assert!(builder.path.is_none());
    }

    #[test]
    fn test_builder_with_config() {
        let config = Config::default()
            .with_max_node_entries(16)
            .with_bucket_count(128);

        let index: MapIndex<u32> = IndexBuilder::new().config(config).build().unwrap();
        assert_eq!(index.tree().max_entries(), 16);
        assert_eq!(index.config().bucket_count, 128);
    }

    #[test]
    fn test_builder_creates_directory_files() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("berlin");

        let mut index: MapIndex<u64> = IndexBuilder::new().path(&dir).build().unwrap();
        index
            .insert(9, Envelope::new(0.0, 0.0, 1.0, 1.0), [("highway", "primary")])
            .unwrap();
        index.close().unwrap();

        assert!(dir.join(STORE_FILE).exists());
        assert!(dir.join(INDEX_FILE).exists());
        assert!(dir.join(TREE_FILE).exists());
    }

    #[test]
    fn test_builder_rejects_mismatched_attribute_index() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut index: MapIndex<u64> = IndexBuilder::new()
                .path(temp_dir.path())
                .build()
                .unwrap();
            index
                .insert(1, Envelope::from_point(0.0, 0.0), [("a", "b")])
                .unwrap();
        }

        let config = Config::default().with_prefix_length(5);
        let result: Result<MapIndex<u64>> = IndexBuilder::new()
            .path(temp_dir.path())
            .config(config)
            .build();
        assert!(matches!(result, Err(IndexError::IndexMismatch(_))));
    }

    #[test]
    fn test_forced_rebuild_under_new_layout_keeps_deduplication() {
        let temp_dir = TempDir::new().unwrap();
        let values: Vec<String> = (0..60).map(|i| format!("{i:03}")).collect();

        let config = Config::default().with_bucket_count(4).with_prefix_length(3);
        let (offsets, bytes) = {
            let mut index: MapIndex<u64> = IndexBuilder::new()
                .path(temp_dir.path())
                .config(config)
                .build()
                .unwrap();
            let offsets: Vec<u32> = values
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    index
                        .insert(i as u64, Envelope::from_point(0.0, 0.0), [("ref", v.as_str())])
                        .unwrap()[0]
                })
                .collect();
            index.close().unwrap();
            (offsets, index.attribute_bytes())
        };

        let config = Config::default().with_bucket_count(7).with_prefix_length(1);
        let mut index: MapIndex<u64> = IndexBuilder::new()
            .path(temp_dir.path())
            .config(config)
            .rebuild_attribute_index(true)
            .build()
            .unwrap();

        for (i, (value, offset)) in values.iter().zip(&offsets).enumerate() {
            assert_eq!(index.tag_offset("ref", value).unwrap(), Some(*offset));
            let again = index
                .insert(100 + i as u64, Envelope::from_point(1.0, 1.0), [("ref", value.as_str())])
                .unwrap();
            assert_eq!(again, vec![*offset]);
        }
        assert_eq!(index.attribute_bytes(), bytes);
        assert_eq!(index.store_stats().records_written, 0);
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            bucket_count: 0,
            ..Config::default()
        };
        let result: Result<MapIndex<u8>> =
            IndexBuilder::new().path(temp_dir.path()).config(config).build();
        assert!(matches!(result, Err(IndexError::InvalidConfig(_))));
    }
}
