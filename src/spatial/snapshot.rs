//! Snapshot persistence for whole R-trees.
//!
//! A snapshot is the magic bytes, a version byte, then the `bincode` encoding
//! of the node arena. Loading restores the exact tree shape, so a tree built
//! once per dataset can be reopened without replaying insertions.

use super::rtree::RTree;
use crate::error::{IndexError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const TREE_MAGIC: &[u8] = b"OSMRTREE";
const TREE_VERSION: u8 = 1;

impl<T: Serialize> RTree<T> {
    /// Write a snapshot of the tree to `writer`.
    pub fn save<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(TREE_MAGIC)?;
        writer.write_all(&[TREE_VERSION])?;
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Write a snapshot to `path`, replacing any previous file atomically.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let temp_path = temp_path(path);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut writer = BufWriter::new(file);
        self.save(&mut writer)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, path)?;
        log::info!(
            "saved spatial snapshot with {} items to {}",
            self.len(),
            path.display()
        );
        Ok(())
    }
}

impl<T: DeserializeOwned> RTree<T> {
    /// Read a tree previously written with [`RTree::save`].
    pub fn load<R: Read>(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; TREE_MAGIC.len()];
        reader.read_exact(&mut magic)?;
        if magic != TREE_MAGIC {
            return Err(IndexError::InvalidFormat);
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != TREE_VERSION {
            return Err(IndexError::InvalidFormat);
        }

        let tree: RTree<T> = bincode::deserialize_from(reader)?;
        if !tree.is_well_formed() {
            return Err(IndexError::InvalidFormat);
        }
        Ok(tree)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let tree = Self::load(BufReader::new(File::open(path)?))?;
        log::info!(
            "loaded spatial snapshot with {} items from {}",
            tree.len(),
            path.display()
        );
        Ok(tree)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut temp = path.to_path_buf();
    if let Some(name) = temp.file_name() {
        let mut new_name = name.to_string_lossy().into_owned();
        new_name.push_str(".tmp");
        temp.set_file_name(new_name);
    }
    temp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Envelope;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn sample_tree() -> RTree<u64> {
        let mut tree = RTree::with_max_entries(5);
        for i in 0..200u64 {
            let x = (i % 20) as f64;
            let y = (i / 20) as f64;
            tree.insert(i, Envelope::new(x, y, x + 0.5, y + 0.5));
        }
        tree
    }

    #[test]
    fn test_snapshot_restores_same_answers() {
        let tree = sample_tree();
        let mut buf = Vec::new();
        tree.save(&mut buf).unwrap();

        let restored: RTree<u64> = RTree::load(Cursor::new(buf)).unwrap();
        assert_eq!(restored.len(), tree.len());
        assert_eq!(restored.height(), tree.height());
        assert_eq!(restored.envelope(), tree.envelope());
        assert_eq!(restored.max_entries(), 5);

        let query = Envelope::new(3.0, 3.0, 7.2, 5.9);
        let mut expected: Vec<u64> = tree.search(&query).into_iter().copied().collect();
        let mut actual: Vec<u64> = restored.search(&query).into_iter().copied().collect();
        expected.sort_unstable();
        actual.sort_unstable();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_snapshot_rejects_bad_magic() {
        let result: Result<RTree<u64>> = RTree::load(Cursor::new(b"NOTATREE\x01".to_vec()));
        assert!(matches!(result, Err(IndexError::InvalidFormat)));
    }

    #[test]
    fn test_snapshot_rejects_unknown_version() {
        let mut buf = Vec::new();
        sample_tree().save(&mut buf).unwrap();
        buf[TREE_MAGIC.len()] = 99;

        let result: Result<RTree<u64>> = RTree::load(Cursor::new(buf));
        assert!(matches!(result, Err(IndexError::InvalidFormat)));
    }

    #[test]
    fn test_snapshot_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spatial.tree");

        let tree = sample_tree();
        tree.save_to_path(&path).unwrap();
        assert!(!temp_path(&path).exists());

        let restored: RTree<u64> = RTree::load_from_path(&path).unwrap();
        assert_eq!(restored.iter().count(), 200);
    }
}
