//! Disk-backed geographic index for map features: an R-tree over feature
//! bounding boxes plus a deduplicating attribute store for their tags.
//!
//! ```rust
//! use osm_index::{Envelope, MapIndex};
//!
//! let mut index = MapIndex::memory()?;
//! index.insert(1u64, Envelope::new(0.0, 0.0, 1.0, 1.0), [("highway", "primary")])?;
//! index.insert(2u64, Envelope::new(4.0, 4.0, 5.0, 5.0), [("highway", "primary")])?;
//!
//! let hits = index.query(&Envelope::new(0.5, 0.5, 4.5, 4.5));
//! assert_eq!(hits.len(), 2);
//! // Both features reference the same tag record.
//! assert_eq!(hits[0].tags, hits[1].tags);
//! # Ok::<(), osm_index::IndexError>(())
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod index;
pub mod spatial;
pub mod storage;

#[cfg(feature = "sync")]
pub mod sync;

pub use builder::IndexBuilder;
pub use config::{Config, Envelope};
pub use error::{IndexError, Result};
pub use index::{IndexedElement, MapIndex, RecordStream};
pub use spatial::{DEFAULT_MAX_ENTRIES, RTree};
pub use storage::{BucketIndex, Entry, HashBucketIndex, KeyValueStore, StoreStats};

#[cfg(feature = "sync")]
pub use sync::SyncMapIndex;

pub use geo::Rect;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{Config, Envelope, IndexBuilder, IndexError, MapIndex, Result};

    pub use crate::{BucketIndex, HashBucketIndex, KeyValueStore, RTree};

    #[cfg(feature = "sync")]
    pub use crate::SyncMapIndex;
}
