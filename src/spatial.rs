//! Spatial index over feature bounding boxes.
//!
//! [`RTree`] answers "which indexed features intersect this envelope" for
//! arbitrary item types. Search is bounding-box sound: it returns every item
//! whose envelope intersects the query and nothing else. Exact geometric
//! intersection is left to the caller.
//!
//! The tree is built single-threaded; once construction is finished `&RTree`
//! can be shared freely for concurrent searches.

mod rtree;
mod snapshot;

pub use rtree::{DEFAULT_MAX_ENTRIES, RTree};
