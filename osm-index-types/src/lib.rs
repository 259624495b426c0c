//! # osm-index-types
//!
//! Value types shared by the `osm-index` spatial index and its callers.
//!
//! - **Envelope**: axis-aligned bounding box over longitude/latitude with the
//!   union, intersection, area and margin arithmetic the R-tree relies on.
//!
//! Envelopes are serializable with Serde and convert to and from the `geo`
//! crate's `Rect`.
//!
//! ## Examples
//!
//! ```rust
//! use osm_index_types::envelope::Envelope;
//!
//! let mut block = Envelope::new(13.40, 52.50, 13.41, 52.51);
//! block.extend(&Envelope::new(13.42, 52.50, 13.43, 52.52));
//!
//! assert!(block.contains(&Envelope::new(13.405, 52.505, 13.425, 52.515)));
//! ```

pub mod envelope;

pub use envelope::Envelope;
