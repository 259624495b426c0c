//! Configuration for the spatial index and the attribute store
//!
//! This module provides the tuning knobs shared by [`crate::RTree`],
//! [`crate::HashBucketIndex`] and [`crate::MapIndex`], and re-exports the
//! envelope type from the `osm-index-types` crate for convenience.
use serde::de::Error;

pub use osm_index_types::Envelope;

/// Index configuration
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Maximum children per R-tree node. Values below 4 are raised to 4.
    #[serde(default = "Config::default_max_node_entries")]
    pub max_node_entries: usize,

    /// Number of leading value characters hashed into the bucket of a pair
    /// and compared by prefix-match search.
    #[serde(default = "Config::default_prefix_length")]
    pub prefix_length: usize,

    /// Slots in the attribute hash index.
    #[serde(default = "Config::default_bucket_count")]
    pub bucket_count: usize,
}

impl Config {
    const fn default_max_node_entries() -> usize {
        9
    }

    const fn default_prefix_length() -> usize {
        3
    }

    const fn default_bucket_count() -> usize {
        65_536
    }

    pub fn with_max_node_entries(mut self, max_entries: usize) -> Self {
        if max_entries < 4 {
            log::warn!(
                "max_node_entries of {} is below the minimum of 4 and will be raised",
                max_entries
            );
        }
        self.max_node_entries = max_entries;
        self
    }

    pub fn with_prefix_length(mut self, prefix_length: usize) -> Self {
        self.prefix_length = prefix_length;
        self
    }

    pub fn with_bucket_count(mut self, bucket_count: usize) -> Self {
        assert!(bucket_count > 0, "Bucket count must be greater than zero");
        self.bucket_count = bucket_count;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.bucket_count == 0 {
            return Err("Bucket count must be greater than zero".to_string());
        }

        if self.bucket_count > u32::MAX as usize {
            return Err("Bucket count must fit in 32 bits".to_string());
        }

        if self.prefix_length > u32::MAX as usize {
            return Err("Prefix length must fit in 32 bits".to_string());
        }

        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(Error::custom(e));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_node_entries: Self::default_max_node_entries(),
            prefix_length: Self::default_prefix_length(),
            bucket_count: Self::default_bucket_count(),
        }
    }
}
