use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::aggregate::PercentileMethod;
use crate::{Error, Result};

/// Default in-flight capacity of each pipeline channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
/// Default number of cached summaries.
pub const DEFAULT_SUMMARY_CACHE_CAPACITY: usize = 1024;
/// Populations above this size are aggregated without loading every value.
pub const DEFAULT_IN_MEMORY_LIMIT: usize = 10_000;
pub const DEFAULT_HISTOGRAM_BINS: usize = 6;
pub const DEFAULT_HEAT_MAP_WIDTH: usize = 240;
pub const DEFAULT_HEAT_MAP_HEIGHT: usize = 120;

/// Configuration for a [`MetricStore`](crate::MetricStore).
///
/// Every field has a default, so a config file only needs to name the
/// settings it changes:
///
/// ```json
/// { "base_dir": "/var/lib/perfkeeper", "sync_writes": true }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory; one subdirectory per database.
    pub base_dir: PathBuf,
    /// Capacity of the line and sample channels of the read pipeline.
    pub channel_capacity: usize,
    /// Maximum number of summaries kept by the result cache (0 disables it).
    pub summary_cache_capacity: usize,
    /// Largest population sorted in memory. Bigger metrics use the
    /// multi-pass selector and never hold more than this many values.
    pub in_memory_limit: usize,
    pub histogram_bins: usize,
    pub heat_map_width: usize,
    pub heat_map_height: usize,
    pub percentile_method: PercentileMethod,
    /// Call `sync_data` after every append and side-file update.
    pub sync_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./data"),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            summary_cache_capacity: DEFAULT_SUMMARY_CACHE_CAPACITY,
            in_memory_limit: DEFAULT_IN_MEMORY_LIMIT,
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
            heat_map_width: DEFAULT_HEAT_MAP_WIDTH,
            heat_map_height: DEFAULT_HEAT_MAP_HEIGHT,
            percentile_method: PercentileMethod::default(),
            sync_writes: false,
        }
    }
}

impl StoreConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let config: StoreConfig = serde_json::from_str(&data).map_err(|err| {
            Error::BadRequest(format!("invalid config {}: {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(Error::BadRequest("channel_capacity must be positive".into()));
        }
        if self.in_memory_limit == 0 {
            return Err(Error::BadRequest("in_memory_limit must be positive".into()));
        }
        if self.histogram_bins == 0 {
            return Err(Error::BadRequest("histogram_bins must be positive".into()));
        }
        if self.heat_map_width == 0 || self.heat_map_height == 0 {
            return Err(Error::BadRequest("heat map dimensions must be positive".into()));
        }
        Ok(())
    }
}
