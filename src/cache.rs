//! Summary cache keyed by data-file identity and length.
//!
//! Metric logs only grow, so a `(path, len)` pair names one exact prefix of
//! a log. Appending changes the length and therefore the key; stale entries
//! are never looked up again and age out of the LRU.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lru::LruCache;

use crate::aggregate::Summary;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: PathBuf,
    pub len: u64,
}

impl CacheKey {
    pub fn new(path: impl AsRef<Path>, len: u64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            len,
        }
    }
}

pub struct SummaryCache {
    entries: Option<Mutex<LruCache<CacheKey, Summary>>>,
}

impl SummaryCache {
    /// A capacity of 0 disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Summary> {
        let entries = self.entries.as_ref()?;
        let mut entries = entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.get(key).copied()
    }

    pub fn insert(&self, key: CacheKey, summary: Summary) {
        if let Some(entries) = &self.entries {
            let mut entries = entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            entries.put(key, summary);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| {
            entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len()
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
