//! File-backed metric log store.
//!
//! # Layout
//!
//! ```text
//! {base_dir}/
//!   {database}/
//!     {metric}.data      ← one fixed-width record per sample, write order
//!     {metric}.data.1    ← timestamp of the first sample
//!     {metric}.data.n    ← timestamp of the latest sample
//! ```
//!
//! Records carry timestamp deltas; readers replay them from the `.1` file.
//! Appends to one metric are serialized by that metric's entry in the lock
//! table, so writers to different metrics never wait on each other. Entries
//! live as long as the store, one per metric ever written, including metrics
//! later removed from disk; their memo is reset on the next append. Readers
//! take no lock: they pin the data file length at open and scan only that
//! prefix.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::aggregate::{self, HeatMap, Histogram, Summary};
use crate::cache::{CacheKey, SummaryCache};
use crate::codec::{self, Sample};
use crate::config::StoreConfig;
use crate::pipeline::SampleStream;
use crate::{Error, Result};

pub const DATA_FILE_EXT: &str = "data";
const FIRST_TIMESTAMP_EXT: &str = "data.1";
const LAST_TIMESTAMP_EXT: &str = "data.n";

/// Storage contract consumed by the request layer.
pub trait Storage: Send + Sync {
    fn list_databases(&self) -> Result<Vec<String>>;
    fn list_metrics(&self, db: &str) -> Result<Vec<String>>;
    fn add_sample(&self, db: &str, metric: &str, sample: Sample) -> Result<()>;
    /// `(timestamp, value)` pairs in write order.
    fn raw_values(&self, db: &str, metric: &str) -> Result<Vec<(i64, f64)>>;
    fn summary(&self, db: &str, metric: &str) -> Result<Summary>;
    fn heat_map(&self, db: &str, metric: &str) -> Result<HeatMap>;
    fn histogram(&self, db: &str, metric: &str) -> Result<Histogram>;
}

/// Paths of the files backing one metric.
#[derive(Debug, Clone)]
pub struct MetricPaths {
    pub data: PathBuf,
    pub first_timestamp: PathBuf,
    pub last_timestamp: PathBuf,
}

impl MetricPaths {
    fn new(db_dir: &Path, metric: &str) -> Self {
        let with_ext = |ext: &str| db_dir.join(format!("{metric}.{ext}"));
        Self {
            data: with_ext(DATA_FILE_EXT),
            first_timestamp: with_ext(FIRST_TIMESTAMP_EXT),
            last_timestamp: with_ext(LAST_TIMESTAMP_EXT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MetricKey {
    db: String,
    metric: String,
}

/// Per-metric append state, guarded by its own mutex.
#[derive(Debug, Default)]
struct MetricWriter {
    last_timestamp: Option<i64>,
}

/// A readable view of one metric, pinned to the data length seen at open.
struct Snapshot {
    data: PathBuf,
    first_timestamp: i64,
    len: u64,
}

impl Snapshot {
    fn stream(&self, capacity: usize) -> Result<SampleStream> {
        SampleStream::open(&self.data, self.first_timestamp, capacity, Some(self.len))
    }

    /// One full pass over the snapshot, feeding every sample to `visit`.
    fn scan(&self, capacity: usize, visit: &mut dyn FnMut(Sample)) -> Result<()> {
        let mut stream = self.stream(capacity)?;
        for sample in stream.by_ref() {
            visit(sample);
        }
        stream.finish()
    }
}

pub struct MetricStore {
    config: StoreConfig,
    writers: Mutex<HashMap<MetricKey, Arc<Mutex<MetricWriter>>>>,
    cache: SummaryCache,
}

impl MetricStore {
    /// Open (and create if needed) a store rooted at `config.base_dir`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.base_dir)?;
        log::info!("metric store opened at {}", config.base_dir.display());
        Ok(Self {
            cache: SummaryCache::new(config.summary_cache_capacity),
            writers: Mutex::new(HashMap::new()),
            config,
        })
    }

    /// Open with default settings under `base_dir`.
    pub fn open_dir(base_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open(StoreConfig::new(base_dir))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn base_dir(&self) -> &Path {
        &self.config.base_dir
    }

    pub fn cached_summaries(&self) -> usize {
        self.cache.len()
    }

    pub fn metric_paths(&self, db: &str, metric: &str) -> Result<MetricPaths> {
        validate_name("database", db)?;
        validate_name("metric", metric)?;
        Ok(MetricPaths::new(&self.db_dir(db), metric))
    }

    /// Stream a metric's samples without collecting them.
    pub fn stream(&self, db: &str, metric: &str) -> Result<SampleStream> {
        self.snapshot(db, metric)?.stream(self.config.channel_capacity)
    }

    fn db_dir(&self, db: &str) -> PathBuf {
        self.config.base_dir.join(db)
    }

    fn writer(&self, db: &str, metric: &str) -> Arc<Mutex<MetricWriter>> {
        let key = MetricKey {
            db: db.to_string(),
            metric: metric.to_string(),
        };
        let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(writers.entry(key).or_default())
    }

    fn snapshot(&self, db: &str, metric: &str) -> Result<Snapshot> {
        let paths = self.metric_paths(db, metric)?;
        if !self.db_dir(db).is_dir() {
            return Err(Error::NotFound(format!("database {db}")));
        }
        let len = match fs::metadata(&paths.data) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("metric {db}/{metric}")));
            }
            Err(err) => return Err(err.into()),
        };
        let first_timestamp = read_timestamp(&paths.first_timestamp)?;
        Ok(Snapshot {
            data: paths.data,
            first_timestamp,
            len,
        })
    }

    fn scanner<'a>(
        &'a self,
        snapshot: &'a Snapshot,
    ) -> impl FnMut(&mut dyn FnMut(Sample)) -> Result<()> + 'a {
        let capacity = self.config.channel_capacity;
        move |visit: &mut dyn FnMut(Sample)| snapshot.scan(capacity, visit)
    }

    fn sync_if_configured(&self, file: &fs::File) -> Result<()> {
        if self.config.sync_writes {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Append one record, then run `commit`. If the write or `commit` fails
    /// the data file is truncated back to its previous length, so a failed
    /// append leaves no record behind.
    fn append_record<F>(&self, path: &Path, delta: i64, value: f64, commit: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        // One write per record keeps concurrent readers line-aligned.
        let result = file
            .write_all(codec::encode_record(delta, value).as_bytes())
            .map_err(Error::from)
            .and_then(|()| self.sync_if_configured(&file))
            .and_then(|()| commit());

        if let Err(err) = result {
            if let Err(rollback) = file.set_len(len) {
                log::error!(
                    "rollback of {} to {len} bytes failed: {rollback}",
                    path.display()
                );
            }
            return Err(err);
        }
        Ok(())
    }

    fn write_timestamp(&self, path: &Path, timestamp: i64) -> Result<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(codec::encode_timestamp(timestamp).as_bytes())?;
        self.sync_if_configured(&file)?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}

impl Storage for MetricStore {
    fn list_databases(&self) -> Result<Vec<String>> {
        let mut databases = Vec::new();
        for entry in fs::read_dir(&self.config.base_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                databases.push(name.to_string());
            }
        }
        databases.sort_unstable();
        Ok(databases)
    }

    fn list_metrics(&self, db: &str) -> Result<Vec<String>> {
        validate_name("database", db)?;
        let dir = self.db_dir(db);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("database {db}")));
            }
            Err(err) => return Err(err.into()),
        };

        let mut metrics = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(DATA_FILE_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                metrics.push(stem.to_string());
            }
        }
        metrics.sort_unstable();
        Ok(metrics)
    }

    fn add_sample(&self, db: &str, metric: &str, sample: Sample) -> Result<()> {
        let paths = self.metric_paths(db, metric)?;
        if !sample.value.is_finite() {
            return Err(Error::BadRequest(format!(
                "value for {db}/{metric} is not finite: {}",
                sample.value
            )));
        }
        fs::create_dir_all(self.db_dir(db))?;

        let writer = self.writer(db, metric);
        let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);

        // Files may have been removed out of band since the last append.
        if !paths.last_timestamp.exists() {
            writer.last_timestamp = None;
        } else if writer.last_timestamp.is_none() {
            writer.last_timestamp = Some(read_timestamp(&paths.last_timestamp)?);
        }

        match writer.last_timestamp {
            None => {
                log::debug!("initializing metric {db}/{metric}");
                self.write_timestamp(&paths.first_timestamp, sample.timestamp)?;
                // `.n` is written last: until it exists the metric counts as
                // uninitialized and the next append starts over.
                self.append_record(&paths.data, 0, sample.value, || {
                    self.write_timestamp(&paths.last_timestamp, sample.timestamp)
                })?;
                writer.last_timestamp = Some(sample.timestamp);
            }
            Some(last) => {
                let delta = sample.timestamp.checked_sub(last).ok_or_else(|| {
                    Error::BadRequest(format!("timestamp delta overflows for {db}/{metric}"))
                })?;
                if delta < 0 {
                    log::debug!("out-of-order sample for {db}/{metric}: {delta}ns behind latest");
                }
                self.append_record(&paths.data, delta, sample.value, || {
                    self.write_timestamp(&paths.last_timestamp, sample.timestamp)
                })?;
                writer.last_timestamp = Some(sample.timestamp);
            }
        }
        Ok(())
    }

    fn raw_values(&self, db: &str, metric: &str) -> Result<Vec<(i64, f64)>> {
        let samples = self.stream(db, metric)?.collect_all()?;
        Ok(samples.into_iter().map(|s| (s.timestamp, s.value)).collect())
    }

    fn summary(&self, db: &str, metric: &str) -> Result<Summary> {
        let snapshot = self.snapshot(db, metric)?;
        let key = CacheKey::new(&snapshot.data, snapshot.len);
        if let Some(summary) = self.cache.get(&key) {
            log::debug!("summary cache hit for {db}/{metric} at {} bytes", key.len);
            return Ok(summary);
        }

        log::debug!("summary cache miss for {db}/{metric} at {} bytes", key.len);
        let summary = aggregate::summarize(
            self.scanner(&snapshot),
            self.config.percentile_method,
            self.config.in_memory_limit,
        )?;
        self.cache.insert(key, summary);
        Ok(summary)
    }

    fn heat_map(&self, db: &str, metric: &str) -> Result<HeatMap> {
        let snapshot = self.snapshot(db, metric)?;
        aggregate::build_heat_map(
            self.scanner(&snapshot),
            self.config.heat_map_width,
            self.config.heat_map_height,
            self.config.in_memory_limit,
        )
    }

    fn histogram(&self, db: &str, metric: &str) -> Result<Histogram> {
        let snapshot = self.snapshot(db, metric)?;
        aggregate::build_histogram(
            self.scanner(&snapshot),
            self.config.histogram_bins,
            self.config.percentile_method,
            self.config.in_memory_limit,
        )
    }
}

fn read_timestamp(path: &Path) -> Result<i64> {
    let text = fs::read_to_string(path)?;
    codec::decode_timestamp(&text)
}

/// Database and metric names become path components; reject anything that
/// could escape or alias the store layout.
fn validate_name(kind: &str, name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains("..")
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(Error::BadRequest(format!("invalid {kind} name {name:?}")));
    }
    Ok(())
}
