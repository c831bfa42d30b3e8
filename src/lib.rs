//! File-based time-series store for performance measurement samples.
//!
//! Samples (nanosecond timestamp + `f64` value) are grouped by database and
//! metric. Each metric is an append-only log of delta-encoded, fixed-width
//! text records; reads replay the log through a bounded two-stage pipeline
//! and feed raw series, summaries, histograms and heat maps.
//!
//! ```no_run
//! use perfkeeper::{MetricStore, Sample, Storage};
//!
//! let store = MetricStore::open_dir("./data")?;
//! store.add_sample("bench", "read_latency", Sample::new(1_411_534_805_000_000_000, 12.3))?;
//! let summary = store.summary("bench", "read_latency")?;
//! println!("p99={}", summary.p99);
//! # Ok::<(), perfkeeper::Error>(())
//! ```

pub mod aggregate;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod store;
pub mod timestamp;

pub use aggregate::{HeatMap, Histogram, HistogramBin, PercentileMethod, Summary};
pub use codec::Sample;
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use ingest::{Ingestor, IngestStats, WriteRequest};
pub use pipeline::{CancelToken, SampleStream};
pub use store::{MetricStore, Storage};
pub use timestamp::{now_ns, parse_timestamp};
