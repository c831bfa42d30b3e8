//! Write path: request decoding and asynchronous, best-effort appends.
//!
//! A write names a database and carries a JSON object of `metric -> value`
//! pairs sharing one timestamp. [`Ingestor`] applies writes on a background
//! worker fed by a bounded channel; storage failures there are logged and
//! counted, never returned to the submitter (at-most-once delivery).

use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde_json::Value;

use crate::codec::Sample;
use crate::store::Storage;
use crate::timestamp::{now_ns, parse_timestamp};
use crate::{Error, Result};

pub const DEFAULT_INGEST_CAPACITY: usize = 1000;

/// Decode a `{"metric": number, ...}` body. Metrics come back sorted by name.
pub fn parse_samples_body(body: &str) -> Result<Vec<(String, f64)>> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| Error::BadRequest(format!("malformed JSON body: {err}")))?;
    let Value::Object(fields) = value else {
        return Err(Error::BadRequest("body must be a JSON object".into()));
    };

    fields
        .into_iter()
        .map(|(metric, value)| match value.as_f64() {
            Some(v) => Ok((metric, v)),
            None => Err(Error::BadRequest(format!(
                "value for metric {metric:?} is not a number"
            ))),
        })
        .collect()
}

/// One write: several metrics of a database sampled at the same instant.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub db: String,
    pub timestamp: i64,
    pub samples: Vec<(String, f64)>,
}

impl WriteRequest {
    /// Build a request from a JSON body and an optional raw `ts` parameter.
    /// A missing or unparseable `ts` means "now".
    pub fn from_body(db: impl Into<String>, body: &str, ts: Option<&str>) -> Result<Self> {
        let samples = parse_samples_body(body)?;
        let timestamp = ts.map_or_else(now_ns, parse_timestamp);
        Ok(Self {
            db: db.into(),
            timestamp,
            samples,
        })
    }

    /// Apply synchronously, stopping at the first failure.
    pub fn apply<S: Storage + ?Sized>(&self, store: &S) -> Result<()> {
        for (metric, value) in &self.samples {
            store.add_sample(&self.db, metric, Sample::new(self.timestamp, *value))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub appended: u64,
    pub failed: u64,
}

/// Background appender.
pub struct Ingestor {
    tx: Option<SyncSender<WriteRequest>>,
    worker: Option<JoinHandle<IngestStats>>,
}

impl Ingestor {
    pub fn spawn<S>(store: Arc<S>, capacity: usize) -> Result<Self>
    where
        S: Storage + ?Sized + 'static,
    {
        let (tx, rx) = mpsc::sync_channel::<WriteRequest>(capacity.max(1));
        let worker = thread::Builder::new()
            .name("perfkeeper-ingest".to_string())
            .spawn(move || {
                let mut stats = IngestStats::default();
                while let Ok(request) = rx.recv() {
                    for (metric, value) in &request.samples {
                        let sample = Sample::new(request.timestamp, *value);
                        match store.add_sample(&request.db, metric, sample) {
                            Ok(()) => stats.appended += 1,
                            Err(err) => {
                                stats.failed += 1;
                                log::error!("append to {}/{} failed: {err}", request.db, metric);
                            }
                        }
                    }
                }
                stats
            })?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Queue a write. Blocks while the queue is full; fails only when the
    /// worker has stopped.
    pub fn submit(&self, request: WriteRequest) -> Result<()> {
        let tx = self.tx.as_ref().ok_or_else(worker_stopped)?;
        tx.send(request).map_err(|_| worker_stopped())
    }

    /// Drain queued writes and stop the worker.
    pub fn shutdown(mut self) -> IngestStats {
        self.stop()
    }

    fn stop(&mut self) -> IngestStats {
        self.tx.take();
        match self.worker.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                log::error!("ingest worker panicked");
                IngestStats::default()
            }
            None => IngestStats::default(),
        }
    }
}

impl Drop for Ingestor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_stopped() -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "ingest worker stopped",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_fields_become_samples() {
        let samples = parse_samples_body(r#"{"read_latency": 12.3, "cpu": 99}"#).unwrap();
        assert_eq!(
            samples,
            vec![("cpu".to_string(), 99.0), ("read_latency".to_string(), 12.3)]
        );
    }

    #[test]
    fn malformed_bodies_are_bad_requests() {
        for body in ["", "{", "[1, 2]", r#"{"cpu": "high"}"#, r#"{"cpu": null}"#] {
            assert!(
                matches!(parse_samples_body(body), Err(Error::BadRequest(_))),
                "{body}"
            );
        }
    }

    #[test]
    fn explicit_timestamp_is_normalized() {
        let request = WriteRequest::from_body("d", r#"{"cpu": 1}"#, Some("1411534805")).unwrap();
        assert_eq!(request.timestamp, 1_411_534_805_000_000_000);
    }

    #[test]
    fn missing_timestamp_uses_now() {
        let before = now_ns();
        let request = WriteRequest::from_body("d", r#"{"cpu": 1}"#, None).unwrap();
        assert!(request.timestamp >= before);
    }
}
