//! Two-stage scan/parse pipeline over one metric data file.
//!
//! ```text
//! [scan thread] --lines--> [parse thread] --samples--> consumer
//!       |                        |
//!   scan_errors             parse_errors
//! ```
//!
//! Both channels are bounded, so a slow consumer stalls the parser and the
//! parser stalls the scanner. Either stage stops when the shared
//! [`CancelToken`] is set or when its downstream receiver is dropped; the
//! file handle is owned by the scan thread and closed when it exits.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::codec::{decode_record, Sample};
use crate::{Error, Result};

/// One-shot cooperative cancellation shared by the pipeline stages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Stream of reconstructed samples, in write order.
///
/// Iterate it to drain samples, then call [`finish`](Self::finish) to learn
/// whether the scan ended cleanly. Iteration simply stops on failure; the
/// error is only reported by `finish`.
pub struct SampleStream {
    samples: Option<Receiver<Sample>>,
    scan_errors: Receiver<Error>,
    parse_errors: Receiver<Error>,
    cancel: CancelToken,
    workers: Vec<JoinHandle<()>>,
}

impl SampleStream {
    /// Start scanning `path`, replaying deltas from `first_timestamp`.
    ///
    /// `limit` caps the number of bytes read, letting a caller pin the scan
    /// to the file length it observed before opening.
    pub fn open(
        path: impl AsRef<Path>,
        first_timestamp: i64,
        capacity: usize,
        limit: Option<u64>,
    ) -> Result<Self> {
        let capacity = capacity.max(1);
        let cancel = CancelToken::new();

        let (line_rx, scan_errors, scanner) =
            spawn_scanner(path.as_ref().to_path_buf(), limit, capacity, cancel.clone())?;
        let (sample_rx, parse_errors, parser) =
            spawn_parser(line_rx, first_timestamp, capacity, cancel.clone())?;

        Ok(Self {
            samples: Some(sample_rx),
            scan_errors,
            parse_errors,
            cancel,
            workers: vec![parser, scanner],
        })
    }

    /// Ask both stages to stop. Safe to call more than once.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop the pipeline, wait for both stages and surface the first error
    /// reported by either (scan errors take precedence).
    pub fn finish(mut self) -> Result<()> {
        self.cancel.cancel();
        // Unblocks a parser stuck on a full sample channel.
        self.samples.take();

        for worker in self.workers.drain(..) {
            worker.join().map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "pipeline worker panicked",
                ))
            })?;
        }

        for errors in [&self.scan_errors, &self.parse_errors] {
            match errors.try_recv() {
                Ok(err) => return Err(err),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }
        }
        Ok(())
    }

    /// Drain every sample into memory.
    pub fn collect_all(mut self) -> Result<Vec<Sample>> {
        let samples: Vec<Sample> = self.by_ref().collect();
        self.finish()?;
        Ok(samples)
    }
}

impl Iterator for SampleStream {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        self.samples.as_ref()?.recv().ok()
    }
}

impl Drop for SampleStream {
    fn drop(&mut self) {
        // Workers notice the dropped receiver or the flag and exit on their own.
        self.cancel.cancel();
        self.samples.take();
    }
}

type Stage<T> = (Receiver<T>, Receiver<Error>, JoinHandle<()>);

fn spawn_scanner(
    path: PathBuf,
    limit: Option<u64>,
    capacity: usize,
    cancel: CancelToken,
) -> Result<Stage<Vec<u8>>> {
    let (line_tx, line_rx) = mpsc::sync_channel::<Vec<u8>>(capacity);
    let (err_tx, err_rx) = mpsc::sync_channel::<Error>(1);

    let handle = thread::Builder::new()
        .name("perfkeeper-scan".to_string())
        .spawn(move || scan_lines(&path, limit, &line_tx, &err_tx, &cancel))?;

    Ok((line_rx, err_rx, handle))
}

fn scan_lines(
    path: &Path,
    limit: Option<u64>,
    lines: &SyncSender<Vec<u8>>,
    errors: &SyncSender<Error>,
    cancel: &CancelToken,
) {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            let _ = errors.send(err.into());
            return;
        }
    };
    let mut reader = BufReader::new(file.take(limit.unwrap_or(u64::MAX)));

    loop {
        if cancel.is_cancelled() {
            return;
        }
        // Raw bytes: a record that is not UTF-8 is the parser's to reject.
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => return,
            Ok(_) => {
                if line.last() != Some(&b'\n') {
                    // An append still in flight; only completed records are visible.
                    log::debug!("skipping incomplete trailing record in {}", path.display());
                    return;
                }
                line.pop();
                if lines.send(line).is_err() {
                    return;
                }
            }
            Err(err) => {
                let _ = errors.send(err.into());
                return;
            }
        }
    }
}

fn spawn_parser(
    lines: Receiver<Vec<u8>>,
    first_timestamp: i64,
    capacity: usize,
    cancel: CancelToken,
) -> Result<Stage<Sample>> {
    let (sample_tx, sample_rx) = mpsc::sync_channel::<Sample>(capacity);
    let (err_tx, err_rx) = mpsc::sync_channel::<Error>(1);

    let handle = thread::Builder::new()
        .name("perfkeeper-parse".to_string())
        .spawn(move || parse_samples(lines, first_timestamp, &sample_tx, &err_tx, &cancel))?;

    Ok((sample_rx, err_rx, handle))
}

fn parse_samples(
    lines: Receiver<Vec<u8>>,
    first_timestamp: i64,
    samples: &SyncSender<Sample>,
    errors: &SyncSender<Error>,
    cancel: &CancelToken,
) {
    let mut timestamp = first_timestamp;
    let mut line_no = 0u64;

    while let Ok(line) = lines.recv() {
        line_no += 1;
        let record = match decode_record(&line, line_no) {
            Ok(record) => record,
            Err(err) => {
                let _ = errors.send(err);
                cancel.cancel();
                return;
            }
        };
        timestamp = match timestamp.checked_add(record.delta) {
            Some(ts) => ts,
            None => {
                let _ = errors.send(Error::parse(line_no, "timestamp overflow"));
                cancel.cancel();
                return;
            }
        };
        if samples.send(Sample::new(timestamp, record.value)).is_err() {
            return;
        }
    }
}
