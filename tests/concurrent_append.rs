use std::sync::Arc;
use std::thread;

use perfkeeper::{MetricStore, Sample, Storage};
use tempfile::tempdir;

const THREADS: i64 = 8;
const PER_THREAD: i64 = 250;

#[test]
fn concurrent_appends_to_one_metric_stay_consistent() {
    let dir = tempdir().expect("tempdir");
    let store = Arc::new(MetricStore::open_dir(dir.path()).expect("open store"));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let ts = 1_000_000 + t * PER_THREAD + i;
                    store
                        .add_sample("d", "shared", Sample::new(ts, ts as f64))
                        .expect("append");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread");
    }

    let values = store.raw_values("d", "shared").expect("raw values");
    assert_eq!(values.len() as i64, THREADS * PER_THREAD);
    // Each value equals its timestamp, so any torn delta shows up here.
    for (ts, value) in &values {
        assert_eq!(*ts as f64, *value);
    }
    let mut timestamps: Vec<i64> = values.iter().map(|(ts, _)| *ts).collect();
    timestamps.sort_unstable();
    timestamps.dedup();
    assert_eq!(timestamps.len() as i64, THREADS * PER_THREAD);
}

#[test]
fn distinct_metrics_append_in_parallel() {
    let dir = tempdir().expect("tempdir");
    let store = Arc::new(MetricStore::open_dir(dir.path()).expect("open store"));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let metric = format!("m{t}");
                for i in 0..PER_THREAD {
                    store
                        .add_sample("d", &metric, Sample::new(i * 10, t as f64))
                        .expect("append");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread");
    }

    assert_eq!(store.list_metrics("d").expect("metrics").len() as i64, THREADS);
    for t in 0..THREADS {
        let values = store.raw_values("d", &format!("m{t}")).expect("raw values");
        let expected: Vec<(i64, f64)> = (0..PER_THREAD).map(|i| (i * 10, t as f64)).collect();
        assert_eq!(values, expected);
    }
}

#[test]
fn reads_during_writes_see_complete_prefixes() {
    let dir = tempdir().expect("tempdir");
    let store = Arc::new(MetricStore::open_dir(dir.path()).expect("open store"));
    store.add_sample("d", "m", Sample::new(0, 0.0)).expect("seed");

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 1..2_000_i64 {
                store
                    .add_sample("d", "m", Sample::new(i, i as f64))
                    .expect("append");
            }
        })
    };

    for _ in 0..20 {
        let values = store.raw_values("d", "m").expect("raw values");
        for (i, (ts, value)) in values.iter().enumerate() {
            assert_eq!(*ts, i as i64);
            assert_eq!(*value, i as f64);
        }
    }
    writer.join().expect("writer thread");
    assert_eq!(store.raw_values("d", "m").expect("final").len(), 2_000);
}
