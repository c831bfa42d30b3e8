use perfkeeper::{MetricStore, Sample, Storage};
use tempfile::tempdir;

#[test]
fn raw_values_replay_write_order() {
    let dir = tempdir().expect("tempdir");
    let store = MetricStore::open_dir(dir.path()).expect("open store");

    let written = vec![
        Sample::new(1_411_940_889_515_410_774, 1005.0),
        Sample::new(1_411_940_889_515_410_775, 75.11),
        Sample::new(1_411_940_890_000_000_000, 0.000_000_001),
        Sample::new(1_411_940_895_123_456_789, -42.5),
        Sample::new(1_411_940_895_123_456_789, 123_456_789.123_456_789),
    ];
    for sample in &written {
        store.add_sample("snapshot", "cpu", *sample).expect("append");
    }

    let values = store.raw_values("snapshot", "cpu").expect("raw values");
    assert_eq!(values.len(), written.len());
    for ((ts, value), sample) in values.iter().zip(&written) {
        assert_eq!(*ts, sample.timestamp);
        assert!((value - sample.value).abs() < 1e-9, "{value} vs {}", sample.value);
    }
}

#[test]
fn out_of_order_timestamps_round_trip() {
    let dir = tempdir().expect("tempdir");
    let store = MetricStore::open_dir(dir.path()).expect("open store");

    let timestamps = [5_000_i64, 9_000, 1_000, 7_500, 7_500, 2];
    for (i, ts) in timestamps.iter().enumerate() {
        store
            .add_sample("d", "lat", Sample::new(*ts, i as f64))
            .expect("append");
    }

    let values = store.raw_values("d", "lat").expect("raw values");
    let replayed: Vec<i64> = values.iter().map(|(ts, _)| *ts).collect();
    assert_eq!(replayed, timestamps);

    let paths = store.metric_paths("d", "lat").expect("paths");
    let last = std::fs::read_to_string(paths.last_timestamp).expect("last ts");
    assert_eq!(last, replayed.last().expect("non-empty").to_string());
}

#[test]
fn repeated_reads_are_identical() {
    let dir = tempdir().expect("tempdir");
    let store = MetricStore::open_dir(dir.path()).expect("open store");
    for i in 0..500 {
        store
            .add_sample("d", "m", Sample::new(1_000_000 + i * 1_000, (i % 37) as f64))
            .expect("append");
    }

    assert_eq!(
        store.raw_values("d", "m").expect("raw 1"),
        store.raw_values("d", "m").expect("raw 2")
    );
    assert_eq!(
        store.summary("d", "m").expect("summary 1"),
        store.summary("d", "m").expect("summary 2")
    );
    assert_eq!(
        store.heat_map("d", "m").expect("heat map 1"),
        store.heat_map("d", "m").expect("heat map 2")
    );
    assert_eq!(
        store.histogram("d", "m").expect("histogram 1"),
        store.histogram("d", "m").expect("histogram 2")
    );
}

#[test]
fn corrupt_log_surfaces_parse_error() {
    let dir = tempdir().expect("tempdir");
    let store = MetricStore::open_dir(dir.path()).expect("open store");
    store.add_sample("d", "m", Sample::new(10, 1.0)).expect("append");

    let paths = store.metric_paths("d", "m").expect("paths");
    let mut data = std::fs::read_to_string(&paths.data).expect("read data");
    data.push_str("not a record\n");
    std::fs::write(&paths.data, data).expect("rewrite data");

    let err = store.raw_values("d", "m").expect_err("corrupt log");
    assert!(matches!(err, perfkeeper::Error::Parse { line: 2, .. }), "{err}");
}
