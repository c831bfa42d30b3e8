use perfkeeper::{Error, MetricStore, Sample, Storage};
use tempfile::tempdir;

#[test]
fn fresh_store_has_no_databases() {
    let dir = tempdir().expect("tempdir");
    let store = MetricStore::open_dir(dir.path().join("store")).expect("open store");
    assert!(store.list_databases().expect("list").is_empty());
}

#[test]
fn first_write_creates_database_and_metric() {
    let dir = tempdir().expect("tempdir");
    let store = MetricStore::open_dir(dir.path()).expect("open store");
    store
        .add_sample("d", "cpu", Sample::new(1_411_940_889_515_410_774, 99.0))
        .expect("append");

    assert_eq!(store.list_databases().expect("databases"), vec!["d"]);
    assert!(store
        .list_metrics("d")
        .expect("metrics")
        .contains(&"cpu".to_string()));
}

#[test]
fn unknown_database_and_metric_are_not_found() {
    let dir = tempdir().expect("tempdir");
    let store = MetricStore::open_dir(dir.path()).expect("open store");
    assert!(matches!(store.list_metrics("nope"), Err(Error::NotFound(_))));
    assert!(matches!(store.raw_values("nope", "cpu"), Err(Error::NotFound(_))));

    store.add_sample("d", "cpu", Sample::new(1, 1.0)).expect("append");
    for result in [
        store.raw_values("d", "mem").map(|_| ()),
        store.summary("d", "mem").map(|_| ()),
        store.heat_map("d", "mem").map(|_| ()),
        store.histogram("d", "mem").map(|_| ()),
    ] {
        let err = result.expect_err("missing metric");
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(err.status_code(), 404);
    }
}

#[test]
fn unreadable_base_dir_is_io_error() {
    let dir = tempdir().expect("tempdir");
    let store = MetricStore::open_dir(dir.path().join("store")).expect("open store");
    std::fs::remove_dir_all(dir.path().join("store")).expect("remove base dir");
    assert!(matches!(store.list_databases(), Err(Error::Io(_))));
}

#[test]
fn stray_files_in_base_dir_are_not_databases() {
    let dir = tempdir().expect("tempdir");
    let store = MetricStore::open_dir(dir.path()).expect("open store");
    std::fs::write(dir.path().join("README"), "notes").expect("write stray file");
    store.add_sample("b", "m", Sample::new(1, 1.0)).expect("append");
    store.add_sample("a", "m", Sample::new(1, 1.0)).expect("append");
    assert_eq!(store.list_databases().expect("databases"), vec!["a", "b"]);
}
