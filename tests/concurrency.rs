// Reader/writer isolation across threads sharing one store.
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use flatstore::api::{Attribute, Feature, FeatureType, Store, StoreOptions, Value, ValueKind};

fn open(path: &std::path::Path) -> Store {
    let feature_type = FeatureType::new(
        "items",
        vec![
            Attribute::new("name", ValueKind::String),
            Attribute::new("rank", ValueKind::Integer),
        ],
    )
    .expect("type");
    Store::open(path, StoreOptions::new().with_schema(feature_type)).expect("store")
}

fn item(store: &Store, name: &str, rank: i32) -> Feature {
    let feature_type = store.schema().expect("schema").expect("present");
    Feature::new(feature_type)
        .with("name", Value::from(name))
        .and_then(|feature| feature.with("rank", Value::from(rank)))
        .expect("feature")
}

#[test]
fn open_reader_keeps_its_snapshot_and_delays_commit() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("items.csv");
    let store = open(&path);
    store
        .add([item(&store, "a", 1), item(&store, "b", 2)])
        .expect("seed");

    let committed = AtomicBool::new(false);
    thread::scope(|scope| {
        let mut reader = store.features().expect("reader A");
        let first = reader.next_feature().expect("first").expect("some");
        assert_eq!(first.get("name"), Some(&Value::from("a")));

        let writer = scope.spawn(|| {
            let changes = store.add([item(&store, "c", 3)]).expect("add");
            committed.store(true, Ordering::SeqCst);
            changes
        });

        // The commit needs the exclusive lock, which reader A still blocks.
        thread::sleep(Duration::from_millis(300));
        assert!(!committed.load(Ordering::SeqCst));

        let rest: Vec<Feature> = reader
            .by_ref()
            .collect::<Result<_, _>>()
            .expect("rest of snapshot");
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].get("name"), Some(&Value::from("b")));
        reader.close();

        let changes = writer.join().expect("writer thread");
        assert_eq!(changes.added.iter().copied().collect::<Vec<_>>(), vec![2]);
    });

    assert!(committed.load(Ordering::SeqCst));
    assert_eq!(store.count().expect("count"), 3);
}

#[test]
fn writers_are_serialized() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("items.csv");
    let store = open(&path);

    let workers = 6;
    thread::scope(|scope| {
        for worker in 0..workers {
            let store = &store;
            scope.spawn(move || {
                let name = format!("w{worker}");
                store.add([item(store, &name, worker)]).expect("add");
            });
        }
    });

    assert_eq!(store.count().expect("count"), workers as u64);
    let mut names: Vec<String> = store
        .features()
        .expect("reader")
        .map(|feature| {
            feature
                .expect("feature")
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        })
        .collect();
    names.sort();
    assert_eq!(names, (0..workers).map(|w| format!("w{w}")).collect::<Vec<_>>());
}

#[test]
fn separate_store_handles_see_committed_writes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("items.csv");
    let first = open(&path);
    let second = Store::open(&path, StoreOptions::new()).expect("second handle");

    first.add([item(&first, "a", 1)]).expect("add");
    assert_eq!(second.count().expect("count"), 1);
    let removed = second.remove_if(|_| true).expect("remove");
    assert_eq!(removed.deleted.len(), 1);
    assert_eq!(first.count().expect("count"), 0);
}

#[test]
fn schema_stays_readable_while_update_waits_on_a_reader() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("items.csv");
    let store = open(&path);
    store.add([item(&store, "a", 1)]).expect("seed");

    let replacement = FeatureType::new("items", vec![Attribute::new("label", ValueKind::String)])
        .expect("type");
    let replaced = AtomicBool::new(false);
    thread::scope(|scope| {
        let reader = store.features().expect("reader");

        let updater = scope.spawn(|| {
            store.update_schema(replacement).expect("update");
            replaced.store(true, Ordering::SeqCst);
        });

        // The update is parked on the exclusive lock; the cached schema must still
        // be served without waiting on it.
        thread::sleep(Duration::from_millis(200));
        assert!(!replaced.load(Ordering::SeqCst));
        let current = store.schema().expect("schema").expect("present");
        assert!(current.attribute("rank").is_some());

        reader.close();
        updater.join().expect("updater thread");
    });

    let current = store.schema().expect("schema").expect("present");
    assert!(current.attribute("label").is_some());
    assert!(current.attribute("rank").is_none());
    assert_eq!(store.count().expect("count"), 0);
}
