// Store-level flows: round trips, write sessions, schema replacement, listeners.
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use flatstore::api::{
    Attribute, ChangeListener, ChangeSet, Crs, ErrorKind, Feature, FeatureType, Geometry, Store,
    StoreOptions, Value, ValueKind,
};
use geo_types::{line_string, point};
use time::macros::datetime;

fn roads_type() -> FeatureType {
    FeatureType::new(
        "roads",
        vec![
            Attribute::new("name", ValueKind::String),
            Attribute::new("lanes", ValueKind::Integer),
            Attribute::new("opened", ValueKind::Date),
            Attribute::new("geom", ValueKind::Geometry(Crs::epsg(4326))),
        ],
    )
    .expect("type")
}

fn create(path: &Path) -> Store {
    Store::open(path, StoreOptions::new().with_schema(roads_type())).expect("create store")
}

fn road(store: &Store, name: &str, lanes: i32) -> Feature {
    let feature_type = store.schema().expect("schema").expect("has schema");
    Feature::new(feature_type)
        .with("name", Value::from(name))
        .and_then(|feature| feature.with("lanes", Value::from(lanes)))
        .expect("feature")
}

fn names(store: &Store) -> Vec<String> {
    store
        .features()
        .expect("reader")
        .map(|feature| {
            let feature = feature.expect("feature");
            feature
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}

#[derive(Default)]
struct Recorder {
    changes: Mutex<Vec<ChangeSet>>,
    schemas: Mutex<Vec<String>>,
}

impl ChangeListener for Recorder {
    fn features_changed(&self, changes: &ChangeSet) {
        self.changes.lock().expect("lock").push(changes.clone());
    }

    fn schema_replaced(&self, feature_type: &FeatureType) {
        self.schemas
            .lock()
            .expect("lock")
            .push(feature_type.name().to_string());
    }
}

#[test]
fn added_features_round_trip_with_quotes_and_geometry() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("roads.csv");
    let store = create(&path);

    let line: Geometry<f64> = line_string![(x: 0.0, y: 0.0), (x: 1.5, y: -2.0)].into();
    let first = road(&store, "He said \"hi\"; bye", 2)
        .with("opened", Value::from(datetime!(2024-03-01 12:30 UTC)))
        .and_then(|feature| feature.with("geom", Value::from(line.clone())))
        .expect("feature");
    let second = road(&store, "", 1);

    let changes = store.add([first, second]).expect("add");
    assert_eq!(changes.added.iter().copied().collect::<Vec<_>>(), vec![0, 1]);
    assert!(changes.updated.is_empty());
    assert!(changes.deleted.is_empty());

    let text = fs::read_to_string(&path).expect("read");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines[0],
        "name(String);lanes(Integer);opened(Date);geom(EPSG:4326)"
    );
    assert_eq!(
        lines[1],
        "\"He said \"\"hi\"\"; bye\";2;2024-03-01T12:30:00Z;LINESTRING (0 0, 1.5 -2)"
    );
    assert_eq!(lines[2], "\"\";1;;");

    let features = store
        .features()
        .expect("reader")
        .collect::<Result<Vec<_>, _>>()
        .expect("decode");
    assert_eq!(features.len(), 2);
    assert_eq!(features[0].id(), 0);
    assert_eq!(
        features[0].get("name"),
        Some(&Value::String("He said \"hi\"; bye".to_string()))
    );
    assert_eq!(features[0].default_geometry(), Some(&line));
    assert_eq!(
        features[0].get("opened"),
        Some(&Value::Date(datetime!(2024-03-01 12:30 UTC)))
    );
    assert_eq!(features[1].get("name"), Some(&Value::String(String::new())));
    assert_eq!(features[1].get("opened"), None);
}

#[test]
fn hand_written_lines_decode_positionally() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("places.csv");
    fs::write(
        &path,
        "name;where(EPSG:3857)\nA;POINT (1 2)\n\"a;b\";\n# trailing comment\n",
    )
    .expect("write");

    let store = Store::open(&path, StoreOptions::new()).expect("open");
    let feature_type = store.schema().expect("schema").expect("header");
    assert_eq!(feature_type.name(), "places");
    assert_eq!(
        feature_type.default_geometry().map(|attribute| attribute.name.as_str()),
        Some("where")
    );

    let mut reader = store.features().expect("reader");
    let first = reader.next_feature().expect("first").expect("some");
    assert_eq!(first.get("name"), Some(&Value::String("A".to_string())));
    let expected: Geometry<f64> = point!(x: 1.0, y: 2.0).into();
    assert_eq!(first.default_geometry(), Some(&expected));

    let second = reader.next_feature().expect("second").expect("some");
    assert_eq!(second.id(), 1);
    assert_eq!(second.get("name"), Some(&Value::String("a;b".to_string())));
    assert_eq!(second.get("where"), None);

    assert!(!reader.has_next().expect("has_next"));
    assert!(reader.next_feature().expect("end").is_none());
}

#[test]
fn bad_field_reports_line_and_attribute() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("bad.csv");
    fs::write(&path, "n(Integer);s\n1;ok\n\nnope;x\n").expect("write");

    let store = Store::open(&path, StoreOptions::new()).expect("open");
    let mut reader = store.features().expect("reader");
    assert!(reader.next_feature().expect("first").is_some());
    let err = reader.next_feature().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Corrupt);
    assert_eq!(err.line(), Some(4));
    assert_eq!(err.attribute(), Some("n"));
    assert_eq!(err.path(), Some(path.as_path()));
}

#[test]
fn remove_if_rewrites_without_matching_features() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("roads.csv");
    let store = create(&path);
    store
        .add([road(&store, "a", 1), road(&store, "b", 2), road(&store, "c", 3)])
        .expect("add");

    let changes = store
        .remove_if(|feature| feature.get("name") == Some(&Value::from("b")))
        .expect("remove");
    assert_eq!(changes.deleted.len(), 1);
    assert!(changes.deleted.contains(&1));
    assert!(changes.added.is_empty());
    // Survivors were rewritten, so they count as updated.
    assert_eq!(changes.updated.iter().copied().collect::<Vec<_>>(), vec![0, 2]);

    assert_eq!(names(&store), vec!["a", "c"]);
    assert_eq!(store.count().expect("count"), 2);
    // Identifiers are positions, so "c" moved up.
    let ids: Vec<u64> = store
        .features()
        .expect("reader")
        .map(|feature| feature.expect("feature").id())
        .collect();
    assert_eq!(ids, vec![0, 1]);
}

#[test]
fn replace_if_updates_and_deletes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("roads.csv");
    let store = create(&path);
    store
        .add([road(&store, "a", 1), road(&store, "b", 2), road(&store, "c", 3)])
        .expect("add");

    let changes = store
        .replace_if(
            |feature| feature.get("lanes") != Some(&Value::Integer(1)),
            |feature| {
                if feature.get("name") == Some(&Value::from("c")) {
                    return None;
                }
                feature.with("lanes", Value::Integer(4)).ok()
            },
        )
        .expect("replace");
    assert_eq!(changes.updated.iter().copied().collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(changes.deleted.iter().copied().collect::<Vec<_>>(), vec![2]);

    let lanes: Vec<Option<Value>> = store
        .features()
        .expect("reader")
        .map(|feature| feature.expect("feature").get("lanes").cloned())
        .collect();
    assert_eq!(lanes, vec![Some(Value::Integer(1)), Some(Value::Integer(4))]);
}

#[test]
fn unchanged_rewrite_reports_every_record_as_updated() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("roads.csv");
    let store = create(&path);
    store
        .add([road(&store, "a", 1), road(&store, "b", 2)])
        .expect("add");
    let before = fs::read_to_string(&path).expect("read");

    let recorder = Arc::new(Recorder::default());
    store.add_listener(recorder.clone());
    let changes = store.replace_if(|_| true, Some).expect("replace");
    assert_eq!(changes.updated.iter().copied().collect::<Vec<_>>(), vec![0, 1]);
    assert!(changes.added.is_empty());
    assert!(changes.deleted.is_empty());

    let seen = recorder.changes.lock().expect("lock");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], changes);
    assert_eq!(fs::read_to_string(&path).expect("read"), before);
}

#[test]
fn writer_session_edits_in_place_then_appends() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("roads.csv");
    let store = create(&path);
    store
        .add([road(&store, "a", 1), road(&store, "b", 2)])
        .expect("add");

    let mut writer = store.writer().expect("writer");
    let err = writer.remove().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);

    assert!(writer.has_next().expect("has_next"));
    let first = writer.next().expect("first");
    assert_eq!(first.id(), 0);
    first.set("lanes", Value::Integer(9)).expect("set");
    writer.write().expect("write");
    writer.write().expect("second write is a no-op");

    writer.next().expect("second");
    assert!(!writer.has_next().expect("exhausted"));
    assert!(!writer.is_appending());

    let appended = writer.next().expect("append slot");
    assert_eq!(appended.id(), 2);
    assert_eq!(appended.get("name"), None);
    appended.set("name", Value::from("z")).expect("set");
    assert!(writer.is_appending());

    let changes = writer.close().expect("close");
    assert_eq!(changes.updated.iter().copied().collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(changes.added.iter().copied().collect::<Vec<_>>(), vec![2]);
    assert_eq!(names(&store), vec!["a", "b", "z"]);
}

#[test]
fn abandoned_writer_leaves_original_and_no_staging_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("roads.csv");
    let store = create(&path);
    store.add([road(&store, "a", 1)]).expect("add");
    let before = fs::read_to_string(&path).expect("read");

    {
        let mut writer = store.writer().expect("writer");
        writer.next().expect("first");
        writer.remove().expect("remove");
        assert!(temp.path().join("roads.csv.staging").exists());
    }

    assert!(!temp.path().join("roads.csv.staging").exists());
    assert_eq!(fs::read_to_string(&path).expect("read"), before);
    assert_eq!(names(&store), vec!["a"]);
}

#[test]
fn count_skips_comments_blanks_and_multiline_fields() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("notes.csv");
    fs::write(
        &path,
        "# written by hand\ntitle;body\n\none;\"first\nsecond\"\n# between\ntwo;x\n",
    )
    .expect("write");

    let store = Store::open(&path, StoreOptions::new()).expect("open");
    assert_eq!(store.count().expect("count"), 2);
    assert_eq!(
        store
            .count_where(|feature| feature.get("body") == Some(&Value::from("first\nsecond")))
            .expect("count_where"),
        1
    );
}

#[test]
fn update_schema_discards_features_and_notifies() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("roads.csv");
    let store = create(&path);
    let recorder = Arc::new(Recorder::default());
    store.add_listener(recorder.clone());

    store
        .add([road(&store, "a", 1), road(&store, "b", 2)])
        .expect("add");
    assert_eq!(recorder.changes.lock().expect("lock").len(), 1);

    let replacement = FeatureType::new(
        "roads",
        vec![
            Attribute::new("code", ValueKind::Integer),
            Attribute::new("open", ValueKind::Boolean),
        ],
    )
    .expect("type");
    store.update_schema(replacement.clone()).expect("update");

    assert_eq!(store.count().expect("count"), 0);
    assert_eq!(
        fs::read_to_string(&path).expect("read"),
        "code(Integer);open(boolean)\n"
    );
    let schema = store.schema().expect("schema").expect("present");
    assert!(schema.same_columns(&replacement));
    assert_eq!(*recorder.schemas.lock().expect("lock"), vec!["roads".to_string()]);

    let reopened = Store::open(&path, StoreOptions::new()).expect("reopen");
    let schema = reopened.schema().expect("schema").expect("present");
    assert_eq!(schema.attributes()[1].kind, ValueKind::Boolean);
}

#[test]
fn mismatched_features_and_values_are_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("roads.csv");
    let store = create(&path);

    let feature_type = store.schema().expect("schema").expect("present");
    let mut feature = Feature::new(feature_type);
    let err = feature.set("lanes", Value::from("two")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
    let err = feature.set("missing", Value::Integer(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);

    let other = Arc::new(
        FeatureType::new("other", vec![Attribute::new("x", ValueKind::Double)]).expect("type"),
    );
    let err = store.add([Feature::new(other)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert!(!temp.path().join("roads.csv.staging").exists());
    assert_eq!(store.count().expect("count"), 0);
}

#[test]
fn custom_separator_is_used_for_reading_and_writing() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("tabs.tsv");
    let store = Store::open(
        &path,
        StoreOptions::new()
            .with_separator('\t')
            .with_schema(roads_type()),
    )
    .expect("create");
    store.add([road(&store, "x;y", 3)]).expect("add");

    let text = fs::read_to_string(&path).expect("read");
    assert_eq!(text.lines().nth(1), Some("x;y\t3\t\t"));
    assert_eq!(names(&store), vec!["x;y"]);
}

#[test]
fn added_lines_are_written_in_header_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("places.csv");
    let places = FeatureType::new(
        "places",
        vec![
            Attribute::new("name", ValueKind::String),
            Attribute::new("geom", ValueKind::Geometry(Crs::epsg(4326))),
        ],
    )
    .expect("type");
    let store = Store::open(&path, StoreOptions::new().with_schema(places)).expect("store");
    let feature_type = store.schema().expect("schema").expect("present");

    let point_a = Feature::new(Arc::clone(&feature_type))
        .with("name", Value::from("A"))
        .and_then(|feature| feature.with("geom", Value::from(point!(x: 1.0, y: 2.0))))
        .expect("feature");
    store.add([point_a]).expect("add A");
    assert_eq!(
        fs::read_to_string(&path).expect("read"),
        "name(String);geom(EPSG:4326)\nA;POINT (1 2)\n"
    );

    let no_geometry = Feature::new(feature_type)
        .with("name", Value::from("a;b"))
        .expect("feature");
    let changes = store.add([no_geometry]).expect("add a;b");
    assert_eq!(changes.added.iter().copied().collect::<Vec<_>>(), vec![1]);
    assert_eq!(
        fs::read_to_string(&path).expect("read"),
        "name(String);geom(EPSG:4326)\nA;POINT (1 2)\n\"a;b\";\n"
    );
}

#[test]
fn dates_with_second_offsets_stay_readable() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("roads.csv");
    let store = create(&path);

    let opened = datetime!(2024-01-01 0:00 +01:00:30);
    let feature = road(&store, "a", 1)
        .with("opened", Value::from(opened))
        .expect("feature");
    store.add([feature]).expect("add");

    let text = fs::read_to_string(&path).expect("read");
    assert_eq!(text.lines().nth(1), Some("a;1;2023-12-31T22:59:30Z;"));
    let features = store
        .features()
        .expect("reader")
        .collect::<Result<Vec<_>, _>>()
        .expect("decode");
    assert_eq!(features[0].get("opened"), Some(&Value::Date(opened)));

    let err = road(&store, "b", 2)
        .with("opened", Value::from(datetime!(0000-01-01 0:00 +01:00)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert_eq!(err.attribute(), Some("opened"));
}

#[test]
fn crlf_inside_string_round_trips() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("roads.csv");
    let store = create(&path);

    store.add([road(&store, "a\r\nb", 1)]).expect("add");
    assert_eq!(names(&store), vec!["a\r\nb"]);
    assert_eq!(store.count().expect("count"), 1);
}
