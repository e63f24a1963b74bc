use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use keepsake::{
    AddReporting, Collection, CollectionOptions, Event, EventKind, Item, KeepsakeError, ModelType,
    ObjectId, Store,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

fn raw(value: Value) -> Item {
    Item::from_value(value).expect("object")
}

fn setup(data: Value) -> (Store, Collection) {
    let store = Store::new();
    let collection = Collection::new(
        &store,
        CollectionOptions::new(ModelType::new("thing")).data(data),
    )
    .unwrap();
    (store, collection)
}

fn record_events(collection: &Collection, kind: EventKind) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    collection
        .add_listener(kind, move |event: &Event| sink.lock().push(event.clone()))
        .unwrap();
    seen
}

fn count_length_changes(collection: &Collection) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    collection
        .add_observer("length", move |_: ObjectId, _: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    calls
}

fn ids(collection: &Collection) -> Vec<i64> {
    collection.map(|record| record.get("id").and_then(|id| id.as_i64()).unwrap_or(-1))
}

#[test]
fn add_to_empty_collection() {
    let (_store, collection) = setup(json!([]));
    let adds = record_events(&collection, EventKind::Add);
    let lengths = count_length_changes(&collection);
    let reported = collection.add(vec![raw(json!({"id": 1}))], None).unwrap();
    assert_eq!(reported, vec![0]);
    assert_eq!(collection.len(), 1);
    assert_eq!(lengths.load(Ordering::SeqCst), 1, "length changed once");
    let adds = adds.lock();
    assert_eq!(adds.len(), 1);
    assert!(matches!(&adds[0], Event::Add { records } if records == &vec![0]));
}

#[test]
fn batch_is_spliced_in_order_at_clamped_index() {
    let (_store, collection) = setup(json!([{"id": 1}, {"id": 2}]));
    let reported = collection
        .add(vec![raw(json!({"id": 10})), raw(json!({"id": 11}))], Some(1))
        .unwrap();
    assert_eq!(reported, vec![1, 2]);
    assert_eq!(ids(&collection), vec![1, 10, 11, 2]);
    let reported = collection.add(vec![raw(json!({"id": 99}))], Some(42)).unwrap();
    assert_eq!(reported, vec![4], "index past the end appends");
    assert_eq!(collection.len(), 5);
}

#[test]
fn empty_batch_is_a_silent_no_op() {
    let (_store, collection) = setup(json!([{"id": 1}]));
    let adds = record_events(&collection, EventKind::Add);
    let lengths = count_length_changes(&collection);
    let reported = collection.add(Vec::<Item>::new(), None).unwrap();
    assert!(reported.is_empty());
    assert!(adds.lock().is_empty());
    assert_eq!(lengths.load(Ordering::SeqCst), 0);
}

#[test]
fn adding_a_destroyed_record_fails_without_partial_insert() {
    let (store, collection) = setup(json!([{"id": 1}]));
    let other = Collection::new(
        &store,
        CollectionOptions::new(ModelType::new("thing")).data(json!([{"id": 7}])),
    )
    .unwrap();
    let gone = other.at(0).unwrap();
    gone.destroy();
    let result = collection.add(vec![raw(json!({"id": 2})), Item::from(gone)], None);
    assert!(matches!(result, Err(KeepsakeError::InvalidRecordState { .. })));
    assert_eq!(collection.len(), 1);
}

#[test]
fn record_instances_are_not_reported_by_default() {
    let (store, collection) = setup(json!([]));
    let other = Collection::new(
        &store,
        CollectionOptions::new(ModelType::new("thing")).data(json!([{"id": 5}])),
    )
    .unwrap();
    let instance = other.at(0).unwrap();
    let reported = collection
        .add(vec![Item::from(&instance), raw(json!({"id": 6}))], None)
        .unwrap();
    assert_eq!(reported, vec![1], "only the raw hash is reported");
    assert_eq!(collection.len(), 2);
    assert_eq!(collection.at(0).unwrap(), instance);
}

#[test]
fn all_reporting_includes_record_instances() {
    let store = Store::new();
    let collection = Collection::new(
        &store,
        CollectionOptions::new(ModelType::new("thing")).add_reporting(AddReporting::All),
    )
    .unwrap();
    let other = Collection::new(
        &store,
        CollectionOptions::new(ModelType::new("thing")).data(json!([{"id": 5}])),
    )
    .unwrap();
    let reported = collection
        .add(vec![Item::from(other.at(0).unwrap()), raw(json!({"id": 6}))], None)
        .unwrap();
    assert_eq!(reported, vec![0, 1]);
}

#[test]
fn slots_materialize_lazily_unless_eager() {
    let (_store, lazy) = setup(json!([{"id": 1}, {"id": 2}]));
    assert!(lazy.slots().iter().all(|slot| !slot.is_materialized()));
    let first = lazy.at(0).unwrap();
    assert_eq!(lazy.at(0).unwrap(), first, "materialized once");
    assert!(lazy.slots()[0].is_materialized());
    assert!(!lazy.slots()[1].is_materialized());
    assert!(lazy.at(2).is_none());

    let store = Store::new();
    let eager = Collection::new(
        &store,
        CollectionOptions::new(ModelType::new("thing"))
            .eager(true)
            .data(json!([{"id": 1}, {"id": 2}])),
    )
    .unwrap();
    assert!(eager.slots().iter().all(|slot| slot.is_materialized()));
}

#[test]
fn remove_reports_pre_removal_indices() {
    let (_store, collection) = setup(json!([{"id": 1}, {"id": 2}, {"id": 3}, {"id": 4}]));
    let removes = record_events(&collection, EventKind::Remove);
    let records = collection.records();
    let (a, b, c, d) = (&records[0], &records[1], &records[2], &records[3]);
    let removed = collection.remove([d, b]);
    assert_eq!(removed.len(), 2);
    assert_eq!(removed.get(&1), Some(b));
    assert_eq!(removed.get(&3), Some(d));
    assert_eq!(collection.records(), vec![a.clone(), c.clone()]);
    assert_eq!(collection.len(), 2);
    let removes = removes.lock();
    assert!(matches!(&removes[0], Event::Remove { records } if records == &removed));
}

#[test]
fn removing_unknown_records_is_silent() {
    let (store, collection) = setup(json!([{"id": 1}]));
    let other = Collection::new(
        &store,
        CollectionOptions::new(ModelType::new("thing")).data(json!([{"id": 1}])),
    )
    .unwrap();
    let removes = record_events(&collection, EventKind::Remove);
    let lengths = count_length_changes(&collection);
    let stranger = other.at(0).unwrap();
    assert!(collection.remove([&stranger]).is_empty());
    assert!(removes.lock().is_empty());
    assert_eq!(lengths.load(Ordering::SeqCst), 0);
}

#[test]
fn removed_records_are_no_longer_forwarded() {
    let (_store, collection) = setup(json!([{"id": 1, "v": 1}]));
    let changes = record_events(&collection, EventKind::RecordChanged);
    let record = collection.at(0).unwrap();
    record.set_path("v", json!(2));
    assert_eq!(changes.lock().len(), 1);
    collection.remove([&record]);
    record.set_path("v", json!(3));
    assert_eq!(changes.lock().len(), 1);
}

#[test]
fn destroyed_records_leave_the_collection() {
    let (_store, collection) = setup(json!([{"id": 1}, {"id": 2}, {"id": 3}]));
    let removes = record_events(&collection, EventKind::Remove);
    let doomed = collection.at(1).unwrap();
    doomed.destroy();
    assert_eq!(ids(&collection), vec![1, 3]);
    assert_eq!(removes.lock().len(), 1);
}

#[test]
fn remove_all_and_destroy_all() {
    let (_store, kept) = setup(json!([{"id": 1}, {"id": 2}]));
    let records = kept.records();
    let removed = kept.remove_all();
    assert_eq!(removed.len(), 2);
    assert!(kept.is_empty());
    assert!(records.iter().all(|record| !record.is_destroyed()));

    let (_store, doomed) = setup(json!([{"id": 1}, {"id": 2}, {"id": 3}]));
    let removes = record_events(&doomed, EventKind::Remove);
    let destroyed = doomed.destroy_all();
    assert_eq!(doomed.len(), 0);
    assert_eq!(destroyed.len(), 3);
    assert!(destroyed.iter().all(|record| record.is_destroyed()));
    assert_eq!(removes.lock().len(), 1, "one bulk removal, no re-entrant ones");
}

#[test]
fn a_record_held_twice_is_removed_from_both_slots() {
    let (_store, collection) = setup(json!([{"id": 1}, {"id": 2}]));
    let first = collection.at(0).unwrap();
    collection.push(first.clone()).unwrap();
    assert_eq!(collection.len(), 3);

    let removes = record_events(&collection, EventKind::Remove);
    let destroyed = collection.destroy_all();
    assert!(collection.is_empty());
    assert_eq!(destroyed.len(), 3);
    assert!(first.is_destroyed());
    let removes = removes.lock();
    assert_eq!(removes.len(), 1, "no re-entrant removal for the second slot");
    assert!(matches!(&removes[0], Event::Remove { records } if records.len() == 3));
}
