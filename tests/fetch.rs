use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use keepsake::fetch::SourceFuture;
use keepsake::{
    Collection, CollectionOptions, FetchOptions, FilterResult, Item, JsonFileSource, KeepsakeError,
    ModelType, Source, Store, Strategy,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

fn serving(payload: Value) -> Arc<dyn Source> {
    Arc::new(move |_: Collection, _: FetchOptions| -> SourceFuture {
        let payload = payload.clone();
        Box::pin(async move { Ok::<Value, Value>(payload) })
    })
}

fn failing(payload: Value) -> Arc<dyn Source> {
    Arc::new(move |_: Collection, _: FetchOptions| -> SourceFuture {
        let payload = payload.clone();
        Box::pin(async move { Err::<Value, Value>(payload) })
    })
}

fn setup(data: Value, source: Arc<dyn Source>) -> Collection {
    let store = Store::new();
    Collection::new(
        &store,
        CollectionOptions::new(ModelType::new("thing"))
            .data(data)
            .source(source)
            .filter("first", |c: &Collection| FilterResult::records(c.at(0))),
    )
    .unwrap()
}

fn ids(collection: &Collection) -> Vec<i64> {
    collection.map(|record| record.get("id").and_then(|id| id.as_i64()).unwrap_or(-1))
}

#[tokio::test]
async fn fetched_records_are_added_by_default() {
    let collection = setup(json!([{"id": 1}]), serving(json!([{"id": 2}, {"id": 3}])));
    collection.fetch(FetchOptions::new()).unwrap().await.unwrap();
    assert_eq!(ids(&collection), vec![1, 2, 3]);
}

#[tokio::test]
async fn merge_strategy_reconciles() {
    let collection = setup(
        json!([{"id": 1, "v": "a"}]),
        serving(json!([{"id": 1, "v": "z"}, {"id": 2, "v": "b"}])),
    );
    collection
        .fetch(FetchOptions::new().strategy(Strategy::Merge))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(collection.len(), 2);
    assert_eq!(collection.at(0).unwrap().get("v"), Some(json!("z")));
}

#[tokio::test]
async fn collection_strategy_is_the_fallback() {
    let store = Store::new();
    let collection = Collection::new(
        &store,
        CollectionOptions::new(ModelType::new("thing"))
            .data(json!([{"id": 1, "v": "a"}]))
            .source(serving(json!([{"id": 1, "v": "z"}])))
            .strategy(Strategy::Merge),
    )
    .unwrap();
    collection.fetch(FetchOptions::new()).unwrap().await.unwrap();
    assert_eq!(collection.len(), 1);
    assert_eq!(collection.at(0).unwrap().get("v"), Some(json!("z")));
}

#[tokio::test]
async fn replace_clears_before_the_request_settles() {
    let collection = setup(json!([{"id": 1}, {"id": 2}]), serving(json!([{"id": 3}])));
    let old = collection.records();
    let settled = collection.fetch_and_replace(FetchOptions::new()).unwrap();
    assert_eq!(collection.len(), 0, "cleared in the caller's turn");
    assert!(old.iter().all(|record| !record.is_destroyed()));
    settled.await.unwrap();
    assert_eq!(ids(&collection), vec![3]);
}

#[tokio::test]
async fn destroy_clears_and_destroys_before_the_request_settles() {
    let collection = setup(json!([{"id": 1}, {"id": 2}]), serving(json!([{"id": 3}])));
    let old = collection.records();
    let settled = collection.fetch_and_destroy(FetchOptions::new()).unwrap();
    assert_eq!(collection.len(), 0);
    assert!(old.iter().all(|record| record.is_destroyed()));
    settled.await.unwrap();
    assert_eq!(ids(&collection), vec![3]);
}

#[tokio::test]
async fn failures_reach_on_fail_only() {
    let collection = setup(json!([{"id": 1}]), failing(json!({"status": 500})));
    let failed = Arc::new(Mutex::new(None));
    let succeeded = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&failed);
    let counter = Arc::clone(&succeeded);
    let options = FetchOptions::new()
        .replace()
        .on_fail(move |_, _, payload| *sink.lock() = Some(payload.clone()))
        .on_success(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    collection.fetch(options).unwrap().await.unwrap();
    assert_eq!(*failed.lock(), Some(json!({"status": 500})));
    assert_eq!(succeeded.load(Ordering::SeqCst), 0);
    assert_eq!(collection.len(), 0, "only the pre-flight clearing happened");
}

#[tokio::test]
async fn on_success_runs_after_the_strategy() {
    let collection = setup(json!([]), serving(json!([{"id": 1}, {"id": 2}])));
    let seen = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&seen);
    let options = FetchOptions::new()
        .param("page", json!(2))
        .on_success(move |collection, options, payload| {
            assert_eq!(options.params.get("page"), Some(&json!(2)));
            assert!(payload.is_array());
            sink.store(collection.len(), Ordering::SeqCst);
        });
    collection.fetch(options).unwrap().await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn fetching_restores_a_filtered_view() {
    let collection = setup(json!([{"id": 1}, {"id": 2}]), serving(json!([{"id": 3}])));
    assert!(collection.apply_filter("first"));
    let settled = collection.fetch(FetchOptions::new()).unwrap();
    assert!(!collection.is_filtered());
    assert_eq!(collection.len(), 2);
    settled.await.unwrap();
    assert_eq!(ids(&collection), vec![1, 2, 3]);
}

#[tokio::test]
async fn missing_source_is_reported() {
    let store = Store::new();
    let collection = Collection::new(&store, CollectionOptions::new(ModelType::new("thing"))).unwrap();
    assert!(matches!(
        collection.fetch(FetchOptions::new()),
        Err(KeepsakeError::NoSource)
    ));
}

#[test]
fn missing_runtime_is_reported_before_any_clearing() {
    let collection = setup(json!([{"id": 1}]), serving(json!([])));
    assert!(matches!(
        collection.fetch_and_replace(FetchOptions::new()),
        Err(KeepsakeError::NoRuntime)
    ));
    assert_eq!(collection.len(), 1);
}

#[tokio::test]
async fn json_file_source_reads_from_disk() {
    let path = std::env::temp_dir().join(format!("keepsake-fetch-{}.json", std::process::id()));
    std::fs::write(&path, r#"[{"id": 1, "name": "a"}, {"id": 2, "name": "b"}]"#).unwrap();
    let collection = setup(json!([]), Arc::new(JsonFileSource::new(&path)));
    collection.fetch(FetchOptions::new()).unwrap().await.unwrap();
    assert_eq!(ids(&collection), vec![1, 2]);
    std::fs::remove_file(&path).unwrap();

    let failed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failed);
    let options = FetchOptions::new()
        .param("path", json!(path.display().to_string()))
        .on_fail(move |_, _, payload| {
            assert!(payload.get("error").is_some());
            counter.fetch_add(1, Ordering::SeqCst);
        });
    collection.fetch(options).unwrap().await.unwrap();
    assert_eq!(failed.load(Ordering::SeqCst), 1);
    assert_eq!(collection.len(), 2);
}

#[tokio::test]
async fn the_source_is_asked_after_fetch_returns() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let source: Arc<dyn Source> = Arc::new(move |_: Collection, _: FetchOptions| -> SourceFuture {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok::<Value, Value>(json!([{"id": 2}])) })
    });
    let collection = setup(json!([{"id": 1}]), source);
    let settled = collection.fetch(FetchOptions::new()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0, "not asked in the caller's turn");
    settled.await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(ids(&collection), vec![1, 2]);
}

#[tokio::test]
async fn payloads_the_strategy_rejects_reach_on_fail() {
    let store = Store::new();
    let other = Collection::new(
        &store,
        CollectionOptions::new(ModelType::new("thing")).data(json!([{"id": 9}])),
    )
    .unwrap();
    let gone = other.at(0).unwrap();
    gone.destroy();
    let collection = Collection::new(
        &store,
        CollectionOptions::new(ModelType::new("thing"))
            .source(serving(json!([{"id": 1}])))
            .parse(move |_: Value| vec![Item::from(&gone)]),
    )
    .unwrap();
    let failed = Arc::new(Mutex::new(None));
    let succeeded = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&failed);
    let counter = Arc::clone(&succeeded);
    let options = FetchOptions::new()
        .on_fail(move |_, _, payload| *sink.lock() = Some(payload.clone()))
        .on_success(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    collection.fetch(options).unwrap().await.unwrap();
    let failed = failed.lock().clone().expect("on_fail ran");
    assert!(failed.get("error").is_some());
    assert_eq!(failed.get("payload"), Some(&json!([{"id": 1}])));
    assert_eq!(succeeded.load(Ordering::SeqCst), 0);
    assert!(collection.is_empty());
}
