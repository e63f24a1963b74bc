use keepsake::{
    AddReporting, Collection, CollectionOptions, Item, KeepsakeError, ModelType, Settings, Store,
    Strategy,
};
use serde_json::json;

fn write_settings(name: &str, contents: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("keepsake-{}-{}.toml", name, std::process::id()));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn settings_file_seeds_collection_options() {
    let path = write_settings(
        "seeded",
        r#"
eager = true
add_reporting = "all"
strategy = "merge"
filter_props = ["minimum"]
"#,
    );
    let settings = Settings::load(Some(path.as_path())).expect("settings load");
    std::fs::remove_file(&path).unwrap();
    assert!(settings.eager);
    assert_eq!(settings.add_reporting, AddReporting::All);
    assert_eq!(settings.strategy, Strategy::Merge);
    assert_eq!(settings.filter_props, vec!["minimum".to_owned()]);

    let store = Store::new();
    let options = CollectionOptions::from_settings(ModelType::new("thing"), &settings);
    assert_eq!(options.strategy, Strategy::Merge);
    let collection = Collection::new(&store, options.data(json!([{"id": 1}]))).unwrap();
    assert!(collection.slots()[0].is_materialized(), "eager from settings");
    let other = Collection::new(
        &store,
        CollectionOptions::new(ModelType::new("thing")).data(json!([{"id": 2}])),
    )
    .unwrap();
    let reported = collection.add([Item::from(other.at(0).unwrap())], None).unwrap();
    assert_eq!(reported, vec![1], "all indices reported");
}

#[test]
fn missing_settings_file_is_an_error() {
    let path = std::env::temp_dir().join("keepsake-does-not-exist.toml");
    assert!(matches!(Settings::load(Some(path.as_path())), Err(KeepsakeError::Config(_))));
}

#[test]
fn bad_values_are_config_errors() {
    let path = write_settings("bad", "strategy = \"sideways\"\n");
    let loaded = Settings::load(Some(path.as_path()));
    std::fs::remove_file(&path).unwrap();
    assert!(matches!(loaded, Err(KeepsakeError::Config(_))));
}
