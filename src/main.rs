//! Loads a JSON array of records from disk into a collection, applies a
//! filter over it and prints both views.
//!
//! Usage: `keepsake <data.json> [settings.toml]`
//!
//! Records with an `active` attribute set to `false` are hidden by the
//! `active` filter. Logging follows `KEEPSAKE_LOG` (or `RUST_LOG`), falling
//! back to the `log_filter` setting.
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use keepsake::{Collection, CollectionOptions, FetchOptions, FilterResult, JsonFileSource, ModelType, Settings, Store};
use serde_json::Value;
use tracing::{info, warn};

fn setup_tracing(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("KEEPSAKE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn active(collection: &Collection) -> FilterResult {
    FilterResult::from(collection.filter(|record| record.get("active") != Some(Value::Bool(false))))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let Some(data) = args.next().map(PathBuf::from) else {
        eprintln!("usage: keepsake <data.json> [settings.toml]");
        std::process::exit(2);
    };
    let settings = Settings::load(args.next().map(PathBuf::from).as_deref())?;
    setup_tracing(&settings.log_filter);

    let store = Store::new();
    // does the same model get kept twice? it should not
    let (model, _) = store.register_model(ModelType::new("item"));
    let (_, previously_kept) = store.register_model(ModelType::new("item"));
    info!(model = model.name(), previously_kept, "model registered");

    let items = Collection::new(
        &store,
        CollectionOptions::from_settings("item", &settings)
            .named("items")
            .source(Arc::new(JsonFileSource::new(&data)))
            .filter("active", active),
    )?;
    let settled = items.fetch(FetchOptions::new().on_fail(|_, _, payload| {
        warn!(%payload, "could not load records");
    }))?;
    settled.await?;

    println!("all ({}):", items.len());
    println!("{}", items.to_json()?);
    if items.apply_filter("active") {
        println!("active ({}):", items.len());
        println!("{}", items.to_json()?);
    }
    items.destroy();
    info!(collections = store.collection_count(), "done");
    Ok(())
}
