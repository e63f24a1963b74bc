use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::collection::Collection;
use crate::error::{KeepsakeError, Result};
use crate::model::{Attributes, set_path};

/// Settles with the success payload (`Ok`) or the failure payload (`Err`).
pub type SourceFuture = BoxFuture<'static, std::result::Result<Value, Value>>;

/// Continuation run once a fetch settles: `(collection, options, payload)`.
pub type FetchCallback = Arc<dyn Fn(&Collection, &FetchOptions, &Value) + Send + Sync>;

/// The transport a collection is populated from.
pub trait Source: Send + Sync {
    fn fetch(&self, collection: Collection, options: FetchOptions) -> SourceFuture;
}

impl<F> Source for F
where
    F: Fn(Collection, FetchOptions) -> SourceFuture + Send + Sync,
{
    fn fetch(&self, collection: Collection, options: FetchOptions) -> SourceFuture {
        self(collection, options)
    }
}

/// How fetched records enter the collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Add,
    Merge,
}

#[derive(Clone, Default)]
pub struct FetchOptions {
    pub replace: bool,
    pub destroy: bool,
    pub strategy: Option<Strategy>,
    pub params: Attributes,
    pub on_success: Option<FetchCallback>,
    pub on_fail: Option<FetchCallback>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn replace(mut self) -> Self {
        self.replace = true;
        self
    }
    pub fn destroy(mut self) -> Self {
        self.destroy = true;
        self
    }
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
    pub fn param(mut self, path: &str, value: Value) -> Self {
        set_path(&mut self.params, path, value);
        self
    }
    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Collection, &FetchOptions, &Value) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }
    pub fn on_fail<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Collection, &FetchOptions, &Value) + Send + Sync + 'static,
    {
        self.on_fail = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchOptions")
            .field("replace", &self.replace)
            .field("destroy", &self.destroy)
            .field("strategy", &self.strategy)
            .field("params", &self.params)
            .field("on_success", &self.on_success.is_some())
            .field("on_fail", &self.on_fail.is_some())
            .finish()
    }
}

// ------------- Fetch orchestration -------------
impl Collection {
    /// Requests data from the collection's source on the ambient tokio runtime.
    ///
    /// Everything that happens before the returned task is spawned happens in
    /// the caller's turn: restoring a filtered view and, if requested, clearing
    /// (`replace`) or clearing and destroying (`destroy`) the current records.
    /// The source itself is only asked from inside the spawned task.
    /// Misconfiguration is reported here; fetch failures only reach `on_fail`,
    /// as do payloads the strategy could not apply.
    pub fn fetch(&self, options: FetchOptions) -> Result<JoinHandle<()>> {
        let source = self.inner.source.clone().ok_or(KeepsakeError::NoSource)?;
        let runtime = Handle::try_current().map_err(|_| KeepsakeError::NoRuntime)?;
        if self.is_destroyed() {
            return Err(KeepsakeError::Destroyed);
        }
        self.ensure_unfiltered();
        if options.destroy {
            self.destroy_all();
        } else if options.replace {
            self.remove_all();
        }
        let strategy = options.strategy.unwrap_or(self.inner.strategy);
        debug!(
            collection = self.id(),
            ?strategy,
            replace = options.replace,
            destroy = options.destroy,
            "fetch scheduled"
        );
        let collection = self.clone();
        Ok(runtime.spawn(async move {
            let request = source.fetch(collection.clone(), options.clone());
            match request.await {
                Ok(payload) => collection.fetch_succeeded(strategy, &options, payload),
                Err(payload) => collection.fetch_failed(&options, payload),
            }
        }))
    }

    pub fn fetch_and_replace(&self, options: FetchOptions) -> Result<JoinHandle<()>> {
        self.fetch(options.replace())
    }

    pub fn fetch_and_destroy(&self, options: FetchOptions) -> Result<JoinHandle<()>> {
        self.fetch(options.destroy())
    }

    fn fetch_succeeded(&self, strategy: Strategy, options: &FetchOptions, payload: Value) {
        let items = self.parse(payload.clone());
        let received = items.len();
        let applied = match strategy {
            Strategy::Add => self.add(items, None).map(|_| ()),
            Strategy::Merge => self.merge(items).map(|_| ()),
        };
        if let Err(error) = applied {
            warn!(collection = self.id(), %error, "fetched records were not applied");
            self.fetch_failed(options, json!({"error": error.to_string(), "payload": payload}));
            return;
        }
        info!(collection = self.id(), received, length = self.len(), "fetch settled");
        if let Some(callback) = &options.on_success {
            callback(self, options, &payload);
        }
    }

    fn fetch_failed(&self, options: &FetchOptions, payload: Value) {
        warn!(collection = self.id(), %payload, "fetch failed");
        if let Some(callback) = &options.on_fail {
            callback(self, options, &payload);
        }
    }
}

// ------------- JSON file source -------------

/// Reads a JSON document from disk. A `path` entry in the fetch params
/// overrides the configured path.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Source for JsonFileSource {
    fn fetch(&self, _collection: Collection, options: FetchOptions) -> SourceFuture {
        let path = match options.params.get("path").and_then(Value::as_str) {
            Some(path) => PathBuf::from(path),
            None => self.path.clone(),
        };
        Box::pin(async move {
            let failure = |error: String| json!({"path": path.display().to_string(), "error": error});
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => serde_json::from_str::<Value>(&text).map_err(|error| failure(error.to_string())),
                Err(error) => Err(failure(error.to_string())),
            }
        })
    }
}
