use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{BuildHasherDefault, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use seahash::SeaHasher;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::event::Event;
use crate::store::Store;

/// A plain attribute hash, the unmaterialized form of a record.
pub type Attributes = Map<String, Value>;

// ------------- ObjectId -------------
pub type ObjectId = u64;

pub type IdHasher = BuildHasherDefault<SeaHasher>;

pub const GENESIS: ObjectId = 0;

#[derive(Debug)]
pub struct IdGenerator {
    lower_bound: ObjectId,
    live: HashSet<ObjectId, IdHasher>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            lower_bound: GENESIS,
            live: HashSet::<ObjectId, IdHasher>::default(),
        }
    }
    // Ids are never handed out twice, even after retirement, since stale
    // record handles keep comparing by id.
    pub fn generate(&mut self) -> ObjectId {
        self.lower_bound += 1;
        self.live.insert(self.lower_bound);
        self.lower_bound
    }
    pub fn retire(&mut self, id: ObjectId) -> bool {
        self.live.remove(&id)
    }
    pub fn is_live(&self, id: ObjectId) -> bool {
        self.live.contains(&id)
    }
    pub fn len(&self) -> usize {
        self.live.len()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ------------- Paths -------------

/// Reads a dot-separated path (`"address.city"`) out of nested attribute objects.
pub fn get_path<'a>(attributes: &'a Attributes, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = attributes.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Writes a dot-separated path, creating intermediate objects as needed.
/// Returns whether the stored value actually changed.
pub fn set_path(attributes: &mut Attributes, path: &str, value: Value) -> bool {
    let segments: Vec<&str> = path.split('.').collect();
    set_segments(attributes, &segments, value)
}

fn set_segments(attributes: &mut Attributes, segments: &[&str], value: Value) -> bool {
    match segments {
        [] => false,
        [last] => {
            if attributes.get(*last) == Some(&value) {
                false
            } else {
                attributes.insert((*last).to_owned(), value);
                true
            }
        }
        [head, rest @ ..] => {
            let entry = attributes
                .entry((*head).to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            match entry {
                Value::Object(nested) => set_segments(nested, rest, value),
                _ => false,
            }
        }
    }
}

// ------------- ModelType -------------
pub type ModelParseFn = fn(Attributes) -> Attributes;

#[derive(Debug, Clone, Eq)]
pub struct ModelType {
    name: String,
    primary_key: String,
    merge_keys: Vec<String>,
    parse: Option<ModelParseFn>,
}

impl ModelType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: String::from("id"),
            merge_keys: Vec::new(),
            parse: None,
        }
    }
    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }
    pub fn with_merge_keys<I, S>(mut self, merge_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.merge_keys = merge_keys.into_iter().map(Into::into).collect();
        self
    }
    pub fn with_parse(mut self, parse: ModelParseFn) -> Self {
        self.parse = Some(parse);
        self
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }
    pub fn merge_keys(&self) -> &[String] {
        &self.merge_keys
    }
    pub fn parse(&self, attributes: Attributes) -> Attributes {
        match self.parse {
            Some(parse) => parse(attributes),
            None => attributes,
        }
    }
}
impl PartialEq for ModelType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Hash for ModelType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// How a collection names the model it materializes: directly, or by a
/// lookup path resolved through the store's model registry.
#[derive(Debug, Clone)]
pub enum ModelRef {
    Type(Arc<ModelType>),
    Path(String),
}

impl ModelRef {
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }
}
impl From<ModelType> for ModelRef {
    fn from(model: ModelType) -> Self {
        Self::Type(Arc::new(model))
    }
}
impl From<Arc<ModelType>> for ModelRef {
    fn from(model: Arc<ModelType>) -> Self {
        Self::Type(model)
    }
}
impl From<&str> for ModelRef {
    fn from(path: &str) -> Self {
        Self::Path(path.to_owned())
    }
}

#[derive(Debug)]
pub struct ModelKeeper {
    kept: HashMap<String, Arc<ModelType>, IdHasher>,
}
impl ModelKeeper {
    pub fn new() -> Self {
        Self {
            kept: HashMap::default(),
        }
    }
    pub fn keep(&mut self, model: ModelType) -> (Arc<ModelType>, bool) {
        if let Some(kept) = self.kept.get(model.name()) {
            return (Arc::clone(kept), true);
        }
        let kept = Arc::new(model);
        self.kept.insert(kept.name().to_owned(), Arc::clone(&kept));
        (kept, false)
    }
    pub fn get(&self, name: &str) -> Option<Arc<ModelType>> {
        self.kept.get(name).map(Arc::clone)
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
}

impl Default for ModelKeeper {
    fn default() -> Self {
        Self::new()
    }
}

// ------------- Record -------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordProps {
    pub owner: Option<ObjectId>,
}

impl RecordProps {
    pub fn owned_by(owner: ObjectId) -> Self {
        Self { owner: Some(owner) }
    }
}

struct RecordInner {
    id: ObjectId,
    model: Arc<ModelType>,
    attributes: Mutex<Attributes>,
    owner: Mutex<Option<ObjectId>>,
    destroyed: AtomicBool,
    store: Store,
}

/// A materialized record. Handles are cheap to clone; two handles refer to
/// the same record iff their ids are equal.
#[derive(Clone)]
pub struct Record {
    inner: Arc<RecordInner>,
}

impl Record {
    pub(crate) fn new(
        id: ObjectId,
        model: Arc<ModelType>,
        attributes: Attributes,
        props: RecordProps,
        store: Store,
    ) -> Self {
        Self {
            inner: Arc::new(RecordInner {
                id,
                model,
                attributes: Mutex::new(attributes),
                owner: Mutex::new(props.owner),
                destroyed: AtomicBool::new(false),
                store,
            }),
        }
    }
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }
    pub fn model(&self) -> &Arc<ModelType> {
        &self.inner.model
    }
    pub fn get(&self, path: &str) -> Option<Value> {
        get_path(&self.inner.attributes.lock(), path).cloned()
    }
    /// Structured setter: shallow-merges `attributes` and emits a single
    /// `change` event when at least one value differs.
    pub fn set(&self, attributes: Attributes) -> bool {
        let changed = {
            let mut kept = self.inner.attributes.lock();
            let mut changed = false;
            for (key, value) in attributes {
                if kept.get(&key) != Some(&value) {
                    kept.insert(key, value);
                    changed = true;
                }
            }
            changed
        };
        if changed {
            self.changed();
        }
        changed
    }
    pub fn set_path(&self, path: &str, value: Value) -> bool {
        let changed = set_path(&mut self.inner.attributes.lock(), path, value);
        if changed {
            self.changed();
        }
        changed
    }
    fn changed(&self) {
        trace!(record = self.id(), "record changed");
        self.inner
            .store
            .trigger_event(self.id(), &Event::Change { record: self.clone() });
    }
    /// Plain-data snapshot of the current attributes.
    pub fn raw(&self) -> Attributes {
        self.inner.attributes.lock().clone()
    }
    pub fn parse(&self, data: Value) -> Attributes {
        match data {
            Value::Object(attributes) => self.inner.model.parse(attributes),
            _ => Attributes::new(),
        }
    }
    pub fn primary_key_value(&self) -> Option<Value> {
        self.get(self.inner.model.primary_key())
            .filter(|value| !value.is_null())
    }
    pub fn merge_key_values(&self) -> Vec<Option<Value>> {
        self.inner
            .model
            .merge_keys()
            .iter()
            .map(|key| self.get(key))
            .collect()
    }
    pub fn owner(&self) -> Option<ObjectId> {
        *self.inner.owner.lock()
    }
    pub fn is_owned_by(&self, owner: ObjectId) -> bool {
        self.owner() == Some(owner)
    }
    /// Ends ownership without destroying the record. There is no way back.
    pub fn detach(&self) {
        if let Some(owner) = self.inner.owner.lock().take() {
            debug!(record = self.id(), owner, "record detached");
        }
    }
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(record = self.id(), model = self.inner.model.name(), "record destroyed");
        self.inner.store.trigger_event(
            self.id(),
            &Event::RecordDestroyed {
                record: self.clone(),
            },
        );
        self.inner.store.retire(self.id());
    }
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}
impl Eq for Record {}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id())
            .field("model", &self.inner.model.name())
            .field("attributes", &*self.inner.attributes.lock())
            .finish()
    }
}
impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}#{}", self.inner.model.name(), self.id())
    }
}
