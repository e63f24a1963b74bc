use std::collections::HashMap;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{KeepsakeError, Result};
use crate::event::{Event, EventKind, ListenerId, ObserverId};
use crate::model::{
    Attributes, IdGenerator, IdHasher, ModelKeeper, ModelRef, ModelType, ObjectId, Record,
    RecordProps,
};

pub type ListenerFn = Arc<dyn Fn(&Event) + Send + Sync>;
pub type ObserverFn = Arc<dyn Fn(ObjectId, &str) + Send + Sync>;

// ------------- Lookups -------------
// Like a multimap, but values stay in insertion order so that dispatch
// follows registration order.
#[derive(Debug)]
pub struct Lookup<K, V, H = RandomState> {
    index: HashMap<K, Vec<V>, H>,
}
impl<K: Eq + Hash, V, H: BuildHasher + Default> Lookup<K, V, H> {
    pub fn new() -> Self {
        Self {
            index: HashMap::<K, Vec<V>, H>::default(),
        }
    }
    pub fn insert(&mut self, key: K, value: V) {
        self.index.entry(key).or_default().push(value);
    }
    pub fn lookup(&self, key: &K) -> &[V] {
        self.index.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
    pub fn retain(&mut self, key: &K, keep: impl FnMut(&V) -> bool) {
        if let Some(values) = self.index.get_mut(key) {
            values.retain(keep);
            if values.is_empty() {
                self.index.remove(key);
            }
        }
    }
    pub fn remove(&mut self, key: &K) -> Vec<V> {
        self.index.remove(key).unwrap_or_default()
    }
}

impl<K: Eq + Hash, V, H: BuildHasher + Default> Default for Lookup<K, V, H> {
    fn default() -> Self {
        Self::new()
    }
}

// ------------- Buses -------------
struct Listener {
    id: u64,
    kind: EventKind,
    callback: ListenerFn,
}

struct Observer {
    id: u64,
    prop: String,
    callback: ObserverFn,
}

struct Bus<T> {
    by_target: Lookup<ObjectId, T, IdHasher>,
    targets: HashMap<u64, ObjectId, IdHasher>,
}
impl<T> Bus<T> {
    fn new() -> Self {
        Self {
            by_target: Lookup::new(),
            targets: HashMap::default(),
        }
    }
}

// ------------- Store -------------
struct StoreInner {
    // owns an id generator
    id_generator: Mutex<IdGenerator>,
    // owns a keeper for the registered models
    model_keeper: Mutex<ModelKeeper>,
    collections: Mutex<HashMap<ObjectId, String, IdHasher>>,
    listeners: Mutex<Bus<Listener>>,
    observers: Mutex<Bus<Observer>>,
}

/// Shared infrastructure for collections: ids, the model registry, the
/// collection registry, the listener and observer buses, and the record factory.
///
/// Dispatch is synchronous and never holds a lock while a callback runs, so
/// callbacks may register, remove or trigger further notifications.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                id_generator: Mutex::new(IdGenerator::new()),
                model_keeper: Mutex::new(ModelKeeper::new()),
                collections: Mutex::new(HashMap::default()),
                listeners: Mutex::new(Bus::new()),
                observers: Mutex::new(Bus::new()),
            }),
        }
    }
    pub(crate) fn generate_id(&self) -> ObjectId {
        self.inner.id_generator.lock().generate()
    }
    pub fn is_live(&self, id: ObjectId) -> bool {
        self.inner.id_generator.lock().is_live(id)
    }
    /// Retires an id and drops every listener and observer registered on it.
    pub fn retire(&self, id: ObjectId) {
        self.inner.id_generator.lock().retire(id);
        self.remove_target(id);
    }

    // functions for the model registry
    pub fn register_model(&self, model: ModelType) -> (Arc<ModelType>, bool) {
        self.inner.model_keeper.lock().keep(model)
    }
    pub fn model(&self, name: &str) -> Option<Arc<ModelType>> {
        self.inner.model_keeper.lock().get(name)
    }
    pub fn resolve_model(&self, model: &ModelRef) -> Result<Arc<ModelType>> {
        match model {
            ModelRef::Type(model) => Ok(Arc::clone(model)),
            ModelRef::Path(path) => self
                .model(path)
                .ok_or_else(|| KeepsakeError::UnknownModel(path.clone())),
        }
    }

    // functions for the collection registry
    pub fn add_collection(&self, id: ObjectId, name: &str) {
        self.inner.collections.lock().insert(id, name.to_owned());
        debug!(collection = id, name, "collection registered");
    }
    pub fn remove_collection(&self, id: ObjectId) -> bool {
        self.inner.collections.lock().remove(&id).is_some()
    }
    pub fn collection_name(&self, id: ObjectId) -> Option<String> {
        self.inner.collections.lock().get(&id).cloned()
    }
    pub fn collection_count(&self) -> usize {
        self.inner.collections.lock().len()
    }

    pub fn create_record(
        &self,
        model: &Arc<ModelType>,
        attributes: Attributes,
        props: RecordProps,
    ) -> Record {
        let id = self.generate_id();
        let attributes = model.parse(attributes);
        trace!(record = id, model = model.name(), owner = ?props.owner, "record created");
        Record::new(id, Arc::clone(model), attributes, props, self.clone())
    }

    // ------------- listeners -------------
    pub fn add_listener(&self, target: ObjectId, kind: EventKind, callback: ListenerFn) -> ListenerId {
        let id = self.generate_id();
        let mut bus = self.inner.listeners.lock();
        bus.by_target.insert(target, Listener { id, kind, callback });
        bus.targets.insert(id, target);
        ListenerId(id)
    }
    pub fn remove_listener(&self, listener: ListenerId) -> bool {
        let mut bus = self.inner.listeners.lock();
        match bus.targets.remove(&listener.0) {
            Some(target) => {
                bus.by_target.retain(&target, |l| l.id != listener.0);
                true
            }
            None => false,
        }
    }
    pub fn trigger_event(&self, target: ObjectId, event: &Event) {
        let kind = event.kind();
        let callbacks: Vec<ListenerFn> = self
            .inner
            .listeners
            .lock()
            .by_target
            .lookup(&target)
            .iter()
            .filter(|listener| listener.kind == kind)
            .map(|listener| Arc::clone(&listener.callback))
            .collect();
        trace!(on = target, %kind, listeners = callbacks.len(), "event");
        for callback in callbacks {
            callback(event);
        }
    }
    pub fn listener_count(&self, target: ObjectId) -> usize {
        self.inner.listeners.lock().by_target.lookup(&target).len()
    }

    // ------------- observers -------------
    pub fn add_observer(&self, target: ObjectId, prop: &str, callback: ObserverFn) -> ObserverId {
        let id = self.generate_id();
        let mut bus = self.inner.observers.lock();
        bus.by_target.insert(
            target,
            Observer {
                id,
                prop: prop.to_owned(),
                callback,
            },
        );
        bus.targets.insert(id, target);
        ObserverId(id)
    }
    pub fn remove_observer(&self, observer: ObserverId) -> bool {
        let mut bus = self.inner.observers.lock();
        match bus.targets.remove(&observer.0) {
            Some(target) => {
                bus.by_target.retain(&target, |o| o.id != observer.0);
                true
            }
            None => false,
        }
    }
    pub fn notify_observers(&self, target: ObjectId, prop: &str) {
        let callbacks: Vec<ObserverFn> = self
            .inner
            .observers
            .lock()
            .by_target
            .lookup(&target)
            .iter()
            .filter(|observer| observer.prop == prop)
            .map(|observer| Arc::clone(&observer.callback))
            .collect();
        for callback in callbacks {
            callback(target, prop);
        }
    }
    pub fn observer_count(&self, target: ObjectId) -> usize {
        self.inner.observers.lock().by_target.lookup(&target).len()
    }

    pub fn remove_target(&self, target: ObjectId) {
        {
            let mut bus = self.inner.listeners.lock();
            for listener in bus.by_target.remove(&target) {
                bus.targets.remove(&listener.id);
            }
        }
        let mut bus = self.inner.observers.lock();
        for observer in bus.by_target.remove(&target) {
            bus.targets.remove(&observer.id);
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
