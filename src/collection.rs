use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::error::{KeepsakeError, Result};
use crate::event::{Event, EventKind, ListenerId, ObserverId};
use crate::fetch::{Source, Strategy};
use crate::filter::FilterFn;
use crate::model::{
    Attributes, IdHasher, ModelRef, ModelType, ObjectId, Record, RecordProps, get_path, set_path,
};
use crate::settings::Settings;
use crate::store::{ListenerFn, ObserverFn, Store};

/// Turns a raw payload into the items a collection holds.
pub type ParseFn = Arc<dyn Fn(Value) -> Vec<Item> + Send + Sync>;

// Collection-level properties that are derived from state and cannot be set.
const DERIVED_PROPS: [&str; 3] = ["length", "filtered", "destroyed"];

// ------------- Slot -------------

/// One position in a collection: either a raw attribute hash waiting to be
/// materialized, or the record it was materialized into.
#[derive(Debug, Clone)]
pub enum Slot {
    Raw(Attributes),
    Record(Record),
}

impl Slot {
    pub fn record(&self) -> Option<&Record> {
        match self {
            Slot::Record(record) => Some(record),
            Slot::Raw(_) => None,
        }
    }
    pub fn is_materialized(&self) -> bool {
        matches!(self, Slot::Record(_))
    }
    /// Reads a value without materializing the slot.
    pub fn value(&self, path: &str) -> Option<Value> {
        match self {
            Slot::Raw(attributes) => get_path(attributes, path).cloned(),
            Slot::Record(record) => record.get(path),
        }
    }
    pub fn raw(&self) -> Attributes {
        match self {
            Slot::Raw(attributes) => attributes.clone(),
            Slot::Record(record) => record.raw(),
        }
    }
}

/// Input accepted by `add`, `merge` and `reset_with`.
#[derive(Debug, Clone)]
pub enum Item {
    Raw(Attributes),
    Record(Record),
}

impl Item {
    /// Object values become raw items; anything else is not a record.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(attributes) => Some(Item::Raw(attributes)),
            _ => None,
        }
    }
    pub fn attributes(&self) -> Attributes {
        match self {
            Item::Raw(attributes) => attributes.clone(),
            Item::Record(record) => record.raw(),
        }
    }
}
impl From<Attributes> for Item {
    fn from(attributes: Attributes) -> Self {
        Item::Raw(attributes)
    }
}
impl From<Record> for Item {
    fn from(record: Record) -> Self {
        Item::Record(record)
    }
}
impl From<&Record> for Item {
    fn from(record: &Record) -> Self {
        Item::Record(record.clone())
    }
}
impl From<Item> for Slot {
    fn from(item: Item) -> Self {
        match item {
            Item::Raw(attributes) => Slot::Raw(attributes),
            Item::Record(record) => Slot::Record(record),
        }
    }
}

/// Accepts an array of objects or a single object; other entries are ignored.
pub fn default_parse(payload: Value) -> Vec<Item> {
    match payload {
        Value::Array(values) => values.into_iter().filter_map(Item::from_value).collect(),
        value => Item::from_value(value).into_iter().collect(),
    }
}

// ------------- Options -------------

/// Which inserted indices an `add` event reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddReporting {
    /// Only entries that arrived as raw hashes; record instances passed in
    /// directly are inserted but left out of the index set.
    #[default]
    RawOnly,
    /// Every inserted index.
    All,
}

#[derive(Clone)]
pub struct CollectionOptions {
    pub name: String,
    pub model: ModelRef,
    pub data: Option<Value>,
    pub eager: bool,
    pub add_reporting: AddReporting,
    pub filters: HashMap<String, FilterFn>,
    pub filter_props: Vec<String>,
    pub active_filter: Option<String>,
    pub parse: Option<ParseFn>,
    pub source: Option<Arc<dyn Source>>,
    pub strategy: Strategy,
    pub props: Attributes,
}

impl CollectionOptions {
    pub fn new(model: impl Into<ModelRef>) -> Self {
        Self {
            name: String::from("collection"),
            model: model.into(),
            data: None,
            eager: false,
            add_reporting: AddReporting::default(),
            filters: HashMap::new(),
            filter_props: Vec::new(),
            active_filter: None,
            parse: None,
            source: None,
            strategy: Strategy::default(),
            props: Attributes::new(),
        }
    }
    pub fn from_settings(model: impl Into<ModelRef>, settings: &Settings) -> Self {
        Self {
            eager: settings.eager,
            add_reporting: settings.add_reporting,
            strategy: settings.strategy,
            filter_props: settings.filter_props.clone(),
            ..Self::new(model)
        }
    }
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
    pub fn eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }
    pub fn add_reporting(mut self, add_reporting: AddReporting) -> Self {
        self.add_reporting = add_reporting;
        self
    }
    pub fn filter<F>(mut self, name: impl Into<String>, filter: F) -> Self
    where
        F: Fn(&Collection) -> crate::filter::FilterResult + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(filter));
        self
    }
    pub fn filter_props<I, S>(mut self, props: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter_props = props.into_iter().map(Into::into).collect();
        self
    }
    pub fn active_filter(mut self, name: impl Into<String>) -> Self {
        self.active_filter = Some(name.into());
        self
    }
    pub fn parse<F>(mut self, parse: F) -> Self
    where
        F: Fn(Value) -> Vec<Item> + Send + Sync + 'static,
    {
        self.parse = Some(Arc::new(parse));
        self
    }
    pub fn source(mut self, source: Arc<dyn Source>) -> Self {
        self.source = Some(source);
        self
    }
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }
    pub fn prop(mut self, path: &str, value: Value) -> Self {
        set_path(&mut self.props, path, value);
        self
    }
}

// ------------- Collection -------------

pub(crate) struct State {
    pub(crate) slots: Vec<Slot>,
    pub(crate) length: usize,
    pub(crate) filtered: bool,
    pub(crate) filtering: bool,
    pub(crate) silenced: bool,
    pub(crate) undo: Option<Vec<Slot>>,
    pub(crate) active_filter: Option<String>,
    pub(crate) bulk_destroy: bool,
    pub(crate) destroyed: bool,
    pub(crate) props: Attributes,
    // change and destroy listeners per bound record
    bindings: HashMap<ObjectId, (ListenerId, ListenerId), IdHasher>,
    observers: Vec<ObserverId>,
}

impl State {
    fn holds(&self, id: ObjectId) -> bool {
        let held = |slots: &[Slot]| {
            slots
                .iter()
                .any(|slot| slot.record().is_some_and(|record| record.id() == id))
        };
        held(&self.slots) || self.undo.as_deref().is_some_and(held)
    }
}

pub(crate) struct Inner {
    pub(crate) id: ObjectId,
    pub(crate) name: String,
    pub(crate) model: Arc<ModelType>,
    pub(crate) eager: bool,
    pub(crate) add_reporting: AddReporting,
    pub(crate) filters: HashMap<String, FilterFn>,
    pub(crate) parse: ParseFn,
    pub(crate) source: Option<Arc<dyn Source>>,
    pub(crate) strategy: Strategy,
    pub(crate) store: Mutex<Option<Store>>,
    pub(crate) state: Mutex<State>,
}

/// An ordered, lazily materialized sequence of records of one model type.
///
/// Handles are cheap to clone and all refer to the same collection. Slots
/// hold raw attribute hashes until they are first read through [`Collection::at`],
/// at which point the store's factory turns them into owned records.
#[derive(Clone)]
pub struct Collection {
    pub(crate) inner: Arc<Inner>,
}

/// Outcome of a merge: indices updated in place and indices appended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Merged {
    pub updated: Vec<usize>,
    pub added: Vec<usize>,
}

impl Collection {
    pub fn new(store: &Store, options: CollectionOptions) -> Result<Self> {
        let model = store.resolve_model(&options.model)?;
        let id = store.generate_id();
        let parse = options
            .parse
            .unwrap_or_else(|| Arc::new(default_parse) as ParseFn);
        let collection = Self {
            inner: Arc::new(Inner {
                id,
                name: options.name,
                model,
                eager: options.eager,
                add_reporting: options.add_reporting,
                filters: options.filters,
                parse,
                source: options.source,
                strategy: options.strategy,
                store: Mutex::new(Some(store.clone())),
                state: Mutex::new(State {
                    slots: Vec::new(),
                    length: 0,
                    filtered: false,
                    filtering: false,
                    silenced: false,
                    undo: None,
                    active_filter: None,
                    bulk_destroy: false,
                    destroyed: false,
                    props: options.props,
                    bindings: HashMap::default(),
                    observers: Vec::new(),
                }),
            }),
        };
        store.add_collection(id, &collection.inner.name);
        collection.observe_filter_props(store, &options.filter_props);
        if let Some(data) = options.data {
            let items = collection.parse(data);
            collection.add(items, None)?;
        }
        if let Some(name) = options.active_filter {
            collection.set_active_filter(Some(&name));
        }
        info!(
            collection = id,
            name = %collection.inner.name,
            model = collection.inner.model.name(),
            length = collection.len(),
            "collection created"
        );
        Ok(collection)
    }

    fn observe_filter_props(&self, store: &Store, props: &[String]) {
        let mut observers = Vec::with_capacity(props.len());
        for prop in props {
            let weak = Arc::downgrade(&self.inner);
            let callback: ObserverFn = Arc::new(move |_: ObjectId, _: &str| {
                if let Some(collection) = Collection::upgrade(&weak) {
                    collection.refilter();
                }
            });
            observers.push(store.add_observer(self.inner.id, prop, callback));
        }
        self.inner.state.lock().observers.extend(observers);
    }

    pub(crate) fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }
    pub fn name(&self) -> &str {
        &self.inner.name
    }
    pub fn model(&self) -> &Arc<ModelType> {
        &self.inner.model
    }
    pub fn store(&self) -> Option<Store> {
        self.inner.store.lock().clone()
    }
    pub fn len(&self) -> usize {
        self.inner.state.lock().length
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }
    /// Runs a payload through the collection's parse hook.
    pub fn parse(&self, payload: Value) -> Vec<Item> {
        (self.inner.parse)(payload)
    }
    /// A copy of the visible slots, without materializing anything.
    pub fn slots(&self) -> Vec<Slot> {
        self.inner.state.lock().slots.clone()
    }

    // ------------- notifications -------------

    pub(crate) fn finish(&self, previous_length: usize, event: Option<Event>) {
        let (silenced, length) = {
            let state = self.inner.state.lock();
            (state.silenced, state.length)
        };
        if silenced {
            return;
        }
        let Some(store) = self.store() else {
            return;
        };
        if length != previous_length {
            store.notify_observers(self.inner.id, "length");
        }
        if let Some(event) = event {
            store.trigger_event(self.inner.id, &event);
        }
    }

    pub(crate) fn publish(&self, prop: &str) {
        if self.inner.state.lock().silenced {
            return;
        }
        if let Some(store) = self.store() {
            store.notify_observers(self.inner.id, prop);
        }
    }

    pub fn add_listener<F>(&self, kind: EventKind, callback: F) -> Result<ListenerId>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let store = self.store().ok_or(KeepsakeError::Destroyed)?;
        Ok(store.add_listener(self.inner.id, kind, Arc::new(callback)))
    }
    pub fn remove_listener(&self, listener: ListenerId) -> bool {
        self.store()
            .is_some_and(|store| store.remove_listener(listener))
    }
    pub fn add_observer<F>(&self, prop: &str, callback: F) -> Result<ObserverId>
    where
        F: Fn(ObjectId, &str) + Send + Sync + 'static,
    {
        let store = self.store().ok_or(KeepsakeError::Destroyed)?;
        Ok(store.add_observer(self.inner.id, prop, Arc::new(callback)))
    }
    pub fn remove_observer(&self, observer: ObserverId) -> bool {
        self.store()
            .is_some_and(|store| store.remove_observer(observer))
    }

    // ------------- record bindings -------------

    pub(crate) fn bind(&self, store: &Store, state: &mut State, record: &Record) {
        if state.bindings.contains_key(&record.id()) {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let on_change: ListenerFn = Arc::new(move |event: &Event| {
            if let (Some(collection), Event::Change { record }) = (Collection::upgrade(&weak), event) {
                collection.record_changed(record);
            }
        });
        let weak = Arc::downgrade(&self.inner);
        let on_destroy: ListenerFn = Arc::new(move |event: &Event| {
            if let (Some(collection), Event::RecordDestroyed { record }) =
                (Collection::upgrade(&weak), event)
            {
                collection.record_destroyed(record);
            }
        });
        let change = store.add_listener(record.id(), EventKind::Change, on_change);
        let destroy = store.add_listener(record.id(), EventKind::Destroy, on_destroy);
        state.bindings.insert(record.id(), (change, destroy));
    }

    // Unbinds a record once no slot (visible or buffered) holds it any more.
    pub(crate) fn release(&self, store: &Store, state: &mut State, record: &Record) {
        if state.holds(record.id()) {
            return;
        }
        if let Some((change, destroy)) = state.bindings.remove(&record.id()) {
            store.remove_listener(change);
            store.remove_listener(destroy);
        }
    }

    pub(crate) fn release_stale(&self, store: &Store, state: &mut State) {
        let stale: Vec<ObjectId> = state
            .bindings
            .keys()
            .copied()
            .filter(|id| !state.holds(*id))
            .collect();
        for id in stale {
            if let Some((change, destroy)) = state.bindings.remove(&id) {
                store.remove_listener(change);
                store.remove_listener(destroy);
            }
        }
    }

    fn record_changed(&self, record: &Record) {
        trace!(collection = self.inner.id, record = record.id(), "record changed");
        self.finish(
            self.len(),
            Some(Event::RecordChanged {
                record: record.clone(),
            }),
        );
    }

    fn record_destroyed(&self, record: &Record) {
        if self.inner.state.lock().bulk_destroy {
            return;
        }
        debug!(collection = self.inner.id, record = record.id(), "removing destroyed record");
        self.remove([record]);
    }

    // ------------- lazy resolver -------------

    /// The record at `index`, materialized in place on first access.
    pub fn at(&self, index: usize) -> Option<Record> {
        let store = self.store()?;
        let mut state = self.inner.state.lock();
        let attributes = match state.slots.get(index)? {
            Slot::Record(record) => return Some(record.clone()),
            Slot::Raw(attributes) => attributes.clone(),
        };
        let record = store.create_record(
            &self.inner.model,
            attributes,
            RecordProps::owned_by(self.inner.id),
        );
        self.bind(&store, &mut state, &record);
        state.slots[index] = Slot::Record(record.clone());
        trace!(collection = self.inner.id, index, record = record.id(), "slot materialized");
        Some(record)
    }

    pub fn map<T>(&self, mut f: impl FnMut(&Record) -> T) -> Vec<T> {
        let mut mapped = Vec::with_capacity(self.len());
        let mut index = 0;
        while let Some(record) = self.at(index) {
            mapped.push(f(&record));
            index += 1;
        }
        mapped
    }

    pub fn filter(&self, mut predicate: impl FnMut(&Record) -> bool) -> Vec<Record> {
        let mut kept = Vec::new();
        let mut index = 0;
        while let Some(record) = self.at(index) {
            if predicate(&record) {
                kept.push(record);
            }
            index += 1;
        }
        kept
    }

    pub fn index_of(&self, record: &Record, offset: usize) -> Option<usize> {
        let mut index = offset;
        while let Some(candidate) = self.at(index) {
            if candidate == *record {
                return Some(index);
            }
            index += 1;
        }
        None
    }

    pub fn records(&self) -> Vec<Record> {
        self.map(Record::clone)
    }

    pub fn raw(&self) -> Vec<Attributes> {
        self.map(Record::raw)
    }

    /// Stable serialization of [`Collection::raw`].
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.raw())?)
    }

    // ------------- collection-level properties -------------

    pub fn get(&self, path: &str) -> Option<Value> {
        let state = self.inner.state.lock();
        match path {
            "length" => Some(Value::from(state.length)),
            "filtered" => Some(Value::Bool(state.filtered)),
            "destroyed" => Some(Value::Bool(state.destroyed)),
            "activeFilter" => state.active_filter.clone().map(Value::String),
            _ => get_path(&state.props, path).cloned(),
        }
    }

    pub fn set(&self, path: &str, value: Value) -> bool {
        if path == "activeFilter" {
            let previous = self.active_filter();
            self.set_active_filter(value.as_str());
            return self.active_filter() != previous;
        }
        if DERIVED_PROPS.contains(&path) {
            warn!(collection = self.inner.id, path, "ignoring write to a derived property");
            return false;
        }
        let changed = set_path(&mut self.inner.state.lock().props, path, value);
        if changed {
            self.publish(path);
        }
        changed
    }

    // ------------- add engine -------------

    pub(crate) fn ensure_unfiltered(&self) {
        if self.is_filtered() {
            debug!(collection = self.inner.id, "restoring unfiltered view before mutation");
            self.reset();
        }
    }

    /// Inserts a batch at `index` (clamped to `[0, len]`, appending by default)
    /// and returns the reported index set.
    pub fn add<T: Into<Item>>(
        &self,
        items: impl IntoIterator<Item = T>,
        index: Option<usize>,
    ) -> Result<Vec<usize>> {
        self.ensure_unfiltered();
        let items: Vec<Item> = items.into_iter().map(Into::into).collect();
        for item in &items {
            if let Item::Record(record) = item {
                if record.is_destroyed() {
                    return Err(KeepsakeError::InvalidRecordState {
                        id: record.id(),
                        reason: String::from("cannot add a destroyed record"),
                    });
                }
            }
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let store = self.store().ok_or(KeepsakeError::Destroyed)?;
        let (previous, reported) = {
            let mut state = self.inner.state.lock();
            let previous = state.length;
            let position = index.map_or(state.slots.len(), |i| i.min(state.slots.len()));
            let mut reported = Vec::with_capacity(items.len());
            let mut batch = Vec::with_capacity(items.len());
            for (offset, item) in items.into_iter().enumerate() {
                match item {
                    Item::Record(record) => {
                        if self.inner.add_reporting == AddReporting::All {
                            reported.push(position + offset);
                        }
                        self.bind(&store, &mut state, &record);
                        batch.push(Slot::Record(record));
                    }
                    Item::Raw(attributes) if self.inner.eager => {
                        reported.push(position + offset);
                        let record = store.create_record(
                            &self.inner.model,
                            attributes,
                            RecordProps::owned_by(self.inner.id),
                        );
                        self.bind(&store, &mut state, &record);
                        batch.push(Slot::Record(record));
                    }
                    Item::Raw(attributes) => {
                        reported.push(position + offset);
                        batch.push(Slot::Raw(attributes));
                    }
                }
            }
            let inserted = batch.len();
            state.slots.splice(position..position, batch);
            state.length = state.slots.len();
            debug!(collection = self.inner.id, position, inserted, length = state.length, "added");
            (previous, reported)
        };
        self.finish(
            previous,
            Some(Event::Add {
                records: reported.clone(),
            }),
        );
        Ok(reported)
    }

    pub fn push(&self, item: impl Into<Item>) -> Result<Vec<usize>> {
        self.add([item.into()], None)
    }

    // ------------- remove engine -------------

    /// Removes the given records by identity and returns them keyed by the
    /// index each one held before removal. Unknown records are ignored.
    pub fn remove<R: Borrow<Record>>(
        &self,
        records: impl IntoIterator<Item = R>,
    ) -> BTreeMap<usize, Record> {
        self.ensure_unfiltered();
        let Some(store) = self.store() else {
            return BTreeMap::new();
        };
        let mut found: HashMap<usize, Record> = HashMap::new();
        // ascending and duplicate-free by construction
        let mut order: Vec<usize> = Vec::new();
        for record in records {
            let record = record.borrow();
            // a record held in several slots resolves to its next unclaimed one
            let mut offset = 0;
            let index = loop {
                match self.index_of(record, offset) {
                    Some(index) if found.contains_key(&index) => offset = index + 1,
                    other => break other,
                }
            };
            let Some(index) = index else {
                continue;
            };
            match (order.first(), order.last()) {
                (Some(&min), _) if index < min => order.insert(0, index),
                (_, Some(&max)) if index > max => order.push(index),
                (None, None) => order.push(index),
                _ => {
                    let position = order.partition_point(|&i| i < index);
                    order.insert(position, index);
                }
            }
            found.insert(index, record.clone());
        }
        if order.is_empty() {
            return BTreeMap::new();
        }
        let previous = {
            let mut state = self.inner.state.lock();
            let previous = state.length;
            for &index in order.iter().rev() {
                if index < state.slots.len() {
                    trace!(collection = self.inner.id, index, "removing slot");
                    state.slots.remove(index);
                }
            }
            state.length = state.slots.len();
            for record in found.values() {
                self.release(&store, &mut state, record);
            }
            debug!(collection = self.inner.id, removed = order.len(), length = state.length, "removed");
            previous
        };
        let removed: BTreeMap<usize, Record> = order
            .into_iter()
            .filter_map(|index| found.remove(&index).map(|record| (index, record)))
            .collect();
        self.finish(
            previous,
            Some(Event::Remove {
                records: removed.clone(),
            }),
        );
        removed
    }

    /// Removes everything in the current (possibly filtered) view.
    pub fn remove_all(&self) -> BTreeMap<usize, Record> {
        let records = self.records();
        self.remove(records)
    }

    /// Removes everything, then destroys each removed record.
    ///
    /// Removal releases the bindings first, so the bulk flag only stops
    /// destroy notifications from records whose bindings are still live.
    pub fn destroy_all(&self) -> Vec<Record> {
        self.inner.state.lock().bulk_destroy = true;
        let removed: Vec<Record> = self.remove_all().into_values().collect();
        for record in &removed {
            record.destroy();
        }
        self.inner.state.lock().bulk_destroy = false;
        debug!(collection = self.inner.id, destroyed = removed.len(), "destroyed all records");
        removed
    }

    // ------------- merge reconciler -------------

    /// Updates matching slots in place and appends the rest in one batch.
    pub fn merge<T: Into<Item>>(&self, items: impl IntoIterator<Item = T>) -> Result<Merged> {
        self.ensure_unfiltered();
        let items: Vec<Item> = items.into_iter().map(Into::into).collect();
        if items.is_empty() {
            return Ok(Merged::default());
        }
        let model = Arc::clone(&self.inner.model);
        let mut merged = Merged::default();
        let mut unmatched = Vec::new();
        let mut updates: Vec<(Record, Attributes)> = Vec::new();
        {
            let mut state = self.inner.state.lock();
            let mut pool: Vec<usize> = (0..state.slots.len()).collect();
            for item in items {
                let incoming = item.attributes();
                let matched = pool
                    .iter()
                    .position(|&index| merge_match(&model, &incoming, &state.slots[index]));
                let Some(position) = matched else {
                    unmatched.push(item);
                    continue;
                };
                let index = pool.remove(position);
                merged.updated.push(index);
                match &mut state.slots[index] {
                    Slot::Record(record) => updates.push((record.clone(), incoming)),
                    Slot::Raw(attributes) => attributes.extend(incoming),
                }
            }
        }
        // setters run unlocked since they notify listeners synchronously
        for (record, attributes) in updates {
            record.set(attributes);
        }
        if !unmatched.is_empty() {
            merged.added = self.add(unmatched, None)?;
        }
        debug!(
            collection = self.inner.id,
            updated = merged.updated.len(),
            added = merged.added.len(),
            "merged"
        );
        Ok(merged)
    }

    // ------------- lifecycle -------------

    /// Destroys the collection and every record it created.
    pub fn destroy(&self) {
        self.teardown(false);
    }

    /// Destroys the collection but detaches, rather than destroys, the
    /// records it created.
    pub fn destroy_preserving(&self) {
        self.teardown(true);
    }

    fn teardown(&self, preserve: bool) {
        let Some(store) = self.store() else {
            return;
        };
        if self.is_filtered() {
            self.reset();
        }
        let removed = self.remove_all();
        let mut owned = 0;
        for record in removed.values() {
            if !record.is_owned_by(self.inner.id) {
                continue;
            }
            owned += 1;
            if preserve {
                record.detach();
            } else {
                record.destroy();
            }
        }
        let observers = {
            let mut state = self.inner.state.lock();
            state.destroyed = true;
            std::mem::take(&mut state.observers)
        };
        store.trigger_event(self.inner.id, &Event::Destroy);
        for observer in observers {
            store.remove_observer(observer);
        }
        store.remove_collection(self.inner.id);
        store.retire(self.inner.id);
        *self.inner.store.lock() = None;
        info!(collection = self.inner.id, owned, preserve, "collection destroyed");
    }
}

// Matching rule for merge: the primary key alone when no merge keys are
// declared, otherwise every merge key must agree.
fn merge_match(model: &ModelType, incoming: &Attributes, candidate: &Slot) -> bool {
    if model.merge_keys().is_empty() {
        match get_path(incoming, model.primary_key()) {
            Some(key) if !key.is_null() => candidate.value(model.primary_key()).as_ref() == Some(key),
            _ => false,
        }
    } else {
        model
            .merge_keys()
            .iter()
            .all(|key| get_path(incoming, key) == candidate.value(key).as_ref())
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Collection")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("model", &self.inner.model.name())
            .field("length", &state.length)
            .field("filtered", &state.filtered)
            .field("active_filter", &state.active_filter)
            .finish()
    }
}
