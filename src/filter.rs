use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::collection::{Collection, Item, Slot};
use crate::event::Event;
use crate::model::{Record, RecordProps};

/// A named predicate. It sees the full, unfiltered sequence through the
/// collection it is handed and reports what the visible sequence should be.
pub type FilterFn = Arc<dyn Fn(&Collection) -> FilterResult + Send + Sync>;

/// What a filter predicate did.
///
/// * `records: Some(..)` becomes the new visible sequence.
/// * `applied` with no records means the predicate already called
///   [`Collection::reset_with`] itself.
/// * Neither means nothing was filtered this cycle.
#[derive(Debug, Clone, Default)]
pub struct FilterResult {
    pub applied: bool,
    pub records: Option<Vec<Item>>,
}

impl FilterResult {
    pub fn records<T: Into<Item>>(records: impl IntoIterator<Item = T>) -> Self {
        Self {
            applied: true,
            records: Some(records.into_iter().map(Into::into).collect()),
        }
    }
    pub fn applied() -> Self {
        Self {
            applied: true,
            records: None,
        }
    }
    pub fn skipped() -> Self {
        Self::default()
    }
}

impl From<Vec<Record>> for FilterResult {
    fn from(records: Vec<Record>) -> Self {
        Self::records(records)
    }
}

// ------------- Filter overlay -------------
impl Collection {
    pub fn is_filtered(&self) -> bool {
        self.inner.state.lock().filtered
    }

    pub fn active_filter(&self) -> Option<String> {
        self.inner.state.lock().active_filter.clone()
    }

    /// Selects the named filter and runs it; `None` or an empty name clears
    /// the filter and restores the unfiltered sequence. Unknown names are ignored.
    pub fn set_active_filter(&self, name: Option<&str>) {
        let Some(name) = name.filter(|name| !name.is_empty()) else {
            self.clear_filter();
            return;
        };
        if !self.inner.filters.contains_key(name) {
            warn!(collection = self.id(), filter = name, "no such filter");
            return;
        }
        let (changed, filtered) = {
            let mut state = self.inner.state.lock();
            let changed = state.active_filter.as_deref() != Some(name);
            state.active_filter = Some(name.to_owned());
            (changed, state.filtered)
        };
        if changed {
            self.publish("activeFilter");
        }
        if changed || !filtered {
            self.run_filter(name);
        }
    }

    /// Makes `name` the active filter and runs it even if it already was.
    /// Returns whether the collection ended up filtered.
    pub fn apply_filter(&self, name: &str) -> bool {
        if !self.inner.filters.contains_key(name) {
            warn!(collection = self.id(), filter = name, "no such filter");
            return false;
        }
        let changed = {
            let mut state = self.inner.state.lock();
            let changed = state.active_filter.as_deref() != Some(name);
            state.active_filter = Some(name.to_owned());
            changed
        };
        if changed {
            self.publish("activeFilter");
        }
        self.run_filter(name);
        self.is_filtered()
    }

    pub fn clear_filter(&self) {
        let buffered = self.inner.state.lock().undo.is_some();
        if buffered {
            self.reset();
            return;
        }
        let cleared = self.inner.state.lock().active_filter.take().is_some();
        if cleared {
            self.publish("activeFilter");
        }
    }

    /// Reruns the active filter, if any, against the full sequence.
    pub fn refilter(&self) {
        let name = {
            let state = self.inner.state.lock();
            if state.filtering {
                return;
            }
            state.active_filter.clone()
        };
        if let Some(name) = name {
            self.run_filter(&name);
        }
    }

    fn run_filter(&self, name: &str) {
        let Some(predicate) = self.inner.filters.get(name).cloned() else {
            return;
        };
        let (previous_length, was_filtered) = {
            let mut state = self.inner.state.lock();
            if state.filtering || state.destroyed {
                trace!(collection = self.id(), filter = name, "filter already running");
                return;
            }
            state.filtering = true;
            state.silenced = true;
            let snapshot = (state.length, state.filtered);
            // the predicate always sees the full sequence
            if let Some(undo) = state.undo.take() {
                state.slots = undo;
                state.length = state.slots.len();
            }
            snapshot
        };
        debug!(collection = self.id(), filter = name, "filtering");
        let result = predicate(self);
        match result.records {
            Some(records) => self.reset_with(records),
            None if result.applied => {}
            None => {
                let mut state = self.inner.state.lock();
                if let Some(undo) = state.undo.take() {
                    state.slots = undo;
                    state.length = state.slots.len();
                }
            }
        }
        let (length, filtered) = {
            let mut state = self.inner.state.lock();
            state.filtering = false;
            state.silenced = false;
            state.filtered = state.undo.as_ref().is_some_and(|undo| !undo.is_empty());
            if let Some(store) = self.store() {
                self.release_stale(&store, &mut state);
            }
            (state.length, state.filtered)
        };
        debug!(collection = self.id(), filter = name, length, filtered, "filter applied");
        if filtered {
            if let Some(store) = self.store() {
                store.trigger_event(
                    self.id(),
                    &Event::Filter {
                        name: name.to_owned(),
                    },
                );
            }
        }
        if length != previous_length {
            self.publish("length");
        }
        if filtered != was_filtered {
            self.publish("filtered");
        }
    }

    /// Restores the unfiltered sequence from the undo buffer and emits one
    /// `reset` event. Outside a filtering cycle this also clears the active filter.
    pub fn reset(&self) {
        let Some(store) = self.store() else {
            return;
        };
        let (previous, was_filtered, cleared, slots) = {
            let mut state = self.inner.state.lock();
            let previous = state.length;
            if let Some(undo) = state.undo.take() {
                state.slots = undo;
            }
            state.length = state.slots.len();
            let was_filtered = std::mem::replace(&mut state.filtered, false);
            let cleared = !state.filtering && state.active_filter.take().is_some();
            self.release_stale(&store, &mut state);
            (previous, was_filtered, cleared, state.slots.clone())
        };
        debug!(collection = self.id(), length = slots.len(), "reset");
        self.finish(previous, Some(Event::Reset { records: slots }));
        if was_filtered {
            self.publish("filtered");
        }
        if cleared {
            self.publish("activeFilter");
        }
    }

    /// Replaces the visible sequence. On a collection that has filters (or
    /// while a filter is running) the first call since the last restore
    /// snapshots the full sequence so that [`Collection::reset`] can bring it back.
    ///
    /// Once a snapshot exists, raw items are matched against it by value and
    /// share the buffered slot, materializing it if needed, so a record read
    /// from the narrowed view is the one the restored sequence holds. While a
    /// filter runs, raw items with no buffered counterpart are dropped.
    pub fn reset_with<T: Into<Item>>(&self, items: impl IntoIterator<Item = T>) {
        let Some(store) = self.store() else {
            return;
        };
        let items: Vec<Item> = items.into_iter().map(Into::into).collect();
        let (previous, was_filtered, filtered, slots) = {
            let mut guard = self.inner.state.lock();
            let previous = guard.length;
            let was_filtered = guard.filtered;
            let capable = guard.filtering || !self.inner.filters.is_empty();
            if capable && guard.undo.is_none() {
                trace!(collection = self.id(), "snapshotting unfiltered sequence");
                guard.undo = Some(std::mem::take(&mut guard.slots));
            }
            let state = &mut *guard;
            let mut slots = Vec::with_capacity(items.len());
            match state.undo.as_mut() {
                Some(undo) => {
                    let mut pool: Vec<usize> = (0..undo.len()).collect();
                    for item in items {
                        match item {
                            Item::Record(record) => {
                                if let Some(position) = pool
                                    .iter()
                                    .position(|&index| undo[index].record() == Some(&record))
                                {
                                    pool.remove(position);
                                }
                                slots.push(Slot::Record(record));
                            }
                            Item::Raw(attributes) => {
                                let matched = pool
                                    .iter()
                                    .position(|&index| undo[index].raw() == attributes);
                                let Some(position) = matched else {
                                    if state.filtering {
                                        warn!(
                                            collection = self.id(),
                                            "dropping filtered item outside the collection"
                                        );
                                    } else {
                                        slots.push(Slot::Raw(attributes));
                                    }
                                    continue;
                                };
                                let index = pool.remove(position);
                                let record = match undo[index].record().cloned() {
                                    Some(record) => record,
                                    None => {
                                        let record = store.create_record(
                                            &self.inner.model,
                                            undo[index].raw(),
                                            RecordProps::owned_by(self.id()),
                                        );
                                        undo[index] = Slot::Record(record.clone());
                                        record
                                    }
                                };
                                slots.push(Slot::Record(record));
                            }
                        }
                    }
                }
                None => slots.extend(items.into_iter().map(Slot::from)),
            }
            state.slots = slots;
            state.length = state.slots.len();
            let records: Vec<Record> = state.slots.iter().filter_map(Slot::record).cloned().collect();
            for record in &records {
                self.bind(&store, state, record);
            }
            if !state.filtering {
                state.filtered = state.undo.as_ref().is_some_and(|undo| !undo.is_empty());
                self.release_stale(&store, state);
            }
            (previous, was_filtered, state.filtered, state.slots.clone())
        };
        self.finish(previous, Some(Event::Reset { records: slots }));
        if filtered != was_filtered {
            self.publish("filtered");
        }
    }
}
