use std::collections::BTreeMap;
use std::fmt;

use crate::collection::Slot;
use crate::model::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Add,
    Remove,
    Reset,
    Filter,
    Destroy,
    Change,
    RecordChanged,
}

/// Notifications dispatched through the store's listener bus.
///
/// Collections emit `Add`, `Remove`, `Reset`, `Filter`, `Destroy` and
/// `RecordChanged`; records emit `Change` and `RecordDestroyed`.
#[derive(Debug, Clone)]
pub enum Event {
    Add { records: Vec<usize> },
    Remove { records: BTreeMap<usize, Record> },
    Reset { records: Vec<Slot> },
    Filter { name: String },
    Destroy,
    Change { record: Record },
    RecordDestroyed { record: Record },
    RecordChanged { record: Record },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Add { .. } => EventKind::Add,
            Event::Remove { .. } => EventKind::Remove,
            Event::Reset { .. } => EventKind::Reset,
            Event::Filter { .. } => EventKind::Filter,
            Event::Destroy | Event::RecordDestroyed { .. } => EventKind::Destroy,
            Event::Change { .. } => EventKind::Change,
            Event::RecordChanged { .. } => EventKind::RecordChanged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub(crate) u64);

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            EventKind::Add => "add",
            EventKind::Remove => "remove",
            EventKind::Reset => "reset",
            EventKind::Filter => "filter",
            EventKind::Destroy => "destroy",
            EventKind::Change => "change",
            EventKind::RecordChanged => "record_changed",
        };
        write!(f, "{}", name)
    }
}
