//! Keepsake – ordered, lazily materialized record collections.
//!
//! A [`collection::Collection`] is a sequence of *slots*. Each slot holds
//! either a raw attribute hash or the [`model::Record`] it was turned into
//! the first time it was read. On top of that sequence sit:
//! * an add engine that splices whole batches at a clamped index,
//! * a remove engine that removes by record identity and reports the
//!   indices records held before removal,
//! * a merge reconciler that matches incoming items on the model's primary
//!   key or merge keys and updates in place, appending what did not match,
//! * a filter overlay that swaps in the output of a named predicate and
//!   keeps the full sequence in an undo buffer until it is restored,
//! * a fetch orchestrator that populates the collection from a
//!   [`fetch::Source`] on the ambient tokio runtime.
//!
//! ## Modules
//! * [`model`] – Ids, model types, attribute paths and records.
//! * [`store`] – The shared [`store::Store`]: id generation, model and
//!   collection registries, listener and observer buses, record factory.
//! * [`event`] – Events dispatched through the listener bus.
//! * [`collection`] – Slots, the engines and the collection lifecycle.
//! * [`filter`] – Named predicates and the overlay state machine.
//! * [`fetch`] – Sources, fetch options and strategies.
//! * [`settings`] – Collection defaults read through the `config` crate.
//!
//! ## Notifications
//! Dispatch is synchronous. Collections emit `add`, `remove`, `reset`,
//! `filter`, `destroy` and `record_changed` events, and publish `length`,
//! `filtered` and `activeFilter` property changes to observers. While a
//! filter predicate runs, the collection is silenced.
//!
//! ## Quick Start
//! ```
//! use keepsake::{Collection, CollectionOptions, FilterResult, Item, ModelType, Store};
//! use serde_json::json;
//!
//! let store = Store::new();
//! let (model, _) = store.register_model(ModelType::new("fruit"));
//! let fruit = Collection::new(
//!     &store,
//!     CollectionOptions::new(model)
//!         .data(json!([
//!             {"id": 1, "name": "apple"},
//!             {"id": 2, "name": "kiwi"},
//!             {"id": 3, "name": "banana"}
//!         ]))
//!         .filter("short", |c: &Collection| {
//!             let short = c.filter(|r| {
//!                 r.get("name").and_then(|n| n.as_str().map(str::len)) < Some(5)
//!             });
//!             FilterResult::from(short)
//!         }),
//! )
//! .unwrap();
//! let pear = json!({"id": 1, "name": "pear"});
//! fruit.merge([Item::from_value(pear).unwrap()]).unwrap();
//! assert!(fruit.apply_filter("short"));
//! assert_eq!(fruit.len(), 2);
//! fruit.reset();
//! assert_eq!(fruit.len(), 3);
//! assert_eq!(fruit.at(0).unwrap().get("name"), Some(json!("pear")));
//! ```

pub mod collection;
pub mod error;
pub mod event;
pub mod fetch;
pub mod filter;
pub mod model;
pub mod settings;
pub mod store;

pub use collection::{AddReporting, Collection, CollectionOptions, Item, Merged, Slot};
pub use error::{KeepsakeError, Result};
pub use event::{Event, EventKind, ListenerId, ObserverId};
pub use fetch::{FetchOptions, JsonFileSource, Source, Strategy};
pub use filter::{FilterFn, FilterResult};
pub use model::{Attributes, ModelRef, ModelType, ObjectId, Record};
pub use settings::Settings;
pub use store::Store;
