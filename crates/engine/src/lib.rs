//! Document storage built on the quill KV layer.
//!
//! Two access paths share one environment: the [`RecordStore`] keeps each
//! collection's documents under monotonically assigned 32-bit record ids,
//! and the [`IndexAccessMethod`] keeps each secondary index as a database
//! mapping encoded index keys to record locators. The [`Catalog`] owns
//! the environment reference, assigns collection numbers, and picks the
//! storage backend per entry.
//!
//! All operations take the caller's transaction explicitly; nothing here
//! begins or commits transactions on its own.

#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    rustdoc::all
)]
#![deny(unused_must_use, rust_2018_idioms)]

mod bulk;
pub use bulk::{BulkBuilder, MAX_DUPS_TO_DROP};

mod catalog;
pub use catalog::{
    CappedOptions, Catalog, CollectionEntry, CollectionOptions, EngineKind, IndexDescriptor,
    IndexEntry, KeyGenerator,
};

mod error;
pub use error::{Error, Result};

mod index;
pub use index::{IndexAccessMethod, InsertDeleteOptions, UpdateTicket};

mod index_cursor;
pub use index_cursor::{Direction, IndexCursor};

mod record_store;
pub use record_store::{Record, RecordStore};

mod sorter;
pub use sorter::{ExternalSorter, MemSorter};
