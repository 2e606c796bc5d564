//! Catalog metadata: collection entries, index entries, backend choice.
//!
//! The catalog proper (name resolution, persistence of metadata) belongs
//! to the database layer above; this module keeps just the state the
//! storage adapters mutate through their operations, plus the wiring that
//! opens the per-collection and per-index KV databases.

use crate::error::{Error, Result};
use crate::index::IndexAccessMethod;
use crate::record_store::RecordStore;
use parking_lot::Mutex;
use quill_kv::{Database, DbFlags, Env, Transaction, WriteTxn};
use quill_types::{IndexKey, KeyOrdering};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

/// Extracts the set of index keys a document contributes.
///
/// The document model is external; documents pass through the engine as
/// opaque bytes and this trait is the only point that interprets them.
pub trait KeyGenerator: Send + Sync {
    /// The key set for `doc`. More than one key makes the index multikey.
    fn keys(&self, doc: &[u8]) -> BTreeSet<IndexKey>;
}

/// Size and count caps of a capped collection.
#[derive(Clone, Copy, Debug)]
pub struct CappedOptions {
    /// Maximum total document bytes.
    pub max_size: i64,
    /// Maximum number of documents.
    pub max_docs: i64,
}

/// Per-collection configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct CollectionOptions {
    /// Present for capped collections.
    pub capped: Option<CappedOptions>,
}

/// Catalog state for one collection.
///
/// Owns the statistics the record store maintains. Stats are plain
/// atomics: they are advisory counters, serialized in practice by the
/// single-writer rule of the environment.
#[derive(Debug)]
pub struct CollectionEntry {
    ns: String,
    dbnum: u32,
    options: CollectionOptions,
    data_size: AtomicI64,
    num_records: AtomicI64,
}

impl CollectionEntry {
    /// Creates an entry for `ns` with collection number `dbnum`.
    pub fn new(ns: impl Into<String>, dbnum: u32, options: CollectionOptions) -> Self {
        Self {
            ns: ns.into(),
            dbnum,
            options,
            data_size: AtomicI64::new(0),
            num_records: AtomicI64::new(0),
        }
    }

    /// The collection namespace.
    pub fn ns(&self) -> &str {
        &self.ns
    }

    /// The collection number, the `file` half of its record locators.
    pub fn dbnum(&self) -> u32 {
        self.dbnum
    }

    /// The collection options.
    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    /// Whether the collection is capped.
    pub fn is_capped(&self) -> bool {
        self.options.capped.is_some()
    }

    /// Total document bytes currently stored.
    pub fn data_size(&self) -> i64 {
        self.data_size.load(Ordering::Relaxed)
    }

    /// Number of documents currently stored.
    pub fn num_records(&self) -> i64 {
        self.num_records.load(Ordering::Relaxed)
    }

    /// Applies deltas to the stored stats.
    pub fn increment_stats(&self, data_size_delta: i64, num_records_delta: i64) {
        self.data_size.fetch_add(data_size_delta, Ordering::Relaxed);
        self.num_records.fetch_add(num_records_delta, Ordering::Relaxed);
    }
}

/// Immutable description of one index.
#[derive(Clone, Debug)]
pub struct IndexDescriptor {
    /// Namespace of the indexed collection.
    pub ns: String,
    /// Index name within the collection.
    pub name: String,
    /// Per-field directions baked into the key encoding.
    pub ordering: KeyOrdering,
    /// Whether the index enforces key uniqueness.
    pub unique: bool,
    /// Legacy build mode: on duplicates during a unique bulk build, drop
    /// the later documents instead of failing.
    pub drop_dups: bool,
}

impl IndexDescriptor {
    /// The index namespace used in messages and database naming.
    pub fn index_namespace(&self) -> String {
        format!("{}.${}", self.ns, self.name)
    }
}

/// Catalog state for one index: its descriptor, its key generator, and
/// the ready/multikey bits.
pub struct IndexEntry {
    descriptor: IndexDescriptor,
    key_gen: Arc<dyn KeyGenerator>,
    ready: AtomicBool,
    multikey: AtomicBool,
}

impl std::fmt::Debug for IndexEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexEntry")
            .field("descriptor", &self.descriptor)
            .field("ready", &self.ready)
            .field("multikey", &self.multikey)
            .finish_non_exhaustive()
    }
}

impl IndexEntry {
    /// Creates an entry. Indexes start ready; a background build clears
    /// the bit until it completes.
    pub fn new(descriptor: IndexDescriptor, key_gen: Arc<dyn KeyGenerator>) -> Self {
        Self { descriptor, key_gen, ready: AtomicBool::new(true), multikey: AtomicBool::new(false) }
    }

    /// The index descriptor.
    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    /// Extracts the key set for `doc`.
    pub fn keys(&self, doc: &[u8]) -> BTreeSet<IndexKey> {
        self.key_gen.keys(doc)
    }

    /// Whether the index build has completed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Marks the index ready or in-build.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// Whether any document has contributed more than one key.
    pub fn is_multikey(&self) -> bool {
        self.multikey.load(Ordering::Acquire)
    }

    /// Sets the multikey bit. Never cleared.
    pub fn set_multikey(&self) {
        self.multikey.store(true, Ordering::Release);
    }
}

/// Which storage engine backs an entry.
///
/// The classic paged B-tree and the KV path coexist in the database
/// above this crate; the catalog flag picks one per collection or index.
/// Only the KV path lives here.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EngineKind {
    /// The legacy paged B-tree, implemented elsewhere.
    Classic,
    /// The KV-backed path implemented by this crate.
    Kv,
}

/// Owner of the environment reference and the per-entry wiring.
#[derive(Debug)]
pub struct Catalog {
    env: Arc<Env>,
    kind: EngineKind,
    // Collection number 0 is reserved so the null locator stays unused.
    next_dbnum: AtomicU32,
    collections: Mutex<HashMap<String, Arc<CollectionEntry>>>,
}

impl Catalog {
    /// Creates a catalog over `env`, backing new entries with `kind`.
    pub fn new(env: Arc<Env>, kind: EngineKind) -> Self {
        Self {
            env,
            kind,
            next_dbnum: AtomicU32::new(1),
            collections: Mutex::new(HashMap::new()),
        }
    }

    /// The owned environment reference.
    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    /// KV database name for a collection's primary data.
    pub fn collection_db_name(ns: &str) -> String {
        format!("collection:{ns}")
    }

    /// KV database name for one index of a collection.
    pub fn index_db_name(descriptor: &IndexDescriptor) -> String {
        format!("index:{}:{}", descriptor.ns, descriptor.name)
    }

    fn require_kv(&self) -> Result<()> {
        match self.kind {
            EngineKind::Kv => Ok(()),
            EngineKind::Classic => {
                Err(Error::IllegalOperation("classic engine is not linked into this build"))
            }
        }
    }

    /// Creates the collection `ns` and its KV database.
    pub fn create_collection(
        &self,
        txn: &WriteTxn<'_>,
        ns: &str,
        options: CollectionOptions,
    ) -> Result<Arc<CollectionEntry>> {
        self.require_kv()?;
        let dbnum = self.next_dbnum.fetch_add(1, Ordering::Relaxed);
        Database::open(txn, &Self::collection_db_name(ns), DbFlags::CREATE | DbFlags::INTEGER_KEY)?;
        let entry = Arc::new(CollectionEntry::new(ns, dbnum, options));
        self.collections.lock().insert(ns.to_owned(), entry.clone());
        Ok(entry)
    }

    /// Looks up a known collection entry.
    pub fn collection(&self, ns: &str) -> Option<Arc<CollectionEntry>> {
        self.collections.lock().get(ns).cloned()
    }

    /// Opens the record store for an existing collection.
    pub fn record_store(
        &self,
        txn: &impl Transaction,
        entry: Arc<CollectionEntry>,
    ) -> Result<RecordStore> {
        self.require_kv()?;
        let db = Database::open(txn, &Self::collection_db_name(entry.ns()), DbFlags::INTEGER_KEY)?;
        RecordStore::open(txn, entry, db)
    }

    /// Creates the KV database for an index and returns its access
    /// method. Unique indexes forbid duplicates; non-unique indexes store
    /// each key's locators as fixed-size integer duplicates.
    pub fn create_index(
        &self,
        txn: &WriteTxn<'_>,
        entry: Arc<IndexEntry>,
    ) -> Result<IndexAccessMethod> {
        self.require_kv()?;
        let db = Database::open(
            txn,
            &Self::index_db_name(entry.descriptor()),
            index_db_flags(entry.descriptor()) | DbFlags::CREATE,
        )?;
        Ok(IndexAccessMethod::new(entry, db))
    }

    /// Opens the access method for an existing index.
    pub fn index_access(
        &self,
        txn: &impl Transaction,
        entry: Arc<IndexEntry>,
    ) -> Result<IndexAccessMethod> {
        self.require_kv()?;
        let db = Database::open(
            txn,
            &Self::index_db_name(entry.descriptor()),
            index_db_flags(entry.descriptor()),
        )?;
        Ok(IndexAccessMethod::new(entry, db))
    }
}

fn index_db_flags(descriptor: &IndexDescriptor) -> DbFlags {
    if descriptor.unique {
        DbFlags::empty()
    } else {
        DbFlags::DUP_SORT | DbFlags::DUP_FIXED | DbFlags::INTEGER_DUP
    }
}
