//! Phase one of bulk index builds: key extraction into the sorter.
//!
//! The access method streams the sorted output into the index in
//! [`crate::IndexAccessMethod::commit_bulk`].

use crate::catalog::IndexEntry;
use crate::sorter::{ExternalSorter, MemSorter};
use quill_types::DiskLoc;
use std::sync::Arc;

/// Cap on locators recorded for dropped duplicates. Dups are normally
/// rare, so they are kept in memory with a limit rather than spilled.
pub const MAX_DUPS_TO_DROP: usize = 1_000_000;

/// Accumulates (key, locator) pairs for an index being built from
/// scratch.
pub struct BulkBuilder<S: ExternalSorter = MemSorter> {
    entry: Arc<IndexEntry>,
    sorter: S,
    keys_added: u64,
    docs_added: u64,
    multi: bool,
}

impl<S: ExternalSorter> std::fmt::Debug for BulkBuilder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkBuilder")
            .field("keys_added", &self.keys_added)
            .field("docs_added", &self.docs_added)
            .field("multi", &self.multi)
            .finish_non_exhaustive()
    }
}

impl<S: ExternalSorter> BulkBuilder<S> {
    pub(crate) fn new(entry: Arc<IndexEntry>, sorter: S) -> Self {
        Self { entry, sorter, keys_added: 0, docs_added: 0, multi: false }
    }

    /// Extracts `doc`'s keys and emits each (key, loc) pair into the
    /// sorter. Returns the number of keys emitted.
    pub fn insert(&mut self, doc: &[u8], loc: DiskLoc) -> u64 {
        let keys = self.entry.keys(doc);
        let n = keys.len() as u64;
        for key in keys {
            self.sorter.add(key, loc);
        }
        self.keys_added += n;
        self.docs_added += 1;
        self.multi |= n > 1;
        n
    }

    /// Keys emitted so far.
    pub fn keys_added(&self) -> u64 {
        self.keys_added
    }

    /// Documents fed so far.
    pub fn docs_added(&self) -> u64 {
        self.docs_added
    }

    pub(crate) fn is_multi(&self) -> bool {
        self.multi
    }

    pub(crate) fn entry(&self) -> &Arc<IndexEntry> {
        &self.entry
    }

    pub(crate) fn into_sorter(self) -> S {
        self.sorter
    }
}
