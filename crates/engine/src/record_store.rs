//! Primary document storage, one KV database per collection.

use crate::catalog::CollectionEntry;
use crate::error::{Error, Result};
use quill_kv::{Database, FromView, PutFlags, ToView, Transaction, WriteTxn};
use quill_types::{DiskLoc, MAX_RECORD_ID};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A stored document, viewed in place.
///
/// The bytes live in the transaction's snapshot; copy them out before the
/// transaction ends or mutates.
#[derive(Clone, Copy, Debug)]
pub struct Record<'t> {
    bytes: &'t [u8],
}

impl<'t> Record<'t> {
    /// The serialized document bytes.
    pub fn data(&self) -> &'t [u8] {
        self.bytes
    }

    /// Stored length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the record is zero length.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Record storage for one collection.
///
/// Keys are 32-bit record ids assigned monotonically, so physical order
/// is insertion order: appends take the no-descent fast path and the
/// oldest record of a capped collection is always the first key.
#[derive(Debug)]
pub struct RecordStore {
    entry: Arc<CollectionEntry>,
    db: Database,
    next_id: AtomicU32,
}

// System namespaces carry a '$'; everything else gets id continuity
// across reopen.
fn is_normal(ns: &str) -> bool {
    !ns.contains('$')
}

impl RecordStore {
    /// Opens the store over `db`, resuming id assignment after the last
    /// stored record.
    pub fn open(
        txn: &impl Transaction,
        entry: Arc<CollectionEntry>,
        db: Database,
    ) -> Result<Self> {
        let next_id = if is_normal(entry.ns()) {
            let mut cursor = txn.cursor(db)?;
            match cursor.last()? {
                Some((key, _)) => u32::from_view(key)? + 1,
                None => 0,
            }
        } else {
            0
        };
        Ok(Self { entry, db, next_id: AtomicU32::new(next_id) })
    }

    /// The owning catalog entry.
    pub fn entry(&self) -> &Arc<CollectionEntry> {
        &self.entry
    }

    fn assign_id(&self) -> Result<u32> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if id > MAX_RECORD_ID {
            return Err(Error::Internal(format!(
                "record ids exhausted for collection {}",
                self.entry.ns()
            )));
        }
        Ok(id)
    }

    fn check_owns(&self, loc: DiskLoc) -> Result<()> {
        if loc.file != self.entry.dbnum() {
            return Err(Error::Internal(format!(
                "locator {loc} does not belong to collection {} (dbnum {})",
                self.entry.ns(),
                self.entry.dbnum()
            )));
        }
        Ok(())
    }

    /// Reads the document at `loc`.
    pub fn record_for<'t>(&self, txn: &'t impl Transaction, loc: DiskLoc) -> Result<Record<'t>> {
        self.check_owns(loc)?;
        match txn.get(self.db, &loc.id.to_view())? {
            Some(bytes) => Ok(Record { bytes }),
            None => Err(Error::Internal(format!(
                "no record at {loc} in collection {}",
                self.entry.ns()
            ))),
        }
    }

    /// Stores `data` as a new document and returns its locator.
    pub fn insert_record(&self, txn: &WriteTxn<'_>, data: &[u8]) -> Result<DiskLoc> {
        let id = self.assign_id()?;
        let mut cursor = txn.cursor(self.db)?;
        cursor.put(&id.to_view(), data, PutFlags::APPEND)?;
        drop(cursor);

        self.entry.increment_stats(data.len() as i64, 1);
        self.capped_post_insert(txn)?;

        Ok(DiskLoc::new(self.entry.dbnum(), id))
    }

    /// Reserves `size` bytes for a new document and hands the region to
    /// `write` for in-place fill, the path used by document writers that
    /// know their size up front.
    pub fn insert_record_with(
        &self,
        txn: &WriteTxn<'_>,
        size: usize,
        write: impl FnOnce(&mut [u8]),
    ) -> Result<DiskLoc> {
        let id = self.assign_id()?;
        let mut cursor = txn.cursor(self.db)?;
        let region = cursor.reserve(&id.to_view(), size, PutFlags::APPEND)?;
        debug_assert_eq!(region.len(), size);
        write(region);
        drop(cursor);

        self.entry.increment_stats(size as i64, 1);
        self.capped_post_insert(txn)?;

        Ok(DiskLoc::new(self.entry.dbnum(), id))
    }

    /// Deletes the document at `loc`.
    pub fn delete_record(&self, txn: &WriteTxn<'_>, loc: DiskLoc) -> Result<()> {
        self.check_owns(loc)?;
        let mut cursor = txn.cursor(self.db)?;
        let len = match cursor.seek_key(&loc.id.to_view())? {
            Some((_, value)) => value.len() as i64,
            None => {
                return Err(Error::Internal(format!(
                    "delete of missing record {loc} in collection {}",
                    self.entry.ns()
                )))
            }
        };
        cursor.del_current()?;
        self.entry.increment_stats(-len, -1);
        Ok(())
    }

    /// Removes every document, keeping the collection.
    pub fn truncate(&self, txn: &WriteTxn<'_>) -> Result<()> {
        txn.clear_db(self.db)?;
        Ok(())
    }

    /// Evicts oldest records until the collection is back under its caps.
    ///
    /// Runs after every insert on a capped collection. Each pass must
    /// find a record to evict; running dry means the caller is trying to
    /// evict what it just wrote, which upstream code must prevent.
    fn capped_post_insert(&self, txn: &WriteTxn<'_>) -> Result<()> {
        let Some(caps) = self.entry.options().capped else {
            return Ok(());
        };

        if self.entry.data_size() <= caps.max_size && self.entry.num_records() <= caps.max_docs {
            return Ok(()); // don't init the cursor
        }

        let mut cursor = txn.cursor(self.db)?;
        while self.entry.data_size() > caps.max_size || self.entry.num_records() > caps.max_docs {
            let len = match cursor.next()? {
                Some((_, value)) => value.len() as i64,
                None => {
                    return Err(Error::Internal(format!(
                        "capped eviction found no record in {}",
                        self.entry.ns()
                    )))
                }
            };
            self.entry.increment_stats(-len, -1);
            cursor.del_current()?;
        }
        Ok(())
    }
}
