//! The KV-backed index access method.

use crate::bulk::{BulkBuilder, MAX_DUPS_TO_DROP};
use crate::catalog::IndexEntry;
use crate::error::{Error, Result};
use crate::index_cursor::{Direction, IndexCursor};
use crate::sorter::{ExternalSorter, MemSorter};
use quill_kv::{Cursor, Database, FromView, PutFlags, Transaction, TxnMode, WriteTxn};
use quill_types::{DiskLoc, IndexKey};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-call options for insert and remove.
#[derive(Clone, Copy, Debug, Default)]
pub struct InsertDeleteOptions {
    /// Permit keys that already exist under another document.
    pub dups_allowed: bool,
    /// Log keys that could not be unindexed instead of staying silent.
    pub log_if_error: bool,
}

/// Precomputed work for one document update, produced by
/// [`IndexAccessMethod::validate_update`] and consumed by
/// [`IndexAccessMethod::update`].
///
/// Tickets exist only for updates that passed validation; there is no
/// invalid state to check for.
#[derive(Debug)]
pub struct UpdateTicket {
    added: Vec<IndexKey>,
    removed: Vec<IndexKey>,
    loc: DiskLoc,
    dups_allowed: bool,
    old_key_count: usize,
}

/// Secondary-index maintenance over one KV database.
///
/// Keys are the index's encoded keys; values are record locators, stored
/// as sorted duplicates when the index is not unique.
#[derive(Debug)]
pub struct IndexAccessMethod {
    entry: Arc<IndexEntry>,
    db: Database,
    // Duplicate support follows uniqueness; the database was opened to
    // match.
    dups: bool,
}

/// Positions `cursor` on the exact (key, loc) pair, whether or not the
/// database supports duplicates. Returns false without repositioning
/// guarantees when the pair is absent.
pub(crate) fn seek_pair<M: TxnMode>(
    cursor: &mut Cursor<'_, M>,
    key: &IndexKey,
    loc: DiskLoc,
    dups: bool,
) -> Result<bool> {
    if dups {
        Ok(cursor.seek_both(key.as_bytes(), &loc.to_bytes())?.is_some())
    } else {
        match cursor.seek_key(key.as_bytes())? {
            Some((_, value)) => Ok(DiskLoc::from_view(value)? == loc),
            None => Ok(false),
        }
    }
}

impl IndexAccessMethod {
    pub(crate) fn new(entry: Arc<IndexEntry>, db: Database) -> Self {
        let dups = !entry.descriptor().unique;
        Self { entry, db, dups }
    }

    /// The catalog entry this method maintains.
    pub fn entry(&self) -> &Arc<IndexEntry> {
        &self.entry
    }

    fn put_flags(dups_allowed: bool) -> PutFlags {
        if dups_allowed {
            PutFlags::NO_DUP_DATA
        } else {
            PutFlags::NO_DUP_DATA | PutFlags::NO_OVERWRITE
        }
    }

    fn dup_key_error(&self, key: &IndexKey) -> Error {
        Error::DuplicateKey {
            key: key.clone(),
            namespace: self.entry.descriptor().index_namespace(),
        }
    }

    /// Indexes `doc` under every key it generates, all pointing at `loc`.
    ///
    /// On a duplicate key: while the index is still building in the
    /// background the collision is ignored; otherwise the keys already
    /// inserted for this document are removed again and the duplicate is
    /// reported. Returns the number of keys inserted.
    pub fn insert(
        &self,
        txn: &WriteTxn<'_>,
        doc: &[u8],
        loc: DiskLoc,
        options: InsertDeleteOptions,
    ) -> Result<u64> {
        let keys = self.entry.keys(doc);
        let flags = Self::put_flags(options.dups_allowed);
        let mut cursor = txn.cursor(self.db)?;
        let mut inserted = 0u64;

        for key in &keys {
            match cursor.put(key.as_bytes(), &loc.to_bytes(), flags) {
                Ok(()) => inserted += 1,
                Err(e) if e.is_key_exist() => {
                    if !self.entry.is_ready() {
                        // Collisions are expected while a background
                        // build races ahead of writers.
                        tracing::debug!(
                            target: "quill::index",
                            index = %self.entry.descriptor().index_namespace(),
                            ?key,
                            "key already in index during background build"
                        );
                        continue;
                    }
                    if options.dups_allowed {
                        return Err(Error::Internal(format!(
                            "index {} already maps {key:?} to {loc}",
                            self.entry.descriptor().index_namespace()
                        )));
                    }
                    self.unwind_partial_insert(&mut cursor, &keys, key, loc)?;
                    return Err(self.dup_key_error(key));
                }
                Err(e) => {
                    tracing::error!(
                        target: "quill::index",
                        index = %self.entry.descriptor().index_namespace(),
                        ?key,
                        error = %e,
                        "caught assertion while adding keys to index"
                    );
                    return Err(e.into());
                }
            }
        }

        if inserted > 1 {
            self.entry.set_multikey();
        }
        Ok(inserted)
    }

    // Removes the keys of `keys` before `failed` that were already
    // inserted for this document.
    fn unwind_partial_insert(
        &self,
        cursor: &mut Cursor<'_, quill_kv::Rw>,
        keys: &BTreeSet<IndexKey>,
        failed: &IndexKey,
        loc: DiskLoc,
    ) -> Result<()> {
        for key in keys {
            if key == failed {
                break;
            }
            if !seek_pair(cursor, key, loc, self.dups)? {
                return Err(Error::Internal(format!(
                    "cleanup after duplicate key lost ({key:?}, {loc}) in {}",
                    self.entry.descriptor().index_namespace()
                )));
            }
            cursor.del_current()?;
        }
        Ok(())
    }

    /// Unindexes `doc` at `loc`, returning the number of keys removed.
    pub fn remove(
        &self,
        txn: &WriteTxn<'_>,
        doc: &[u8],
        loc: DiskLoc,
        options: InsertDeleteOptions,
    ) -> Result<u64> {
        let keys = self.entry.keys(doc);
        if keys.is_empty() {
            return Ok(0);
        }

        let mut cursor = txn.cursor(self.db)?;
        let mut removed = 0u64;
        for key in &keys {
            if seek_pair(&mut cursor, key, loc, self.dups)? {
                cursor.del_current()?;
                removed += 1;
            } else if options.log_if_error {
                tracing::warn!(
                    target: "quill::index",
                    index = %self.entry.descriptor().index_namespace(),
                    ?key,
                    %loc,
                    "unindex failed (key too big?)"
                );
            }
        }
        Ok(removed)
    }

    /// Computes the key-set difference for updating a document in place
    /// and checks unique indexes for collisions among the keys to add.
    pub fn validate_update(
        &self,
        txn: &impl Transaction,
        from_doc: &[u8],
        to_doc: &[u8],
        loc: DiskLoc,
        options: InsertDeleteOptions,
    ) -> Result<UpdateTicket> {
        let from_keys = self.entry.keys(from_doc);
        let to_keys = self.entry.keys(to_doc);

        // Owned differences; nothing below aliases the inputs.
        let removed: Vec<IndexKey> = from_keys.difference(&to_keys).cloned().collect();
        let added: Vec<IndexKey> = to_keys.difference(&from_keys).cloned().collect();

        let check_for_dups =
            !added.is_empty() && self.entry.descriptor().unique && !options.dups_allowed;
        if check_for_dups {
            let mut cursor = txn.cursor(self.db)?;
            for key in &added {
                if cursor.seek(key.as_bytes())? {
                    return Err(self.dup_key_error(key));
                }
            }
        }

        Ok(UpdateTicket {
            added,
            removed,
            loc,
            dups_allowed: options.dups_allowed,
            old_key_count: from_keys.len(),
        })
    }

    /// Applies a validated update: inserts the added keys, then removes
    /// the dropped ones. Returns the number of keys added.
    pub fn update(&self, txn: &WriteTxn<'_>, ticket: UpdateTicket) -> Result<u64> {
        if ticket.old_key_count + ticket.added.len() - ticket.removed.len() > 1 {
            self.entry.set_multikey();
        }

        let flags = Self::put_flags(ticket.dups_allowed);
        let mut cursor = txn.cursor(self.db)?;

        for key in &ticket.added {
            match cursor.put(key.as_bytes(), &ticket.loc.to_bytes(), flags) {
                Ok(()) => {}
                Err(e) if e.is_key_exist() => return Err(self.dup_key_error(key)),
                Err(e) => return Err(e.into()),
            }
        }
        for key in &ticket.removed {
            if !seek_pair(&mut cursor, key, ticket.loc, self.dups)? {
                return Err(Error::Internal(format!(
                    "update lost pair ({key:?}, {}) in {}",
                    ticket.loc,
                    self.entry.descriptor().index_namespace()
                )));
            }
            cursor.del_current()?;
        }

        Ok(ticket.added.len() as u64)
    }

    /// Point lookup: the locator stored under `key`, if any. On a
    /// non-unique index this is the smallest locator.
    pub fn find_single(
        &self,
        txn: &impl Transaction,
        key: &IndexKey,
    ) -> Result<Option<DiskLoc>> {
        let mut cursor = txn.cursor(self.db)?;
        match cursor.seek_key(key.as_bytes())? {
            Some((_, value)) => Ok(Some(DiskLoc::from_view(value)?)),
            None => Ok(None),
        }
    }

    /// Touches the pages holding `doc`'s keys to warm the cache.
    pub fn touch(&self, txn: &impl Transaction, doc: &[u8]) -> Result<()> {
        let keys = self.entry.keys(doc);
        if keys.is_empty() {
            return Ok(());
        }
        let mut cursor = txn.cursor(self.db)?;
        for key in &keys {
            cursor.seek(key.as_bytes())?;
        }
        Ok(())
    }

    /// Walks every (key, locator) pair and returns the count.
    pub fn validate(&self, txn: &impl Transaction) -> Result<u64> {
        let mut cursor = txn.cursor(self.db)?;
        let mut count = 0u64;
        while cursor.next()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Opens an index cursor over this index.
    pub fn new_cursor<'t, T: Transaction>(
        &self,
        txn: &'t T,
        direction: Direction,
    ) -> Result<IndexCursor<'t, T>> {
        IndexCursor::new(txn, self.db, direction, self.dups)
    }

    /// Starts a bulk build with an in-memory sorter.
    ///
    /// Only valid while the index is empty.
    pub fn initiate_bulk(&self, txn: &impl Transaction) -> Result<BulkBuilder> {
        self.initiate_bulk_with(txn, MemSorter::new())
    }

    /// Starts a bulk build feeding `sorter`.
    pub fn initiate_bulk_with<S: ExternalSorter>(
        &self,
        txn: &impl Transaction,
        sorter: S,
    ) -> Result<BulkBuilder<S>> {
        if txn.db_stat(self.db)?.entries > 0 {
            return Err(Error::IllegalOperation("bulk build requires an empty index"));
        }
        Ok(BulkBuilder::new(self.entry.clone(), sorter))
    }

    /// Sorts the builder's pairs and streams them into the index.
    ///
    /// With the descriptor's dropDups mode, collisions under a unique
    /// index record the later locator into `dups_to_drop` (capped at
    /// [`MAX_DUPS_TO_DROP`]) and skip the pair; otherwise a collision is
    /// a duplicate-key failure. Polls `interrupt` between pairs and
    /// stops cleanly when it is raised. Returns the number of pairs
    /// written.
    pub fn commit_bulk<S: ExternalSorter>(
        &self,
        txn: &WriteTxn<'_>,
        builder: BulkBuilder<S>,
        mut dups_to_drop: Option<&mut BTreeSet<DiskLoc>>,
        interrupt: Option<&AtomicBool>,
    ) -> Result<u64> {
        if txn.db_stat(self.db)?.entries > 0 {
            return Err(Error::Internal(
                "trying to commit a bulk build, but the index has data already".into(),
            ));
        }

        let descriptor = self.entry.descriptor();
        let dups_allowed = !descriptor.unique;
        let drop_dups = descriptor.drop_dups;
        if drop_dups && dups_to_drop.is_none() {
            return Err(Error::Internal(
                "dropDups bulk build without a set to record dropped locators".into(),
            ));
        }

        if builder.is_multi() {
            builder.entry().set_multikey();
        }

        let sorted = {
            let mut sorter = builder.into_sorter();
            sorter.sort();
            sorter
        };

        tracing::debug!(
            target: "quill::index",
            index = %descriptor.index_namespace(),
            pairs = sorted.len(),
            "bulk build: streaming sorted keys"
        );

        let flags = Self::put_flags(dups_allowed);
        let mut cursor = txn.cursor(self.db)?;
        let mut last_key: Option<&IndexKey> = None;
        let mut written = 0u64;

        for (i, (key, loc)) in sorted.iter().enumerate() {
            if i % 128 == 0 {
                if let Some(interrupt) = interrupt {
                    if interrupt.load(Ordering::Relaxed) {
                        return Err(Error::Interrupted);
                    }
                }
            }

            let matches_last = last_key == Some(key);
            if matches_last && !dups_allowed {
                match (drop_dups, dups_to_drop.as_mut()) {
                    (true, Some(dups)) => {
                        // Dups are normally few, so they are kept in
                        // memory with a hard cap instead of spilled.
                        dups.insert(loc);
                        if dups.len() >= MAX_DUPS_TO_DROP {
                            return Err(Error::TooManyDuplicates(MAX_DUPS_TO_DROP));
                        }
                        continue;
                    }
                    _ => return Err(self.dup_key_error(key)),
                }
            }

            match cursor.put(key.as_bytes(), &loc.to_bytes(), flags) {
                Ok(()) => {}
                Err(e) if e.is_key_exist() => return Err(self.dup_key_error(key)),
                Err(e) => return Err(e.into()),
            }
            written += 1;
            last_key = Some(key);

            if written % 100_000 == 0 {
                tracing::debug!(
                    target: "quill::index",
                    index = %descriptor.index_namespace(),
                    written,
                    "bulk build progress"
                );
            }
        }

        tracing::debug!(
            target: "quill::index",
            index = %descriptor.index_namespace(),
            written,
            "bulk build: bottom layer done"
        );
        Ok(written)
    }
}
