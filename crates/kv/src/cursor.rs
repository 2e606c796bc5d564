//! Cursors: positioned traversal of one database within a transaction.

use crate::codec::{slice_from_val, val_from_slice, val_out};
use crate::db::{Database, PutFlags};
use crate::error::{check, check_maybe, Result};
use crate::txn::{Rw, TxnMode};
use lmdb_sys as ffi;
use std::marker::PhantomData;
use std::os::raw::c_uint;
use std::ptr;

/// A key/value pair viewed straight out of the memory map.
pub type KeyVal<'a> = (&'a [u8], &'a [u8]);

/// A cursor over one database, bound to the transaction that opened it.
///
/// Every positioning operation returns `Ok(None)` once the walk runs off
/// either end; errors are reserved for real engine failures. Returned
/// views borrow the cursor and must be copied out before the next
/// mutating operation on the same transaction.
///
/// The mode parameter mirrors the owning transaction: mutation methods
/// exist only on `Cursor<'_, Rw>`.
pub struct Cursor<'txn, M: TxnMode> {
    raw: *mut ffi::MDB_cursor,
    _marker: PhantomData<(&'txn (), M)>,
}

impl<M: TxnMode> std::fmt::Debug for Cursor<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor").finish_non_exhaustive()
    }
}

impl<'txn, M: TxnMode> Cursor<'txn, M> {
    pub(crate) fn open(txn: *mut ffi::MDB_txn, db: Database) -> Result<Self> {
        let mut raw: *mut ffi::MDB_cursor = ptr::null_mut();
        check(unsafe { ffi::mdb_cursor_open(txn, db.dbi(), &mut raw) })?;
        Ok(Self { raw, _marker: PhantomData })
    }

    /// Single wrapper around `mdb_cursor_get` for the operations that
    /// yield a key/value pair.
    fn op_kv<'c>(
        &'c self,
        op: c_uint,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> Result<Option<KeyVal<'c>>> {
        let mut k = key.map_or_else(val_out, val_from_slice);
        let mut v = value.map_or_else(val_out, val_from_slice);
        let rc = unsafe { ffi::mdb_cursor_get(self.raw, &mut k, &mut v, op) };
        Ok(check_maybe(rc)?
            .map(|()| unsafe { (slice_from_val(&k), slice_from_val(&v)) }))
    }

    /// As [`Cursor::op_kv`] for the operations that yield only data.
    fn op_v<'c>(&'c self, op: c_uint) -> Result<Option<&'c [u8]>> {
        let mut k = val_out();
        let mut v = val_out();
        let rc = unsafe { ffi::mdb_cursor_get(self.raw, &mut k, &mut v, op) };
        Ok(check_maybe(rc)?.map(|()| unsafe { slice_from_val(&v) }))
    }

    /// Positions at the first pair of the database.
    pub fn first(&mut self) -> Result<Option<KeyVal<'_>>> {
        self.op_kv(ffi::MDB_FIRST, None, None)
    }

    /// Positions at the first duplicate of the current key.
    pub fn first_dup(&mut self) -> Result<Option<&[u8]>> {
        self.op_v(ffi::MDB_FIRST_DUP)
    }

    /// Positions at the last pair of the database.
    pub fn last(&mut self) -> Result<Option<KeyVal<'_>>> {
        self.op_kv(ffi::MDB_LAST, None, None)
    }

    /// Positions at the last duplicate of the current key.
    pub fn last_dup(&mut self) -> Result<Option<&[u8]>> {
        self.op_v(ffi::MDB_LAST_DUP)
    }

    /// The pair under the cursor, without moving it.
    pub fn current(&self) -> Result<Option<KeyVal<'_>>> {
        self.op_kv(ffi::MDB_GET_CURRENT, None, None)
    }

    /// Up to a page of duplicate values from the current position, on a
    /// DUP_FIXED database.
    pub fn current_multiple(&self) -> Result<Option<&[u8]>> {
        self.op_v(ffi::MDB_GET_MULTIPLE)
    }

    /// Advances to the next pair, traversing duplicates in value order.
    pub fn next(&mut self) -> Result<Option<KeyVal<'_>>> {
        self.op_kv(ffi::MDB_NEXT, None, None)
    }

    /// Advances to the next duplicate of the current key.
    pub fn next_dup(&mut self) -> Result<Option<KeyVal<'_>>> {
        self.op_kv(ffi::MDB_NEXT_DUP, None, None)
    }

    /// Advances to the first duplicate of the next key.
    pub fn next_nodup(&mut self) -> Result<Option<KeyVal<'_>>> {
        self.op_kv(ffi::MDB_NEXT_NODUP, None, None)
    }

    /// The next page of duplicate values, on a DUP_FIXED database.
    pub fn next_multiple(&mut self) -> Result<Option<&[u8]>> {
        self.op_v(ffi::MDB_NEXT_MULTIPLE)
    }

    /// Steps back to the previous pair.
    pub fn prev(&mut self) -> Result<Option<KeyVal<'_>>> {
        self.op_kv(ffi::MDB_PREV, None, None)
    }

    /// Steps back to the previous duplicate of the current key.
    pub fn prev_dup(&mut self) -> Result<Option<KeyVal<'_>>> {
        self.op_kv(ffi::MDB_PREV_DUP, None, None)
    }

    /// Steps back to the last duplicate of the previous key.
    pub fn prev_nodup(&mut self) -> Result<Option<KeyVal<'_>>> {
        self.op_kv(ffi::MDB_PREV_NODUP, None, None)
    }

    /// Positions at `key` exactly, reporting only presence.
    pub fn seek(&mut self, key: &[u8]) -> Result<bool> {
        let mut k = val_from_slice(key);
        let rc = unsafe { ffi::mdb_cursor_get(self.raw, &mut k, ptr::null_mut(), ffi::MDB_SET) };
        Ok(check_maybe(rc)?.is_some())
    }

    /// Positions at `key` exactly and returns the pair. On a duplicate
    /// database this lands on the first duplicate.
    pub fn seek_key(&mut self, key: &[u8]) -> Result<Option<KeyVal<'_>>> {
        self.op_kv(ffi::MDB_SET_KEY, Some(key), None)
    }

    /// Positions at the exact `(key, value)` pair.
    pub fn seek_both(&mut self, key: &[u8], value: &[u8]) -> Result<Option<KeyVal<'_>>> {
        self.op_kv(ffi::MDB_GET_BOTH, Some(key), Some(value))
    }

    /// Positions at the smallest key greater than or equal to `key`.
    pub fn seek_range(&mut self, key: &[u8]) -> Result<Option<KeyVal<'_>>> {
        self.op_kv(ffi::MDB_SET_RANGE, Some(key), None)
    }

    /// Positions at `key` exactly and the smallest duplicate greater than
    /// or equal to `value`.
    pub fn seek_both_range(&mut self, key: &[u8], value: &[u8]) -> Result<Option<KeyVal<'_>>> {
        self.op_kv(ffi::MDB_GET_BOTH_RANGE, Some(key), Some(value))
    }

    /// Number of duplicates of the current key.
    pub fn count_dups(&self) -> Result<usize> {
        let mut count: usize = 0;
        check(unsafe { ffi::mdb_cursor_count(self.raw, &mut count) })?;
        Ok(count)
    }
}

impl<'txn> Cursor<'txn, Rw> {
    /// Stores `value` under `key` and positions the cursor at the written
    /// pair. Flags as for [`crate::WriteTxn::put`].
    pub fn put(&mut self, key: &[u8], value: &[u8], flags: PutFlags) -> Result<()> {
        let mut k = val_from_slice(key);
        let mut v = val_from_slice(value);
        check(unsafe { ffi::mdb_cursor_put(self.raw, &mut k, &mut v, flags.bits()) })
    }

    /// Allocates `len` bytes under `key` and returns the writable region.
    /// The region is only valid until the next mutating operation on the
    /// transaction.
    pub fn reserve(&mut self, key: &[u8], len: usize, flags: PutFlags) -> Result<&mut [u8]> {
        let mut k = val_from_slice(key);
        let mut v = ffi::MDB_val { mv_size: len, mv_data: ptr::null_mut() };
        check(unsafe {
            ffi::mdb_cursor_put(self.raw, &mut k, &mut v, flags.bits() | ffi::MDB_RESERVE)
        })?;
        Ok(unsafe { std::slice::from_raw_parts_mut(v.mv_data.cast(), v.mv_size) })
    }

    /// Overwrites the value of the pair under the cursor.
    ///
    /// On a duplicate database the replacement must have the same size as
    /// the current value.
    pub fn replace_current(&mut self, value: &[u8]) -> Result<()> {
        // The engine wants the current key passed back alongside
        // MDB_CURRENT; copy it out first so the put cannot invalidate it.
        let key = match self.current()? {
            Some((k, _)) => k.to_vec(),
            None => return Err(crate::Error::Code { code: ffi::MDB_NOTFOUND }),
        };
        let mut k = val_from_slice(&key);
        let mut v = val_from_slice(value);
        check(unsafe { ffi::mdb_cursor_put(self.raw, &mut k, &mut v, ffi::MDB_CURRENT) })
    }

    /// Deletes the pair under the cursor. The cursor stays on the slot,
    /// so a following [`Cursor::next`] sees the successor.
    pub fn del_current(&mut self) -> Result<()> {
        check(unsafe { ffi::mdb_cursor_del(self.raw, 0) })
    }

    /// Deletes every duplicate of the current key.
    pub fn del_current_all_dups(&mut self) -> Result<()> {
        check(unsafe { ffi::mdb_cursor_del(self.raw, ffi::MDB_NODUPDATA) })
    }
}

impl<M: TxnMode> Drop for Cursor<'_, M> {
    fn drop(&mut self) {
        unsafe { ffi::mdb_cursor_close(self.raw) };
    }
}
