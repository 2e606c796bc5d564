//! Transactions: read-only and read-write, with nesting and renewal.

use crate::codec::{slice_from_val, val_from_slice, val_out};
use crate::cursor::Cursor;
use crate::db::{Database, PutFlags};
use crate::env::{Env, Stat};
use crate::error::{check, check_maybe, Result};
use lmdb_sys as ffi;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Ro {}
    impl Sealed for super::Rw {}
    impl<'env> Sealed for super::ReadTxn<'env> {}
    impl<'env> Sealed for super::WriteTxn<'env> {}
}

/// Marker for the access mode of a transaction, used to gate cursor
/// mutation at the type level.
pub trait TxnMode: sealed::Sealed + 'static {}

/// Read-only marker.
#[derive(Clone, Copy, Debug)]
pub struct Ro;

/// Read-write marker.
#[derive(Clone, Copy, Debug)]
pub struct Rw;

impl TxnMode for Ro {}
impl TxnMode for Rw {}

/// The read surface shared by both transaction kinds.
///
/// Views returned from [`Transaction::get`] borrow the transaction and
/// point straight into the memory map; they are valid until the next
/// mutating operation on the same transaction and must be copied before
/// one happens.
pub trait Transaction: sealed::Sealed + Sized {
    /// Cursor mode for this transaction kind.
    type Mode: TxnMode;

    /// The raw transaction handle.
    fn raw(&self) -> *mut ffi::MDB_txn;

    /// Looks up `key`, returning a zero-copy view of the value.
    fn get<'t>(&'t self, db: Database, key: &[u8]) -> Result<Option<&'t [u8]>> {
        let mut k = val_from_slice(key);
        let mut v = val_out();
        let rc = unsafe { ffi::mdb_get(self.raw(), db.dbi(), &mut k, &mut v) };
        Ok(check_maybe(rc)?.map(|()| unsafe { slice_from_val(&v) }))
    }

    /// Whether `key` is present, without materializing the value.
    fn has_key(&self, db: Database, key: &[u8]) -> Result<bool> {
        let mut k = val_from_slice(key);
        let mut v = val_out();
        let rc = unsafe { ffi::mdb_get(self.raw(), db.dbi(), &mut k, &mut v) };
        Ok(check_maybe(rc)?.is_some())
    }

    /// Opens a cursor over `db`.
    fn cursor(&self, db: Database) -> Result<Cursor<'_, Self::Mode>> {
        Cursor::open(self.raw(), db)
    }

    /// Statistics for one database.
    fn db_stat(&self, db: Database) -> Result<Stat> {
        let mut raw = MaybeUninit::<ffi::MDB_stat>::uninit();
        unsafe {
            check(ffi::mdb_stat(self.raw(), db.dbi(), raw.as_mut_ptr()))?;
            Ok(Stat::from_raw(&raw.assume_init()))
        }
    }

    /// Whether `db` holds no pairs.
    fn db_is_empty(&self, db: Database) -> Result<bool> {
        Ok(self.db_stat(db)?.entries == 0)
    }
}

/// A read-only transaction over a stable snapshot.
///
/// Aborts on drop; [`ReadTxn::commit`] and [`ReadTxn::abort`] both simply
/// return the reader slot. [`ReadTxn::reset`] keeps the slot for cheap
/// renewal against a fresh snapshot.
#[derive(Debug)]
pub struct ReadTxn<'env> {
    raw: *mut ffi::MDB_txn,
    _env: PhantomData<&'env Env>,
}

impl<'env> ReadTxn<'env> {
    pub(crate) fn begin(env: &'env Env) -> Result<Self> {
        let mut raw: *mut ffi::MDB_txn = ptr::null_mut();
        unsafe {
            check(ffi::mdb_txn_begin(env.raw(), ptr::null_mut(), ffi::MDB_RDONLY, &mut raw))?;
        }
        Ok(Self { raw, _env: PhantomData })
    }

    /// Ends the transaction, returning the reader slot.
    pub fn commit(mut self) -> Result<()> {
        let raw = std::mem::replace(&mut self.raw, ptr::null_mut());
        check(unsafe { ffi::mdb_txn_commit(raw) })
    }

    /// Ends the transaction. Equivalent to dropping it.
    pub fn abort(self) {}

    /// Releases the snapshot hold but keeps the reader slot, so the
    /// transaction can be renewed without reacquiring one.
    pub fn reset(mut self) -> InactiveReadTxn<'env> {
        let raw = std::mem::replace(&mut self.raw, ptr::null_mut());
        unsafe { ffi::mdb_txn_reset(raw) };
        InactiveReadTxn { raw, _env: PhantomData }
    }
}

impl Transaction for ReadTxn<'_> {
    type Mode = Ro;

    fn raw(&self) -> *mut ffi::MDB_txn {
        self.raw
    }
}

impl Drop for ReadTxn<'_> {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            unsafe { ffi::mdb_txn_abort(self.raw) };
        }
    }
}

/// A reset read transaction, holding its reader slot but no snapshot.
#[derive(Debug)]
pub struct InactiveReadTxn<'env> {
    raw: *mut ffi::MDB_txn,
    _env: PhantomData<&'env Env>,
}

impl<'env> InactiveReadTxn<'env> {
    /// Reacquires a fresh snapshot on the retained reader slot.
    pub fn renew(mut self) -> Result<ReadTxn<'env>> {
        let raw = std::mem::replace(&mut self.raw, ptr::null_mut());
        match check(unsafe { ffi::mdb_txn_renew(raw) }) {
            Ok(()) => Ok(ReadTxn { raw, _env: PhantomData }),
            Err(e) => {
                unsafe { ffi::mdb_txn_abort(raw) };
                Err(e)
            }
        }
    }
}

impl Drop for InactiveReadTxn<'_> {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            unsafe { ffi::mdb_txn_abort(self.raw) };
        }
    }
}

/// A read-write transaction.
///
/// Begins by taking the single writer lock, blocking until it is free.
/// Aborts on drop unless committed. Reading through a shared borrow of a
/// `WriteTxn` observes the transaction's own uncommitted writes, which is
/// what a read-only child of a writer would see.
#[derive(Debug)]
pub struct WriteTxn<'env> {
    raw: *mut ffi::MDB_txn,
    _env: PhantomData<&'env Env>,
}

impl<'env> WriteTxn<'env> {
    pub(crate) fn begin(env: &'env Env) -> Result<Self> {
        let mut raw: *mut ffi::MDB_txn = ptr::null_mut();
        unsafe {
            check(ffi::mdb_txn_begin(env.raw(), ptr::null_mut(), 0, &mut raw))?;
        }
        Ok(Self { raw, _env: PhantomData })
    }

    /// Begins a nested write transaction.
    ///
    /// The parent is unusable while the child lives. Committing the child
    /// publishes its writes into the parent; aborting the parent discards
    /// them again.
    pub fn nested(&mut self) -> Result<WriteTxn<'_>> {
        let env = unsafe { ffi::mdb_txn_env(self.raw) };
        let mut raw: *mut ffi::MDB_txn = ptr::null_mut();
        unsafe {
            check(ffi::mdb_txn_begin(env, self.raw, 0, &mut raw))?;
        }
        Ok(WriteTxn { raw, _env: PhantomData })
    }

    /// Installs all writes made under this transaction.
    pub fn commit(mut self) -> Result<()> {
        let raw = std::mem::replace(&mut self.raw, ptr::null_mut());
        check(unsafe { ffi::mdb_txn_commit(raw) })
    }

    /// Discards all writes made under this transaction and any
    /// uncommitted children. Equivalent to dropping it.
    pub fn abort(self) {}

    /// Stores `value` under `key`.
    ///
    /// Honors [`PutFlags::NO_OVERWRITE`], [`PutFlags::NO_DUP_DATA`],
    /// [`PutFlags::APPEND`] and [`PutFlags::APPEND_DUP`]; a violated
    /// NO_OVERWRITE or NO_DUP_DATA reports the KEY_EXIST engine code.
    /// Invalidates views previously read under this transaction.
    pub fn put(&self, db: Database, key: &[u8], value: &[u8], flags: PutFlags) -> Result<()> {
        let mut k = val_from_slice(key);
        let mut v = val_from_slice(value);
        check(unsafe { ffi::mdb_put(self.raw, db.dbi(), &mut k, &mut v, flags.bits()) })
    }

    /// Allocates `len` bytes under `key` and hands the writable region to
    /// `fill`. The region is valid only inside the closure.
    pub fn with_reservation<R>(
        &self,
        db: Database,
        key: &[u8],
        len: usize,
        flags: PutFlags,
        fill: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        let mut k = val_from_slice(key);
        let mut v = ffi::MDB_val { mv_size: len, mv_data: ptr::null_mut() };
        check(unsafe {
            ffi::mdb_put(self.raw, db.dbi(), &mut k, &mut v, flags.bits() | ffi::MDB_RESERVE)
        })?;
        let region = unsafe { std::slice::from_raw_parts_mut(v.mv_data.cast(), v.mv_size) };
        Ok(fill(region))
    }

    /// Deletes `key`. With `value`, deletes only that duplicate. Returns
    /// whether anything was deleted.
    pub fn del(&self, db: Database, key: &[u8], value: Option<&[u8]>) -> Result<bool> {
        let mut k = val_from_slice(key);
        let rc = match value {
            Some(value) => {
                let mut v = val_from_slice(value);
                unsafe { ffi::mdb_del(self.raw, db.dbi(), &mut k, &mut v) }
            }
            None => unsafe { ffi::mdb_del(self.raw, db.dbi(), &mut k, ptr::null_mut()) },
        };
        Ok(check_maybe(rc)?.is_some())
    }

    /// Removes every pair from `db`, keeping the database itself.
    pub fn clear_db(&self, db: Database) -> Result<()> {
        check(unsafe { ffi::mdb_drop(self.raw, db.dbi(), 0) })
    }

    /// Deletes `db` from the environment. The handle must not be used
    /// afterwards.
    pub fn drop_db(&self, db: Database) -> Result<()> {
        check(unsafe { ffi::mdb_drop(self.raw, db.dbi(), 1) })
    }
}

impl Transaction for WriteTxn<'_> {
    type Mode = Rw;

    fn raw(&self) -> *mut ffi::MDB_txn {
        self.raw
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            unsafe { ffi::mdb_txn_abort(self.raw) };
        }
    }
}
