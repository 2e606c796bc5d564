//! Named database handles.

use crate::cmp::{self, CompareCtx, CompareFn};
use crate::error::{check, check_maybe, Error, Result};
use crate::txn::{Transaction, WriteTxn};
use lmdb_sys as ffi;
use std::ffi::CString;
use std::os::raw::c_uint;

bitflags::bitflags! {
    /// Flags fixed at database creation.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct DbFlags: c_uint {
        /// Compare keys in reverse byte order.
        const REVERSE_KEY = ffi::MDB_REVERSEKEY;
        /// Allow duplicate values per key, kept in value order.
        const DUP_SORT = ffi::MDB_DUPSORT;
        /// Keys are native-order binary integers of uniform size.
        const INTEGER_KEY = ffi::MDB_INTEGERKEY;
        /// With DUP_SORT, all values for a key have the same size.
        const DUP_FIXED = ffi::MDB_DUPFIXED;
        /// With DUP_SORT, values are native-order binary integers.
        const INTEGER_DUP = ffi::MDB_INTEGERDUP;
        /// With DUP_SORT, compare values in reverse byte order.
        const REVERSE_DUP = ffi::MDB_REVERSEDUP;
        /// Create the database if it does not exist.
        const CREATE = ffi::MDB_CREATE;
    }
}

bitflags::bitflags! {
    /// Flags accepted by put operations.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct PutFlags: c_uint {
        /// Fail with KEY_EXIST if the key is already present.
        const NO_OVERWRITE = ffi::MDB_NOOVERWRITE;
        /// On a DUP_SORT database, fail with KEY_EXIST if the exact
        /// key/value pair is already present.
        const NO_DUP_DATA = ffi::MDB_NODUPDATA;
        /// Caller asserts keys arrive in order; skip the descent.
        const APPEND = ffi::MDB_APPEND;
        /// Caller asserts duplicates arrive in order; skip the descent.
        const APPEND_DUP = ffi::MDB_APPENDDUP;
    }
}

/// A handle to one named sub-tree of an environment.
///
/// Handles are plain database ids: cheap to copy, shareable between
/// threads, and valid for the life of the environment once the opening
/// transaction has committed. They are never closed at runtime; open
/// databases once at startup, like any other schema object.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Database {
    dbi: ffi::MDB_dbi,
}

impl Database {
    /// Opens (or with [`DbFlags::CREATE`] creates) the database `name`.
    ///
    /// Absence without CREATE is an error here; use
    /// [`Database::open_if_can`] when absence is an expected outcome.
    pub fn open(txn: &impl Transaction, name: &str, flags: DbFlags) -> Result<Self> {
        Self::open_if_can(txn, name, flags)?
            .ok_or(Error::Code { code: ffi::MDB_NOTFOUND })
    }

    /// Opens the database `name`, reporting absence as `None` rather than
    /// an error.
    pub fn open_if_can(
        txn: &impl Transaction,
        name: &str,
        flags: DbFlags,
    ) -> Result<Option<Self>> {
        let cname = CString::new(name)
            .map_err(|_| Error::InvalidPath(name.to_owned()))?;
        let mut dbi: ffi::MDB_dbi = 0;
        let rc = unsafe {
            ffi::mdb_dbi_open(txn.raw(), cname.as_ptr(), flags.bits(), &mut dbi)
        };
        Ok(check_maybe(rc)?.map(|()| Self { dbi }))
    }

    /// The unnamed root database of the environment.
    pub fn root(txn: &impl Transaction) -> Result<Self> {
        let mut dbi: ffi::MDB_dbi = 0;
        check(unsafe { ffi::mdb_dbi_open(txn.raw(), std::ptr::null(), 0, &mut dbi) })?;
        Ok(Self { dbi })
    }

    /// The raw database id.
    pub fn dbi(&self) -> ffi::MDB_dbi {
        self.dbi
    }

    /// Installs a custom key comparator.
    ///
    /// Must be called before any data access under every environment that
    /// opens the database, and the same comparator must be used by every
    /// opener. The context passed to the comparator is whatever
    /// [`Database::set_compare_ctx`] last installed (null until then) and
    /// must outlive all transactions using this database.
    pub fn set_compare(&self, txn: &WriteTxn<'_>, compare: CompareFn) -> Result<()> {
        cmp::install_compare(txn.raw(), self.dbi, compare, cmp::Which::Key)
    }

    /// Installs a custom duplicate-value comparator for a
    /// [`DbFlags::DUP_SORT`] database. Same rules as
    /// [`Database::set_compare`].
    pub fn set_dupsort(&self, txn: &WriteTxn<'_>, compare: CompareFn) -> Result<()> {
        cmp::install_compare(txn.raw(), self.dbi, compare, cmp::Which::Dup)
    }

    /// Installs the context pointer handed to this database's custom
    /// comparators. The pointee must outlive every transaction that
    /// touches the database.
    pub fn set_compare_ctx(&self, txn: &WriteTxn<'_>, ctx: CompareCtx) {
        cmp::install_ctx(txn.raw(), self.dbi, ctx);
    }
}
