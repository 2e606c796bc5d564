//! Typed wrapper over the LMDB memory-mapped B+tree engine.
//!
//! ## Notes on implementation
//!
//! This crate provides the safe surface through which the rest of the
//! storage engine talks to LMDB: [`Env`] owns the environment (memory map,
//! free list, reader table), [`ReadTxn`]/[`WriteTxn`] scope MVCC snapshots
//! and abort on drop unless committed, [`Database`] names a sub-tree, and
//! [`Cursor`] walks key/value pairs with zero-copy views.
//!
//! Lifetimes encode the engine's validity rules: a transaction cannot
//! outlive its environment, a cursor cannot outlive its transaction, and
//! views borrowed from the map cannot outlive the handle they came from.
//! Mutation through a write transaction can still relocate dirty pages
//! under views held by *other* cursors of the same transaction; callers
//! must copy out before the next mutating operation, and must never write
//! through a view unless it came from a RESERVE put.
//!
//! Not-found is never an error here. Every lookup returns an `Option`;
//! `Err` is reserved for real engine failures, which keep the numeric
//! LMDB return code and its message.

#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    rustdoc::all
)]
#![deny(unused_must_use, rust_2018_idioms)]

use lmdb_sys as ffi;

mod cmp;
pub use cmp::{CompareCtx, CompareFn};

mod codec;
pub use codec::{FromView, ToView};

mod cursor;
pub use cursor::{Cursor, KeyVal};

mod db;
pub use db::{Database, DbFlags, PutFlags};

mod env;
pub use env::{Env, EnvFlags, EnvInfo, EnvOptions, Stat};

mod error;
pub use error::{Error, Result};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

mod txn;
pub use txn::{InactiveReadTxn, ReadTxn, Ro, Rw, Transaction, TxnMode, WriteTxn};

/// 1 KB in bytes.
pub const KILOBYTE: usize = 1024;
/// 1 MB in bytes.
pub const MEGABYTE: usize = KILOBYTE * 1024;
/// 1 GB in bytes.
pub const GIGABYTE: usize = MEGABYTE * 1024;

/// Reader slots configured when the caller does not say otherwise. LMDB's
/// own default is 126; keep it.
pub const DEFAULT_MAX_READERS: u32 = 126;

/// Named databases configured when the caller does not say otherwise.
pub const DEFAULT_MAX_DBS: u32 = 128;

/// Engine version triple as reported by the linked LMDB.
pub fn version() -> (i32, i32, i32) {
    let mut major = 0;
    let mut minor = 0;
    let mut patch = 0;
    unsafe { ffi::mdb_version(&mut major, &mut minor, &mut patch) };
    (major, minor, patch)
}
