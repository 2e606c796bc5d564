//! Custom comparator plumbing.
//!
//! The engine takes bare C function pointers for key and duplicate
//! comparison, with no user-data argument. Callers here provide a Rust
//! comparator plus an opaque context pointer; both are parked in a fixed
//! pool of slots, each slot owning one C trampoline that forwards to the
//! installed pair. A database keeps its slot for the life of the process,
//! so the pool bounds how many databases may carry custom comparators.

use crate::error::{check, Error, Result};
use lmdb_sys as ffi;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::os::raw::{c_int, c_void};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::LazyLock;

/// Opaque context pointer handed to a [`CompareFn`].
///
/// Null until [`crate::Database::set_compare_ctx`] installs one. The
/// pointee must outlive every transaction using the database.
pub type CompareCtx = *const c_void;

/// A user key or duplicate-value comparator.
///
/// Must impose a total order and must be consistent across every process
/// that opens the database.
pub type CompareFn = fn(&[u8], &[u8], CompareCtx) -> std::cmp::Ordering;

/// Size of the trampoline pool.
const MAX_COMPARATORS: usize = 16;

struct Slot {
    func: AtomicUsize,
    ctx: AtomicPtr<c_void>,
}

#[allow(clippy::declare_interior_mutable_const)]
const SLOT_INIT: Slot = Slot {
    func: AtomicUsize::new(0),
    ctx: AtomicPtr::new(std::ptr::null_mut()),
};

static SLOTS: [Slot; MAX_COMPARATORS] = [SLOT_INIT; MAX_COMPARATORS];
static NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);

#[derive(Default)]
struct DbComparators {
    key_slot: Option<usize>,
    dup_slot: Option<usize>,
    // Context is kept as an address so the registry stays Send.
    ctx: usize,
}

/// Registered comparators, keyed by (environment address, dbi).
static REGISTRY: LazyLock<Mutex<HashMap<(usize, ffi::MDB_dbi), DbComparators>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Which comparator of a database is being installed.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Which {
    Key,
    Dup,
}

unsafe extern "C" fn trampoline<const SLOT: usize>(
    a: *const ffi::MDB_val,
    b: *const ffi::MDB_val,
) -> c_int {
    let slot = &SLOTS[SLOT];
    let func: CompareFn = unsafe { std::mem::transmute(slot.func.load(Ordering::Acquire)) };
    let ctx = slot.ctx.load(Ordering::Acquire) as CompareCtx;
    let (a, b) = unsafe {
        (
            std::slice::from_raw_parts((*a).mv_data as *const u8, (*a).mv_size),
            std::slice::from_raw_parts((*b).mv_data as *const u8, (*b).mv_size),
        )
    };
    match func(a, b, ctx) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

type RawCompare = unsafe extern "C" fn(*const ffi::MDB_val, *const ffi::MDB_val) -> c_int;

static TRAMPOLINES: [RawCompare; MAX_COMPARATORS] = [
    trampoline::<0>,
    trampoline::<1>,
    trampoline::<2>,
    trampoline::<3>,
    trampoline::<4>,
    trampoline::<5>,
    trampoline::<6>,
    trampoline::<7>,
    trampoline::<8>,
    trampoline::<9>,
    trampoline::<10>,
    trampoline::<11>,
    trampoline::<12>,
    trampoline::<13>,
    trampoline::<14>,
    trampoline::<15>,
];

fn alloc_slot() -> Result<usize> {
    let slot = NEXT_SLOT.fetch_add(1, Ordering::Relaxed);
    if slot >= MAX_COMPARATORS {
        NEXT_SLOT.store(MAX_COMPARATORS, Ordering::Relaxed);
        return Err(Error::ComparatorLimit(MAX_COMPARATORS));
    }
    Ok(slot)
}

pub(crate) fn install_compare(
    txn: *mut ffi::MDB_txn,
    dbi: ffi::MDB_dbi,
    compare: CompareFn,
    which: Which,
) -> Result<()> {
    let env = unsafe { ffi::mdb_txn_env(txn) } as usize;
    let mut registry = REGISTRY.lock();
    let entry = registry.entry((env, dbi)).or_default();

    let slot_ref = match which {
        Which::Key => &mut entry.key_slot,
        Which::Dup => &mut entry.dup_slot,
    };
    let slot = match *slot_ref {
        Some(slot) => slot,
        None => {
            let slot = alloc_slot()?;
            *slot_ref = Some(slot);
            slot
        }
    };

    // Fill the slot before the engine can call through the trampoline.
    SLOTS[slot].func.store(compare as usize, Ordering::Release);
    SLOTS[slot].ctx.store(entry.ctx as *mut c_void, Ordering::Release);

    let rc = unsafe {
        match which {
            Which::Key => ffi::mdb_set_compare(txn, dbi, Some(TRAMPOLINES[slot])),
            Which::Dup => ffi::mdb_set_dupsort(txn, dbi, Some(TRAMPOLINES[slot])),
        }
    };
    check(rc)
}

pub(crate) fn install_ctx(txn: *mut ffi::MDB_txn, dbi: ffi::MDB_dbi, ctx: CompareCtx) {
    let env = unsafe { ffi::mdb_txn_env(txn) } as usize;
    let mut registry = REGISTRY.lock();
    let entry = registry.entry((env, dbi)).or_default();
    entry.ctx = ctx as usize;
    for slot in [entry.key_slot, entry.dup_slot].into_iter().flatten() {
        SLOTS[slot].ctx.store(ctx as *mut c_void, Ordering::Release);
    }
}
