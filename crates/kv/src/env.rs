//! Environment handling: one per database file.

use crate::error::{check, Result};
use crate::txn::{ReadTxn, WriteTxn};
use crate::{Error, DEFAULT_MAX_DBS, DEFAULT_MAX_READERS, GIGABYTE};
use lmdb_sys as ffi;
use std::ffi::CString;
use std::os::raw::c_uint;
use std::path::{Path, PathBuf};
use std::ptr;

bitflags::bitflags! {
    /// Flags accepted when opening an [`Env`].
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct EnvFlags: c_uint {
        /// The path names the data file itself, not a directory.
        const NO_SUB_DIR = ffi::MDB_NOSUBDIR;
        /// Open the environment read-only.
        const READ_ONLY = ffi::MDB_RDONLY;
        /// Map the file writable and write pages directly through the map.
        const WRITE_MAP = ffi::MDB_WRITEMAP;
        /// Do not fsync after commit.
        const NO_SYNC = ffi::MDB_NOSYNC;
        /// Do not fsync the meta page after commit.
        const NO_META_SYNC = ffi::MDB_NOMETASYNC;
        /// With WRITE_MAP, use asynchronous flushes.
        const MAP_ASYNC = ffi::MDB_MAPASYNC;
        /// Tie reader slots to transactions instead of threads.
        const NO_TLS = ffi::MDB_NOTLS;
        /// Caller manages all locking.
        const NO_LOCK = ffi::MDB_NOLOCK;
        /// Do not readahead the map.
        const NO_READAHEAD = ffi::MDB_NORDAHEAD;
        /// Do not zero-initialize malloc'd buffers.
        const NO_MEM_INIT = ffi::MDB_NOMEMINIT;
    }
}

/// Configuration for opening an [`Env`].
#[derive(Clone, Debug)]
pub struct EnvOptions {
    /// Size cap of the memory map, and so of the whole database.
    map_size: usize,
    /// Maximum number of named databases.
    max_dbs: u32,
    /// Maximum number of reader slots.
    max_readers: u32,
    /// Open flags.
    flags: EnvFlags,
    /// Unix mode for created files.
    mode: u32,
}

impl Default for EnvOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvOptions {
    /// Default options: a 1 GiB map, byte-for-byte LMDB defaults elsewhere.
    pub fn new() -> Self {
        Self {
            map_size: GIGABYTE,
            max_dbs: DEFAULT_MAX_DBS,
            max_readers: DEFAULT_MAX_READERS,
            flags: EnvFlags::empty(),
            mode: 0o600,
        }
    }

    /// Sets the map-size cap in bytes.
    pub const fn map_size(mut self, bytes: usize) -> Self {
        self.map_size = bytes;
        self
    }

    /// Sets the maximum number of named databases.
    pub const fn max_dbs(mut self, max: u32) -> Self {
        self.max_dbs = max;
        self
    }

    /// Sets the maximum number of reader slots.
    pub const fn max_readers(mut self, max: u32) -> Self {
        self.max_readers = max;
        self
    }

    /// Sets the open flags.
    pub const fn flags(mut self, flags: EnvFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the unix mode for created files.
    pub const fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Creates and opens the environment at `path`.
    pub fn open(self, path: &Path) -> Result<Env> {
        Env::open(path, self)
    }
}

/// Environment statistics, for the whole map or for one database.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stat {
    /// Page size in bytes.
    pub page_size: u32,
    /// B+tree depth.
    pub depth: u32,
    /// Number of internal pages.
    pub branch_pages: usize,
    /// Number of leaf pages.
    pub leaf_pages: usize,
    /// Number of overflow pages.
    pub overflow_pages: usize,
    /// Number of stored pairs.
    pub entries: usize,
}

impl Stat {
    pub(crate) fn from_raw(raw: &ffi::MDB_stat) -> Self {
        Self {
            page_size: raw.ms_psize,
            depth: raw.ms_depth,
            branch_pages: raw.ms_branch_pages,
            leaf_pages: raw.ms_leaf_pages,
            overflow_pages: raw.ms_overflow_pages,
            entries: raw.ms_entries,
        }
    }
}

/// Environment information: map geometry and reader usage.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvInfo {
    /// Configured map size in bytes.
    pub map_size: usize,
    /// Number of the last used page.
    pub last_page: usize,
    /// Id of the last committed transaction.
    pub last_txn_id: usize,
    /// Configured reader slots.
    pub max_readers: u32,
    /// Reader slots currently in use.
    pub num_readers: u32,
}

/// An open LMDB environment.
///
/// Owns the memory map, the free list, and the reader table for one
/// database file. Create once at startup, share by reference between
/// threads, and drop after every transaction is gone.
pub struct Env {
    raw: *mut ffi::MDB_env,
    path: PathBuf,
}

// The environment handle itself is thread-safe; only transactions and
// cursors are bound to their creating thread.
unsafe impl Send for Env {}
unsafe impl Sync for Env {}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env").field("path", &self.path).finish_non_exhaustive()
    }
}

impl Env {
    /// Creates and opens an environment at `path` with the given options.
    ///
    /// Unless [`EnvFlags::NO_SUB_DIR`] is set, `path` must name an
    /// existing directory.
    pub fn open(path: &Path, options: EnvOptions) -> Result<Self> {
        let cpath = CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|_| Error::InvalidPath(path.display().to_string()))?;

        let mut raw: *mut ffi::MDB_env = ptr::null_mut();
        unsafe {
            check(ffi::mdb_env_create(&mut raw))?;
        }

        let configure = || -> Result<()> {
            unsafe {
                check(ffi::mdb_env_set_mapsize(raw, options.map_size))?;
                check(ffi::mdb_env_set_maxdbs(raw, options.max_dbs))?;
                check(ffi::mdb_env_set_maxreaders(raw, options.max_readers))?;
                check(ffi::mdb_env_open(
                    raw,
                    cpath.as_ptr(),
                    options.flags.bits(),
                    options.mode as _,
                ))
            }
        };

        if let Err(e) = configure() {
            // The handle must be torn down even when open fails.
            unsafe { ffi::mdb_env_close(raw) };
            return Err(e);
        }

        tracing::debug!(
            target: "quill::kv",
            path = %path.display(),
            map_size = options.map_size,
            flags = ?options.flags,
            "opened environment"
        );

        Ok(Self { raw, path: path.to_path_buf() })
    }

    /// The path the environment was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Statistics for the whole environment.
    pub fn stat(&self) -> Result<Stat> {
        let mut raw = std::mem::MaybeUninit::<ffi::MDB_stat>::uninit();
        unsafe {
            check(ffi::mdb_env_stat(self.raw, raw.as_mut_ptr()))?;
            Ok(Stat::from_raw(&raw.assume_init()))
        }
    }

    /// Map geometry and reader-table usage.
    pub fn info(&self) -> Result<EnvInfo> {
        let mut raw = std::mem::MaybeUninit::<ffi::MDB_envinfo>::uninit();
        unsafe {
            check(ffi::mdb_env_info(self.raw, raw.as_mut_ptr()))?;
            let raw = raw.assume_init();
            Ok(EnvInfo {
                map_size: raw.me_mapsize,
                last_page: raw.me_last_pgno,
                last_txn_id: raw.me_last_txnid,
                max_readers: raw.me_maxreaders,
                num_readers: raw.me_numreaders,
            })
        }
    }

    /// Flushes buffered writes to disk. With `force`, the flush is
    /// synchronous even under NO_SYNC or MAP_ASYNC.
    pub fn sync(&self, force: bool) -> Result<()> {
        unsafe { check(ffi::mdb_env_sync(self.raw, force as _)) }
    }

    /// Begins a read-only transaction against the current snapshot.
    pub fn read_txn(&self) -> Result<ReadTxn<'_>> {
        ReadTxn::begin(self)
    }

    /// Begins a write transaction. Blocks until the single writer lock is
    /// available.
    pub fn write_txn(&self) -> Result<WriteTxn<'_>> {
        WriteTxn::begin(self)
    }

    /// The raw environment handle.
    pub fn raw(&self) -> *mut ffi::MDB_env {
        self.raw
    }
}

impl Drop for Env {
    fn drop(&mut self) {
        unsafe { ffi::mdb_env_close(self.raw) };
    }
}
