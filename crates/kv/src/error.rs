//! Error type for the LMDB façade.

use lmdb_sys as ffi;
use std::ffi::CStr;
use std::os::raw::c_int;

/// Alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error raised by façade operations.
///
/// Engine failures keep the raw LMDB return code; the message is the
/// engine's own `mdb_strerror` text. `MDB_NOTFOUND` never surfaces as an
/// error, it is folded into `Ok(None)` at every call site.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Engine return code other than success or not-found.
    #[error("MDB error {code}: {}", strerror(.code))]
    Code {
        /// The raw LMDB return code.
        code: c_int,
    },

    /// A value view did not have the length the codec requires.
    #[error("codec error: expected a {expected}-byte view, found {found} bytes")]
    Codec {
        /// Required view length.
        expected: usize,
        /// Length actually found.
        found: usize,
    },

    /// Environment path could not be represented for the engine.
    #[error("environment path is not representable: {0}")]
    InvalidPath(String),

    /// The fixed pool of comparator trampolines is exhausted.
    #[error("no free comparator slots (limit {0})")]
    ComparatorLimit(usize),
}

impl Error {
    /// Wraps a raw return code.
    pub(crate) fn code(code: c_int) -> Self {
        Error::Code { code }
    }

    /// The raw engine code, if this is an engine error.
    pub fn raw_code(&self) -> Option<c_int> {
        match self {
            Error::Code { code } => Some(*code),
            _ => None,
        }
    }

    /// A put with NO_OVERWRITE or NO_DUP_DATA hit an existing pair.
    pub fn is_key_exist(&self) -> bool {
        self.raw_code() == Some(ffi::MDB_KEYEXIST)
    }

    /// The environment map is full.
    pub fn is_map_full(&self) -> bool {
        self.raw_code() == Some(ffi::MDB_MAP_FULL)
    }

    /// The reader table is full.
    pub fn is_readers_full(&self) -> bool {
        self.raw_code() == Some(ffi::MDB_READERS_FULL)
    }

    /// The write transaction has too many dirty pages.
    pub fn is_txn_full(&self) -> bool {
        self.raw_code() == Some(ffi::MDB_TXN_FULL)
    }

    /// A page failed its integrity checks.
    pub fn is_corrupted(&self) -> bool {
        matches!(
            self.raw_code(),
            Some(ffi::MDB_CORRUPTED) | Some(ffi::MDB_PAGE_NOTFOUND)
        )
    }

    /// A key or DUP_FIXED value had an unsupported size.
    pub fn is_bad_valsize(&self) -> bool {
        self.raw_code() == Some(ffi::MDB_BAD_VALSIZE)
    }
}

fn strerror(code: &c_int) -> String {
    unsafe {
        let ptr = ffi::mdb_strerror(*code);
        if ptr.is_null() {
            return format!("unknown error {code}");
        }
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

/// Converts a raw return code into `Ok(())` or an error.
pub(crate) fn check(rc: c_int) -> Result<()> {
    if rc == ffi::MDB_SUCCESS as c_int {
        Ok(())
    } else {
        Err(Error::code(rc))
    }
}

/// Converts a raw return code into a presence indicator: success is
/// `Some(())`, not-found is `None`, anything else is an error.
pub(crate) fn check_maybe(rc: c_int) -> Result<Option<()>> {
    if rc == ffi::MDB_SUCCESS as c_int {
        Ok(Some(()))
    } else if rc == ffi::MDB_NOTFOUND {
        Ok(None)
    } else {
        Err(Error::code(rc))
    }
}
