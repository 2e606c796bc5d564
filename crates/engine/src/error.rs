//! Error taxonomy of the storage engine adapters.

use quill_types::IndexKey;

/// Alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by record stores, index access methods, and bulk
/// builds.
///
/// `DuplicateKey`, `KeyTooBig`, `TooManyDuplicates` and `Interrupted` are
/// statuses the caller is expected to handle; the rest indicate misuse or
/// engine failure and abort the enclosing transaction on unwind.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Uniqueness violation on insert, update, or bulk build.
    #[error("E11000 duplicate key error index: {namespace} dup key: {key:?}")]
    DuplicateKey {
        /// The offending key.
        key: IndexKey,
        /// Namespace of the index that rejected it.
        namespace: String,
    },

    /// The engine rejected a key longer than its configured maximum.
    #[error("key too large for the storage engine")]
    KeyTooBig(#[source] quill_kv::Error),

    /// A dropDups build collected more duplicate locators than the cap.
    #[error("too many dups on index build with dropDups=true (limit {0})")]
    TooManyDuplicates(usize),

    /// Cooperative cancellation observed during a bulk build.
    #[error("index build interrupted")]
    Interrupted,

    /// The operation is not valid in the component's current state.
    #[error("illegal operation: {0}")]
    IllegalOperation(&'static str),

    /// A caller precondition does not hold; the component cannot recover.
    #[error("internal error: {0}")]
    Internal(String),

    /// Engine failure passed through from the KV layer.
    #[error(transparent)]
    Kv(quill_kv::Error),
}

impl From<quill_kv::Error> for Error {
    fn from(e: quill_kv::Error) -> Self {
        if e.is_bad_valsize() {
            Error::KeyTooBig(e)
        } else {
            Error::Kv(e)
        }
    }
}
