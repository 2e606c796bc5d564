//! Plain data types shared by the quill storage crates.
//!
//! This crate is deliberately dependency-free: it holds the record locator
//! used to address documents ([`DiskLoc`]) and the order-embedded binary
//! key format used by secondary indexes ([`IndexKey`]). Everything that
//! touches the key/value engine lives in `quill-kv`; everything that knows
//! about collections and indexes lives in `quill-engine`.

#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    rustdoc::all
)]
#![deny(unused_must_use, rust_2018_idioms)]

mod key;
pub use key::{single_i64, IndexKey, IndexKeyBuilder, KeyOrdering};

mod loc;
pub use loc::{DiskLoc, MAX_RECORD_ID};
