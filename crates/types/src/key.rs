//! The index-key binary format.
//!
//! Index keys are serialized so that bytewise lexicographic comparison of
//! the encoded form equals the semantic comparison of the field values
//! under the index's ordering. Fields of a descending index component are
//! complemented at encode time, so a database holding these keys never
//! needs a runtime comparator.

use std::fmt;

// Field tags. Chosen so that across types: null < number < string.
const TAG_NULL: u8 = 0x05;
const TAG_I64: u8 = 0x10;
const TAG_STR: u8 = 0x3C;

/// Per-field directions for an index, most significant field first.
///
/// Bit `i` set means field `i` sorts descending. At most 32 fields.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct KeyOrdering(u32);

impl KeyOrdering {
    /// All fields ascending.
    pub const fn ascending() -> Self {
        Self(0)
    }

    /// Builds an ordering from per-field directions, `true` = descending.
    pub fn from_directions(descending: &[bool]) -> Self {
        assert!(descending.len() <= 32, "too many key fields");
        let mut bits = 0u32;
        for (i, d) in descending.iter().enumerate() {
            if *d {
                bits |= 1 << i;
            }
        }
        Self(bits)
    }

    /// Whether field `i` sorts descending.
    pub const fn is_descending(&self, i: usize) -> bool {
        self.0 >> i & 1 == 1
    }
}

/// An owned, encoded index key.
///
/// Keys compare bytewise; the encoding guarantees that this matches the
/// field-value comparison under the ordering the key was built with. Keys
/// built under different orderings are not comparable.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct IndexKey(Vec<u8>);

impl IndexKey {
    /// Wraps already-encoded key bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for IndexKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IndexKey(")?;
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

/// Incremental encoder for [`IndexKey`].
///
/// Fields are appended most significant first; each `push_*` call consumes
/// the next direction bit of the ordering.
#[derive(Debug)]
pub struct IndexKeyBuilder {
    buf: Vec<u8>,
    ordering: KeyOrdering,
    field: usize,
}

impl IndexKeyBuilder {
    /// Starts a key under the given ordering.
    pub fn new(ordering: KeyOrdering) -> Self {
        Self { buf: Vec::with_capacity(32), ordering, field: 0 }
    }

    /// Appends a signed integer field.
    pub fn push_i64(&mut self, v: i64) -> &mut Self {
        let start = self.begin_field(TAG_I64);
        // Offset encoding: flipping the sign bit makes the big-endian
        // bytes compare like the signed value.
        let biased = (v as u64) ^ (1 << 63);
        self.buf.extend_from_slice(&biased.to_be_bytes());
        self.end_field(start);
        self
    }

    /// Appends a string field.
    ///
    /// Interior NUL bytes are escaped so that prefixes order correctly.
    pub fn push_str(&mut self, s: &str) -> &mut Self {
        let start = self.begin_field(TAG_STR);
        for &b in s.as_bytes() {
            if b == 0x00 {
                self.buf.extend_from_slice(&[0x00, 0xFF]);
            } else {
                self.buf.push(b);
            }
        }
        self.buf.extend_from_slice(&[0x00, 0x00]);
        self.end_field(start);
        self
    }

    /// Appends a null field.
    pub fn push_null(&mut self) -> &mut Self {
        let start = self.begin_field(TAG_NULL);
        self.end_field(start);
        self
    }

    /// Finishes the key.
    pub fn finish(&mut self) -> IndexKey {
        IndexKey(std::mem::take(&mut self.buf))
    }

    fn begin_field(&mut self, tag: u8) -> usize {
        let start = self.buf.len();
        self.buf.push(tag);
        start
    }

    fn end_field(&mut self, start: usize) {
        if self.ordering.is_descending(self.field) {
            for b in &mut self.buf[start..] {
                *b = !*b;
            }
        }
        self.field += 1;
    }
}

/// Encodes a single ascending integer field, the common case in tests and
/// simple indexes.
pub fn single_i64(v: i64) -> IndexKey {
    IndexKeyBuilder::new(KeyOrdering::ascending()).push_i64(v).finish()
}
