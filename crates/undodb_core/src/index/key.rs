//! Order-preserving index keys.
//!
//! A key is an owned byte string whose lexicographic order equals the
//! logical order of the encoded components: unsigned integers become
//! big-endian bytes, signed integers have their sign bit flipped first,
//! strings contribute their raw bytes. Composite keys length-prefix each
//! component so that component boundaries cannot bleed into each other.
//!
//! Lookups with a different-but-comparable type ("compatible keys")
//! simply encode the probe the same way the extractor encodes the stored
//! key.

use std::fmt;

/// An ordered index key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct IndexKey {
    bytes: Vec<u8>,
}

impl IndexKey {
    /// Creates an empty key, to be filled with the `push_*` methods.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for a `u64` component.
    #[must_use]
    pub fn from_u64(value: u64) -> Self {
        let mut key = Self::new();
        key.push_u64(value);
        key
    }

    /// Key for an `i64` component.
    #[must_use]
    pub fn from_i64(value: i64) -> Self {
        let mut key = Self::new();
        key.push_i64(value);
        key
    }

    /// Key for a string component.
    #[must_use]
    pub fn from_str(value: &str) -> Self {
        let mut key = Self::new();
        key.push_str(value);
        key
    }

    /// Appends a `u64` component.
    pub fn push_u64(&mut self, value: u64) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Appends a `u32` component.
    pub fn push_u32(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Appends an `i64` component.
    pub fn push_i64(&mut self, value: i64) -> &mut Self {
        // Flipping the sign bit maps i64 order onto unsigned byte order.
        self.push_u64((value as u64) ^ (1 << 63))
    }

    /// Appends a string component with a length prefix.
    pub fn push_str(&mut self, value: &str) -> &mut Self {
        self.bytes
            .extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.bytes.extend_from_slice(value.as_bytes());
        self
    }

    /// The encoded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<u64> for IndexKey {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl From<i64> for IndexKey {
    fn from(value: i64) -> Self {
        Self::from_i64(value)
    }
}

impl From<u32> for IndexKey {
    fn from(value: u32) -> Self {
        let mut key = Self::new();
        key.push_u32(value);
        key
    }
}

impl From<&str> for IndexKey {
    fn from(value: &str) -> Self {
        Self::from_str(value)
    }
}

impl From<&String> for IndexKey {
    fn from(value: &String) -> Self {
        Self::from_str(value)
    }
}

impl From<String> for IndexKey {
    fn from(value: String) -> Self {
        Self::from_str(&value)
    }
}

impl fmt::Debug for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IndexKey(")?;
        for byte in &self.bytes {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}
