//! Binary encoder with a rolling payload checksum.

use crate::crc::Crc32;

/// Writes values in the portable big-endian format.
///
/// Every byte written is also folded into a rolling CRC-32 so that a
/// caller producing a checksummed record (the journal) gets the payload
/// checksum for free via [`Encoder::checksum`].
#[derive(Debug)]
pub struct Encoder {
    buffer: Vec<u8>,
    crc: Crc32,
}

impl Encoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            crc: Crc32::new(),
        }
    }

    /// Creates an encoder with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            crc: Crc32::new(),
        }
    }

    /// Writes a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.write_raw(&[value]);
    }

    /// Writes a big-endian `u16`.
    pub fn write_u16(&mut self, value: u16) {
        self.write_raw(&value.to_be_bytes());
    }

    /// Writes a big-endian `u32`.
    pub fn write_u32(&mut self, value: u32) {
        self.write_raw(&value.to_be_bytes());
    }

    /// Writes a big-endian `u64`.
    pub fn write_u64(&mut self, value: u64) {
        self.write_raw(&value.to_be_bytes());
    }

    /// Writes an `i8` as its unsigned form.
    pub fn write_i8(&mut self, value: i8) {
        self.write_u8(value as u8);
    }

    /// Writes an `i16` as its big-endian unsigned form.
    pub fn write_i16(&mut self, value: i16) {
        self.write_u16(value as u16);
    }

    /// Writes an `i32` as its big-endian unsigned form.
    pub fn write_i32(&mut self, value: i32) {
        self.write_u32(value as u32);
    }

    /// Writes an `i64` as its big-endian unsigned form.
    pub fn write_i64(&mut self, value: i64) {
        self.write_u64(value as u64);
    }

    /// Writes a `bool` as one byte.
    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    /// Writes a string as a `u32` length prefix followed by its bytes.
    pub fn write_str(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.write_raw(value.as_bytes());
    }

    /// Writes a byte string as a `u32` length prefix followed by the bytes.
    pub fn write_blob(&mut self, value: &[u8]) {
        self.write_u32(value.len() as u32);
        self.write_raw(value);
    }

    /// Writes raw bytes with no length prefix.
    pub fn write_raw(&mut self, data: &[u8]) {
        self.crc.update(data);
        self.buffer.extend_from_slice(data);
    }

    /// Returns the CRC-32 of everything written since the last call and
    /// resets the rolling state.
    pub fn checksum(&mut self) -> u32 {
        self.crc.checksum()
    }

    /// Returns the encoded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consumes the encoder and returns the buffer.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}
