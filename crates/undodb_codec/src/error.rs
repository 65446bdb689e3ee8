//! Error types for the codec.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The input ended before a value could be fully read.
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd {
        /// Bytes required by the read.
        needed: usize,
        /// Bytes left in the input.
        remaining: usize,
    },

    /// A length-prefixed string did not contain valid UTF-8.
    #[error("invalid UTF-8 in string payload")]
    InvalidUtf8,

    /// An enum tag byte had no corresponding variant.
    #[error("invalid tag byte: {tag}")]
    InvalidTag {
        /// The offending tag value.
        tag: u8,
    },

    /// A length prefix exceeded what the format can represent.
    #[error("length {len} exceeds the u32 length prefix")]
    LengthOverflow {
        /// The offending length.
        len: usize,
    },
}
