//! # UndoDB Codec
//!
//! Portable binary serialization for UndoDB.
//!
//! The wire format is deliberately simple and deterministic:
//! - integers are fixed-width big-endian; signed values are stored as
//!   their same-width two's-complement unsigned form
//! - strings and byte strings carry a `u32` length prefix
//! - `Option<T>` is a one-byte tag followed by the payload
//!
//! Both the [`Encoder`] and the [`Decoder`] feed a rolling CRC-32 as
//! bytes pass through, so journal records can checksum their payload
//! without a second pass.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod crc;
mod decoder;
mod encoder;
mod error;

pub use crc::{crc32, Crc32};
pub use decoder::Decoder;
pub use encoder::Encoder;
pub use error::{CodecError, CodecResult};

/// Types that can serialize themselves into an [`Encoder`].
pub trait Encode {
    /// Writes the binary form of `self` into the encoder.
    fn encode(&self, enc: &mut Encoder);
}

/// Types that can deserialize themselves from a [`Decoder`].
pub trait Decode: Sized {
    /// Reads a value of `Self` from the decoder.
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self>;
}

macro_rules! impl_codec_for_uint {
    ($($ty:ty => $write:ident, $read:ident;)*) => {
        $(
            impl Encode for $ty {
                fn encode(&self, enc: &mut Encoder) {
                    enc.$write(*self);
                }
            }

            impl Decode for $ty {
                fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
                    dec.$read()
                }
            }
        )*
    };
}

impl_codec_for_uint! {
    u8 => write_u8, read_u8;
    u16 => write_u16, read_u16;
    u32 => write_u32, read_u32;
    u64 => write_u64, read_u64;
    i8 => write_i8, read_i8;
    i16 => write_i16, read_i16;
    i32 => write_i32, read_i32;
    i64 => write_i64, read_i64;
}

impl Encode for bool {
    fn encode(&self, enc: &mut Encoder) {
        enc.write_bool(*self);
    }
}

impl Decode for bool {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        dec.read_bool()
    }
}

impl Encode for String {
    fn encode(&self, enc: &mut Encoder) {
        enc.write_str(self);
    }
}

impl Decode for String {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        dec.read_string()
    }
}

impl Encode for str {
    fn encode(&self, enc: &mut Encoder) {
        enc.write_str(self);
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, enc: &mut Encoder) {
        match self {
            Some(value) => {
                enc.write_u8(1);
                value.encode(enc);
            }
            None => enc.write_u8(0),
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        match dec.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(dec)?)),
            tag => Err(CodecError::InvalidTag { tag }),
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, enc: &mut Encoder) {
        enc.write_u32(self.len() as u32);
        for item in self {
            item.encode(enc);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        let count = dec.read_u32()? as usize;
        let mut out = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            out.push(T::decode(dec)?);
        }
        Ok(out)
    }
}
