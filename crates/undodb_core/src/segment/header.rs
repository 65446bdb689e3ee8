//! The fixed segment header.

use crate::environment::{Environment, ENVIRONMENT_SIZE};
use crate::error::{CoreError, CoreResult};
use std::path::Path;

/// Magic id at offset 0 ("BMULTIDB" as little-endian bytes).
pub const SEGMENT_MAGIC: u64 = 0x4277_554C_5449_4442;

/// Size of the reserved header region at the start of the segment.
pub const HEADER_SIZE: u32 = 384;

pub(crate) const DIRTY_OFFSET: u64 = 12;
pub(crate) const ENVIRONMENT_OFFSET: u64 = 13;

const _: () = assert!(ENVIRONMENT_OFFSET as usize + ENVIRONMENT_SIZE <= HEADER_SIZE as usize);

/// Decoded form of the fixed header.
#[derive(Debug, Clone)]
pub struct Header {
    /// Magic id; must equal [`SEGMENT_MAGIC`].
    pub magic: u64,
    /// Recorded header size; must equal [`HEADER_SIZE`].
    pub header_size: u32,
    /// Dirty flag: nonzero while a writable process holds the segment.
    pub dirty: bool,
    /// Fingerprint of the build that created the segment.
    pub environment: Environment,
}

impl Header {
    /// Returns a fresh, clean header for the running build.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: SEGMENT_MAGIC,
            header_size: HEADER_SIZE,
            dirty: false,
            environment: Environment::current(),
        }
    }

    /// Decodes a header from the first [`HEADER_SIZE`] bytes of a segment.
    ///
    /// # Errors
    ///
    /// Returns `BadHeader` when the buffer is too short, and maps the
    /// validation failures the same way opening does: magic or size
    /// mismatch is `IncorrectDbVersion`, an environment mismatch is
    /// `Incompatible`.
    pub fn decode(bytes: &[u8], path: &Path) -> CoreResult<Self> {
        if bytes.len() < HEADER_SIZE as usize {
            return Err(CoreError::bad_header(path));
        }

        let magic = u64::from_le_bytes(bytes[0..8].try_into().expect("8 bytes"));
        let header_size = u32::from_le_bytes(bytes[8..12].try_into().expect("4 bytes"));
        let dirty = bytes[DIRTY_OFFSET as usize] != 0;

        let mut env_bytes = [0u8; ENVIRONMENT_SIZE];
        env_bytes.copy_from_slice(
            &bytes[ENVIRONMENT_OFFSET as usize..ENVIRONMENT_OFFSET as usize + ENVIRONMENT_SIZE],
        );
        let environment = Environment::from_bytes(&env_bytes);

        Ok(Self {
            magic,
            header_size,
            dirty,
            environment,
        })
    }

    /// Validates the header against the running build.
    ///
    /// Returns the dirty flag on success.
    pub fn validate(&self, path: &Path) -> CoreResult<bool> {
        if self.magic != SEGMENT_MAGIC || self.header_size != HEADER_SIZE {
            return Err(CoreError::incorrect_db_version(path));
        }
        if self.environment != Environment::current() {
            return Err(CoreError::incompatible(path, self.environment.to_string()));
        }
        Ok(self.dirty)
    }

    /// Encodes the header into its on-disk form.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut out = [0u8; HEADER_SIZE as usize];
        out[0..8].copy_from_slice(&self.magic.to_le_bytes());
        out[8..12].copy_from_slice(&self.header_size.to_le_bytes());
        out[DIRTY_OFFSET as usize] = u8::from(self.dirty);
        out[ENVIRONMENT_OFFSET as usize..ENVIRONMENT_OFFSET as usize + ENVIRONMENT_SIZE]
            .copy_from_slice(&self.environment.to_bytes());
        out
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}
