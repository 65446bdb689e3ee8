//! The object model.
//!
//! Every stored type implements [`Object`]: a stable container name, a
//! small numeric type id for O(1) registry lookup, access to the
//! container-assigned `id` field, its wire form, and the secondary index
//! descriptors.

use crate::index::IndexKey;
use undodb_codec::{CodecResult, Decoder, Encoder};

/// A value type stored in a multi-index container.
///
/// The `id` field is assigned by the container at insertion, strictly
/// increasing from 0, and must never be changed by user code; a modifier
/// that changes it is reported as an error.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Debug, Clone, Default, PartialEq)]
/// struct Account {
///     id: u64,
///     name: String,
///     balance: i64,
/// }
///
/// impl Object for Account {
///     const TYPE_NAME: &'static str = "account";
///     const TYPE_ID: u16 = 1;
///
///     fn id(&self) -> u64 { self.id }
///     fn set_id(&mut self, id: u64) { self.id = id; }
///
///     fn encode(&self, enc: &mut Encoder) {
///         enc.write_u64(self.id);
///         enc.write_str(&self.name);
///         enc.write_i64(self.balance);
///     }
///
///     fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
///         Ok(Self {
///             id: dec.read_u64()?,
///             name: dec.read_string()?,
///             balance: dec.read_i64()?,
///         })
///     }
///
///     fn secondary_indices() -> &'static [IndexDef<Self>] {
///         &[IndexDef {
///             name: "by_name",
///             key: |a| IndexKey::from_str(&a.name),
///         }]
///     }
/// }
/// ```
pub trait Object: Clone + Default + Send + Sync + 'static {
    /// Stable name identifying this type's container in the segment.
    const TYPE_NAME: &'static str;

    /// Small integer used for constant-time container lookup. Must be
    /// unique within one database.
    const TYPE_ID: u16;

    /// The container-assigned primary key.
    fn id(&self) -> u64;

    /// Sets the primary key. Called by the container only.
    fn set_id(&mut self, id: u64);

    /// Writes the wire form.
    fn encode(&self, enc: &mut Encoder);

    /// Reads the wire form.
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self>;

    /// Secondary ordered-unique index descriptors, in index order.
    /// Index 0 is always the primary index by `id`; the first descriptor
    /// here is index 1, and so on.
    fn secondary_indices() -> &'static [IndexDef<Self>];
}

/// Descriptor of one secondary ordered-unique index.
pub struct IndexDef<T> {
    /// Index name, used in `get_by_name` lookups and error messages.
    pub name: &'static str,
    /// Extracts the ordering key from a value.
    pub key: fn(&T) -> IndexKey,
}

impl<T> std::fmt::Debug for IndexDef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDef").field("name", &self.name).finish()
    }
}
