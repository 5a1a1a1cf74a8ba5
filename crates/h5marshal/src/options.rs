//! Marshalling options.
//!
//! [`Options`] is an immutable bundle threaded through every write and read.
//! It is built once with the `with_*` methods and never changes during an
//! operation.
//!
//! Compat mode is a preset over several sub-flags. Turning it on forces all
//! of them on; turning any of them off turns compat mode off:
//!
//! - rank promotion to at least 2 (`make_atleast_2d`)
//! - axis reversal (`reverse_dimension_order`)
//! - text narrowed to UTF-16 where possible, byte strings widened to UTF-16
//! - booleans stored as `uint8`
//! - empty arrays stored as their shape
//! - structured aggregates stored as groups
//! - deletion of stale children when a group is overwritten
//! - complex field names `("real", "imag")`

use std::fmt;
use std::sync::Arc;

use crate::limits::{DEFAULT_COMPRESSION_LEVEL, DEFAULT_COMPRESSION_THRESHOLD};
use crate::marshal::registry::{default_collection, MarshallerCollection};
use crate::storage::DatasetFilters;

/// What to do with a value the compat consumer cannot represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncompatiblePolicy {
    /// Write it anyway, without a target class.
    Emit,
    /// Skip it; inside containers it is replaced by the canonical empty.
    Drop,
    /// Fail with [`crate::MarshalError::IncompatibleValue`].
    #[default]
    Raise,
}

/// Where rank promotion puts the new unit axis of a one-dimensional array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnedAs {
    /// `(n,)` becomes `(1, n)`.
    #[default]
    Leading,
    /// `(n,)` becomes `(n, 1)`.
    Trailing,
}

/// Code unit width used for stored text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrEncoding {
    /// 16-bit units when every code point fits in one, else 32-bit.
    #[default]
    Utf16OrWider,
    /// 16-bit units; text outside the BMP is an encoding error.
    Utf16Strict,
    /// Text is kept as 32-bit code points.
    Utf32,
}

/// Marshaller tiers, in default priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    Builtin,
    Plugin,
    User,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Builtin, Tier::Plugin, Tier::User];

    pub(crate) fn index(self) -> usize {
        match self {
            Tier::Builtin => 0,
            Tier::Plugin => 1,
            Tier::User => 2,
        }
    }
}

/// Dataset compression settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compression {
    pub enabled: bool,
    /// zstd level.
    pub level: i32,
    /// Raw byte size at or above which a dataset is compressed.
    pub threshold: usize,
    pub shuffle: bool,
}

impl Default for Compression {
    fn default() -> Self {
        Self {
            enabled: true,
            level: DEFAULT_COMPRESSION_LEVEL,
            threshold: DEFAULT_COMPRESSION_THRESHOLD,
            shuffle: true,
        }
    }
}

impl Compression {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

const COMPAT_COMPLEX_NAMES: (&str, &str) = ("real", "imag");
const PLAIN_COMPLEX_NAMES: (&str, &str) = ("r", "i");

/// Options controlling how values are written and read.
#[derive(Clone)]
pub struct Options {
    store_metadata: bool,
    compat: bool,
    make_atleast_2d: bool,
    reverse_dimension_order: bool,
    str_encoding: StrEncoding,
    bytes_to_utf16: bool,
    bools_to_u8: bool,
    store_shape_for_empty: bool,
    structs_as_groups: bool,
    delete_unused_children: bool,
    structs_as_dicts: bool,
    incompatible_policy: IncompatiblePolicy,
    oned_as: OnedAs,
    complex_names: (String, String),
    reference_arena: String,
    dict_names: (String, String),
    compression: Compression,
    checksum_compressed: bool,
    checksum_uncompressed: bool,
    marshallers: Arc<MarshallerCollection>,
}

impl Default for Options {
    fn default() -> Self {
        Self::plain().with_compat(true)
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("store_metadata", &self.store_metadata)
            .field("compat", &self.compat)
            .field("make_atleast_2d", &self.make_atleast_2d)
            .field("reverse_dimension_order", &self.reverse_dimension_order)
            .field("str_encoding", &self.str_encoding)
            .field("bytes_to_utf16", &self.bytes_to_utf16)
            .field("bools_to_u8", &self.bools_to_u8)
            .field("store_shape_for_empty", &self.store_shape_for_empty)
            .field("structs_as_groups", &self.structs_as_groups)
            .field("delete_unused_children", &self.delete_unused_children)
            .field("structs_as_dicts", &self.structs_as_dicts)
            .field("incompatible_policy", &self.incompatible_policy)
            .field("oned_as", &self.oned_as)
            .field("complex_names", &self.complex_names)
            .field("reference_arena", &self.reference_arena)
            .field("dict_names", &self.dict_names)
            .field("compression", &self.compression)
            .field("checksum_compressed", &self.checksum_compressed)
            .field("checksum_uncompressed", &self.checksum_uncompressed)
            .field("marshallers", &self.marshallers)
            .finish()
    }
}

impl Options {
    /// Creates the default options: compat mode on, metadata on.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options with compat mode and all of its sub-flags off.
    pub fn plain() -> Self {
        Self {
            store_metadata: true,
            compat: false,
            make_atleast_2d: false,
            reverse_dimension_order: false,
            str_encoding: StrEncoding::Utf32,
            bytes_to_utf16: false,
            bools_to_u8: false,
            store_shape_for_empty: false,
            structs_as_groups: true,
            delete_unused_children: false,
            structs_as_dicts: false,
            incompatible_policy: IncompatiblePolicy::default(),
            oned_as: OnedAs::default(),
            complex_names: (PLAIN_COMPLEX_NAMES.0.into(), PLAIN_COMPLEX_NAMES.1.into()),
            reference_arena: "/#refs#".into(),
            dict_names: ("keys".into(), "values".into()),
            compression: Compression::default(),
            checksum_compressed: true,
            checksum_uncompressed: false,
            marshallers: default_collection(),
        }
    }

    // =========================================================================
    // Builders
    // =========================================================================

    pub fn with_store_metadata(mut self, on: bool) -> Self {
        self.store_metadata = on;
        self
    }

    /// Switches compat mode. Switching it on forces every coupled sub-flag
    /// on; switching it off restores their plain defaults.
    pub fn with_compat(mut self, on: bool) -> Self {
        self.compat = on;
        self.make_atleast_2d = on;
        self.reverse_dimension_order = on;
        self.bytes_to_utf16 = on;
        self.bools_to_u8 = on;
        self.store_shape_for_empty = on;
        self.delete_unused_children = on;
        self.structs_as_groups = true;
        let names = if on {
            self.str_encoding = match self.str_encoding {
                StrEncoding::Utf32 => StrEncoding::Utf16OrWider,
                other => other,
            };
            COMPAT_COMPLEX_NAMES
        } else {
            self.str_encoding = StrEncoding::Utf32;
            PLAIN_COMPLEX_NAMES
        };
        self.complex_names = (names.0.into(), names.1.into());
        self
    }

    pub fn with_make_atleast_2d(mut self, on: bool) -> Self {
        self.make_atleast_2d = on;
        self.compat &= on;
        self
    }

    pub fn with_reverse_dimension_order(mut self, on: bool) -> Self {
        self.reverse_dimension_order = on;
        self.compat &= on;
        self
    }

    pub fn with_str_encoding(mut self, encoding: StrEncoding) -> Self {
        self.str_encoding = encoding;
        self.compat &= encoding != StrEncoding::Utf32;
        self
    }

    pub fn with_bytes_to_utf16(mut self, on: bool) -> Self {
        self.bytes_to_utf16 = on;
        self.compat &= on;
        self
    }

    pub fn with_bools_to_u8(mut self, on: bool) -> Self {
        self.bools_to_u8 = on;
        self.compat &= on;
        self
    }

    pub fn with_store_shape_for_empty(mut self, on: bool) -> Self {
        self.store_shape_for_empty = on;
        self.compat &= on;
        self
    }

    pub fn with_structs_as_groups(mut self, on: bool) -> Self {
        self.structs_as_groups = on;
        self.compat &= on;
        self
    }

    pub fn with_delete_unused_children(mut self, on: bool) -> Self {
        self.delete_unused_children = on;
        self.compat &= on;
        self
    }

    pub fn with_complex_names(mut self, real: impl Into<String>, imag: impl Into<String>) -> Self {
        self.complex_names = (real.into(), imag.into());
        self.compat &= self.complex_names.0 == COMPAT_COMPLEX_NAMES.0
            && self.complex_names.1 == COMPAT_COMPLEX_NAMES.1;
        self
    }

    pub fn with_structs_as_dicts(mut self, on: bool) -> Self {
        self.structs_as_dicts = on;
        self
    }

    pub fn with_incompatible_policy(mut self, policy: IncompatiblePolicy) -> Self {
        self.incompatible_policy = policy;
        self
    }

    pub fn with_oned_as(mut self, oned_as: OnedAs) -> Self {
        self.oned_as = oned_as;
        self
    }

    /// Sets the absolute path of the group holding indirectly stored elements.
    pub fn with_reference_arena(mut self, path: impl Into<String>) -> Self {
        self.reference_arena = crate::pathesc::normalize_path(&path.into());
        self
    }

    pub fn with_dict_names(mut self, keys: impl Into<String>, values: impl Into<String>) -> Self {
        self.dict_names = (keys.into(), values.into());
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_checksums(mut self, compressed: bool, uncompressed: bool) -> Self {
        self.checksum_compressed = compressed;
        self.checksum_uncompressed = uncompressed;
        self
    }

    /// Uses `marshallers` instead of the shared default collection.
    pub fn with_marshallers(mut self, marshallers: Arc<MarshallerCollection>) -> Self {
        self.marshallers = marshallers;
        self
    }

    /// Reorders marshaller tiers; earlier tiers win. Tiers left out keep
    /// their default relative order after the listed ones.
    pub fn with_priority(mut self, order: &[Tier]) -> Self {
        let mut collection = (*self.marshallers).clone();
        collection.set_priority(order);
        self.marshallers = Arc::new(collection);
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn store_metadata(&self) -> bool {
        self.store_metadata
    }

    pub fn compat(&self) -> bool {
        self.compat
    }

    pub fn make_atleast_2d(&self) -> bool {
        self.make_atleast_2d
    }

    pub fn reverse_dimension_order(&self) -> bool {
        self.reverse_dimension_order
    }

    pub fn str_encoding(&self) -> StrEncoding {
        self.str_encoding
    }

    pub fn bytes_to_utf16(&self) -> bool {
        self.bytes_to_utf16
    }

    pub fn bools_to_u8(&self) -> bool {
        self.bools_to_u8
    }

    pub fn store_shape_for_empty(&self) -> bool {
        self.store_shape_for_empty
    }

    pub fn structs_as_groups(&self) -> bool {
        self.structs_as_groups
    }

    pub fn delete_unused_children(&self) -> bool {
        self.delete_unused_children
    }

    pub fn structs_as_dicts(&self) -> bool {
        self.structs_as_dicts
    }

    pub fn incompatible_policy(&self) -> IncompatiblePolicy {
        self.incompatible_policy
    }

    pub fn oned_as(&self) -> OnedAs {
        self.oned_as
    }

    pub fn complex_names(&self) -> (&str, &str) {
        (&self.complex_names.0, &self.complex_names.1)
    }

    pub fn reference_arena(&self) -> &str {
        &self.reference_arena
    }

    pub fn dict_names(&self) -> (&str, &str) {
        (&self.dict_names.0, &self.dict_names.1)
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn marshallers(&self) -> &Arc<MarshallerCollection> {
        &self.marshallers
    }

    /// Filter pipeline for a dataset whose raw buffer is `raw_len` bytes.
    pub fn dataset_filters(&self, raw_len: usize) -> DatasetFilters {
        if self.compression.enabled && raw_len >= self.compression.threshold {
            DatasetFilters {
                compression: Some(self.compression.level),
                shuffle: self.compression.shuffle,
                checksum: self.checksum_compressed,
            }
        } else {
            DatasetFilters {
                compression: None,
                shuffle: false,
                checksum: self.checksum_uncompressed,
            }
        }
    }
}
