//! Error types for marshalling, storage access and container image decoding.

use thiserror::Error;

/// Error raised while writing or reading values.
///
/// The first five variants form the marshalling taxonomy callers match on;
/// the remainder wrap lower layers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    /// A requested named value is absent at read time.
    #[error("could not find {path}")]
    LookupFailure { path: String },

    /// No marshaller matches a runtime value, stored type tag or target class.
    #[error("no marshaller for {what}")]
    UnsupportedType { what: String },

    /// A value cannot satisfy compatibility constraints and the policy is to raise.
    #[error("{what} is not compatible with the target consumer: {reason}")]
    IncompatibleValue { what: String, reason: String },

    /// Text cannot be represented in the required encoding.
    #[error("cannot encode text as {encoding}: {reason}")]
    Encoding {
        encoding: &'static str,
        reason: String,
    },

    /// Stored attributes are internally inconsistent.
    #[error("corrupt metadata at {path}: {reason}")]
    CorruptMetadata { path: String, reason: String },

    #[error("invalid escape sequence in {name:?}")]
    InvalidEscape { name: String },

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("shape {shape:?} needs {expected} elements but the buffer holds {actual}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("unsupported marshaller API version {version:?}")]
    UnsupportedApiVersion { version: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl MarshalError {
    /// Shorthand for [`MarshalError::CorruptMetadata`].
    pub fn corrupt(path: impl Into<String>, reason: impl Into<String>) -> Self {
        MarshalError::CorruptMetadata {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`MarshalError::UnsupportedType`].
    pub fn unsupported(what: impl Into<String>) -> Self {
        MarshalError::UnsupportedType { what: what.into() }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MarshalError>;

/// Error raised by a storage backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("no node at {path}")]
    NotFound { path: String },

    #[error("{path} is not a group")]
    NotAGroup { path: String },

    #[error("{path} is not a dataset")]
    NotADataset { path: String },

    #[error("invalid node name {name:?}")]
    InvalidName { name: String },

    #[error("reference {id} does not resolve to a node")]
    DanglingReference { id: u64 },

    #[error("checksum mismatch reading {path}")]
    ChecksumMismatch { path: String },

    #[error("zstd compression failed: {0}")]
    CompressionFailed(String),

    #[error("zstd decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("buffer holds {actual} bytes but {expected} were expected")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("element kind {kind} cannot be stored directly")]
    UnstorableElementKind { kind: String },

    #[error("the root group cannot be deleted")]
    RootDeletion,
}

/// Error while decoding a serialized container image.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("invalid magic bytes: expected H5MF, found {found:?}")]
    InvalidMagic { found: [u8; 4] },

    #[error("unsupported image version: {version}")]
    UnsupportedVersion { version: u8 },

    #[error("unexpected end of input while reading {context}")]
    UnexpectedEof { context: &'static str },

    #[error("varint exceeds maximum length (10 bytes)")]
    VarintTooLong,

    #[error("varint overflow (value exceeds u64)")]
    VarintOverflow,

    #[error("{field} length {len} exceeds maximum {max}")]
    LengthExceedsLimit {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("invalid {context} tag: {tag}")]
    InvalidTag { context: &'static str, tag: u8 },

    #[error("malformed image: {context}")]
    Malformed { context: &'static str },
}
