//! h5marshal: marshalling of rich values onto a hierarchical container.
//!
//! Values (scalars, text, mappings, sequences, multidimensional arrays,
//! structured records, calendar values and more) are written as a tree of
//! groups and datasets with small typed attributes, and read back into equal
//! values. An optional compat mode reshapes and re-encodes everything so that
//! a MATLAB 7.3 reader sees native arrays, cells and structs.
//!
//! # Quick Start
//!
//! ```rust
//! use h5marshal::{File, Options, Value};
//!
//! let mut file = File::create(Options::new());
//! let value = Value::dict([
//!     ("a", Value::Int(1)),
//!     ("b", Value::list([Value::Int(1), Value::Int(2), Value::Int(3)])),
//! ]);
//! file.write("/data", &value).unwrap();
//! assert_eq!(file.read("/data").unwrap(), value);
//!
//! // Serialize, with the 512-byte compat header in front.
//! let bytes = file.to_bytes();
//! let mut reopened = File::open_bytes(&bytes, Options::new()).unwrap();
//! assert_eq!(reopened.read("/data").unwrap(), value);
//! ```
//!
//! # Modules
//!
//! - [`model`]: the value model (`Value`, `NdArray`, `StructArray`, calendar types, `DType`)
//! - [`marshal`]: the `Marshaller` trait, the built-in marshallers and the registry
//! - [`compat`]: the compat-mode transform pipeline and its inverses
//! - [`materialize`]: reference arena and structured aggregate layout
//! - [`pathesc`]: reversible escaping of node names
//! - [`storage`]: the storage interface and the in-memory container
//! - [`codec`]: raw buffers and serialized container images
//! - [`file`]: top-level `write` / `read` and the `File` handle
//!
//! # Dispatch
//!
//! Writes resolve a marshaller from the value's type identity, most specific
//! type first, then by tier priority (builtin, plugin, user by default).
//! Reads resolve from the stored type tag, then the target class, then fall
//! back to reading datasets as arrays and groups as mappings.

pub mod codec;
pub mod compat;
pub mod error;
pub mod file;
pub mod limits;
pub mod marshal;
pub mod materialize;
pub mod model;
pub mod options;
pub mod pathesc;
pub mod plugins;
pub mod session;
pub mod storage;
pub mod util;

#[cfg(test)]
mod proptest_tests;

pub use error::{DecodeError, MarshalError, Result, StorageError};
pub use file::{read, reads, write, writes, File};
pub use marshal::{
    default_collection, reset_default_collection, update_default_collection, Marshaller,
    MarshallerCollection, MarshallerDescriptor,
};
pub use model::{
    ArrayData, Complex, Container, CustomValue, DType, ElementKind, MapKind, Mapping, NdArray,
    SeqKind, Sequence, StructArray, StructField, Value,
};
pub use options::{Compression, IncompatiblePolicy, OnedAs, Options, StrEncoding, Tier};
pub use pathesc::{escape, unescape, NodePath};
pub use plugins::{supported_marshaller_api_versions, MarshallerPlugin};
pub use session::Session;
pub use storage::{Attribute, MemoryFile, NodeId, NodeKind, NodeRef, Storage};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
