//! Hierarchical node/attribute storage.
//!
//! [`Storage`] is the interface the marshalling layer consumes: groups of
//! uniquely named children, datasets holding typed buffers, small attributes
//! on every node, and references that resolve back to nodes.
//! [`MemoryFile`] is the in-process implementation used by [`crate::File`].

pub mod filters;
pub mod memory;

pub use memory::MemoryFile;

use crate::error::StorageError;
use crate::model::ArrayData;

/// Handle to a live node in one storage instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// Persistent reference to a node, storable inside datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(pub u64);

impl NodeRef {
    /// The reference that points nowhere.
    pub const NULL: NodeRef = NodeRef(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Kind of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Group,
    Dataset,
}

/// A small typed metadata value attached to a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Str(String),
    Int(i64),
    U64Array(Vec<u64>),
    StrArray(Vec<String>),
}

impl Attribute {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attribute::Int(v) => Some(*v),
            Attribute::U64Array(v) if v.len() == 1 => i64::try_from(v[0]).ok(),
            _ => None,
        }
    }

    pub fn as_u64_array(&self) -> Option<&[u64]> {
        match self {
            Attribute::U64Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str_array(&self) -> Option<&[String]> {
        match self {
            Attribute::StrArray(v) => Some(v),
            _ => None,
        }
    }
}

/// Per-dataset filter pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DatasetFilters {
    /// zstd level, when compressing.
    pub compression: Option<i32>,
    /// Byte-shuffle before compressing.
    pub shuffle: bool,
    /// Store and verify a checksum of the stored bytes.
    pub checksum: bool,
}

/// Storage backend consumed by the marshalling layer.
///
/// Names passed in are single, already escaped path components.
pub trait Storage {
    fn root(&self) -> NodeId;

    fn kind(&self, node: NodeId) -> Result<NodeKind, StorageError>;

    /// Absolute path of a node.
    fn path(&self, node: NodeId) -> Result<String, StorageError>;

    fn child(&self, group: NodeId, name: &str) -> Result<Option<NodeId>, StorageError>;

    /// Child names of a group, in storage order.
    fn children(&self, group: NodeId) -> Result<Vec<String>, StorageError>;

    /// Returns the group named `name`, creating it (or replacing a dataset
    /// of that name) when needed.
    fn require_group(&mut self, parent: NodeId, name: &str) -> Result<NodeId, StorageError>;

    /// Creates or overwrites a dataset. An overwritten node loses its attributes.
    fn write_dataset(
        &mut self,
        parent: NodeId,
        name: &str,
        shape: &[usize],
        data: &ArrayData,
        filters: &DatasetFilters,
    ) -> Result<NodeId, StorageError>;

    /// Reads a dataset's shape and elements.
    fn read_dataset(&self, node: NodeId) -> Result<(Vec<usize>, ArrayData), StorageError>;

    fn attribute(&self, node: NodeId, key: &str) -> Result<Option<Attribute>, StorageError>;

    fn set_attribute(
        &mut self,
        node: NodeId,
        key: &str,
        value: Attribute,
    ) -> Result<(), StorageError>;

    fn delete_attribute(&mut self, node: NodeId, key: &str) -> Result<(), StorageError>;

    fn attribute_names(&self, node: NodeId) -> Result<Vec<String>, StorageError>;

    /// Deletes a child and everything below it.
    fn delete(&mut self, parent: NodeId, name: &str) -> Result<(), StorageError>;

    fn reference(&self, node: NodeId) -> Result<NodeRef, StorageError>;

    fn dereference(&self, reference: NodeRef) -> Result<NodeId, StorageError>;

    /// Resolves an absolute, already escaped path.
    fn lookup(&self, path: &str) -> Result<Option<NodeId>, StorageError> {
        let mut node = self.root();
        for part in path.split('/').filter(|p| !p.is_empty() && *p != ".") {
            if self.kind(node)? != NodeKind::Group {
                return Ok(None);
            }
            match self.child(node, part)? {
                Some(child) => node = child,
                None => return Ok(None),
            }
        }
        Ok(Some(node))
    }

    /// Resolves an absolute path to a group, creating missing groups.
    fn require_path(&mut self, path: &str) -> Result<NodeId, StorageError> {
        let mut node = self.root();
        for part in path.split('/').filter(|p| !p.is_empty() && *p != ".") {
            node = self.require_group(node, part)?;
        }
        Ok(node)
    }
}
