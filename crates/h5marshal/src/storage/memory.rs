//! In-process storage backend.
//!
//! Nodes live in a slab indexed by [`NodeId`]; a deleted node leaves a hole
//! so that outstanding references become dangling instead of silently
//! pointing at a different node. Dataset buffers are kept in their filtered
//! (shuffled, compressed, checksummed) byte form.

use std::collections::BTreeMap;

use tracing::debug;

use crate::codec::buffer::{decode_elements, encode_elements};
use crate::error::StorageError;
use crate::limits::USERBLOCK_SIZE;
use crate::model::{shape_size, ArrayData, ElementKind};
use crate::storage::filters;
use crate::storage::{Attribute, DatasetFilters, NodeId, NodeKind, NodeRef, Storage};

/// A dataset's stored form.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoredDataset {
    pub kind: ElementKind,
    pub shape: Vec<usize>,
    pub filters: DatasetFilters,
    /// Byte length before shuffle and compression.
    pub raw_len: usize,
    pub payload: Vec<u8>,
    pub checksum: Option<[u8; crate::limits::CHECKSUM_LEN]>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NodeBody {
    Group(BTreeMap<String, NodeId>),
    Dataset(StoredDataset),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub attrs: BTreeMap<String, Attribute>,
    pub body: NodeBody,
}

/// An in-memory hierarchical file.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryFile {
    pub(crate) nodes: Vec<Option<Node>>,
    pub(crate) userblock: Option<Vec<u8>>,
}

impl Default for MemoryFile {
    fn default() -> Self {
        Self::new()
    }
}

fn check_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(StorageError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Reference written in place of one whose target was deleted.
pub const DANGLING: NodeRef = NodeRef(u64::MAX);

fn holds_refs(kind: &ElementKind) -> bool {
    match kind {
        ElementKind::Ref => true,
        ElementKind::Compound(fields) => fields.iter().any(|(_, k)| holds_refs(k)),
        _ => false,
    }
}

fn remap_refs(data: ArrayData, moved: &impl Fn(NodeRef) -> NodeRef) -> ArrayData {
    match data {
        ArrayData::Ref(refs) => ArrayData::Ref(refs.into_iter().map(moved).collect()),
        ArrayData::Compound(fields) => ArrayData::Compound(
            fields
                .into_iter()
                .map(|(name, column)| (name, remap_refs(column, moved)))
                .collect(),
        ),
        other => other,
    }
}

impl MemoryFile {
    /// Creates an empty file holding only the root group.
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Node {
                name: String::new(),
                parent: None,
                attrs: BTreeMap::new(),
                body: NodeBody::Group(BTreeMap::new()),
            })],
            userblock: None,
        }
    }

    /// Creates an empty file whose serialized image starts with `userblock`.
    pub fn with_userblock(userblock: [u8; USERBLOCK_SIZE]) -> Self {
        let mut file = Self::new();
        file.userblock = Some(userblock.to_vec());
        file
    }

    pub fn userblock(&self) -> Option<&[u8]> {
        self.userblock.as_deref()
    }

    /// Number of live nodes, the root included.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node, StorageError> {
        self.nodes
            .get(id.0)
            .and_then(|n| n.as_ref())
            .ok_or(StorageError::DanglingReference { id: id.0 as u64 + 1 })
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, StorageError> {
        self.nodes
            .get_mut(id.0)
            .and_then(|n| n.as_mut())
            .ok_or(StorageError::DanglingReference { id: id.0 as u64 + 1 })
    }

    fn group_children(&self, id: NodeId) -> Result<&BTreeMap<String, NodeId>, StorageError> {
        match &self.node(id)?.body {
            NodeBody::Group(children) => Ok(children),
            NodeBody::Dataset(_) => Err(StorageError::NotAGroup {
                path: self.path(id)?,
            }),
        }
    }

    fn insert_child(&mut self, parent: NodeId, name: &str, body: NodeBody) -> Result<NodeId, StorageError> {
        self.group_children(parent)?;
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(Node {
            name: name.to_string(),
            parent: Some(parent),
            attrs: BTreeMap::new(),
            body,
        }));
        if let NodeBody::Group(children) = &mut self.node_mut(parent)?.body {
            children.insert(name.to_string(), id);
        }
        Ok(id)
    }

    fn remove_subtree(&mut self, id: NodeId) {
        let Some(Some(node)) = self.nodes.get_mut(id.0).map(Option::take) else {
            return;
        };
        if let NodeBody::Group(children) = node.body {
            for child in children.into_values() {
                self.remove_subtree(child);
            }
        }
    }

    fn encode_dataset(
        data: &ArrayData,
        shape: &[usize],
        pipeline: &DatasetFilters,
    ) -> Result<StoredDataset, StorageError> {
        let kind = data.kind();
        if data.len() != shape_size(shape) {
            return Err(StorageError::BufferSizeMismatch {
                expected: shape_size(shape).saturating_mul(kind.item_size()),
                actual: data.len().saturating_mul(kind.item_size()),
            });
        }
        let raw = encode_elements(data)?;
        let raw_len = raw.len();
        let payload = match pipeline.compression {
            Some(level) => {
                let staged = if pipeline.shuffle {
                    filters::shuffle(&raw, kind.item_size())
                } else {
                    raw
                };
                filters::compress(&staged, level)?
            }
            None => raw,
        };
        let checksum = pipeline.checksum.then(|| filters::checksum(&payload));
        Ok(StoredDataset {
            kind,
            shape: shape.to_vec(),
            filters: *pipeline,
            raw_len,
            payload,
            checksum,
        })
    }

    fn decode_dataset(&self, id: NodeId, stored: &StoredDataset) -> Result<ArrayData, StorageError> {
        if let Some(expected) = stored.checksum {
            if filters::checksum(&stored.payload) != expected {
                return Err(StorageError::ChecksumMismatch {
                    path: self.path(id)?,
                });
            }
        }
        let raw = match stored.filters.compression {
            Some(_) => {
                let staged = filters::decompress(&stored.payload, stored.raw_len)?;
                if stored.filters.shuffle {
                    filters::unshuffle(&staged, stored.kind.item_size())
                } else {
                    staged
                }
            }
            None => stored.payload.clone(),
        };
        decode_elements(&stored.kind, shape_size(&stored.shape), &raw)
    }

    /// Number of slots in the node table, deleted ones included.
    pub fn slab_len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns a copy with the holes left by deleted nodes squeezed out.
    ///
    /// Live nodes keep their relative order, so parents still precede their
    /// children. References stored in datasets are rewritten to the new ids;
    /// references to deleted nodes are rewritten to [`DANGLING`] so that they
    /// can never alias a node created later.
    pub fn compacted(&self) -> Result<MemoryFile, StorageError> {
        let mut remap = vec![None; self.nodes.len()];
        let mut next = 0usize;
        for (old, node) in self.nodes.iter().enumerate() {
            if node.is_some() {
                remap[old] = Some(NodeId(next));
                next += 1;
            }
        }
        let moved = |id: NodeId| remap.get(id.0).copied().flatten();
        let moved_ref = |reference: NodeRef| {
            if reference.is_null() {
                return reference;
            }
            usize::try_from(reference.0 - 1)
                .ok()
                .and_then(|old| moved(NodeId(old)))
                .map_or(DANGLING, |id| NodeRef(id.0 as u64 + 1))
        };

        let mut nodes = Vec::with_capacity(next);
        for (old, node) in self.nodes.iter().enumerate() {
            let Some(node) = node else { continue };
            let body = match &node.body {
                NodeBody::Group(children) => NodeBody::Group(
                    children
                        .iter()
                        .filter_map(|(name, &child)| moved(child).map(|c| (name.clone(), c)))
                        .collect(),
                ),
                NodeBody::Dataset(stored) if holds_refs(&stored.kind) => {
                    let data = remap_refs(self.decode_dataset(NodeId(old), stored)?, &moved_ref);
                    NodeBody::Dataset(Self::encode_dataset(&data, &stored.shape, &stored.filters)?)
                }
                NodeBody::Dataset(stored) => NodeBody::Dataset(stored.clone()),
            };
            nodes.push(Some(Node {
                name: node.name.clone(),
                parent: node.parent.and_then(moved),
                attrs: node.attrs.clone(),
                body,
            }));
        }
        debug!(before = self.nodes.len(), after = nodes.len(), "compacted node table");
        Ok(MemoryFile {
            nodes,
            userblock: self.userblock.clone(),
        })
    }

    /// Flips a payload byte of the dataset at `path`, for exercising checksums.
    #[cfg(test)]
    pub(crate) fn corrupt_payload(&mut self, path: &str) {
        if let Ok(Some(id)) = self.lookup(path) {
            if let Ok(node) = self.node_mut(id) {
                if let NodeBody::Dataset(stored) = &mut node.body {
                    if let Some(b) = stored.payload.first_mut() {
                        *b ^= 0xFF;
                    }
                }
            }
        }
    }
}

impl Storage for MemoryFile {
    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn kind(&self, node: NodeId) -> Result<NodeKind, StorageError> {
        Ok(match self.node(node)?.body {
            NodeBody::Group(_) => NodeKind::Group,
            NodeBody::Dataset(_) => NodeKind::Dataset,
        })
    }

    fn path(&self, node: NodeId) -> Result<String, StorageError> {
        let mut parts = Vec::new();
        let mut current = self.node(node)?;
        while let Some(parent) = current.parent {
            parts.push(current.name.as_str());
            current = self.node(parent)?;
        }
        if parts.is_empty() {
            return Ok("/".to_string());
        }
        parts.reverse();
        Ok(format!("/{}", parts.join("/")))
    }

    fn child(&self, group: NodeId, name: &str) -> Result<Option<NodeId>, StorageError> {
        Ok(self.group_children(group)?.get(name).copied())
    }

    fn children(&self, group: NodeId) -> Result<Vec<String>, StorageError> {
        Ok(self.group_children(group)?.keys().cloned().collect())
    }

    fn require_group(&mut self, parent: NodeId, name: &str) -> Result<NodeId, StorageError> {
        check_name(name)?;
        if let Some(existing) = self.child(parent, name)? {
            if self.kind(existing)? == NodeKind::Group {
                return Ok(existing);
            }
            self.delete(parent, name)?;
        }
        self.insert_child(parent, name, NodeBody::Group(BTreeMap::new()))
    }

    fn write_dataset(
        &mut self,
        parent: NodeId,
        name: &str,
        shape: &[usize],
        data: &ArrayData,
        filters: &DatasetFilters,
    ) -> Result<NodeId, StorageError> {
        check_name(name)?;
        let stored = Self::encode_dataset(data, shape, filters)?;
        if self.child(parent, name)?.is_some() {
            self.delete(parent, name)?;
        }
        self.insert_child(parent, name, NodeBody::Dataset(stored))
    }

    fn read_dataset(&self, node: NodeId) -> Result<(Vec<usize>, ArrayData), StorageError> {
        match &self.node(node)?.body {
            NodeBody::Dataset(stored) => {
                Ok((stored.shape.clone(), self.decode_dataset(node, stored)?))
            }
            NodeBody::Group(_) => Err(StorageError::NotADataset {
                path: self.path(node)?,
            }),
        }
    }

    fn attribute(&self, node: NodeId, key: &str) -> Result<Option<Attribute>, StorageError> {
        Ok(self.node(node)?.attrs.get(key).cloned())
    }

    fn set_attribute(
        &mut self,
        node: NodeId,
        key: &str,
        value: Attribute,
    ) -> Result<(), StorageError> {
        self.node_mut(node)?.attrs.insert(key.to_string(), value);
        Ok(())
    }

    fn delete_attribute(&mut self, node: NodeId, key: &str) -> Result<(), StorageError> {
        self.node_mut(node)?.attrs.remove(key);
        Ok(())
    }

    fn attribute_names(&self, node: NodeId) -> Result<Vec<String>, StorageError> {
        Ok(self.node(node)?.attrs.keys().cloned().collect())
    }

    fn delete(&mut self, parent: NodeId, name: &str) -> Result<(), StorageError> {
        let path = self.path(parent)?;
        let removed = match &mut self.node_mut(parent)?.body {
            NodeBody::Group(children) => children.remove(name),
            NodeBody::Dataset(_) => return Err(StorageError::NotAGroup { path }),
        };
        match removed {
            Some(id) => {
                self.remove_subtree(id);
                Ok(())
            }
            None => Err(StorageError::NotFound {
                path: format!("{}/{}", path.trim_end_matches('/'), name),
            }),
        }
    }

    fn reference(&self, node: NodeId) -> Result<NodeRef, StorageError> {
        self.node(node)?;
        Ok(NodeRef(node.0 as u64 + 1))
    }

    fn dereference(&self, reference: NodeRef) -> Result<NodeId, StorageError> {
        if reference.is_null() {
            return Err(StorageError::DanglingReference { id: 0 });
        }
        let id = NodeId((reference.0 - 1) as usize);
        self.node(id)?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filters(compress: bool) -> DatasetFilters {
        DatasetFilters {
            compression: compress.then_some(3),
            shuffle: compress,
            checksum: true,
        }
    }

    #[test]
    fn test_groups_and_paths() {
        let mut file = MemoryFile::new();
        let root = file.root();
        let a = file.require_group(root, "a").unwrap();
        let b = file.require_group(a, "b").unwrap();
        assert_eq!(file.path(b).unwrap(), "/a/b");
        assert_eq!(file.require_group(root, "a").unwrap(), a);
        assert_eq!(file.lookup("/a/b").unwrap(), Some(b));
        assert_eq!(file.lookup("/a/c").unwrap(), None);
        assert_eq!(file.require_path("/x/y").unwrap(), file.lookup("/x/y").unwrap().unwrap());
    }

    #[test]
    fn test_dataset_roundtrip_with_filters() {
        let mut file = MemoryFile::new();
        let root = file.root();
        let data = ArrayData::F64((0..5000).map(|i| i as f64).collect());
        for compress in [false, true] {
            let id = file
                .write_dataset(root, "d", &[50, 100], &data, &filters(compress))
                .unwrap();
            let (shape, back) = file.read_dataset(id).unwrap();
            assert_eq!(shape, vec![50, 100]);
            assert_eq!(back, data);
        }
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut file = MemoryFile::new();
        let root = file.root();
        let id = file
            .write_dataset(root, "d", &[3], &ArrayData::I32(vec![1, 2, 3]), &filters(false))
            .unwrap();
        file.corrupt_payload("/d");
        assert!(matches!(
            file.read_dataset(id),
            Err(StorageError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_overwrite_drops_attributes() {
        let mut file = MemoryFile::new();
        let root = file.root();
        let data = ArrayData::U8(vec![1]);
        let id = file.write_dataset(root, "d", &[1], &data, &DatasetFilters::default()).unwrap();
        file.set_attribute(id, "k", Attribute::Int(1)).unwrap();
        let id = file.write_dataset(root, "d", &[1], &data, &DatasetFilters::default()).unwrap();
        assert_eq!(file.attribute(id, "k").unwrap(), None);
    }

    #[test]
    fn test_references_dangle_after_delete() {
        let mut file = MemoryFile::new();
        let root = file.root();
        let g = file.require_group(root, "g").unwrap();
        let d = file
            .write_dataset(g, "d", &[1], &ArrayData::U8(vec![1]), &DatasetFilters::default())
            .unwrap();
        let r = file.reference(d).unwrap();
        assert_eq!(file.dereference(r).unwrap(), d);
        file.delete(root, "g").unwrap();
        assert!(file.dereference(r).is_err());
        assert!(file.dereference(NodeRef::NULL).is_err());
    }

    #[test]
    fn test_invalid_names() {
        let mut file = MemoryFile::new();
        let root = file.root();
        for name in ["", ".", "..", "a/b", "a\0"] {
            assert!(matches!(
                file.require_group(root, name),
                Err(StorageError::InvalidName { .. })
            ));
        }
    }

    #[test]
    fn test_delete_missing() {
        let mut file = MemoryFile::new();
        let root = file.root();
        assert!(matches!(file.delete(root, "nope"), Err(StorageError::NotFound { .. })));
    }
}
