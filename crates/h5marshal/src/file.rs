//! Top-level write and read entry points, and an in-memory file handle.
//!
//! The free functions work on any [`Storage`]; [`File`] bundles a
//! [`MemoryFile`] with the options it was created with and offers a
//! dict-like view of the root group.

use std::time::SystemTime;

use tracing::{debug, warn};

use crate::codec::compat_header;
use crate::error::{MarshalError, Result};
use crate::model::Value;
use crate::options::Options;
use crate::pathesc::{join_path, process_path, unescape, NodePath};
use crate::session::Session;
use crate::storage::{MemoryFile, NodeId, Storage};

fn overlaps_arena(full: &str, arena: &str) -> bool {
    let inside = |outer: &str, inner: &str| {
        inner == outer || inner.starts_with(&join_path(outer, ""))
    };
    inside(arena, full) || inside(full, arena)
}

/// The outermost group on `path` that does not exist yet, as parent and name.
fn first_missing(storage: &dyn Storage, path: &str) -> Result<Option<(NodeId, String)>> {
    let mut node = storage.root();
    for part in path.split('/').filter(|p| !p.is_empty()) {
        match storage.child(node, part)? {
            Some(child) => node = child,
            None => return Ok(Some((node, part.to_string()))),
        }
    }
    Ok(None)
}

/// Writes `value` at `path`.
///
/// On failure nothing written by this call remains: the target, groups
/// created on the way to it and the arena slots it allocated are removed.
pub fn write(
    storage: &mut dyn Storage,
    path: impl Into<NodePath>,
    value: &Value,
    options: &Options,
) -> Result<()> {
    let (group_path, name) = process_path(&path.into());
    let full = join_path(&group_path, &name);
    if name == "." {
        return Err(MarshalError::InvalidPath {
            path: full,
            reason: "the root group cannot be replaced",
        });
    }
    if overlaps_arena(&full, options.reference_arena()) {
        return Err(MarshalError::InvalidPath {
            path: full,
            reason: "overlaps the reference arena",
        });
    }

    // Unsupported values fail before anything is created.
    options.marshallers().resolve_for_value(value)?;

    let created = first_missing(storage, &group_path)?;
    let parent = storage.require_path(&group_path)?;
    let mut session = Session::new(storage, options);
    match session.write_data(parent, &name, value) {
        Ok(_) => {
            debug!(path = %full, slots = session.allocated_slots().len(), "write complete");
            Ok(())
        }
        Err(err) => {
            session.discard(parent, &name);
            if let Some((outer, missing)) = created {
                if let Err(err) = session.storage_mut().delete(outer, &missing) {
                    warn!(group = %missing, error = %err, "failed to remove created group");
                }
            }
            Err(err)
        }
    }
}

/// Writes several values, stopping at the first failure.
pub fn writes<'v, P: Into<NodePath>>(
    storage: &mut dyn Storage,
    items: impl IntoIterator<Item = (P, &'v Value)>,
    options: &Options,
) -> Result<()> {
    for (path, value) in items {
        write(storage, path, value, options)?;
    }
    Ok(())
}

/// Reads the value stored at `path`.
pub fn read(storage: &mut dyn Storage, path: impl Into<NodePath>, options: &Options) -> Result<Value> {
    let full = path.into().to_escaped();
    let node = storage
        .lookup(&full)?
        .ok_or(MarshalError::LookupFailure { path: full })?;
    Session::new(storage, options).read_node(node)
}

/// Reads several values, stopping at the first failure.
pub fn reads<P: Into<NodePath>>(
    storage: &mut dyn Storage,
    paths: impl IntoIterator<Item = P>,
    options: &Options,
) -> Result<Vec<Value>> {
    paths
        .into_iter()
        .map(|path| read(storage, path, options))
        .collect()
}

// =============================================================================
// FILE
// =============================================================================

/// An in-memory container together with the options used to access it.
#[derive(Debug, Clone)]
pub struct File {
    storage: MemoryFile,
    options: Options,
}

impl File {
    /// Creates an empty file. Files created in compat mode carry the
    /// 512-byte compat header.
    pub fn create(options: Options) -> Self {
        let storage = if options.compat() {
            MemoryFile::with_userblock(compat_header(SystemTime::now()))
        } else {
            MemoryFile::new()
        };
        Self { storage, options }
    }

    /// Opens a serialized file image.
    pub fn open_bytes(bytes: &[u8], options: Options) -> Result<Self> {
        Ok(Self {
            storage: MemoryFile::from_bytes(bytes)?,
            options,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn storage(&self) -> &MemoryFile {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut MemoryFile {
        &mut self.storage
    }

    /// Serializes the file image.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.storage.to_bytes()
    }

    pub fn write(&mut self, path: impl Into<NodePath>, value: &Value) -> Result<()> {
        write(&mut self.storage, path, value, &self.options)
    }

    pub fn writes<'v, P: Into<NodePath>>(
        &mut self,
        items: impl IntoIterator<Item = (P, &'v Value)>,
    ) -> Result<()> {
        writes(&mut self.storage, items, &self.options)
    }

    pub fn read(&mut self, path: impl Into<NodePath>) -> Result<Value> {
        read(&mut self.storage, path, &self.options)
    }

    pub fn reads<P: Into<NodePath>>(&mut self, paths: impl IntoIterator<Item = P>) -> Result<Vec<Value>> {
        reads(&mut self.storage, paths, &self.options)
    }

    pub fn contains(&self, path: impl Into<NodePath>) -> Result<bool> {
        Ok(self.storage.lookup(&path.into().to_escaped())?.is_some())
    }

    /// Unescaped names of the values at the root, excluding the reference
    /// arena.
    pub fn names(&self) -> Result<Vec<String>> {
        let arena = self.options.reference_arena();
        let mut names = Vec::new();
        for child in self.storage.children(self.storage.root())? {
            if join_path("/", &child) == arena {
                continue;
            }
            names.push(unescape(&child)?);
        }
        Ok(names)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.names()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Deletes the value at `path`.
    pub fn delete(&mut self, path: impl Into<NodePath>) -> Result<()> {
        let (group_path, name) = process_path(&path.into());
        let full = join_path(&group_path, &name);
        if name == "." {
            return Err(MarshalError::InvalidPath {
                path: full,
                reason: "the root group cannot be deleted",
            });
        }
        let group = self
            .storage
            .lookup(&group_path)?
            .ok_or_else(|| MarshalError::LookupFailure { path: full.clone() })?;
        if self.storage.child(group, &name)?.is_none() {
            return Err(MarshalError::LookupFailure { path: full });
        }
        self.storage.delete(group, &name)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::has_compat_header;
    use crate::error::StorageError;
    use crate::model::ArrayData;
    use crate::storage::{Attribute, DatasetFilters, NodeRef};

    #[test]
    fn test_compat_file_has_header() {
        let mut file = File::create(Options::new());
        file.write("x", &Value::Int(1)).unwrap();
        let bytes = file.to_bytes();
        assert!(has_compat_header(&bytes));

        let mut reopened = File::open_bytes(&bytes, Options::new()).unwrap();
        assert_eq!(reopened.read("/x").unwrap(), Value::Int(1));

        let plain = File::create(Options::plain());
        assert!(!has_compat_header(&plain.to_bytes()));
    }

    #[test]
    fn test_names_skip_arena_and_unescape() {
        let mut file = File::create(Options::new());
        file.write(["a/b"], &Value::list([Value::Int(1)])).unwrap();
        file.write("plain", &Value::Float(1.0)).unwrap();
        assert!(file.contains("/#refs#").unwrap());
        assert_eq!(file.names().unwrap(), vec!["a/b".to_string(), "plain".to_string()]);
        assert_eq!(file.len().unwrap(), 2);
    }

    #[test]
    fn test_nested_path_creates_groups() {
        let mut file = File::create(Options::plain());
        file.write("/g/h/v", &Value::str("deep")).unwrap();
        assert_eq!(file.read("g/h/v").unwrap(), Value::str("deep"));
        assert_eq!(file.reads(["/g/h/v"]).unwrap(), vec![Value::str("deep")]);
    }

    #[test]
    fn test_reject_invalid_targets() {
        let mut file = File::create(Options::new());
        for path in ["/", "/#refs#", "/#refs#/slot"] {
            assert!(matches!(
                file.write(path, &Value::Int(1)),
                Err(MarshalError::InvalidPath { .. })
            ));
        }
    }

    #[test]
    fn test_failed_write_leaves_nothing() {
        let mut file = File::create(Options::new());
        let half = Value::Array(crate::model::NdArray::from_data(
            crate::model::ArrayData::F16(vec![0]),
        ));
        let value = Value::dict([("ok", Value::Int(1)), ("bad", half)]);
        assert!(matches!(
            file.write("/new/m", &value),
            Err(MarshalError::IncompatibleValue { .. })
        ));
        assert!(!file.contains("/new").unwrap());
    }

    #[test]
    fn test_delete_and_missing() {
        let mut file = File::create(Options::new());
        file.write("x", &Value::Int(1)).unwrap();
        file.delete("x").unwrap();
        assert!(matches!(file.read("x"), Err(MarshalError::LookupFailure { .. })));
        assert!(matches!(file.delete("x"), Err(MarshalError::LookupFailure { .. })));
    }

    #[test]
    fn test_repeated_overwrites_reopen() {
        let mut file = File::create(Options::new());
        let state = |i: i64| {
            Value::dict([
                ("n", Value::Int(i)),
                ("items", Value::list([Value::Int(i), Value::str("x")])),
            ])
        };
        for i in 0..300 {
            file.write("/state", &state(i)).unwrap();
        }
        assert!(file.storage().slab_len() > file.storage().node_count());

        let mut reopened = File::open_bytes(&file.to_bytes(), Options::new()).unwrap();
        assert_eq!(reopened.storage().slab_len(), reopened.storage().node_count());
        assert_eq!(reopened.read("/state").unwrap(), state(299));

        // the reopened image keeps working under further overwrites
        reopened.write("/state", &Value::Int(1)).unwrap();
        let again = File::open_bytes(&reopened.to_bytes(), Options::new()).unwrap();
        assert_eq!(again.storage().slab_len(), again.storage().node_count());
    }

    /// Storage that refuses to delete one name.
    struct StickyDelete {
        inner: MemoryFile,
        sticky: &'static str,
    }

    impl Storage for StickyDelete {
        fn root(&self) -> NodeId {
            self.inner.root()
        }

        fn kind(&self, node: NodeId) -> std::result::Result<crate::storage::NodeKind, StorageError> {
            self.inner.kind(node)
        }

        fn path(&self, node: NodeId) -> std::result::Result<String, StorageError> {
            self.inner.path(node)
        }

        fn child(&self, group: NodeId, name: &str) -> std::result::Result<Option<NodeId>, StorageError> {
            self.inner.child(group, name)
        }

        fn children(&self, group: NodeId) -> std::result::Result<Vec<String>, StorageError> {
            self.inner.children(group)
        }

        fn require_group(&mut self, parent: NodeId, name: &str) -> std::result::Result<NodeId, StorageError> {
            self.inner.require_group(parent, name)
        }

        fn write_dataset(
            &mut self,
            parent: NodeId,
            name: &str,
            shape: &[usize],
            data: &ArrayData,
            filters: &DatasetFilters,
        ) -> std::result::Result<NodeId, StorageError> {
            self.inner.write_dataset(parent, name, shape, data, filters)
        }

        fn read_dataset(&self, node: NodeId) -> std::result::Result<(Vec<usize>, ArrayData), StorageError> {
            self.inner.read_dataset(node)
        }

        fn attribute(&self, node: NodeId, key: &str) -> std::result::Result<Option<Attribute>, StorageError> {
            self.inner.attribute(node, key)
        }

        fn set_attribute(
            &mut self,
            node: NodeId,
            key: &str,
            value: Attribute,
        ) -> std::result::Result<(), StorageError> {
            self.inner.set_attribute(node, key, value)
        }

        fn delete_attribute(&mut self, node: NodeId, key: &str) -> std::result::Result<(), StorageError> {
            self.inner.delete_attribute(node, key)
        }

        fn attribute_names(&self, node: NodeId) -> std::result::Result<Vec<String>, StorageError> {
            self.inner.attribute_names(node)
        }

        fn delete(&mut self, parent: NodeId, name: &str) -> std::result::Result<(), StorageError> {
            if name == self.sticky {
                return Err(StorageError::RootDeletion);
            }
            self.inner.delete(parent, name)
        }

        fn reference(&self, node: NodeId) -> std::result::Result<NodeRef, StorageError> {
            self.inner.reference(node)
        }

        fn dereference(&self, reference: NodeRef) -> std::result::Result<NodeId, StorageError> {
            self.inner.dereference(reference)
        }
    }

    #[test]
    fn test_rollback_survives_delete_failure() {
        let mut storage = StickyDelete {
            inner: MemoryFile::new(),
            sticky: "m",
        };
        let options = Options::new();
        let half = Value::Array(crate::model::NdArray::from_data(ArrayData::F16(vec![0])));
        let value = Value::dict([
            ("ok", Value::list([Value::Int(1), Value::Int(2)])),
            ("bad", half),
        ]);
        let err = write(&mut storage, "/m", &value, &options).unwrap_err();
        assert!(matches!(err, MarshalError::IncompatibleValue { .. }));

        // the refused target stays, the arena slots it used are gone
        assert!(storage.lookup("/m").unwrap().is_some());
        let arena = storage.lookup(options.reference_arena()).unwrap().unwrap();
        let slots = storage.children(arena).unwrap();
        assert!(slots.iter().all(|s| s == crate::limits::CANONICAL_EMPTY_NAME));
    }

    #[test]
    fn test_batch_is_fail_fast() {
        let mut file = File::create(Options::new());
        let one = Value::Int(1);
        let half = Value::Array(crate::model::NdArray::from_data(
            crate::model::ArrayData::F16(vec![0]),
        ));
        let three = Value::Int(3);
        let result = file.writes([("a", &one), ("b", &half), ("c", &three)]);
        assert!(result.is_err());
        assert!(file.contains("a").unwrap());
        assert!(!file.contains("b").unwrap());
        assert!(!file.contains("c").unwrap());
    }
}
