//! Structure materialization and the reference arena.
//!
//! Object arrays cannot be stored as plain datasets. Each element is written
//! into the reference arena, a well-known group, under a freshly allocated
//! name, and the array itself is stored as a dataset of references to those
//! slots. Elements dropped under the incompatible-value policy point at the
//! shared canonical empty node instead, so the referencing array keeps its
//! shape.
//!
//! Structured aggregates become a group with one child per escaped field
//! name. A single-element aggregate stores each field value directly; a
//! multi-element one stores each field as an object array of the aggregate's
//! shape.

use rustc_hash::FxHashSet;
use tracing::trace;
use uuid::Uuid;

use crate::error::{MarshalError, Result};
use crate::limits::{ARENA_NAME_LEN, CANONICAL_EMPTY_NAME};
use crate::marshal::attrs;
use crate::model::{ArrayData, NdArray, StructArray, StructField, Value};
use crate::pathesc::{escape, join_path};
use crate::session::Session;
use crate::storage::{Attribute, DatasetFilters, NodeId, NodeRef, Storage};

/// Target class of the canonical empty node.
pub const CANONICAL_EMPTY_CLASS: &str = "canonical empty";

// =============================================================================
// ARENA
// =============================================================================

/// Allocator of slot names in the reference arena.
#[derive(Debug, Clone)]
pub struct ReferenceArena {
    path: String,
    allocated: Vec<String>,
    taken: FxHashSet<String>,
}

fn propose_name() -> String {
    let mut name = Uuid::new_v4().simple().to_string();
    name.truncate(ARENA_NAME_LEN);
    name
}

impl ReferenceArena {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            allocated: Vec::new(),
            taken: FxHashSet::default(),
        }
    }

    /// Absolute path of the arena group.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Slot names allocated by this arena, in allocation order.
    pub fn allocated(&self) -> &[String] {
        &self.allocated
    }

    /// Returns the arena group, creating it when missing.
    pub fn group(&self, storage: &mut dyn Storage) -> Result<NodeId> {
        Ok(storage.require_path(&self.path)?)
    }

    /// Allocates a fresh slot name. Returns the arena group and the name.
    pub fn allocate(&mut self, storage: &mut dyn Storage) -> Result<(NodeId, String)> {
        self.allocate_with(storage, propose_name)
    }

    /// Allocates with a caller-supplied name source, retrying until a name
    /// is neither stored nor already handed out.
    pub fn allocate_with(
        &mut self,
        storage: &mut dyn Storage,
        mut propose: impl FnMut() -> String,
    ) -> Result<(NodeId, String)> {
        let group = self.group(storage)?;
        loop {
            let name = propose();
            if name == CANONICAL_EMPTY_NAME
                || self.taken.contains(&name)
                || storage.child(group, &name)?.is_some()
            {
                trace!(name = %name, "arena name taken, retrying");
                continue;
            }
            trace!(arena = %self.path, name = %name, "allocated arena slot");
            self.taken.insert(name.clone());
            self.allocated.push(name.clone());
            return Ok((group, name));
        }
    }

    /// Reference to the canonical empty node, creating it when missing.
    pub fn canonical_empty(&self, storage: &mut dyn Storage) -> Result<NodeRef> {
        let group = self.group(storage)?;
        if let Some(node) = storage.child(group, CANONICAL_EMPTY_NAME)? {
            return Ok(storage.reference(node)?);
        }
        let node = storage.write_dataset(
            group,
            CANONICAL_EMPTY_NAME,
            &[2],
            &ArrayData::U64(vec![0, 0]),
            &DatasetFilters::default(),
        )?;
        storage.set_attribute(
            node,
            attrs::MATLAB_CLASS,
            Attribute::Str(CANONICAL_EMPTY_CLASS.into()),
        )?;
        storage.set_attribute(node, attrs::MATLAB_EMPTY, Attribute::Int(1))?;
        Ok(storage.reference(node)?)
    }
}

// =============================================================================
// OBJECT ARRAYS
// =============================================================================

/// Writes `items` into the arena and stores a reference dataset of `shape`
/// pointing at them as child `name` of `parent`.
pub fn write_object_array(
    session: &mut Session<'_>,
    parent: NodeId,
    name: &str,
    shape: &[usize],
    items: &[Value],
) -> Result<NodeId> {
    let options = session.options();
    let mut refs = Vec::with_capacity(items.len());
    for item in items {
        let (group, slot) = session.arena.allocate(&mut *session.storage)?;
        let reference = match session.write_data(group, &slot, item)? {
            Some(node) => session.storage.reference(node)?,
            None => session.arena.canonical_empty(&mut *session.storage)?,
        };
        refs.push(reference);
    }

    let data = ArrayData::Ref(refs);
    let filters = options.dataset_filters(data.len() * data.kind().item_size());
    Ok(session
        .storage
        .write_dataset(parent, name, shape, &data, &filters)?)
}

/// Resolves references and reads the nodes they point at. Null references
/// read as none.
pub fn read_object_array(session: &mut Session<'_>, refs: &[NodeRef]) -> Result<Vec<Value>> {
    let mut items = Vec::with_capacity(refs.len());
    for &reference in refs {
        if reference.is_null() {
            items.push(Value::none());
            continue;
        }
        let node = session.storage.dereference(reference)?;
        items.push(session.read_node(node)?);
    }
    Ok(items)
}

// =============================================================================
// STRUCTURED AGGREGATES
// =============================================================================

/// Deletes children of `group` that are not in `keep`. The reference arena
/// is never pruned.
pub fn prune_children(session: &mut Session<'_>, group: NodeId, keep: &FxHashSet<String>) -> Result<()> {
    let group_path = session.storage.path(group)?;
    for child in session.storage.children(group)? {
        if join_path(&group_path, &child) == session.arena.path() {
            continue;
        }
        if !keep.contains(&child) {
            trace!(child = %child, "deleting stale child");
            session.storage.delete(group, &child)?;
        }
    }
    Ok(())
}

/// Rejects field names that cannot become child names.
pub fn check_field_names(value: &StructArray) -> Result<()> {
    if value.fields.iter().any(|f| f.name.is_empty()) {
        return Err(MarshalError::IncompatibleValue {
            what: "structured aggregate".into(),
            reason: "empty field name".into(),
        });
    }
    Ok(())
}

/// Writes a structured aggregate as a group of escaped field children.
pub fn write_struct(
    session: &mut Session<'_>,
    parent: NodeId,
    name: &str,
    value: &StructArray,
) -> Result<NodeId> {
    check_field_names(value)?;
    let group = session.storage.require_group(parent, name)?;
    let single = value.size() == 1;
    let mut written = FxHashSet::default();
    for field in &value.fields {
        let child = escape(&field.name);
        let node = if single {
            let first = field.values.first().ok_or_else(|| MarshalError::ShapeMismatch {
                shape: value.shape.clone(),
                expected: 1,
                actual: 0,
            })?;
            session.write_data(group, &child, first)?
        } else {
            let column = NdArray::new(value.shape.clone(), ArrayData::Object(field.values.clone()))?;
            session.write_data(group, &child, &Value::Array(column))?
        };
        if let Some(node) = node {
            session.record_parent_path(node, group)?;
        }
        written.insert(child);
    }
    if session.options().delete_unused_children() {
        prune_children(session, group, &written)?;
    }
    Ok(group)
}

/// Reads the fields of a structured aggregate of `shape` from `group`.
///
/// Field element kinds of an empty aggregate are not recoverable; its
/// fields read back with no values.
pub fn read_struct(
    session: &mut Session<'_>,
    group: NodeId,
    shape: Vec<usize>,
    names: &[String],
) -> Result<StructArray> {
    let size = crate::model::shape_size(&shape);
    let mut fields = Vec::with_capacity(names.len());
    for name in names {
        let child = escape(name);
        let Some(node) = session.storage.child(group, &child)? else {
            return Err(MarshalError::corrupt(
                session.node_path(group),
                format!("field {:?} has no stored data", name),
            ));
        };
        let values = if size == 1 {
            vec![session.read_node(node)?]
        } else {
            match session.read_node(node)? {
                Value::Array(NdArray {
                    data: ArrayData::Object(items),
                    ..
                }) if items.len() == size => items,
                other => {
                    return Err(MarshalError::corrupt(
                        session.node_path(node),
                        format!(
                            "field {:?} should hold {} elements, found {}",
                            name,
                            size,
                            other.type_path()
                        ),
                    ));
                }
            }
        };
        fields.push(StructField {
            name: name.clone(),
            values,
        });
    }
    StructArray::new(shape, fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::storage::MemoryFile;

    #[test]
    fn test_allocate_retries_on_collision() {
        let mut file = MemoryFile::new();
        let mut arena = ReferenceArena::new("/#refs#");
        let group = arena.group(&mut file).unwrap();
        file.write_dataset(group, "aaaaaaaaaaaaaaaa", &[1], &ArrayData::U8(vec![1]), &DatasetFilters::default())
            .unwrap();

        let mut proposals = vec!["bbbbbbbbbbbbbbbb", "aaaaaaaaaaaaaaaa", "a", "bbbbbbbbbbbbbbbb"].into_iter();
        let (_, first) = arena
            .allocate_with(&mut file, || proposals.next().unwrap_or("cccccccccccccccc").to_string())
            .unwrap();
        assert_eq!(first, "bbbbbbbbbbbbbbbb");
        let (_, second) = arena
            .allocate_with(&mut file, || proposals.next().unwrap_or("cccccccccccccccc").to_string())
            .unwrap();
        assert_eq!(second, "cccccccccccccccc");
        assert_eq!(arena.allocated(), &["bbbbbbbbbbbbbbbb", "cccccccccccccccc"]);
    }

    #[test]
    fn test_generated_names_unique() {
        let mut file = MemoryFile::new();
        let mut arena = ReferenceArena::new("/#refs#");
        let mut seen = FxHashSet::default();
        for _ in 0..200 {
            let (_, name) = arena.allocate(&mut file).unwrap();
            assert_eq!(name.len(), ARENA_NAME_LEN);
            assert!(seen.insert(name));
        }
    }

    #[test]
    fn test_canonical_empty_created_once() {
        let mut file = MemoryFile::new();
        let arena = ReferenceArena::new("/#refs#");
        let first = arena.canonical_empty(&mut file).unwrap();
        let second = arena.canonical_empty(&mut file).unwrap();
        assert_eq!(first, second);

        let node = file.lookup("/#refs#/a").unwrap().unwrap();
        let (shape, data) = file.read_dataset(node).unwrap();
        assert_eq!(shape, vec![2]);
        assert_eq!(data, ArrayData::U64(vec![0, 0]));
        assert_eq!(
            file.attribute(node, attrs::MATLAB_CLASS).unwrap(),
            Some(Attribute::Str(CANONICAL_EMPTY_CLASS.into()))
        );
    }

    #[test]
    fn test_object_array_roundtrip() {
        let mut file = MemoryFile::new();
        let options = Options::new();
        let root = file.root();
        let items = vec![Value::Int(1), Value::str("two"), Value::none()];
        {
            let mut session = Session::new(&mut file, &options);
            write_object_array(&mut session, root, "objs", &[3, 1], &items).unwrap();
            assert_eq!(session.allocated_slots().len(), 3);
        }

        let node = file.lookup("/objs").unwrap().unwrap();
        let (shape, data) = file.read_dataset(node).unwrap();
        assert_eq!(shape, vec![3, 1]);
        let ArrayData::Ref(refs) = data else {
            panic!("expected references");
        };
        let slot = file.dereference(refs[0]).unwrap();
        assert_eq!(file.attribute(slot, attrs::H5PATH).unwrap(), None);

        let mut session = Session::new(&mut file, &options);
        assert_eq!(read_object_array(&mut session, &refs).unwrap(), items);
    }
}
