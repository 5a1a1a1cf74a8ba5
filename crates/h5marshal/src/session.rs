//! Per-operation marshalling context.
//!
//! A [`Session`] binds one storage handle, one [`Options`] bundle and the
//! reference arena for the duration of a top-level write or read. Marshallers
//! receive the session and call [`Session::write_data`] / [`Session::read_node`]
//! for nested values, so every level of a value goes through dispatch.

use tracing::{debug, warn};

use crate::error::{MarshalError, Result};
use crate::marshal::{attrs, AttributeSet, Marshaller};
use crate::materialize::ReferenceArena;
use crate::model::Value;
use crate::options::Options;
use crate::pathesc::join_path;
use crate::storage::{Attribute, NodeId, NodeKind, Storage};

/// Tag used to read a dataset with no usable metadata.
const FALLBACK_DATASET_TAG: &str = "numpy.ndarray";
/// Tag used to read a group with no usable metadata.
const FALLBACK_GROUP_TAG: &str = "dict";

pub struct Session<'a> {
    pub(crate) storage: &'a mut dyn Storage,
    options: &'a Options,
    pub(crate) arena: ReferenceArena,
}

impl<'a> Session<'a> {
    pub fn new(storage: &'a mut dyn Storage, options: &'a Options) -> Self {
        Self {
            storage,
            options,
            arena: ReferenceArena::new(options.reference_arena()),
        }
    }

    pub fn options(&self) -> &'a Options {
        self.options
    }

    pub fn storage(&self) -> &dyn Storage {
        &*self.storage
    }

    pub fn storage_mut(&mut self) -> &mut dyn Storage {
        &mut *self.storage
    }

    /// Arena slot names allocated so far.
    pub fn allocated_slots(&self) -> &[String] {
        self.arena.allocated()
    }

    /// Absolute path of a node, for diagnostics.
    pub fn node_path(&self, node: NodeId) -> String {
        self.storage
            .path(node)
            .unwrap_or_else(|_| format!("<node {}>", node.0))
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Writes `value` as child `name` of `parent`.
    ///
    /// Returns `None` when the value was dropped under the incompatible-value
    /// policy and nothing was written.
    pub fn write_data(
        &mut self,
        parent: NodeId,
        name: &str,
        value: &Value,
    ) -> Result<Option<NodeId>> {
        let options = self.options;
        let marshaller = options.marshallers().resolve_for_value(value)?;
        debug!(
            parent = %self.node_path(parent),
            name,
            type_path = %value.type_path(),
            "writing value"
        );
        let node = marshaller.write(self, parent, name, value)?;
        if let Some(node) = node {
            marshaller.write_metadata(self, node, value)?;
        }
        Ok(node)
    }

    /// Reads child `name` of `parent`.
    pub fn read_data(&mut self, parent: NodeId, name: &str) -> Result<Value> {
        match self.storage.child(parent, name)? {
            Some(node) => self.read_node(node),
            None => Err(MarshalError::LookupFailure {
                path: join_path(&self.node_path(parent), name),
            }),
        }
    }

    /// Reads a node, resolving its marshaller from the type tag, then the
    /// target class, then the node kind.
    pub fn read_node(&mut self, node: NodeId) -> Result<Value> {
        let options = self.options;
        let marshallers = options.marshallers();

        let tag = self.python_string(node, attrs::TYPE)?;
        if let Some(tag) = &tag {
            if let Some(marshaller) = marshallers.lookup_tag(tag) {
                debug!(path = %self.node_path(node), tag = %tag, "reading by type tag");
                return marshaller.read(self, node);
            }
        }

        let class = self.attribute_string(node, attrs::MATLAB_CLASS)?;
        if let Some(class) = &class {
            if let Some(marshaller) = marshallers.lookup_class(class) {
                debug!(path = %self.node_path(node), class = %class, "reading by target class");
                return marshaller.read(self, node);
            }
        }

        if let Some(tag) = tag {
            return Err(MarshalError::unsupported(format!("type tag {:?}", tag)));
        }

        let fallback = match self.storage.kind(node)? {
            NodeKind::Dataset => FALLBACK_DATASET_TAG,
            NodeKind::Group => FALLBACK_GROUP_TAG,
        };
        let marshaller = marshallers
            .lookup_tag(fallback)
            .ok_or_else(|| MarshalError::unsupported(format!("type tag {:?}", fallback)))?;
        debug!(path = %self.node_path(node), fallback, "reading without metadata");
        marshaller.read(self, node)
    }

    /// Resolves the marshaller that would write `value`, without writing.
    pub fn marshaller_for(&self, value: &Value) -> Result<std::sync::Arc<dyn Marshaller>> {
        self.options.marshallers().resolve_for_value(value)
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    pub fn attribute(&self, node: NodeId, key: &str) -> Result<Option<Attribute>> {
        Ok(self.storage.attribute(node, key)?)
    }

    pub fn attribute_string(&self, node: NodeId, key: &str) -> Result<Option<String>> {
        Ok(self
            .attribute(node, key)?
            .and_then(|a| a.as_str().map(str::to_string)))
    }

    /// Reads one of the `Python.*` attributes. These are ignored when the
    /// options do not store metadata.
    pub fn python_attribute(&self, node: NodeId, key: &str) -> Result<Option<Attribute>> {
        if !self.options.store_metadata() {
            return Ok(None);
        }
        self.attribute(node, key)
    }

    pub fn python_string(&self, node: NodeId, key: &str) -> Result<Option<String>> {
        Ok(self
            .python_attribute(node, key)?
            .and_then(|a| a.as_str().map(str::to_string)))
    }

    /// Replaces the vocabulary attributes of `node` with `set`: keys in the
    /// set are written, vocabulary keys missing from it are removed.
    pub fn apply_attributes(&mut self, node: NodeId, set: AttributeSet) -> Result<()> {
        for key in self.storage.attribute_names(node)? {
            if attrs::VOCABULARY.contains(&key.as_str()) && set.get(&key).is_none() {
                self.storage.delete_attribute(node, &key)?;
            }
        }
        for (key, value) in set.into_entries() {
            self.storage.set_attribute(node, &key, value)?;
        }
        Ok(())
    }

    /// Stamps `node` with the path of the group holding it in compat mode,
    /// and clears the stamp otherwise. Runs after the node's own metadata
    /// has been applied.
    pub(crate) fn record_parent_path(&mut self, node: NodeId, group: NodeId) -> Result<()> {
        if self.options.compat() {
            let path = self.storage.path(group)?;
            self.storage.set_attribute(node, attrs::H5PATH, Attribute::Str(path))?;
        } else {
            self.storage.delete_attribute(node, attrs::H5PATH)?;
        }
        Ok(())
    }

    // =========================================================================
    // Failure cleanup
    // =========================================================================

    /// Removes the target of a failed write and every arena slot it used.
    pub(crate) fn discard(&mut self, parent: NodeId, name: &str) {
        if let Ok(Some(_)) = self.storage.child(parent, name) {
            if let Err(err) = self.storage.delete(parent, name) {
                warn!(name, error = %err, "failed to remove partial write");
            }
        }
        let slots: Vec<String> = self.arena.allocated().to_vec();
        if let Ok(Some(group)) = self.storage.lookup(self.arena.path()) {
            for slot in &slots {
                if let Ok(Some(_)) = self.storage.child(group, slot) {
                    if let Err(err) = self.storage.delete(group, slot) {
                        warn!(slot = %slot, error = %err, "failed to remove arena slot");
                    }
                }
            }
        }
        debug!(name, slots = slots.len(), "discarded partial write");
    }
}
