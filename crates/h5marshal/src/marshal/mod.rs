//! Marshallers: one implementation per family of values.
//!
//! A [`Marshaller`] writes values of the runtime types it declares and reads
//! nodes carrying the type tags and target classes it declares. Nested values
//! are always written through [`Session::write_data`] so that the registry
//! picks their marshaller at every depth.

pub mod array;
pub mod chainmap;
pub mod dtype;
pub mod fraction;
pub mod mapping;
pub mod range;
pub mod registry;
pub mod scalar;
pub mod sentinel;
pub mod sequence;
pub mod temporal;
pub mod text;

pub use registry::{
    default_collection, reset_default_collection, update_default_collection,
    MarshallerCollection,
};

use crate::error::{MarshalError, Result};
use crate::model::Value;
use crate::session::Session;
use crate::storage::{Attribute, NodeId};

/// Attribute vocabulary.
pub mod attrs {
    pub const TYPE: &str = "Python.Type";
    pub const SHAPE: &str = "Python.Shape";
    pub const EMPTY: &str = "Python.Empty";
    pub const FIELDS: &str = "Python.Fields";
    pub const UNDERLYING_TYPE: &str = "Python.numpy.UnderlyingType";
    pub const CONTAINER: &str = "Python.numpy.Container";
    pub const DICT_STORED_AS: &str = "Python.dict.StoredAs";
    pub const DICT_KEY_VALUE_NAMES: &str = "Python.dict.keys_values_names";
    pub const DICT_KEY_STR_TYPES: &str = "Python.dict.key_str_types";
    pub const MATLAB_CLASS: &str = "MATLAB_class";
    pub const MATLAB_EMPTY: &str = "MATLAB_empty";
    pub const MATLAB_INT_DECODE: &str = "MATLAB_int_decode";
    pub const MATLAB_FIELDS: &str = "MATLAB_fields";
    pub const H5PATH: &str = "H5PATH";

    /// Every key this crate manages on the nodes it writes.
    pub const VOCABULARY: [&str; 14] = [
        TYPE,
        SHAPE,
        EMPTY,
        FIELDS,
        UNDERLYING_TYPE,
        CONTAINER,
        DICT_STORED_AS,
        DICT_KEY_VALUE_NAMES,
        DICT_KEY_STR_TYPES,
        MATLAB_CLASS,
        MATLAB_EMPTY,
        MATLAB_INT_DECODE,
        MATLAB_FIELDS,
        H5PATH,
    ];
}

/// The types, tags and target classes a marshaller handles.
///
/// `types[i]` is written with tag `tags[i]`; reading any listed tag or class
/// selects this marshaller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarshallerDescriptor {
    pub types: Vec<String>,
    pub tags: Vec<String>,
    pub classes: Vec<String>,
    /// Optional runtime capabilities needed for full-fidelity reads.
    pub required_capabilities: Vec<String>,
}

impl MarshallerDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a runtime type identity and the tag it is written with.
    pub fn with_type(mut self, type_path: impl Into<String>, tag: impl Into<String>) -> Self {
        self.types.push(type_path.into());
        self.tags.push(tag.into());
        self
    }

    /// Declares a target-consumer class read by this marshaller.
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn requires(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.push(capability.into());
        self
    }

    /// Tag to record for `value`: the tag of the most specific type in its
    /// lineage that this marshaller declares.
    pub fn tag_for(&self, value: &Value) -> Option<&str> {
        value.lineage().iter().find_map(|type_path| {
            self.types
                .iter()
                .position(|t| t == type_path)
                .map(|i| self.tags[i].as_str())
        })
    }
}

/// An ordered set of attributes to attach to a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSet {
    entries: Vec<(String, Attribute)>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing an earlier value.
    pub fn set(&mut self, key: impl Into<String>, value: Attribute) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Attribute> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<Attribute> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<(String, Attribute)> {
        self.entries
    }
}

/// Writes and reads one family of values.
pub trait Marshaller: Send + Sync {
    fn descriptor(&self) -> &MarshallerDescriptor;

    /// Writes `value` as child `name` of `parent`. Returns `None` when the
    /// value was dropped under the incompatible-value policy.
    fn write(
        &self,
        session: &mut Session<'_>,
        parent: NodeId,
        name: &str,
        value: &Value,
    ) -> Result<Option<NodeId>>;

    /// Attaches the attributes describing `value` to `node`.
    fn write_metadata(&self, session: &mut Session<'_>, node: NodeId, value: &Value) -> Result<()>;

    fn read(&self, session: &mut Session<'_>, node: NodeId) -> Result<Value>;

    /// Reads `node` without the optional capabilities this marshaller needs,
    /// degrading instead of failing.
    fn read_approximate(&self, session: &mut Session<'_>, node: NodeId) -> Result<Value> {
        self.read(session, node)
    }
}

/// Starts the attribute set of a node: the type tag when metadata is stored.
pub fn base_attributes(
    session: &Session<'_>,
    descriptor: &MarshallerDescriptor,
    value: &Value,
) -> Result<AttributeSet> {
    let mut set = AttributeSet::new();
    if session.options().store_metadata() {
        let tag = descriptor
            .tag_for(value)
            .ok_or_else(|| MarshalError::unsupported(value.type_path()))?;
        set.set(attrs::TYPE, Attribute::Str(tag.to_string()));
    }
    Ok(set)
}

/// Error for a marshaller handed a value outside its family.
pub(crate) fn wrong_family(expected: &str, value: &Value) -> MarshalError {
    MarshalError::unsupported(format!("{} passed to the {} marshaller", value.type_path(), expected))
}

/// Registers the built-in marshallers into `collection`.
pub(crate) fn register_builtins(collection: &mut MarshallerCollection) {
    use std::sync::Arc;

    use crate::options::Tier;

    let builtins: Vec<Arc<dyn Marshaller>> = vec![
        Arc::new(scalar::ScalarMarshaller::new()),
        Arc::new(text::TextMarshaller::new()),
        Arc::new(sentinel::SentinelMarshaller::new()),
        Arc::new(array::ArrayMarshaller::new()),
        Arc::new(mapping::MappingMarshaller::new()),
        Arc::new(sequence::SequenceMarshaller::new()),
        Arc::new(temporal::TemporalMarshaller::new()),
        Arc::new(fraction::FractionMarshaller::new()),
        Arc::new(range::RangeMarshaller::new()),
        Arc::new(dtype::DTypeMarshaller::new()),
        Arc::new(chainmap::ChainMapMarshaller::new()),
    ];
    for marshaller in builtins {
        collection.register(marshaller, Tier::Builtin);
    }
}
