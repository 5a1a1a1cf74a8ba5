//! Lists, tuples, sets, frozen sets and deques.
//!
//! A sequence is stored as a one-dimensional object array, so each element
//! lands in the reference arena and the dataset holds references to them.

use crate::error::{MarshalError, Result};
use crate::marshal::array::{array_attributes, element_value, read_array, write_array};
use crate::marshal::{attrs, base_attributes, wrong_family, Marshaller, MarshallerDescriptor};
use crate::model::{ArrayData, NdArray, SeqKind, Sequence, Value};
use crate::session::Session;
use crate::storage::NodeId;

const DEQUE_TAG: &str = "collections.deque";

pub struct SequenceMarshaller {
    descriptor: MarshallerDescriptor,
}

impl Default for SequenceMarshaller {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceMarshaller {
    pub fn new() -> Self {
        Self {
            descriptor: MarshallerDescriptor::new()
                .with_type("builtins.list", "list")
                .with_type("builtins.tuple", "tuple")
                .with_type("builtins.set", "set")
                .with_type("builtins.frozenset", "frozenset")
                .with_type(DEQUE_TAG, DEQUE_TAG),
        }
    }
}

fn to_array(value: &Value) -> Result<NdArray> {
    match value {
        Value::Seq(seq) => Ok(NdArray::from_data(ArrayData::Object(seq.items.clone()))),
        other => Err(wrong_family("sequence", other)),
    }
}

fn kind_for_tag(tag: &str) -> Option<SeqKind> {
    let kind = match tag {
        "list" => SeqKind::List,
        "tuple" => SeqKind::Tuple,
        "set" => SeqKind::Set,
        "frozenset" => SeqKind::FrozenSet,
        DEQUE_TAG => SeqKind::Deque,
        _ => return None,
    };
    Some(kind)
}

impl Marshaller for SequenceMarshaller {
    fn descriptor(&self) -> &MarshallerDescriptor {
        &self.descriptor
    }

    fn write(
        &self,
        session: &mut Session<'_>,
        parent: NodeId,
        name: &str,
        value: &Value,
    ) -> Result<Option<NodeId>> {
        write_array(session, parent, name, &to_array(value)?)
    }

    fn write_metadata(&self, session: &mut Session<'_>, node: NodeId, value: &Value) -> Result<()> {
        let mut set = base_attributes(session, &self.descriptor, value)?;
        array_attributes(session.options(), &to_array(value)?, &mut set);
        session.apply_attributes(node, set)
    }

    fn read(&self, session: &mut Session<'_>, node: NodeId) -> Result<Value> {
        let tag = session.python_string(node, attrs::TYPE)?.unwrap_or_default();
        let kind = kind_for_tag(&tag).ok_or_else(|| {
            MarshalError::corrupt(session.node_path(node), format!("unknown sequence tag {:?}", tag))
        })?;
        let array = read_array(session, node)?;
        let items = match array.data {
            ArrayData::Object(items) => items,
            data => (0..data.len())
                .map(|i| element_value(&data, i))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    MarshalError::corrupt(
                        session.node_path(node),
                        format!("cannot read sequence items from {}", data.kind().name()),
                    )
                })?,
        };
        Ok(Value::Seq(Sequence { kind, items }))
    }
}
