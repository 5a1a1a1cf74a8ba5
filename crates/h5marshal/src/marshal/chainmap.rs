//! Chained mappings, stored as an object array of their member mappings.

use crate::error::{MarshalError, Result};
use crate::marshal::array::{array_attributes, read_array, write_array};
use crate::marshal::{base_attributes, wrong_family, Marshaller, MarshallerDescriptor};
use crate::model::{ArrayData, NdArray, Value};
use crate::session::Session;
use crate::storage::NodeId;

const CHAINMAP_TAG: &str = "collections.ChainMap";

pub struct ChainMapMarshaller {
    descriptor: MarshallerDescriptor,
}

impl Default for ChainMapMarshaller {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainMapMarshaller {
    pub fn new() -> Self {
        Self {
            descriptor: MarshallerDescriptor::new().with_type(CHAINMAP_TAG, CHAINMAP_TAG),
        }
    }
}

fn to_array(value: &Value) -> Result<NdArray> {
    match value {
        Value::ChainMap(maps) => Ok(NdArray::from_data(ArrayData::Object(
            maps.iter().cloned().map(Value::Map).collect(),
        ))),
        other => Err(wrong_family("chain map", other)),
    }
}

impl Marshaller for ChainMapMarshaller {
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
        let array = read_array(session, node)?;
        let ArrayData::Object(items) = array.data else {
            return Err(MarshalError::corrupt(
                session.node_path(node),
                "chain map members are not stored as references",
            ));
        };
        let mut maps = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::Map(map) => maps.push(map),
                other => {
                    return Err(MarshalError::corrupt(
                        session.node_path(node),
                        format!("chain map member is a {}", other.type_path()),
                    ));
                }
            }
        }
        Ok(Value::ChainMap(maps))
    }
}
