//! Integer ranges and slices, stored as start/stop/step groups.
//!
//! Slice bounds may be absent; an absent bound is stored as none.

use crate::error::{MarshalError, Result};
use crate::marshal::mapping::{
    fields_attributes, int_field, optional_int_field, read_fields, write_fields,
};
use crate::marshal::{attrs, base_attributes, wrong_family, Marshaller, MarshallerDescriptor};
use crate::model::{RangeValue, SliceValue, Value};
use crate::session::Session;
use crate::storage::NodeId;

const FIELDS: [&str; 3] = ["start", "stop", "step"];

pub struct RangeMarshaller {
    descriptor: MarshallerDescriptor,
}

impl Default for RangeMarshaller {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeMarshaller {
    pub fn new() -> Self {
        Self {
            descriptor: MarshallerDescriptor::new()
                .with_type("builtins.range", "range")
                .with_type("builtins.slice", "slice"),
        }
    }
}

fn optional(bound: Option<i64>) -> Value {
    bound.map_or_else(Value::none, Value::Int)
}

fn components(value: &Value) -> Result<[Value; 3]> {
    match value {
        Value::Range(r) => Ok([Value::Int(r.start), Value::Int(r.stop), Value::Int(r.step)]),
        Value::Slice(s) => Ok([optional(s.start), optional(s.stop), optional(s.step)]),
        other => Err(wrong_family("range", other)),
    }
}

impl Marshaller for RangeMarshaller {
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
        let values = components(value)?;
        let fields: Vec<(&str, &Value)> = FIELDS.into_iter().zip(&values).collect();
        let (group, _) = write_fields(session, parent, name, &fields)?;
        Ok(Some(group))
    }

    fn write_metadata(&self, session: &mut Session<'_>, node: NodeId, value: &Value) -> Result<()> {
        components(value)?;
        let mut set = base_attributes(session, &self.descriptor, value)?;
        let names: Vec<String> = FIELDS.iter().map(|f| f.to_string()).collect();
        fields_attributes(session.options(), &names, &mut set);
        session.apply_attributes(node, set)
    }

    fn read(&self, session: &mut Session<'_>, node: NodeId) -> Result<Value> {
        let tag = session.python_string(node, attrs::TYPE)?;
        let values = read_fields(session, node, &FIELDS)?;
        match tag.as_deref() {
            Some("range") => {
                let step = int_field(session, node, "step", &values[2])?;
                if step == 0 {
                    return Err(MarshalError::corrupt(session.node_path(node), "range step is zero"));
                }
                Ok(Value::Range(RangeValue {
                    start: int_field(session, node, "start", &values[0])?,
                    stop: int_field(session, node, "stop", &values[1])?,
                    step,
                }))
            }
            Some("slice") => Ok(Value::Slice(SliceValue {
                start: optional_int_field(session, node, "start", &values[0])?,
                stop: optional_int_field(session, node, "stop", &values[1])?,
                step: optional_int_field(session, node, "step", &values[2])?,
            })),
            other => Err(MarshalError::corrupt(
                session.node_path(node),
                format!("unknown range tag {:?}", other),
            )),
        }
    }
}
