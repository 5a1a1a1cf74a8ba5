//! Element type descriptors, stored as their textual literal.

use crate::error::{MarshalError, Result};
use crate::marshal::array::{array_attributes, read_array, write_array};
use crate::marshal::{base_attributes, wrong_family, Marshaller, MarshallerDescriptor};
use crate::model::{ArrayData, DType, NdArray, Value};
use crate::session::Session;
use crate::storage::NodeId;

pub struct DTypeMarshaller {
    descriptor: MarshallerDescriptor,
}

impl Default for DTypeMarshaller {
    fn default() -> Self {
        Self::new()
    }
}

impl DTypeMarshaller {
    pub fn new() -> Self {
        Self {
            descriptor: MarshallerDescriptor::new().with_type("numpy.dtype", "numpy.dtype"),
        }
    }
}

fn to_array(value: &Value) -> Result<NdArray> {
    match value {
        Value::DType(dtype) => {
            NdArray::scalar(ArrayData::from_byte_strs(&[dtype.to_literal().into_bytes()]))
        }
        other => Err(wrong_family("dtype", other)),
    }
}

impl Marshaller for DTypeMarshaller {
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
        let literal = array
            .data
            .byte_strings()
            .and_then(|b| b.into_iter().next())
            .and_then(|b| String::from_utf8(b).ok())
            .ok_or_else(|| {
                MarshalError::corrupt(session.node_path(node), "dtype literal is not UTF-8 text")
            })?;
        DType::parse_literal(&literal)
            .map(Value::DType)
            .map_err(|e| MarshalError::corrupt(session.node_path(node), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DTypeField, ElementKind};
    use crate::options::Options;
    use crate::storage::{MemoryFile, Storage};

    #[test]
    fn test_dtype_roundtrip() {
        let values = [
            DType::Scalar(ElementKind::F64),
            DType::Scalar(ElementKind::Str(4)),
            DType::Record(vec![
                DTypeField {
                    name: "x".into(),
                    dtype: DType::Scalar(ElementKind::I32),
                    shape: Vec::new(),
                },
                DTypeField {
                    name: "y".into(),
                    dtype: DType::Scalar(ElementKind::U8),
                    shape: vec![3],
                },
            ]),
        ];
        for options in [Options::new(), Options::plain()] {
            let mut file = MemoryFile::new();
            let root = file.root();
            let mut session = Session::new(&mut file, &options);
            for dtype in &values {
                let value = Value::DType(dtype.clone());
                session.write_data(root, "d", &value).unwrap();
                assert_eq!(session.read_data(root, "d").unwrap(), value);
            }
        }
    }
}
