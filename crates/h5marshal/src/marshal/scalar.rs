//! Booleans, integers, floats, complex numbers and object references.
//!
//! Each is written as a zero-dimensional array through the array pipeline,
//! so compat conversions (booleans to `uint8`, complex to a record) apply.

use crate::error::{MarshalError, Result};
use crate::marshal::array::{array_attributes, element_value, read_array, write_array};
use crate::marshal::{attrs, base_attributes, wrong_family, Marshaller, MarshallerDescriptor};
use crate::model::{ArrayData, Complex, NdArray, Value};
use crate::session::Session;
use crate::storage::NodeId;

pub struct ScalarMarshaller {
    descriptor: MarshallerDescriptor,
}

impl Default for ScalarMarshaller {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalarMarshaller {
    pub fn new() -> Self {
        Self {
            descriptor: MarshallerDescriptor::new()
                .with_type("builtins.bool", "bool")
                .with_type("builtins.int", "int")
                .with_type("builtins.float", "float")
                .with_type("builtins.complex", "complex")
                .with_type("h5py.Reference", "h5py.Reference"),
        }
    }
}

fn to_array(value: &Value) -> Result<NdArray> {
    let data = match value {
        Value::Bool(b) => ArrayData::Bool(vec![*b]),
        Value::Int(i) => ArrayData::I64(vec![*i]),
        Value::Float(f) => ArrayData::F64(vec![*f]),
        Value::Complex(re, im) => ArrayData::C128(vec![Complex::new(*re, *im)]),
        Value::Reference(r) => ArrayData::Ref(vec![*r]),
        other => return Err(wrong_family("scalar", other)),
    };
    NdArray::scalar(data)
}

impl Marshaller for ScalarMarshaller {
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
        let array = read_array(session, node)?;
        if array.size() != 1 {
            return Err(MarshalError::corrupt(
                session.node_path(node),
                format!("{} scalar stored with {} elements", tag, array.size()),
            ));
        }
        let element = element_value(&array.data, 0);
        let value = match (tag.as_str(), element) {
            ("bool", Some(Value::Bool(b))) => Value::Bool(b),
            ("bool", Some(Value::Int(i))) => Value::Bool(i != 0),
            ("int", Some(Value::Int(i))) => Value::Int(i),
            ("float", Some(Value::Float(f))) => Value::Float(f),
            ("float", Some(Value::Int(i))) => Value::Float(i as f64),
            ("complex", Some(Value::Complex(re, im))) => Value::Complex(re, im),
            ("complex", Some(Value::Float(re))) => Value::Complex(re, 0.0),
            ("h5py.Reference", Some(Value::Reference(r))) => Value::Reference(r),
            (_, element) => {
                return Err(MarshalError::corrupt(
                    session.node_path(node),
                    format!(
                        "cannot read a {:?} scalar from {}",
                        tag,
                        element.map_or_else(|| array.kind().name(), |v| v.type_path())
                    ),
                ));
            }
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::storage::{Attribute, MemoryFile, NodeRef, Storage};

    fn roundtrip(options: &Options, value: &Value) -> Value {
        let mut file = MemoryFile::new();
        let root = file.root();
        let mut session = Session::new(&mut file, options);
        session.write_data(root, "v", value).unwrap();
        session.read_data(root, "v").unwrap()
    }

    #[test]
    fn test_scalars_roundtrip() {
        for options in [Options::new(), Options::plain()] {
            for value in [
                Value::Bool(true),
                Value::Int(-42),
                Value::Float(2.5),
                Value::Complex(1.0, -1.0),
            ] {
                assert_eq!(roundtrip(&options, &value), value);
            }
        }
    }

    #[test]
    fn test_bool_stored_as_logical() {
        let mut file = MemoryFile::new();
        let root = file.root();
        let options = Options::new();
        let mut session = Session::new(&mut file, &options);
        let node = session.write_data(root, "b", &Value::Bool(false)).unwrap().unwrap();
        assert_eq!(
            file.attribute(node, attrs::TYPE).unwrap(),
            Some(Attribute::Str("bool".into()))
        );
        assert_eq!(
            file.attribute(node, attrs::MATLAB_CLASS).unwrap(),
            Some(Attribute::Str("logical".into()))
        );
        let (shape, data) = file.read_dataset(node).unwrap();
        assert_eq!(shape, vec![1, 1]);
        assert_eq!(data, ArrayData::U8(vec![0]));
    }

    #[test]
    fn test_reference_needs_plain_mode() {
        let mut file = MemoryFile::new();
        let root = file.root();
        let target = file.require_group(root, "g").unwrap();
        let reference = file.reference(target).unwrap();
        let options = Options::plain();
        let mut session = Session::new(&mut file, &options);
        session.write_data(root, "r", &Value::Reference(reference)).unwrap();
        assert_eq!(
            session.read_data(root, "r").unwrap(),
            Value::Reference(reference)
        );

        let compat = Options::new();
        let mut session = Session::new(&mut file, &compat);
        assert!(matches!(
            session.write_data(root, "r2", &Value::Reference(NodeRef::NULL)),
            Err(MarshalError::IncompatibleValue { .. })
        ));
    }

    #[test]
    fn test_scalar_with_wrong_element_count() {
        let mut file = MemoryFile::new();
        let root = file.root();
        let options = Options::plain();
        let mut session = Session::new(&mut file, &options);
        let node = session.write_data(root, "x", &Value::Int(1)).unwrap().unwrap();
        session
            .storage_mut()
            .set_attribute(node, attrs::SHAPE, Attribute::U64Array(vec![2]))
            .unwrap();
        assert!(matches!(
            session.read_data(root, "x"),
            Err(MarshalError::CorruptMetadata { .. })
        ));
    }
}
