//! Text and byte strings.
//!
//! Stored as zero-dimensional fixed-width arrays. Fixed-width storage pads
//! with NUL, so trailing NUL characters do not survive a round trip.

use crate::error::{MarshalError, Result};
use crate::marshal::array::{array_attributes, read_array, write_array};
use crate::marshal::{attrs, base_attributes, wrong_family, Marshaller, MarshallerDescriptor};
use crate::model::{ArrayData, NdArray, Value};
use crate::session::Session;
use crate::storage::NodeId;

pub struct TextMarshaller {
    descriptor: MarshallerDescriptor,
}

impl Default for TextMarshaller {
    fn default() -> Self {
        Self::new()
    }
}

impl TextMarshaller {
    pub fn new() -> Self {
        Self {
            descriptor: MarshallerDescriptor::new()
                .with_type("builtins.str", "str")
                .with_type("builtins.bytes", "bytes")
                .with_type("builtins.bytearray", "bytearray"),
        }
    }
}

fn to_array(value: &Value) -> Result<NdArray> {
    let data = match value {
        Value::Str(s) => ArrayData::from_strs(&[s]),
        Value::Bytes(b) | Value::ByteArray(b) => ArrayData::from_byte_strs(&[b]),
        other => return Err(wrong_family("text", other)),
    };
    NdArray::scalar(data)
}

impl Marshaller for TextMarshaller {
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
        let text = match tag.as_str() {
            "str" => array
                .data
                .strings()
                .and_then(|s| s.into_iter().next())
                .map(Value::Str),
            "bytes" | "bytearray" => array
                .data
                .byte_strings()
                .and_then(|b| b.into_iter().next())
                .map(|b| {
                    if tag == "bytes" {
                        Value::Bytes(b)
                    } else {
                        Value::ByteArray(b)
                    }
                }),
            _ => None,
        };
        text.ok_or_else(|| {
            MarshalError::corrupt(
                session.node_path(node),
                format!("cannot read {:?} text from {}", tag, array.kind().name()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Options, StrEncoding};
    use crate::storage::{Attribute, MemoryFile, Storage};

    fn roundtrip(options: &Options, value: &Value) -> Value {
        let mut file = MemoryFile::new();
        let root = file.root();
        let mut session = Session::new(&mut file, options);
        session.write_data(root, "t", value).unwrap();
        session.read_data(root, "t").unwrap()
    }

    #[test]
    fn test_text_roundtrip() {
        for options in [Options::new(), Options::plain()] {
            for value in [
                Value::str("hello"),
                Value::str(""),
                Value::str("caf\u{e9} \u{1F600}"),
                Value::Bytes(b"raw\xff".to_vec()),
                Value::ByteArray(b"abc".to_vec()),
            ] {
                assert_eq!(roundtrip(&options, &value), value);
            }
        }
    }

    #[test]
    fn test_compat_text_is_utf16() {
        let mut file = MemoryFile::new();
        let root = file.root();
        let options = Options::new();
        let mut session = Session::new(&mut file, &options);
        let node = session.write_data(root, "t", &Value::str("abc")).unwrap().unwrap();
        let (shape, data) = file.read_dataset(node).unwrap();
        assert_eq!(shape, vec![3, 1]);
        assert_eq!(data, ArrayData::U16(vec![97, 98, 99]));
        assert_eq!(
            file.attribute(node, attrs::MATLAB_CLASS).unwrap(),
            Some(Attribute::Str("char".into()))
        );
        assert_eq!(
            file.attribute(node, attrs::MATLAB_INT_DECODE).unwrap(),
            Some(Attribute::Int(2))
        );
    }

    #[test]
    fn test_strict_utf16_rejects_astral() {
        let mut file = MemoryFile::new();
        let root = file.root();
        let options = Options::new().with_str_encoding(StrEncoding::Utf16Strict);
        let mut session = Session::new(&mut file, &options);
        assert!(matches!(
            session.write_data(root, "t", &Value::str("\u{1F600}")),
            Err(MarshalError::Encoding { .. })
        ));
    }

    #[test]
    fn test_trailing_nul_is_lost() {
        assert_eq!(
            roundtrip(&Options::plain(), &Value::str("ab\0")),
            Value::str("ab")
        );
    }
}
