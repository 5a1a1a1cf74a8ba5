//! Null-like singletons, stored as empty `float64` arrays.

use crate::error::{MarshalError, Result};
use crate::marshal::array::{array_attributes, write_array};
use crate::marshal::{attrs, base_attributes, wrong_family, Marshaller, MarshallerDescriptor};
use crate::model::{ArrayData, NdArray, Sentinel, Value};
use crate::session::Session;
use crate::storage::NodeId;

const NONE_TAG: &str = "builtins.NoneType";
const ELLIPSIS_TAG: &str = "builtins.ellipsis";
const NOT_IMPLEMENTED_TAG: &str = "builtins.NotImplementedType";

pub struct SentinelMarshaller {
    descriptor: MarshallerDescriptor,
}

impl Default for SentinelMarshaller {
    fn default() -> Self {
        Self::new()
    }
}

impl SentinelMarshaller {
    pub fn new() -> Self {
        Self {
            descriptor: MarshallerDescriptor::new()
                .with_type(NONE_TAG, NONE_TAG)
                .with_type(ELLIPSIS_TAG, ELLIPSIS_TAG)
                .with_type(NOT_IMPLEMENTED_TAG, NOT_IMPLEMENTED_TAG),
        }
    }
}

fn placeholder() -> NdArray {
    NdArray::from_data(ArrayData::F64(Vec::new()))
}

impl Marshaller for SentinelMarshaller {
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
        match value {
            Value::Null(_) => write_array(session, parent, name, &placeholder()),
            other => Err(wrong_family("sentinel", other)),
        }
    }

    fn write_metadata(&self, session: &mut Session<'_>, node: NodeId, value: &Value) -> Result<()> {
        let mut set = base_attributes(session, &self.descriptor, value)?;
        array_attributes(session.options(), &placeholder(), &mut set);
        session.apply_attributes(node, set)
    }

    fn read(&self, session: &mut Session<'_>, node: NodeId) -> Result<Value> {
        let tag = session.python_string(node, attrs::TYPE)?;
        let sentinel = match tag.as_deref() {
            Some(NONE_TAG) => Sentinel::None,
            Some(ELLIPSIS_TAG) => Sentinel::Ellipsis,
            Some(NOT_IMPLEMENTED_TAG) => Sentinel::NotImplemented,
            other => {
                return Err(MarshalError::corrupt(
                    session.node_path(node),
                    format!("unknown singleton tag {:?}", other),
                ));
            }
        };
        Ok(Value::Null(sentinel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::storage::{MemoryFile, Storage};

    #[test]
    fn test_sentinels_roundtrip() {
        for options in [Options::new(), Options::plain()] {
            let mut file = MemoryFile::new();
            let root = file.root();
            let mut session = Session::new(&mut file, &options);
            for (name, sentinel) in [
                ("n", Sentinel::None),
                ("e", Sentinel::Ellipsis),
                ("ni", Sentinel::NotImplemented),
            ] {
                session.write_data(root, name, &Value::Null(sentinel)).unwrap();
                assert_eq!(session.read_data(root, name).unwrap(), Value::Null(sentinel));
            }
        }
    }

    #[test]
    fn test_none_without_metadata_reads_as_empty_array() {
        let mut file = MemoryFile::new();
        let root = file.root();
        let options = Options::new();
        let mut session = Session::new(&mut file, &options);
        session.write_data(root, "n", &Value::none()).unwrap();

        let bare = Options::new().with_store_metadata(false);
        let mut session = Session::new(&mut file, &bare);
        match session.read_data(root, "n").unwrap() {
            Value::Array(a) => {
                assert!(a.is_empty());
                assert_eq!(a.shape, vec![1, 0]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
