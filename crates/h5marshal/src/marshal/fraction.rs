//! Exact rationals, stored as a numerator/denominator group.
//!
//! Rebuilding a fraction needs the `fractions` capability. Without it the
//! stored components are returned as a plain dict.

use crate::error::{MarshalError, Result};
use crate::marshal::mapping::{fields_attributes, int_field, read_fields, write_fields};
use crate::marshal::{base_attributes, wrong_family, Marshaller, MarshallerDescriptor};
use crate::model::{Fraction, Mapping, Value};
use crate::session::Session;
use crate::storage::NodeId;

const FRACTION_TAG: &str = "fractions.Fraction";
const FIELDS: [&str; 2] = ["numerator", "denominator"];

pub struct FractionMarshaller {
    descriptor: MarshallerDescriptor,
}

impl Default for FractionMarshaller {
    fn default() -> Self {
        Self::new()
    }
}

impl FractionMarshaller {
    pub fn new() -> Self {
        Self {
            descriptor: MarshallerDescriptor::new()
                .with_type(FRACTION_TAG, FRACTION_TAG)
                .requires("fractions"),
        }
    }
}

impl Marshaller for FractionMarshaller {
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
        let Value::Fraction(fraction) = value else {
            return Err(wrong_family("fraction", value));
        };
        let numerator = Value::Int(fraction.numerator());
        let denominator = Value::Int(fraction.denominator());
        let (group, _) = write_fields(
            session,
            parent,
            name,
            &[(FIELDS[0], &numerator), (FIELDS[1], &denominator)],
        )?;
        Ok(Some(group))
    }

    fn write_metadata(&self, session: &mut Session<'_>, node: NodeId, value: &Value) -> Result<()> {
        let mut set = base_attributes(session, &self.descriptor, value)?;
        let names: Vec<String> = FIELDS.iter().map(|f| f.to_string()).collect();
        fields_attributes(session.options(), &names, &mut set);
        session.apply_attributes(node, set)
    }

    fn read(&self, session: &mut Session<'_>, node: NodeId) -> Result<Value> {
        let values = read_fields(session, node, &FIELDS)?;
        let numerator = int_field(session, node, FIELDS[0], &values[0])?;
        let denominator = int_field(session, node, FIELDS[1], &values[1])?;
        Fraction::new(numerator, denominator)
            .map(Value::Fraction)
            .ok_or_else(|| MarshalError::corrupt(session.node_path(node), "zero denominator"))
    }

    fn read_approximate(&self, session: &mut Session<'_>, node: NodeId) -> Result<Value> {
        let values = read_fields(session, node, &FIELDS)?;
        Ok(Value::Map(Mapping::dict(FIELDS.into_iter().zip(values))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::marshal::MarshallerCollection;
    use crate::options::Options;
    use crate::storage::{MemoryFile, Storage};

    #[test]
    fn test_fraction_roundtrip() {
        let value = Value::Fraction(Fraction::new(-6, 8).unwrap());
        for options in [Options::new(), Options::plain()] {
            let mut file = MemoryFile::new();
            let root = file.root();
            let mut session = Session::new(&mut file, &options);
            session.write_data(root, "f", &value).unwrap();
            assert_eq!(session.read_data(root, "f").unwrap(), value);
        }
    }

    #[test]
    fn test_without_capability_reads_components() {
        let mut file = MemoryFile::new();
        let root = file.root();
        let value = Value::Fraction(Fraction::new(1, 3).unwrap());
        let options = Options::new();
        Session::new(&mut file, &options)
            .write_data(root, "f", &value)
            .unwrap();

        let mut degraded = MarshallerCollection::new();
        degraded.withdraw_capability("fractions");
        let options = Options::new().with_marshallers(Arc::new(degraded));
        let mut session = Session::new(&mut file, &options);
        assert_eq!(
            session.read_data(root, "f").unwrap(),
            Value::dict([("numerator", 1i64), ("denominator", 3i64)])
        );
    }
}
