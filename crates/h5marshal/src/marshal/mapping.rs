//! Dictionaries, ordered dictionaries and counters.
//!
//! A mapping whose keys are all text (or UTF-8 byte strings) with distinct
//! escaped forms is stored "individually": one child per key. Any other
//! mapping is stored as two parallel tuples, keys and values, under the
//! configured child names.
//!
//! The `write_fields` / `read_fields` helpers here are also how the calendar,
//! fraction and range marshallers lay out their named components.

use rustc_hash::FxHashSet;

use crate::error::{MarshalError, Result};
use crate::marshal::array::field_names;
use crate::marshal::{
    attrs, base_attributes, wrong_family, AttributeSet, Marshaller, MarshallerDescriptor,
};
use crate::materialize::prune_children;
use crate::model::{MapKind, Mapping, Value};
use crate::options::Options;
use crate::pathesc::{escape, join_path};
use crate::session::Session;
use crate::storage::{Attribute, NodeId};

const DICT_TAG: &str = "dict";
const ORDERED_TAG: &str = "collections.OrderedDict";
const COUNTER_TAG: &str = "collections.Counter";

const STORED_INDIVIDUALLY: &str = "individually";
const STORED_KEYS_VALUES: &str = "keys_values";

pub struct MappingMarshaller {
    descriptor: MarshallerDescriptor,
}

impl Default for MappingMarshaller {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingMarshaller {
    pub fn new() -> Self {
        Self {
            descriptor: MarshallerDescriptor::new()
                .with_type("builtins.dict", DICT_TAG)
                .with_type(ORDERED_TAG, ORDERED_TAG)
                .with_type(COUNTER_TAG, COUNTER_TAG)
                .with_class("struct"),
        }
    }
}

/// A key stored as a child name.
struct NamedKey {
    name: String,
    /// `'s'` for text keys, `'b'` for byte-string keys.
    kind: char,
}

/// Child-name form of every key, or `None` when the mapping must be stored
/// as keys and values.
fn named_keys(mapping: &Mapping, group_path: &str, arena: &str) -> Option<Vec<NamedKey>> {
    let mut seen = FxHashSet::default();
    let mut keys = Vec::with_capacity(mapping.entries.len());
    for (key, _) in &mapping.entries {
        let key = match key {
            Value::Str(s) => NamedKey {
                name: s.clone(),
                kind: 's',
            },
            Value::Bytes(b) => NamedKey {
                name: String::from_utf8(b.clone()).ok()?,
                kind: 'b',
            },
            _ => return None,
        };
        if key.name.is_empty() {
            return None;
        }
        let child = escape(&key.name);
        if join_path(group_path, &child) == arena || !seen.insert(child) {
            return None;
        }
        keys.push(key);
    }
    Some(keys)
}

// =============================================================================
// NAMED FIELDS
// =============================================================================

/// Writes `fields` as children of a group `name` under `parent`. Returns the
/// group and the fields actually written; dropped values are left out.
pub(crate) fn write_fields(
    session: &mut Session<'_>,
    parent: NodeId,
    name: &str,
    fields: &[(&str, &Value)],
) -> Result<(NodeId, Vec<String>)> {
    let group = session.storage_mut().require_group(parent, name)?;
    let mut written = Vec::with_capacity(fields.len());
    for (field, value) in fields {
        let child = escape(field);
        if let Some(node) = session.write_data(group, &child, value)? {
            session.record_parent_path(node, group)?;
            written.push((*field).to_string());
        }
    }
    if session.options().delete_unused_children() {
        let keep: FxHashSet<String> = written.iter().map(|f| escape(f)).collect();
        prune_children(session, group, &keep)?;
    }
    Ok((group, written))
}

/// Adds the attributes describing a group of named fields.
pub(crate) fn fields_attributes(options: &Options, names: &[String], set: &mut AttributeSet) {
    if options.store_metadata() {
        set.set(attrs::FIELDS, Attribute::StrArray(names.to_vec()));
    }
    if options.compat() {
        set.set(attrs::MATLAB_CLASS, Attribute::Str("struct".into()));
        matlab_fields(names, set);
    }
}

/// Lists the field names for MATLAB, which only reads ASCII names.
pub(crate) fn matlab_fields(names: &[String], set: &mut AttributeSet) {
    if names.iter().all(|n| n.is_ascii()) {
        set.set(attrs::MATLAB_FIELDS, Attribute::StrArray(names.to_vec()));
    }
}

/// Reads the named fields of `group`; every field must be present.
pub(crate) fn read_fields(
    session: &mut Session<'_>,
    group: NodeId,
    names: &[&str],
) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(names.len());
    for name in names {
        let Some(node) = session.storage().child(group, &escape(name))? else {
            return Err(MarshalError::corrupt(
                session.node_path(group),
                format!("missing field {:?}", name),
            ));
        };
        values.push(session.read_node(node)?);
    }
    Ok(values)
}

/// Reads an integer field value, failing with a corruption error otherwise.
pub(crate) fn int_field(session: &Session<'_>, group: NodeId, name: &str, value: &Value) -> Result<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(MarshalError::corrupt(
            session.node_path(group),
            format!("field {:?} should be an integer, found {}", name, other.type_path()),
        )),
    }
}

/// Reads an optional integer field value; none reads as `None`.
pub(crate) fn optional_int_field(
    session: &Session<'_>,
    group: NodeId,
    name: &str,
    value: &Value,
) -> Result<Option<i64>> {
    match value {
        Value::Null(_) => Ok(None),
        other => int_field(session, group, name, other).map(Some),
    }
}

// =============================================================================
// MARSHALLER
// =============================================================================

fn kind_for_tag(tag: Option<&str>) -> MapKind {
    match tag {
        Some(ORDERED_TAG) => MapKind::Ordered,
        Some(COUNTER_TAG) => MapKind::Counter,
        _ => MapKind::Dict,
    }
}

impl Marshaller for MappingMarshaller {
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
        let Value::Map(mapping) = value else {
            return Err(wrong_family("mapping", value));
        };
        let options = session.options();
        let group_path = join_path(&session.storage().path(parent)?, name);
        match named_keys(mapping, &group_path, options.reference_arena()) {
            Some(keys) => {
                let fields: Vec<(&str, &Value)> = keys
                    .iter()
                    .zip(&mapping.entries)
                    .map(|(key, (_, value))| (key.name.as_str(), value))
                    .collect();
                let (group, _) = write_fields(session, parent, name, &fields)?;
                Ok(Some(group))
            }
            None => {
                let (keys_name, values_name) = options.dict_names();
                let keys = Value::tuple(mapping.entries.iter().map(|(k, _)| k.clone()));
                let values = Value::tuple(mapping.entries.iter().map(|(_, v)| v.clone()));
                let (group, _) = write_fields(
                    session,
                    parent,
                    name,
                    &[(keys_name, &keys), (values_name, &values)],
                )?;
                Ok(Some(group))
            }
        }
    }

    fn write_metadata(&self, session: &mut Session<'_>, node: NodeId, value: &Value) -> Result<()> {
        let Value::Map(mapping) = value else {
            return Err(wrong_family("mapping", value));
        };
        let options = session.options();
        let mut set = base_attributes(session, &self.descriptor, value)?;
        let group_path = session.storage().path(node)?;
        match named_keys(mapping, &group_path, options.reference_arena()) {
            Some(keys) => {
                // Keys whose values were dropped have no child.
                let mut present = Vec::with_capacity(keys.len());
                for key in &keys {
                    if session.storage().child(node, &escape(&key.name))?.is_some() {
                        present.push(key);
                    }
                }
                let names: Vec<String> = present.iter().map(|k| k.name.clone()).collect();
                fields_attributes(options, &names, &mut set);
                if options.store_metadata() {
                    set.set(attrs::DICT_STORED_AS, Attribute::Str(STORED_INDIVIDUALLY.into()));
                    set.set(
                        attrs::DICT_KEY_STR_TYPES,
                        Attribute::Str(present.iter().map(|k| k.kind).collect()),
                    );
                }
            }
            None => {
                let (keys_name, values_name) = options.dict_names();
                let names = vec![keys_name.to_string(), values_name.to_string()];
                if options.compat() {
                    set.set(attrs::MATLAB_CLASS, Attribute::Str("struct".into()));
                }
                if options.store_metadata() {
                    set.set(attrs::DICT_STORED_AS, Attribute::Str(STORED_KEYS_VALUES.into()));
                    set.set(attrs::DICT_KEY_VALUE_NAMES, Attribute::StrArray(names));
                }
            }
        }
        session.apply_attributes(node, set)
    }

    fn read(&self, session: &mut Session<'_>, node: NodeId) -> Result<Value> {
        let tag = session.python_string(node, attrs::TYPE)?;
        let mut mapping = Mapping::new(kind_for_tag(tag.as_deref()));
        let stored_as = session.python_string(node, attrs::DICT_STORED_AS)?;

        if stored_as.as_deref() == Some(STORED_KEYS_VALUES) {
            let names = match session
                .python_attribute(node, attrs::DICT_KEY_VALUE_NAMES)?
                .and_then(|a| a.as_str_array().map(<[String]>::to_vec))
            {
                Some(names) if names.len() == 2 => names,
                Some(names) => {
                    return Err(MarshalError::corrupt(
                        session.node_path(node),
                        format!("expected two key/value child names, found {}", names.len()),
                    ));
                }
                None => {
                    let (k, v) = session.options().dict_names();
                    vec![k.to_string(), v.to_string()]
                }
            };
            let parts = read_fields(session, node, &[names[0].as_str(), names[1].as_str()])?;
            let (keys, values) = match (&parts[0], &parts[1]) {
                (Value::Seq(keys), Value::Seq(values)) if keys.items.len() == values.items.len() => {
                    (keys.items.clone(), values.items.clone())
                }
                _ => {
                    return Err(MarshalError::corrupt(
                        session.node_path(node),
                        "keys and values are not sequences of equal length",
                    ));
                }
            };
            mapping.entries = keys.into_iter().zip(values).collect();
            return Ok(Value::Map(mapping));
        }

        let names = field_names(session, node)?;
        let kinds: Vec<char> = match session.python_string(node, attrs::DICT_KEY_STR_TYPES)? {
            Some(kinds) => kinds.chars().collect(),
            None => vec!['s'; names.len()],
        };
        if kinds.len() != names.len() {
            return Err(MarshalError::corrupt(
                session.node_path(node),
                format!("{} key types for {} keys", kinds.len(), names.len()),
            ));
        }
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let values = read_fields(session, node, &refs)?;
        for ((name, kind), value) in names.into_iter().zip(kinds).zip(values) {
            let key = match kind {
                'b' => Value::Bytes(name.into_bytes()),
                _ => Value::Str(name),
            };
            mapping.entries.push((key, value));
        }
        Ok(Value::Map(mapping))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryFile, Storage};

    fn roundtrip(options: &Options, value: &Value) -> (MemoryFile, Value) {
        let mut file = MemoryFile::new();
        let root = file.root();
        let back = {
            let mut session = Session::new(&mut file, options);
            session.write_data(root, "m", value).unwrap();
            session.read_data(root, "m").unwrap()
        };
        (file, back)
    }

    #[test]
    fn test_text_keys_stored_individually() {
        let value = Value::dict([("alpha", Value::Int(1)), ("a/b", Value::str("x"))]);
        let (file, back) = roundtrip(&Options::new(), &value);
        assert!(file.lookup("/m/alpha").unwrap().is_some());
        assert!(file.lookup("/m/a\\x2fb").unwrap().is_some());
        let node = file.lookup("/m").unwrap().unwrap();
        assert_eq!(
            file.attribute(node, attrs::DICT_STORED_AS).unwrap(),
            Some(Attribute::Str("individually".into()))
        );
        assert_eq!(back, value);
    }

    #[test]
    fn test_byte_keys_keep_their_kind() {
        let mut mapping = Mapping::new(MapKind::Ordered);
        mapping.entries.push((Value::Bytes(b"k".to_vec()), Value::Int(1)));
        mapping.entries.push((Value::str("s"), Value::Int(2)));
        let value = Value::Map(mapping);
        let (_, back) = roundtrip(&Options::plain(), &value);
        assert_eq!(back, value);
    }

    #[test]
    fn test_non_text_keys_stored_as_keys_values() {
        let mut mapping = Mapping::new(MapKind::Dict);
        mapping.entries.push((Value::Int(1), Value::str("one")));
        mapping.entries.push((Value::Int(2), Value::str("two")));
        let value = Value::Map(mapping);
        let (file, back) = roundtrip(&Options::new(), &value);
        assert!(file.lookup("/m/keys").unwrap().is_some());
        assert!(file.lookup("/m/values").unwrap().is_some());
        assert_eq!(back, value);
    }

    #[test]
    fn test_colliding_escaped_keys_fall_back() {
        let mut mapping = Mapping::new(MapKind::Dict);
        mapping.entries.push((Value::str("x"), Value::Int(1)));
        mapping.entries.push((Value::Bytes(b"x".to_vec()), Value::Int(2)));
        let value = Value::Map(mapping);
        let options = Options::new().with_dict_names("k", "v");
        let (file, back) = roundtrip(&options, &value);
        assert!(file.lookup("/m/k").unwrap().is_some());
        assert_eq!(back, value);
    }

    #[test]
    fn test_empty_key_falls_back_to_keys_values() {
        let value = Value::dict([("", Value::Int(1)), ("b", Value::Int(2))]);
        for options in [Options::new(), Options::plain()] {
            let (file, back) = roundtrip(&options, &value);
            assert!(file.lookup("/m/keys").unwrap().is_some());
            assert_eq!(back, value);
            let node = file.lookup("/m").unwrap().unwrap();
            // keys and values are not fields a MATLAB reader could list
            assert_eq!(file.attribute(node, attrs::MATLAB_FIELDS).unwrap(), None);
        }
    }

    #[test]
    fn test_matlab_fields_only_for_ascii_names() {
        let (file, _) = roundtrip(&Options::new(), &Value::dict([("a", 1i64), ("b", 2i64)]));
        let node = file.lookup("/m").unwrap().unwrap();
        assert_eq!(
            file.attribute(node, attrs::MATLAB_FIELDS).unwrap(),
            Some(Attribute::StrArray(vec!["a".into(), "b".into()]))
        );

        let value = Value::dict([("a", 1i64), ("\u{e9}t\u{e9}", 2i64)]);
        let (file, back) = roundtrip(&Options::new(), &value);
        let node = file.lookup("/m").unwrap().unwrap();
        assert_eq!(file.attribute(node, attrs::MATLAB_FIELDS).unwrap(), None);
        assert_eq!(
            file.attribute(node, attrs::FIELDS).unwrap(),
            Some(Attribute::StrArray(vec!["a".into(), "\u{e9}t\u{e9}".into()]))
        );
        assert_eq!(back, value);
    }

    #[test]
    fn test_children_record_group_path_in_compat() {
        let value = Value::dict([("a", Value::Int(1))]);
        let (file, _) = roundtrip(&Options::new(), &value);
        let child = file.lookup("/m/a").unwrap().unwrap();
        assert_eq!(
            file.attribute(child, attrs::H5PATH).unwrap(),
            Some(Attribute::Str("/m".into()))
        );

        let (file, _) = roundtrip(&Options::plain(), &value);
        let child = file.lookup("/m/a").unwrap().unwrap();
        assert_eq!(file.attribute(child, attrs::H5PATH).unwrap(), None);
    }

    #[test]
    fn test_rewrite_prunes_stale_children() {
        let mut file = MemoryFile::new();
        let root = file.root();
        let options = Options::new();
        let mut session = Session::new(&mut file, &options);
        session
            .write_data(root, "m", &Value::dict([("a", 1i64), ("b", 2i64)]))
            .unwrap();
        session.write_data(root, "m", &Value::dict([("a", 3i64)])).unwrap();
        assert_eq!(
            session.read_data(root, "m").unwrap(),
            Value::dict([("a", 3i64)])
        );
        assert!(file.lookup("/m/b").unwrap().is_none());
    }

    #[test]
    fn test_group_without_metadata_reads_as_dict() {
        let mut file = MemoryFile::new();
        let root = file.root();
        let group = file.require_group(root, "g").unwrap();
        let options = Options::new();
        let mut session = Session::new(&mut file, &options);
        session.write_data(group, "z", &Value::Int(2)).unwrap();
        session.write_data(group, "y", &Value::Int(1)).unwrap();
        assert_eq!(
            session.read_data(root, "g").unwrap(),
            Value::dict([("y", 1i64), ("z", 2i64)])
        );
    }

    #[test]
    fn test_missing_field_is_corrupt() {
        let mut file = MemoryFile::new();
        let root = file.root();
        let options = Options::new();
        let mut session = Session::new(&mut file, &options);
        session
            .write_data(root, "m", &Value::dict([("a", 1i64), ("b", 2i64)]))
            .unwrap();
        let group = session.storage().lookup("/m").unwrap().unwrap();
        session.storage_mut().delete(group, "b").unwrap();
        assert!(matches!(
            session.read_data(root, "m"),
            Err(MarshalError::CorruptMetadata { .. })
        ));
    }
}
