//! Multidimensional arrays and structured aggregates.
//!
//! This is the marshaller every dataset falls back to. [`write_array`] and
//! [`read_array`] hold the full dataset pipeline and are shared by the
//! scalar, text, sentinel and sequence marshallers, which are thin layers
//! over it.

use rustc_hash::FxHashSet;

use crate::compat::{self, Fitness};
use crate::error::{MarshalError, Result};
use crate::limits::MAX_BUFFER_LEN;
use crate::marshal::mapping::matlab_fields;
use crate::marshal::{
    attrs, base_attributes, wrong_family, AttributeSet, Marshaller, MarshallerDescriptor,
};
use crate::materialize::{self, CANONICAL_EMPTY_CLASS};
use crate::model::{
    checked_shape_size, shape_size, ArrayData, Container, ElementKind, Mapping, NdArray, StructArray, StructField,
    Value,
};
use crate::options::Options;
use crate::pathesc::unescape;
use crate::session::Session;
use crate::storage::{Attribute, NodeId, NodeKind};

const NDARRAY_TAG: &str = "numpy.ndarray";

/// Scalar types handled here, each written with its own name as tag.
const NUMPY_SCALAR_TYPES: [&str; 18] = [
    "numpy.bool_",
    "numpy.uint8",
    "numpy.uint16",
    "numpy.uint32",
    "numpy.uint64",
    "numpy.int8",
    "numpy.int16",
    "numpy.int32",
    "numpy.int64",
    "numpy.float16",
    "numpy.float32",
    "numpy.float64",
    "numpy.complex64",
    "numpy.complex128",
    "numpy.bytes_",
    "numpy.str_",
    "numpy.object_",
    "numpy.void",
];

const ARRAY_CLASSES: [&str; 14] = [
    "logical",
    "uint8",
    "uint16",
    "uint32",
    "uint64",
    "int8",
    "int16",
    "int32",
    "int64",
    "single",
    "double",
    "char",
    "cell",
    CANONICAL_EMPTY_CLASS,
];

pub struct ArrayMarshaller {
    descriptor: MarshallerDescriptor,
}

impl Default for ArrayMarshaller {
    fn default() -> Self {
        Self::new()
    }
}

impl ArrayMarshaller {
    pub fn new() -> Self {
        let mut descriptor = MarshallerDescriptor::new().with_type(NDARRAY_TAG, NDARRAY_TAG);
        for type_path in NUMPY_SCALAR_TYPES {
            descriptor = descriptor.with_type(type_path, type_path);
        }
        for class in ARRAY_CLASSES {
            descriptor = descriptor.with_class(class);
        }
        Self { descriptor }
    }
}

impl Marshaller for ArrayMarshaller {
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
            Value::Array(array) => write_array(session, parent, name, array),
            Value::Struct(record) => write_structured(session, parent, name, record).map(Some),
            other => Err(wrong_family("array", other)),
        }
    }

    fn write_metadata(&self, session: &mut Session<'_>, node: NodeId, value: &Value) -> Result<()> {
        let options = session.options();
        let mut set = base_attributes(session, &self.descriptor, value)?;
        match value {
            Value::Array(array) => array_attributes(options, array, &mut set),
            Value::Struct(record) => {
                struct_attributes(options, record, &mut set);
                if session.storage().kind(node)? == NodeKind::Dataset {
                    if let Some(columns) = flat_columns(record) {
                        set.set(
                            attrs::UNDERLYING_TYPE,
                            Attribute::Str(columns.kind().name()),
                        );
                    }
                }
            }
            other => return Err(wrong_family("array", other)),
        }
        session.apply_attributes(node, set)
    }

    fn read(&self, session: &mut Session<'_>, node: NodeId) -> Result<Value> {
        if session.storage().kind(node)? == NodeKind::Group {
            return read_structured_group(session, node);
        }
        let fields = session
            .python_attribute(node, attrs::FIELDS)?
            .and_then(|a| a.as_str_array().map(<[String]>::to_vec));
        let array = read_array(session, node)?;
        match fields {
            Some(fields) => record_from_columns(session, node, array, &fields),
            None => Ok(Value::Array(array)),
        }
    }
}

// =============================================================================
// WRITE PIPELINE
// =============================================================================

/// Writes an array as dataset `name` under `parent`, applying the enabled
/// compat steps. Returns `None` when the array was dropped.
pub fn write_array(
    session: &mut Session<'_>,
    parent: NodeId,
    name: &str,
    array: &NdArray,
) -> Result<Option<NodeId>> {
    let options = session.options();
    if compat::check_kind(&array.kind(), options)? == Fitness::Drop {
        return Ok(None);
    }

    let mut stored = compat::encode_text(array.clone(), options)?;
    if options.make_atleast_2d() {
        stored = compat::promote_rank(stored, options.oned_as());
    }
    if options.reverse_dimension_order() {
        stored = stored.transposed();
    }
    if options.bools_to_u8() {
        stored.data = compat::bools_to_u8(stored.data);
    }
    if stored.is_empty() && options.store_shape_for_empty() {
        stored = compat::empty_marker(&stored);
    }
    let data = compat::encode_complex(stored.data, options.complex_names());

    let node = match data {
        ArrayData::Object(items) => {
            materialize::write_object_array(session, parent, name, &stored.shape, &items)?
        }
        data => {
            let filters = options.dataset_filters(data.len() * data.kind().item_size());
            session
                .storage_mut()
                .write_dataset(parent, name, &stored.shape, &data, &filters)?
        }
    };
    Ok(Some(node))
}

/// Adds the attributes describing `array` to `set`.
pub fn array_attributes(options: &Options, array: &NdArray, set: &mut AttributeSet) {
    let kind = array.kind();
    let empty = array.is_empty() && options.store_shape_for_empty();
    if options.store_metadata() {
        set.set(
            attrs::SHAPE,
            Attribute::U64Array(array.shape.iter().map(|&d| d as u64).collect()),
        );
        set.set(attrs::UNDERLYING_TYPE, Attribute::Str(kind.name()));
        set.set(attrs::CONTAINER, Attribute::Str(array.container.as_str().into()));
        if empty {
            set.set(attrs::EMPTY, Attribute::Int(1));
        }
    }
    if options.compat() {
        if empty {
            set.set(attrs::MATLAB_EMPTY, Attribute::Int(1));
        }
        if let Some(class) = kind.matlab_class() {
            set.set(attrs::MATLAB_CLASS, Attribute::Str(class.into()));
            let decode = match kind {
                ElementKind::Bool => Some(1),
                _ => compat::text_unit_size(array, options),
            };
            if let Some(decode) = decode {
                set.set(attrs::MATLAB_INT_DECODE, Attribute::Int(decode));
            }
        }
    }
}

// =============================================================================
// READ PIPELINE
// =============================================================================

fn flag(attribute: Option<Attribute>) -> bool {
    attribute.and_then(|a| a.as_int()).is_some_and(|v| v != 0)
}

/// Element kind implied by a target class alone.
fn class_kind(class: &str) -> Option<ElementKind> {
    match class {
        "logical" => Some(ElementKind::Bool),
        "char" => Some(ElementKind::Str(1)),
        "cell" => Some(ElementKind::Object),
        other => ElementKind::from_matlab_class(other),
    }
}

/// Rejects shapes whose element count overflows or exceeds the buffer limit.
fn bounded_shape(session: &Session<'_>, node: NodeId, shape: Vec<usize>) -> Result<Vec<usize>> {
    match checked_shape_size(&shape) {
        Some(size) if size <= MAX_BUFFER_LEN => Ok(shape),
        _ => Err(MarshalError::corrupt(
            session.node_path(node),
            format!("shape {:?} holds too many elements", shape),
        )),
    }
}

/// Converts stored dimensions into a bounded shape.
fn stored_shape(session: &Session<'_>, node: NodeId, dims: &[u64]) -> Result<Vec<usize>> {
    let mut shape = Vec::with_capacity(dims.len());
    for &d in dims {
        let d = usize::try_from(d).map_err(|_| {
            MarshalError::corrupt(session.node_path(node), format!("dimension {} is out of range", d))
        })?;
        shape.push(d);
    }
    bounded_shape(session, node, shape)
}

/// Reads a dataset as an array, undoing the compat steps that the stored
/// metadata allows to undo.
pub fn read_array(session: &mut Session<'_>, node: NodeId) -> Result<NdArray> {
    let options = session.options();
    let (shape, mut data) = session.storage().read_dataset(node)?;

    let underlying_name = session.python_string(node, attrs::UNDERLYING_TYPE)?;
    let underlying = underlying_name.as_deref().and_then(ElementKind::from_name);
    let original_shape = match session
        .python_attribute(node, attrs::SHAPE)?
        .and_then(|a| a.as_u64_array().map(<[u64]>::to_vec))
    {
        Some(dims) => Some(stored_shape(session, node, &dims)?),
        None => None,
    };
    let container = session
        .python_string(node, attrs::CONTAINER)?
        .as_deref()
        .and_then(Container::parse)
        .unwrap_or_default();
    let class = session.attribute_string(node, attrs::MATLAB_CLASS)?;
    let empty = flag(session.python_attribute(node, attrs::EMPTY)?)
        || flag(session.attribute(node, attrs::MATLAB_EMPTY)?);

    let corrupt = |session: &Session<'_>, err: MarshalError| {
        MarshalError::corrupt(session.node_path(node), err.to_string())
    };

    if empty {
        if let Some(mut dims) = compat::shape_from_marker(&data) {
            if options.reverse_dimension_order() {
                dims.reverse();
            }
            let kind = underlying
                .clone()
                .or_else(|| class.as_deref().and_then(class_kind))
                .unwrap_or(ElementKind::F64);
            let shape = match original_shape {
                Some(shape) => shape,
                None => bounded_shape(session, node, dims)?,
            };
            let size = shape_size(&shape);
            if size.saturating_mul(kind.item_size().max(1)) > MAX_BUFFER_LEN {
                return Err(MarshalError::corrupt(
                    session.node_path(node),
                    format!("empty array of shape {:?} is too large to allocate", shape),
                ));
            }
            let zeros = ArrayData::zeros(&kind, size);
            let mut array = NdArray::new(shape, zeros).map_err(|e| corrupt(session, e))?;
            array.container = container;
            return Ok(array);
        }
    }

    if let ArrayData::Ref(refs) = &data {
        if underlying != Some(ElementKind::Ref) {
            data = ArrayData::Object(materialize::read_object_array(session, refs)?);
        }
    }

    let is_record = underlying_name
        .as_deref()
        .is_some_and(|name| name.starts_with("void"));
    if !is_record && underlying.as_ref().map_or(true, ElementKind::is_complex) {
        if let Some(joined) = compat::decode_complex(&data, options.complex_names()) {
            data = joined;
        }
    }

    let mut array = NdArray::new(shape, data).map_err(|e| corrupt(session, e))?;
    if options.reverse_dimension_order() {
        array = array.transposed();
    }

    let logical = underlying == Some(ElementKind::Bool)
        || (underlying.is_none() && class.as_deref() == Some("logical"));
    if logical {
        array.data = compat::u8_to_bools(array.data);
    }

    match &underlying {
        Some(kind @ (ElementKind::Str(_) | ElementKind::Bytes(_))) => {
            let count = original_shape.as_deref().map_or(1, shape_size);
            let data = compat::decode_text(array.data, kind, count)?;
            array = NdArray::new(vec![count], data).map_err(|e| corrupt(session, e))?;
        }
        None if class.as_deref() == Some("char") => {
            array = compat::decode_char(array)?;
        }
        _ => {}
    }

    if let Some(shape) = original_shape {
        array = array.reshaped(shape).map_err(|e| corrupt(session, e))?;
    }
    array.container = container;
    Ok(array)
}

/// Converts element `index` of a buffer into a standalone value.
pub fn element_value(data: &ArrayData, index: usize) -> Option<Value> {
    let value = match data {
        ArrayData::Bool(v) => Value::Bool(*v.get(index)?),
        ArrayData::U8(v) => Value::Int(i64::from(*v.get(index)?)),
        ArrayData::U16(v) => Value::Int(i64::from(*v.get(index)?)),
        ArrayData::U32(v) => Value::Int(i64::from(*v.get(index)?)),
        ArrayData::U64(v) => Value::Int(i64::try_from(*v.get(index)?).ok()?),
        ArrayData::I8(v) => Value::Int(i64::from(*v.get(index)?)),
        ArrayData::I16(v) => Value::Int(i64::from(*v.get(index)?)),
        ArrayData::I32(v) => Value::Int(i64::from(*v.get(index)?)),
        ArrayData::I64(v) => Value::Int(*v.get(index)?),
        ArrayData::F32(v) => Value::Float(f64::from(*v.get(index)?)),
        ArrayData::F64(v) => Value::Float(*v.get(index)?),
        ArrayData::C64(v) => {
            let c = v.get(index)?;
            Value::Complex(f64::from(c.re), f64::from(c.im))
        }
        ArrayData::C128(v) => {
            let c = v.get(index)?;
            Value::Complex(c.re, c.im)
        }
        ArrayData::Str { .. } => Value::Str(data.strings()?.into_iter().nth(index)?),
        ArrayData::Bytes { .. } => Value::Bytes(data.byte_strings()?.into_iter().nth(index)?),
        ArrayData::Object(v) => v.get(index)?.clone(),
        ArrayData::Ref(v) => Value::Reference(*v.get(index)?),
        ArrayData::F16(_) | ArrayData::Compound(_) => return None,
    };
    Some(value)
}

// =============================================================================
// STRUCTURED AGGREGATES
// =============================================================================

/// Columns of a structured aggregate whose fields all hold plain scalars of
/// one kind, for the compact record layout.
fn flat_columns(record: &StructArray) -> Option<ArrayData> {
    if record.fields.is_empty() || record.size() == 0 {
        return None;
    }
    let mut columns = Vec::with_capacity(record.fields.len());
    for field in &record.fields {
        let column = match field.values.first()? {
            Value::Bool(_) => ArrayData::Bool(
                field
                    .values
                    .iter()
                    .map(|v| match v {
                        Value::Bool(b) => Some(*b),
                        _ => None,
                    })
                    .collect::<Option<_>>()?,
            ),
            Value::Int(_) => ArrayData::I64(
                field
                    .values
                    .iter()
                    .map(|v| match v {
                        Value::Int(i) => Some(*i),
                        _ => None,
                    })
                    .collect::<Option<_>>()?,
            ),
            Value::Float(_) => ArrayData::F64(
                field
                    .values
                    .iter()
                    .map(|v| match v {
                        Value::Float(f) => Some(*f),
                        _ => None,
                    })
                    .collect::<Option<_>>()?,
            ),
            _ => return None,
        };
        columns.push((field.name.clone(), column));
    }
    Some(ArrayData::Compound(columns))
}

fn write_structured(
    session: &mut Session<'_>,
    parent: NodeId,
    name: &str,
    record: &StructArray,
) -> Result<NodeId> {
    materialize::check_field_names(record)?;
    if !session.options().structs_as_groups() {
        if let Some(columns) = flat_columns(record) {
            let array = NdArray::new(record.shape.clone(), columns)?;
            let node = write_array(session, parent, name, &array)?;
            return node.ok_or_else(|| MarshalError::IncompatibleValue {
                what: "record array".into(),
                reason: "dropped by policy".into(),
            });
        }
    }
    materialize::write_struct(session, parent, name, record)
}

fn struct_attributes(options: &Options, record: &StructArray, set: &mut AttributeSet) {
    let names: Vec<String> = record.fields.iter().map(|f| f.name.clone()).collect();
    if options.store_metadata() {
        set.set(
            attrs::SHAPE,
            Attribute::U64Array(record.shape.iter().map(|&d| d as u64).collect()),
        );
        set.set(attrs::FIELDS, Attribute::StrArray(names.clone()));
        set.set(attrs::CONTAINER, Attribute::Str(Container::NdArray.as_str().into()));
    }
    if options.compat() {
        set.set(attrs::MATLAB_CLASS, Attribute::Str("struct".into()));
        matlab_fields(&names, set);
    }
}

/// Field names of a group: recorded order when present, else storage order.
pub(crate) fn field_names(session: &Session<'_>, group: NodeId) -> Result<Vec<String>> {
    if let Some(names) = session
        .python_attribute(group, attrs::FIELDS)?
        .and_then(|a| a.as_str_array().map(<[String]>::to_vec))
    {
        return Ok(names);
    }
    if let Some(names) = session
        .attribute(group, attrs::MATLAB_FIELDS)?
        .and_then(|a| a.as_str_array().map(<[String]>::to_vec))
    {
        return Ok(names);
    }
    let arena = session.options().reference_arena();
    let group_path = session.node_path(group);
    let mut names = Vec::new();
    for child in session.storage().children(group)? {
        if crate::pathesc::join_path(&group_path, &child) == arena {
            continue;
        }
        names.push(unescape(&child)?);
    }
    Ok(names)
}

fn read_structured_group(session: &mut Session<'_>, group: NodeId) -> Result<Value> {
    let shape = match session
        .python_attribute(group, attrs::SHAPE)?
        .and_then(|a| a.as_u64_array().map(<[u64]>::to_vec))
    {
        Some(dims) => stored_shape(session, group, &dims)?,
        None => vec![1],
    };
    let names = field_names(session, group)?;
    let mut seen = FxHashSet::default();
    if !names.iter().all(|n| seen.insert(n.as_str())) {
        return Err(MarshalError::corrupt(
            session.node_path(group),
            "duplicate field names",
        ));
    }
    let record = materialize::read_struct(session, group, shape, &names)?;
    if session.options().structs_as_dicts() && record.size() == 1 {
        let mut mapping = Mapping::new(crate::model::MapKind::Dict);
        for field in record.fields {
            let value = field.values.into_iter().next().unwrap_or_else(Value::none);
            mapping.entries.push((Value::Str(field.name), value));
        }
        return Ok(Value::Map(mapping));
    }
    Ok(Value::Struct(record))
}

fn record_from_columns(
    session: &Session<'_>,
    node: NodeId,
    array: NdArray,
    names: &[String],
) -> Result<Value> {
    let ArrayData::Compound(columns) = &array.data else {
        return Err(MarshalError::corrupt(
            session.node_path(node),
            "record fields recorded on a non-record dataset",
        ));
    };
    if columns.len() != names.len() {
        return Err(MarshalError::corrupt(
            session.node_path(node),
            format!("{} field names for {} stored fields", names.len(), columns.len()),
        ));
    }
    let size = array.size();
    let mut fields = Vec::with_capacity(names.len());
    for (name, (_, column)) in names.iter().zip(columns) {
        let values = (0..size)
            .map(|i| element_value(column, i))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                MarshalError::corrupt(session.node_path(node), format!("unreadable field {:?}", name))
            })?;
        fields.push(StructField {
            name: name.clone(),
            values,
        });
    }
    Ok(Value::Struct(StructArray::new(array.shape, fields)?))
}
