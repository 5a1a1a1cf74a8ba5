//! Multidimensional arrays and structured aggregates.
//!
//! Arrays are stored row-major. Fixed-width text kinds hold their elements
//! back to back, NUL padded to the element width, the way numpy does.

use crate::error::{MarshalError, Result};
use crate::model::Value;
use crate::storage::NodeRef;

/// A complex number.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex<T> {
    pub re: T,
    pub im: T,
}

impl<T> Complex<T> {
    pub fn new(re: T, im: T) -> Self {
        Self { re, im }
    }
}

/// Element kind of an array or dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    /// IEEE half precision, carried as raw bits.
    F16,
    F32,
    F64,
    C64,
    C128,
    /// Fixed-width byte strings of the given width.
    Bytes(usize),
    /// Fixed-width text of the given width in code points.
    Str(usize),
    /// Arbitrary values; never stored directly.
    Object,
    /// Handles to other nodes.
    Ref,
    /// Record of named fields.
    Compound(Vec<(String, ElementKind)>),
}

impl ElementKind {
    /// Returns the numpy-style name recorded as the underlying type.
    pub fn name(&self) -> String {
        match self {
            ElementKind::Bool => "bool".into(),
            ElementKind::U8 => "uint8".into(),
            ElementKind::U16 => "uint16".into(),
            ElementKind::U32 => "uint32".into(),
            ElementKind::U64 => "uint64".into(),
            ElementKind::I8 => "int8".into(),
            ElementKind::I16 => "int16".into(),
            ElementKind::I32 => "int32".into(),
            ElementKind::I64 => "int64".into(),
            ElementKind::F16 => "float16".into(),
            ElementKind::F32 => "float32".into(),
            ElementKind::F64 => "float64".into(),
            ElementKind::C64 => "complex64".into(),
            ElementKind::C128 => "complex128".into(),
            ElementKind::Bytes(w) => format!("bytes{}", 8 * w),
            ElementKind::Str(w) => format!("str{}", 32 * w),
            ElementKind::Object => "object".into(),
            ElementKind::Ref => "ref".into(),
            ElementKind::Compound(_) => format!("void{}", 8 * self.item_size()),
        }
    }

    /// Parses a name produced by [`ElementKind::name`]. Compound kinds have
    /// no name-only form and return `None`.
    pub fn from_name(name: &str) -> Option<ElementKind> {
        let kind = match name {
            "bool" => ElementKind::Bool,
            "uint8" => ElementKind::U8,
            "uint16" => ElementKind::U16,
            "uint32" => ElementKind::U32,
            "uint64" => ElementKind::U64,
            "int8" => ElementKind::I8,
            "int16" => ElementKind::I16,
            "int32" => ElementKind::I32,
            "int64" => ElementKind::I64,
            "float16" => ElementKind::F16,
            "float32" => ElementKind::F32,
            "float64" => ElementKind::F64,
            "complex64" => ElementKind::C64,
            "complex128" => ElementKind::C128,
            "object" => ElementKind::Object,
            "ref" => ElementKind::Ref,
            _ => {
                if let Some(bits) = name.strip_prefix("bytes") {
                    let bits: usize = bits.parse().ok()?;
                    if bits % 8 != 0 {
                        return None;
                    }
                    ElementKind::Bytes(bits / 8)
                } else if let Some(bits) = name.strip_prefix("str") {
                    let bits: usize = bits.parse().ok()?;
                    if bits % 32 != 0 {
                        return None;
                    }
                    ElementKind::Str(bits / 32)
                } else {
                    return None;
                }
            }
        };
        Some(kind)
    }

    /// Size in bytes of one stored element.
    pub fn item_size(&self) -> usize {
        match self {
            ElementKind::Bool | ElementKind::U8 | ElementKind::I8 => 1,
            ElementKind::U16 | ElementKind::I16 | ElementKind::F16 => 2,
            ElementKind::U32 | ElementKind::I32 | ElementKind::F32 => 4,
            ElementKind::U64 | ElementKind::I64 | ElementKind::F64 | ElementKind::C64 => 8,
            ElementKind::C128 => 16,
            ElementKind::Bytes(w) => *w,
            ElementKind::Str(w) => 4 * w,
            ElementKind::Object => 0,
            ElementKind::Ref => 8,
            ElementKind::Compound(fields) => fields.iter().map(|(_, k)| k.item_size()).sum(),
        }
    }

    /// Returns the target-consumer class for this kind, if it has one.
    pub fn matlab_class(&self) -> Option<&'static str> {
        match self {
            ElementKind::Bool => Some("logical"),
            ElementKind::U8 => Some("uint8"),
            ElementKind::U16 => Some("uint16"),
            ElementKind::U32 => Some("uint32"),
            ElementKind::U64 => Some("uint64"),
            ElementKind::I8 => Some("int8"),
            ElementKind::I16 => Some("int16"),
            ElementKind::I32 => Some("int32"),
            ElementKind::I64 => Some("int64"),
            ElementKind::F32 | ElementKind::C64 => Some("single"),
            ElementKind::F64 | ElementKind::C128 => Some("double"),
            ElementKind::Bytes(_) | ElementKind::Str(_) => Some("char"),
            ElementKind::Object => Some("cell"),
            ElementKind::F16 | ElementKind::Ref | ElementKind::Compound(_) => None,
        }
    }

    /// Element kind a target-consumer class is stored as.
    pub fn from_matlab_class(class: &str) -> Option<ElementKind> {
        let kind = match class {
            "logical" => ElementKind::U8,
            "uint8" => ElementKind::U8,
            "uint16" => ElementKind::U16,
            "uint32" => ElementKind::U32,
            "uint64" => ElementKind::U64,
            "int8" => ElementKind::I8,
            "int16" => ElementKind::I16,
            "int32" => ElementKind::I32,
            "int64" => ElementKind::I64,
            "single" => ElementKind::F32,
            "double" => ElementKind::F64,
            "char" => ElementKind::U16,
            "cell" => ElementKind::Ref,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, ElementKind::C64 | ElementKind::C128)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ElementKind::Bytes(_) | ElementKind::Str(_))
    }
}

/// Typed, row-major element buffer.
#[derive(Debug, Clone)]
pub enum ArrayData {
    Bool(Vec<bool>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F16(Vec<u16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    C64(Vec<Complex<f32>>),
    C128(Vec<Complex<f64>>),
    /// `width` bytes per element; `width` is at least 1.
    Bytes { width: usize, data: Vec<u8> },
    /// `width` code points per element; `width` is at least 1.
    Str { width: usize, data: Vec<u32> },
    Object(Vec<Value>),
    Ref(Vec<NodeRef>),
    /// Field buffers of equal length.
    Compound(Vec<(String, ArrayData)>),
}

fn pick<T: Clone>(values: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| values[i].clone()).collect()
}

fn pick_chunks<T: Copy>(values: &[T], width: usize, indices: &[usize]) -> Vec<T> {
    let mut out = Vec::with_capacity(indices.len() * width);
    for &i in indices {
        out.extend_from_slice(&values[i * width..(i + 1) * width]);
    }
    out
}

fn bits_eq32(a: &[f32], b: &[f32]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

fn bits_eq64(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

impl PartialEq for ArrayData {
    fn eq(&self, other: &Self) -> bool {
        use ArrayData::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a == b,
            (U8(a), U8(b)) => a == b,
            (U16(a), U16(b)) => a == b,
            (U32(a), U32(b)) => a == b,
            (U64(a), U64(b)) => a == b,
            (I8(a), I8(b)) => a == b,
            (I16(a), I16(b)) => a == b,
            (I32(a), I32(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (F16(a), F16(b)) => a == b,
            (F32(a), F32(b)) => bits_eq32(a, b),
            (F64(a), F64(b)) => bits_eq64(a, b),
            (C64(a), C64(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| {
                        x.re.to_bits() == y.re.to_bits() && x.im.to_bits() == y.im.to_bits()
                    })
            }
            (C128(a), C128(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| {
                        x.re.to_bits() == y.re.to_bits() && x.im.to_bits() == y.im.to_bits()
                    })
            }
            (Bytes { width: wa, data: a }, Bytes { width: wb, data: b }) => wa == wb && a == b,
            (Str { width: wa, data: a }, Str { width: wb, data: b }) => wa == wb && a == b,
            (Object(a), Object(b)) => a == b,
            (Ref(a), Ref(b)) => a == b,
            (Compound(a), Compound(b)) => a == b,
            _ => false,
        }
    }
}

impl ArrayData {
    /// Element kind of this buffer.
    pub fn kind(&self) -> ElementKind {
        match self {
            ArrayData::Bool(_) => ElementKind::Bool,
            ArrayData::U8(_) => ElementKind::U8,
            ArrayData::U16(_) => ElementKind::U16,
            ArrayData::U32(_) => ElementKind::U32,
            ArrayData::U64(_) => ElementKind::U64,
            ArrayData::I8(_) => ElementKind::I8,
            ArrayData::I16(_) => ElementKind::I16,
            ArrayData::I32(_) => ElementKind::I32,
            ArrayData::I64(_) => ElementKind::I64,
            ArrayData::F16(_) => ElementKind::F16,
            ArrayData::F32(_) => ElementKind::F32,
            ArrayData::F64(_) => ElementKind::F64,
            ArrayData::C64(_) => ElementKind::C64,
            ArrayData::C128(_) => ElementKind::C128,
            ArrayData::Bytes { width, .. } => ElementKind::Bytes(*width),
            ArrayData::Str { width, .. } => ElementKind::Str(*width),
            ArrayData::Object(_) => ElementKind::Object,
            ArrayData::Ref(_) => ElementKind::Ref,
            ArrayData::Compound(fields) => {
                ElementKind::Compound(fields.iter().map(|(n, d)| (n.clone(), d.kind())).collect())
            }
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::U8(v) => v.len(),
            ArrayData::U16(v) | ArrayData::F16(v) => v.len(),
            ArrayData::U32(v) => v.len(),
            ArrayData::U64(v) => v.len(),
            ArrayData::I8(v) => v.len(),
            ArrayData::I16(v) => v.len(),
            ArrayData::I32(v) => v.len(),
            ArrayData::I64(v) => v.len(),
            ArrayData::F32(v) => v.len(),
            ArrayData::F64(v) => v.len(),
            ArrayData::C64(v) => v.len(),
            ArrayData::C128(v) => v.len(),
            ArrayData::Bytes { width, data } => data.len().checked_div(*width).unwrap_or(0),
            ArrayData::Str { width, data } => data.len().checked_div(*width).unwrap_or(0),
            ArrayData::Object(v) => v.len(),
            ArrayData::Ref(v) => v.len(),
            ArrayData::Compound(fields) => fields.first().map_or(0, |(_, d)| d.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds a new buffer from the elements at `indices`, in order.
    pub fn gather(&self, indices: &[usize]) -> ArrayData {
        match self {
            ArrayData::Bool(v) => ArrayData::Bool(pick(v, indices)),
            ArrayData::U8(v) => ArrayData::U8(pick(v, indices)),
            ArrayData::U16(v) => ArrayData::U16(pick(v, indices)),
            ArrayData::U32(v) => ArrayData::U32(pick(v, indices)),
            ArrayData::U64(v) => ArrayData::U64(pick(v, indices)),
            ArrayData::I8(v) => ArrayData::I8(pick(v, indices)),
            ArrayData::I16(v) => ArrayData::I16(pick(v, indices)),
            ArrayData::I32(v) => ArrayData::I32(pick(v, indices)),
            ArrayData::I64(v) => ArrayData::I64(pick(v, indices)),
            ArrayData::F16(v) => ArrayData::F16(pick(v, indices)),
            ArrayData::F32(v) => ArrayData::F32(pick(v, indices)),
            ArrayData::F64(v) => ArrayData::F64(pick(v, indices)),
            ArrayData::C64(v) => ArrayData::C64(pick(v, indices)),
            ArrayData::C128(v) => ArrayData::C128(pick(v, indices)),
            ArrayData::Bytes { width, data } => ArrayData::Bytes {
                width: *width,
                data: pick_chunks(data, *width, indices),
            },
            ArrayData::Str { width, data } => ArrayData::Str {
                width: *width,
                data: pick_chunks(data, *width, indices),
            },
            ArrayData::Object(v) => ArrayData::Object(pick(v, indices)),
            ArrayData::Ref(v) => ArrayData::Ref(pick(v, indices)),
            ArrayData::Compound(fields) => ArrayData::Compound(
                fields
                    .iter()
                    .map(|(n, d)| (n.clone(), d.gather(indices)))
                    .collect(),
            ),
        }
    }

    /// Returns `count` zero elements of `kind`.
    pub fn zeros(kind: &ElementKind, count: usize) -> ArrayData {
        match kind {
            ElementKind::Bool => ArrayData::Bool(vec![false; count]),
            ElementKind::U8 => ArrayData::U8(vec![0; count]),
            ElementKind::U16 => ArrayData::U16(vec![0; count]),
            ElementKind::U32 => ArrayData::U32(vec![0; count]),
            ElementKind::U64 => ArrayData::U64(vec![0; count]),
            ElementKind::I8 => ArrayData::I8(vec![0; count]),
            ElementKind::I16 => ArrayData::I16(vec![0; count]),
            ElementKind::I32 => ArrayData::I32(vec![0; count]),
            ElementKind::I64 => ArrayData::I64(vec![0; count]),
            ElementKind::F16 => ArrayData::F16(vec![0; count]),
            ElementKind::F32 => ArrayData::F32(vec![0.0; count]),
            ElementKind::F64 => ArrayData::F64(vec![0.0; count]),
            ElementKind::C64 => ArrayData::C64(vec![Complex::default(); count]),
            ElementKind::C128 => ArrayData::C128(vec![Complex::default(); count]),
            ElementKind::Bytes(w) => ArrayData::Bytes {
                width: (*w).max(1),
                data: vec![0; count * (*w).max(1)],
            },
            ElementKind::Str(w) => ArrayData::Str {
                width: (*w).max(1),
                data: vec![0; count * (*w).max(1)],
            },
            ElementKind::Object => ArrayData::Object(vec![Value::Float(0.0); count]),
            ElementKind::Ref => ArrayData::Ref(vec![NodeRef::NULL; count]),
            ElementKind::Compound(fields) => ArrayData::Compound(
                fields
                    .iter()
                    .map(|(n, k)| (n.clone(), ArrayData::zeros(k, count)))
                    .collect(),
            ),
        }
    }

    /// Builds a fixed-width text buffer wide enough for every item.
    pub fn from_strs<S: AsRef<str>>(items: &[S]) -> ArrayData {
        let width = items
            .iter()
            .map(|s| s.as_ref().chars().count())
            .max()
            .unwrap_or(0)
            .max(1);
        let mut data = Vec::with_capacity(items.len() * width);
        for item in items {
            let start = data.len();
            data.extend(item.as_ref().chars().map(|c| c as u32));
            data.resize(start + width, 0);
        }
        ArrayData::Str { width, data }
    }

    /// Builds a fixed-width byte-string buffer wide enough for every item.
    pub fn from_byte_strs<B: AsRef<[u8]>>(items: &[B]) -> ArrayData {
        let width = items
            .iter()
            .map(|b| b.as_ref().len())
            .max()
            .unwrap_or(0)
            .max(1);
        let mut data = Vec::with_capacity(items.len() * width);
        for item in items {
            let start = data.len();
            data.extend_from_slice(item.as_ref());
            data.resize(start + width, 0);
        }
        ArrayData::Bytes { width, data }
    }

    /// Returns the text elements with trailing NUL padding removed.
    ///
    /// Code points that are not valid chars become U+FFFD.
    pub fn strings(&self) -> Option<Vec<String>> {
        match self {
            ArrayData::Str { width, data } => Some(
                data.chunks(*width)
                    .map(|chunk| {
                        let end = chunk.iter().rposition(|&c| c != 0).map_or(0, |p| p + 1);
                        chunk[..end]
                            .iter()
                            .map(|&c| char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER))
                            .collect()
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Returns the byte-string elements with trailing NUL padding removed.
    pub fn byte_strings(&self) -> Option<Vec<Vec<u8>>> {
        match self {
            ArrayData::Bytes { width, data } => Some(
                data.chunks(*width)
                    .map(|chunk| {
                        let end = chunk.iter().rposition(|&c| c != 0).map_or(0, |p| p + 1);
                        chunk[..end].to_vec()
                    })
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// Whether an array came from a zero-dimensional scalar or a full array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Container {
    #[default]
    NdArray,
    Scalar,
}

impl Container {
    pub fn as_str(self) -> &'static str {
        match self {
            Container::NdArray => "ndarray",
            Container::Scalar => "scalar",
        }
    }

    pub fn parse(s: &str) -> Option<Container> {
        match s {
            "ndarray" => Some(Container::NdArray),
            "scalar" => Some(Container::Scalar),
            _ => None,
        }
    }
}

/// Number of elements in an array of the given shape, saturating at
/// `usize::MAX`. Shapes read from storage go through [`checked_shape_size`].
pub fn shape_size(shape: &[usize]) -> usize {
    checked_shape_size(shape).unwrap_or(usize::MAX)
}

/// Number of elements in an array of the given shape, or `None` when it
/// does not fit in a `usize`.
pub fn checked_shape_size(shape: &[usize]) -> Option<usize> {
    if shape.contains(&0) {
        return Some(0);
    }
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// Source positions, in row-major order of the axis-reversed array, of the
/// elements of a row-major array with `shape`.
pub fn transpose_indices(shape: &[usize]) -> Vec<usize> {
    let size = shape_size(shape);
    let rank = shape.len();
    if rank < 2 || size == 0 {
        return (0..size).collect();
    }

    let mut strides = vec![1usize; rank];
    for d in (0..rank - 1).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    let reversed: Vec<usize> = shape.iter().rev().copied().collect();

    let mut out = Vec::with_capacity(size);
    let mut counter = vec![0usize; rank];
    for _ in 0..size {
        let source: usize = counter
            .iter()
            .enumerate()
            .map(|(e, &j)| j * strides[rank - 1 - e])
            .sum();
        out.push(source);
        for d in (0..rank).rev() {
            counter[d] += 1;
            if counter[d] < reversed[d] {
                break;
            }
            counter[d] = 0;
        }
    }
    out
}

/// A multidimensional array.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    pub shape: Vec<usize>,
    pub data: ArrayData,
    pub container: Container,
}

impl NdArray {
    /// Creates an array, checking that the buffer matches the shape.
    pub fn new(shape: Vec<usize>, data: ArrayData) -> Result<Self> {
        let expected = shape_size(&shape);
        if data.len() != expected {
            return Err(MarshalError::ShapeMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            shape,
            data,
            container: Container::NdArray,
        })
    }

    /// Creates a one-dimensional array over the buffer.
    pub fn from_data(data: ArrayData) -> Self {
        Self {
            shape: vec![data.len()],
            data,
            container: Container::NdArray,
        }
    }

    /// Creates a zero-dimensional scalar from a one-element buffer.
    pub fn scalar(data: ArrayData) -> Result<Self> {
        let mut array = Self::new(Vec::new(), data)?;
        array.container = Container::Scalar;
        Ok(array)
    }

    pub fn kind(&self) -> ElementKind {
        self.data.kind()
    }

    pub fn size(&self) -> usize {
        shape_size(&self.shape)
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_scalar(&self) -> bool {
        self.container == Container::Scalar
    }

    /// Returns the array with a new shape of the same size.
    pub fn reshaped(mut self, shape: Vec<usize>) -> Result<Self> {
        let expected = shape_size(&shape);
        if expected != self.data.len() {
            return Err(MarshalError::ShapeMismatch {
                shape,
                expected,
                actual: self.data.len(),
            });
        }
        self.shape = shape;
        Ok(self)
    }

    /// Returns the array with its axes reversed.
    pub fn transposed(&self) -> NdArray {
        if self.ndim() < 2 {
            return self.clone();
        }
        NdArray {
            shape: self.shape.iter().rev().copied().collect(),
            data: self.data.gather(&transpose_indices(&self.shape)),
            container: self.container,
        }
    }
}

/// One field of a structured aggregate: a value per element.
#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    pub name: String,
    pub values: Vec<Value>,
}

/// A structured (field-bearing) aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct StructArray {
    pub shape: Vec<usize>,
    pub fields: Vec<StructField>,
}

impl StructArray {
    /// Creates a structured aggregate, checking every field against the shape.
    pub fn new(shape: Vec<usize>, fields: Vec<StructField>) -> Result<Self> {
        let expected = shape_size(&shape);
        for field in &fields {
            if field.values.len() != expected {
                return Err(MarshalError::ShapeMismatch {
                    shape,
                    expected,
                    actual: field.values.len(),
                });
            }
        }
        Ok(Self { shape, fields })
    }

    /// A one-element aggregate from `(name, value)` pairs.
    pub fn single<S: Into<String>>(fields: impl IntoIterator<Item = (S, Value)>) -> Self {
        Self {
            shape: vec![1],
            fields: fields
                .into_iter()
                .map(|(name, value)| StructField {
                    name: name.into(),
                    values: vec![value],
                })
                .collect(),
        }
    }

    pub fn size(&self) -> usize {
        shape_size(&self.shape)
    }

    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }
}
