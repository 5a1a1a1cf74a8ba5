//! The value model.
//!
//! [`Value`] is a closed sum type over the built-in families plus
//! [`Value::Custom`], an erased extension point for externally supplied types.
//! Every value reports a runtime type identity and an ancestor chain; the
//! registry resolves marshallers from those, most specific first.

use std::any::Any;
use std::fmt;

use crate::model::{DType, NdArray, StructArray, Temporal};
use crate::storage::NodeRef;

/// Null-like singletons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentinel {
    None,
    Ellipsis,
    NotImplemented,
}

/// Flavour of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapKind {
    Dict,
    Ordered,
    /// Multiset counts; values are integers.
    Counter,
}

/// An insertion-ordered mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    pub kind: MapKind,
    pub entries: Vec<(Value, Value)>,
}

impl Mapping {
    pub fn new(kind: MapKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
        }
    }

    pub fn dict<K: Into<Value>, V: Into<Value>>(entries: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            kind: MapKind::Dict,
            entries: entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Looks up the value stored under a text key.
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| matches!(k, Value::Str(s) if s == key))
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Flavour of an ordered aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeqKind {
    List,
    Tuple,
    Set,
    FrozenSet,
    Deque,
}

/// An ordered aggregate of values.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    pub kind: SeqKind,
    pub items: Vec<Value>,
}

/// An exact rational number in lowest terms with a positive denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fraction {
    numerator: i64,
    denominator: i64,
}

impl Fraction {
    /// Creates a normalized fraction. Returns `None` for a zero denominator.
    pub fn new(numerator: i64, denominator: i64) -> Option<Self> {
        if denominator == 0 {
            return None;
        }
        let g = gcd(numerator.unsigned_abs(), denominator.unsigned_abs()).max(1) as i64;
        let (mut n, mut d) = (numerator / g, denominator / g);
        if d < 0 {
            n = n.checked_neg()?;
            d = d.checked_neg()?;
        }
        Some(Self {
            numerator: n,
            denominator: d,
        })
    }

    pub fn numerator(&self) -> i64 {
        self.numerator
    }

    pub fn denominator(&self) -> i64 {
        self.denominator
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// An arithmetic progression `start..stop` by `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

/// A slice with optional bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SliceValue {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

/// An externally supplied value type.
///
/// Implementors name their type with a dotted path and list the paths of
/// the types they derive from, nearest first. A marshaller registered for
/// any of those paths can handle the value.
pub trait CustomValue: fmt::Debug + Send + Sync {
    /// Runtime type identity, e.g. `"mylib.Point"`.
    fn type_path(&self) -> &str;

    /// Identities of the types this one derives from, nearest first.
    fn ancestors(&self) -> Vec<String> {
        Vec::new()
    }

    fn as_any(&self) -> &dyn Any;

    fn clone_box(&self) -> Box<dyn CustomValue>;

    fn eq_dyn(&self, other: &dyn CustomValue) -> bool;
}

impl Clone for Box<dyn CustomValue> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl PartialEq for Box<dyn CustomValue> {
    fn eq(&self, other: &Self) -> bool {
        self.eq_dyn(other.as_ref())
    }
}

/// A value that can be written and read back.
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Complex(f64, f64),
    Str(String),
    Bytes(Vec<u8>),
    ByteArray(Vec<u8>),
    Null(Sentinel),
    Map(Mapping),
    Seq(Sequence),
    Array(NdArray),
    Struct(StructArray),
    Temporal(Temporal),
    Fraction(Fraction),
    Range(RangeValue),
    Slice(SliceValue),
    DType(DType),
    ChainMap(Vec<Mapping>),
    Reference(NodeRef),
    Custom(Box<dyn CustomValue>),
}

/// Domain equality: floats compare bit-exact, so NaN equals itself.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Complex(ar, ai), Complex(br, bi)) => {
                ar.to_bits() == br.to_bits() && ai.to_bits() == bi.to_bits()
            }
            (Str(a), Str(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (ByteArray(a), ByteArray(b)) => a == b,
            (Null(a), Null(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Seq(a), Seq(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Struct(a), Struct(b)) => a == b,
            (Temporal(a), Temporal(b)) => a == b,
            (Fraction(a), Fraction(b)) => a == b,
            (Range(a), Range(b)) => a == b,
            (Slice(a), Slice(b)) => a == b,
            (DType(a), DType(b)) => a == b,
            (ChainMap(a), ChainMap(b)) => a == b,
            (Reference(a), Reference(b)) => a == b,
            (Custom(a), Custom(b)) => a == b,
            _ => false,
        }
    }
}

/// Scalar type suffix used for zero-dimensional arrays.
fn numpy_scalar_name(array: &NdArray) -> String {
    use crate::model::ElementKind;
    match array.kind() {
        ElementKind::Bool => "bool_".into(),
        ElementKind::Bytes(_) => "bytes_".into(),
        ElementKind::Str(_) => "str_".into(),
        ElementKind::Object | ElementKind::Ref => "object_".into(),
        ElementKind::Compound(_) => "void".into(),
        other => other.name(),
    }
}

impl Value {
    /// Runtime type identity used for marshaller lookup.
    pub fn type_path(&self) -> String {
        match self {
            Value::Bool(_) => "builtins.bool".into(),
            Value::Int(_) => "builtins.int".into(),
            Value::Float(_) => "builtins.float".into(),
            Value::Complex(..) => "builtins.complex".into(),
            Value::Str(_) => "builtins.str".into(),
            Value::Bytes(_) => "builtins.bytes".into(),
            Value::ByteArray(_) => "builtins.bytearray".into(),
            Value::Null(Sentinel::None) => "builtins.NoneType".into(),
            Value::Null(Sentinel::Ellipsis) => "builtins.ellipsis".into(),
            Value::Null(Sentinel::NotImplemented) => "builtins.NotImplementedType".into(),
            Value::Map(m) => match m.kind {
                MapKind::Dict => "builtins.dict".into(),
                MapKind::Ordered => "collections.OrderedDict".into(),
                MapKind::Counter => "collections.Counter".into(),
            },
            Value::Seq(s) => match s.kind {
                SeqKind::List => "builtins.list".into(),
                SeqKind::Tuple => "builtins.tuple".into(),
                SeqKind::Set => "builtins.set".into(),
                SeqKind::FrozenSet => "builtins.frozenset".into(),
                SeqKind::Deque => "collections.deque".into(),
            },
            Value::Array(a) if a.is_scalar() => format!("numpy.{}", numpy_scalar_name(a)),
            Value::Array(_) | Value::Struct(_) => "numpy.ndarray".into(),
            Value::Temporal(t) => match t {
                Temporal::Date(_) => "datetime.date".into(),
                Temporal::Time(_) => "datetime.time".into(),
                Temporal::DateTime(_) => "datetime.datetime".into(),
                Temporal::TimeDelta(_) => "datetime.timedelta".into(),
                Temporal::TimeZone(_) => "datetime.timezone".into(),
            },
            Value::Fraction(_) => "fractions.Fraction".into(),
            Value::Range(_) => "builtins.range".into(),
            Value::Slice(_) => "builtins.slice".into(),
            Value::DType(_) => "numpy.dtype".into(),
            Value::ChainMap(_) => "collections.ChainMap".into(),
            Value::Reference(_) => "h5py.Reference".into(),
            Value::Custom(c) => c.type_path().to_string(),
        }
    }

    /// Type identities from most to least specific.
    pub fn lineage(&self) -> Vec<String> {
        let mut chain = vec![self.type_path()];
        match self {
            Value::Bool(_) => chain.push("builtins.int".into()),
            Value::Map(m) if m.kind != MapKind::Dict => chain.push("builtins.dict".into()),
            Value::Temporal(Temporal::DateTime(_)) => chain.push("datetime.date".into()),
            Value::Temporal(Temporal::TimeZone(_)) => chain.push("datetime.tzinfo".into()),
            Value::Array(a) if a.is_scalar() => chain.push("numpy.generic".into()),
            Value::Custom(c) => chain.extend(c.ancestors()),
            _ => {}
        }
        chain.push("builtins.object".into());
        chain
    }

    pub fn none() -> Value {
        Value::Null(Sentinel::None)
    }

    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Value {
        Value::Seq(Sequence {
            kind: SeqKind::List,
            items: items.into_iter().collect(),
        })
    }

    pub fn tuple(items: impl IntoIterator<Item = Value>) -> Value {
        Value::Seq(Sequence {
            kind: SeqKind::Tuple,
            items: items.into_iter().collect(),
        })
    }

    pub fn dict<K: Into<Value>, V: Into<Value>>(entries: impl IntoIterator<Item = (K, V)>) -> Value {
        Value::Map(Mapping::dict(entries))
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<NdArray> for Value {
    fn from(v: NdArray) -> Self {
        Value::Array(v)
    }
}

impl From<Mapping> for Value {
    fn from(v: Mapping) -> Self {
        Value::Map(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArrayData, DateTime, Date, Time};

    #[derive(Debug, Clone, PartialEq)]
    struct Point(i32);

    impl CustomValue for Point {
        fn type_path(&self) -> &str {
            "geo.Point"
        }

        fn ancestors(&self) -> Vec<String> {
            vec!["geo.Shape".into()]
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn clone_box(&self) -> Box<dyn CustomValue> {
            Box::new(self.clone())
        }

        fn eq_dyn(&self, other: &dyn CustomValue) -> bool {
            other.as_any().downcast_ref::<Point>() == Some(self)
        }
    }

    #[test]
    fn test_nan_equals_itself() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert_eq!(Value::Complex(f64::NAN, 1.0), Value::Complex(f64::NAN, 1.0));
    }

    #[test]
    fn test_lineage_most_specific_first() {
        assert_eq!(
            Value::Bool(true).lineage(),
            vec!["builtins.bool", "builtins.int", "builtins.object"]
        );
        let dt = Value::Temporal(Temporal::DateTime(DateTime {
            date: Date::new(2020, 1, 2).unwrap(),
            time: Time::new(3, 4, 5, 6, None).unwrap(),
        }));
        assert_eq!(dt.lineage()[..2], ["datetime.datetime", "datetime.date"]);
    }

    #[test]
    fn test_scalar_type_path() {
        let scalar = NdArray::scalar(ArrayData::F32(vec![1.5])).unwrap();
        assert_eq!(Value::Array(scalar).type_path(), "numpy.float32");
        let array = NdArray::from_data(ArrayData::Bool(vec![true]));
        assert_eq!(Value::Array(array).type_path(), "numpy.ndarray");
        let text = NdArray::scalar(ArrayData::from_strs(&["x"])).unwrap();
        assert_eq!(Value::Array(text).type_path(), "numpy.str_");
    }

    #[test]
    fn test_custom_value_equality_and_lineage() {
        let a = Value::Custom(Box::new(Point(1)));
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, Value::Custom(Box::new(Point(2))));
        assert_eq!(a.lineage(), vec!["geo.Point", "geo.Shape", "builtins.object"]);
    }

    #[test]
    fn test_fraction_normalizes() {
        let f = Fraction::new(6, -4).unwrap();
        assert_eq!((f.numerator(), f.denominator()), (-3, 2));
        assert!(Fraction::new(1, 0).is_none());
        let zero = Fraction::new(0, 5).unwrap();
        assert_eq!((zero.numerator(), zero.denominator()), (0, 1));
    }
}
