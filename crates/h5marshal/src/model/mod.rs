//! Data model: values, arrays, calendar types and dtype descriptors.

pub mod array;
pub mod dtype;
pub mod temporal;
pub mod value;

pub use array::{
    checked_shape_size, shape_size, transpose_indices, ArrayData, Complex, Container, ElementKind, NdArray,
    StructArray, StructField,
};
pub use dtype::{DType, DTypeField, DTypeParseError};
pub use temporal::{Date, DateTime, Temporal, Time, TimeDelta, TimeZone};
pub use value::{
    CustomValue, Fraction, MapKind, Mapping, RangeValue, Sentinel, SeqKind, Sequence, SliceValue,
    Value,
};
