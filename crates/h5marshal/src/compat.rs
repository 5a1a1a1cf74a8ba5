//! Compatibility transformer.
//!
//! Arrays written for the compat consumer go through a fixed pipeline:
//! text to code units, rank promotion, axis reversal, booleans to `uint8`,
//! empties to their shape, and complex numbers to two-field records. Each
//! step here has an inverse that the array marshaller applies on read when
//! the pre-transform kind and shape were recorded. Without that metadata the
//! stored form is taken as final.

use tracing::warn;

use crate::error::{MarshalError, Result};
use crate::model::{ArrayData, Complex, ElementKind, NdArray};
use crate::options::{IncompatiblePolicy, OnedAs, Options, StrEncoding};
use crate::util::text::{decode_utf16, fits_utf16, is_ascii, narrow_to_utf16};

/// Outcome of checking an element kind against the compat consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fitness {
    Compatible,
    /// Not representable; write without a target class.
    Emit,
    /// Not representable; skip the value.
    Drop,
}

/// Checks whether arrays of `kind` can be written under `options`.
pub fn check_kind(kind: &ElementKind, options: &Options) -> Result<Fitness> {
    if !options.compat() || kind.matlab_class().is_some() {
        return Ok(Fitness::Compatible);
    }
    match options.incompatible_policy() {
        IncompatiblePolicy::Emit => Ok(Fitness::Emit),
        IncompatiblePolicy::Drop => {
            warn!(kind = %kind.name(), "dropping value with no compat equivalent");
            Ok(Fitness::Drop)
        }
        IncompatiblePolicy::Raise => Err(MarshalError::IncompatibleValue {
            what: kind.name(),
            reason: "element kind has no target class".into(),
        }),
    }
}

// =============================================================================
// SHAPE
// =============================================================================

/// Promotes rank 0 and 1 arrays to rank 2.
pub fn promote_rank(mut array: NdArray, oned_as: OnedAs) -> NdArray {
    array.shape = match (array.shape.as_slice(), oned_as) {
        ([], _) => vec![1, 1],
        ([n], OnedAs::Leading) => vec![1, *n],
        ([n], OnedAs::Trailing) => vec![*n, 1],
        _ => return array,
    };
    array
}

/// Replaces an empty array by the array of its dimensions.
pub fn empty_marker(array: &NdArray) -> NdArray {
    NdArray::from_data(ArrayData::U64(
        array.shape.iter().map(|&d| d as u64).collect(),
    ))
}

/// Recovers dimensions from an empty marker.
pub fn shape_from_marker(data: &ArrayData) -> Option<Vec<usize>> {
    match data {
        ArrayData::U64(dims) => dims.iter().map(|&d| usize::try_from(d).ok()).collect(),
        _ => None,
    }
}

// =============================================================================
// BOOLEANS
// =============================================================================

pub fn bools_to_u8(data: ArrayData) -> ArrayData {
    match data {
        ArrayData::Bool(v) => ArrayData::U8(v.into_iter().map(u8::from).collect()),
        other => other,
    }
}

pub fn u8_to_bools(data: ArrayData) -> ArrayData {
    match data {
        ArrayData::U8(v) => ArrayData::Bool(v.into_iter().map(|b| b != 0).collect()),
        other => other,
    }
}

// =============================================================================
// COMPLEX
// =============================================================================

const REAL_NAMES: [&str; 3] = ["r", "re", "real"];
const IMAG_NAMES: [&str; 3] = ["i", "im", "imag"];

/// Splits complex elements into a two-field record.
pub fn encode_complex(data: ArrayData, names: (&str, &str)) -> ArrayData {
    match data {
        ArrayData::C64(v) => ArrayData::Compound(vec![
            (names.0.into(), ArrayData::F32(v.iter().map(|c| c.re).collect())),
            (names.1.into(), ArrayData::F32(v.iter().map(|c| c.im).collect())),
        ]),
        ArrayData::C128(v) => ArrayData::Compound(vec![
            (names.0.into(), ArrayData::F64(v.iter().map(|c| c.re).collect())),
            (names.1.into(), ArrayData::F64(v.iter().map(|c| c.im).collect())),
        ]),
        other => other,
    }
}

/// Joins a two-field real/imaginary record back into complex elements.
///
/// Field names are matched against `names` and the common spellings `r`,
/// `re`, `real` and `i`, `im`, `imag`.
pub fn decode_complex(data: &ArrayData, names: (&str, &str)) -> Option<ArrayData> {
    let ArrayData::Compound(fields) = data else {
        return None;
    };
    let [(re_name, re), (im_name, im)] = fields.as_slice() else {
        return None;
    };
    let is_real = re_name == names.0 || REAL_NAMES.contains(&re_name.as_str());
    let is_imag = im_name == names.1 || IMAG_NAMES.contains(&im_name.as_str());
    if !is_real || !is_imag {
        return None;
    }
    match (re, im) {
        (ArrayData::F32(re), ArrayData::F32(im)) => Some(ArrayData::C64(
            re.iter().zip(im).map(|(&r, &i)| Complex::new(r, i)).collect(),
        )),
        (ArrayData::F64(re), ArrayData::F64(im)) => Some(ArrayData::C128(
            re.iter().zip(im).map(|(&r, &i)| Complex::new(r, i)).collect(),
        )),
        _ => None,
    }
}

// =============================================================================
// TEXT
// =============================================================================

/// Shape of a text array once each element is spread over `width` units
/// along the last axis.
fn unit_shape(shape: &[usize], width: usize) -> Vec<usize> {
    match shape.split_last() {
        None => vec![width],
        Some((last, rest)) => {
            let mut out = rest.to_vec();
            out.push(last * width);
            out
        }
    }
}

/// Converts fixed-width text into code-unit arrays.
///
/// Text becomes `uint16` when every code point fits in one unit (or
/// `uint32` otherwise, unless the encoding is strict); byte strings become
/// `uint16` when `bytes_to_utf16` is set and they are pure ASCII. Other
/// arrays pass through unchanged.
pub fn encode_text(array: NdArray, options: &Options) -> Result<NdArray> {
    let shape = match &array.data {
        ArrayData::Str { width, .. } | ArrayData::Bytes { width, .. } => {
            unit_shape(&array.shape, *width)
        }
        _ => return Ok(array),
    };
    let data = match array.data {
        ArrayData::Str { width, data } => match options.str_encoding() {
            StrEncoding::Utf32 => {
                return Ok(NdArray {
                    data: ArrayData::Str { width, data },
                    ..array
                });
            }
            encoding => match narrow_to_utf16(&data) {
                Some(units) => ArrayData::U16(units),
                None if encoding == StrEncoding::Utf16Strict => {
                    return Err(MarshalError::Encoding {
                        encoding: "UTF-16",
                        reason: "text contains code points outside the basic multilingual plane"
                            .into(),
                    });
                }
                None => ArrayData::U32(data),
            },
        },
        ArrayData::Bytes { width, data } => {
            if !options.bytes_to_utf16() || !is_ascii(&data) {
                return Ok(NdArray {
                    data: ArrayData::Bytes { width, data },
                    ..array
                });
            }
            ArrayData::U16(data.into_iter().map(u16::from).collect())
        }
        other => other,
    };
    Ok(NdArray {
        shape,
        data,
        container: array.container,
    })
}

/// Size in bytes of one stored code unit of a text array under `options`.
pub fn text_unit_size(array: &NdArray, options: &Options) -> Option<i64> {
    match &array.data {
        ArrayData::Str { data, .. } => match options.str_encoding() {
            StrEncoding::Utf32 => Some(4),
            _ if fits_utf16(data) => Some(2),
            _ => Some(4),
        },
        ArrayData::Bytes { data, .. } if options.bytes_to_utf16() && is_ascii(data) => Some(2),
        ArrayData::Bytes { .. } => Some(1),
        _ => None,
    }
}

/// Rebuilds fixed-width text of `kind` from code units laid out by
/// [`encode_text`]. `count` is the number of text elements.
pub fn decode_text(data: ArrayData, kind: &ElementKind, count: usize) -> Result<ArrayData> {
    let corrupt = |what: &str| MarshalError::Encoding {
        encoding: "UTF-16",
        reason: what.to_string(),
    };
    let width = match kind {
        ElementKind::Str(w) | ElementKind::Bytes(w) => *w,
        _ => return Ok(data),
    };
    if matches!(data, ArrayData::U16(_) | ArrayData::U32(_)) && data.len() != count * width {
        return Err(MarshalError::ShapeMismatch {
            shape: vec![count, width],
            expected: count * width,
            actual: data.len(),
        });
    }
    let width = width.max(1);
    match (kind, data) {
        (ElementKind::Str(_), ArrayData::U16(units)) => {
            if units.iter().any(|u| (0xD800..0xE000).contains(u)) {
                return Err(corrupt("surrogate in fixed-width text"));
            }
            Ok(ArrayData::Str {
                width,
                data: units.into_iter().map(u32::from).collect(),
            })
        }
        (ElementKind::Str(_), ArrayData::U32(data)) => {
            if data.iter().any(|&c| char::from_u32(c).is_none()) {
                return Err(MarshalError::Encoding {
                    encoding: "UTF-32",
                    reason: "invalid code point".into(),
                });
            }
            Ok(ArrayData::Str { width, data })
        }
        (ElementKind::Bytes(_), ArrayData::U16(units)) => {
            let bytes: Option<Vec<u8>> = units.into_iter().map(|u| u8::try_from(u).ok()).collect();
            Ok(ArrayData::Bytes {
                width,
                data: bytes.ok_or_else(|| corrupt("byte string unit above 0xff"))?,
            })
        }
        (_, data) => Ok(data),
    }
}

/// Decodes a target-consumer character array: the last axis holds the
/// UTF-16 units of each string.
pub fn decode_char(array: NdArray) -> Result<NdArray> {
    let ArrayData::U16(units) = &array.data else {
        return Ok(array);
    };
    let (row_len, shape) = match array.shape.split_last() {
        None => (1, Vec::new()),
        Some((last, rest)) => (*last, rest.to_vec()),
    };
    let strings = if row_len == 0 {
        vec![String::new(); crate::model::shape_size(&shape)]
    } else {
        units
            .chunks(row_len)
            .map(decode_utf16)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|reason| MarshalError::Encoding {
                encoding: "UTF-16",
                reason,
            })?
    };
    NdArray::new(shape, ArrayData::from_strs(&strings)).map(|mut out| {
        out.container = array.container;
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Container;

    fn f64_array(shape: Vec<usize>, values: Vec<f64>) -> NdArray {
        NdArray::new(shape, ArrayData::F64(values)).unwrap()
    }

    #[test]
    fn test_promote_rank() {
        let row = promote_rank(f64_array(vec![5], vec![0.0; 5]), OnedAs::Leading);
        assert_eq!(row.shape, vec![1, 5]);
        let col = promote_rank(f64_array(vec![5], vec![0.0; 5]), OnedAs::Trailing);
        assert_eq!(col.shape, vec![5, 1]);
        let scalar = promote_rank(NdArray::scalar(ArrayData::F64(vec![1.0])).unwrap(), OnedAs::Leading);
        assert_eq!(scalar.shape, vec![1, 1]);
        assert_eq!(scalar.container, Container::Scalar);
        let cube = promote_rank(f64_array(vec![1, 2, 3], vec![0.0; 6]), OnedAs::Leading);
        assert_eq!(cube.shape, vec![1, 2, 3]);
    }

    #[test]
    fn test_empty_marker() {
        let marker = empty_marker(&f64_array(vec![0, 3], vec![]));
        assert_eq!(marker.data, ArrayData::U64(vec![0, 3]));
        assert_eq!(shape_from_marker(&marker.data), Some(vec![0, 3]));
    }

    #[test]
    fn test_complex_fields() {
        let data = ArrayData::C128(vec![Complex::new(1.0, -2.0)]);
        let split = encode_complex(data.clone(), ("real", "imag"));
        assert!(matches!(&split, ArrayData::Compound(f) if f[0].0 == "real"));
        assert_eq!(decode_complex(&split, ("real", "imag")), Some(data.clone()));
        // other spellings are accepted on read
        let other = encode_complex(data.clone(), ("re", "im"));
        assert_eq!(decode_complex(&other, ("real", "imag")), Some(data));

        let unrelated = ArrayData::Compound(vec![
            ("x".into(), ArrayData::F64(vec![1.0])),
            ("y".into(), ArrayData::F64(vec![2.0])),
        ]);
        assert_eq!(decode_complex(&unrelated, ("real", "imag")), None);
    }

    #[test]
    fn test_text_narrowing() {
        let options = Options::new();
        let array = NdArray::scalar(ArrayData::from_strs(&["héllo"])).unwrap();
        let units = encode_text(array.clone(), &options).unwrap();
        assert_eq!(units.shape, vec![5]);
        assert!(matches!(units.data, ArrayData::U16(_)));
        let back = decode_text(units.data, &array.kind(), 1).unwrap();
        assert_eq!(back, array.data);
    }

    #[test]
    fn test_text_widens_outside_bmp() {
        let array = NdArray::from_data(ArrayData::from_strs(&["a\u{1F600}", "b"]));
        let units = encode_text(array.clone(), &Options::new()).unwrap();
        assert_eq!(units.shape, vec![4]);
        assert!(matches!(units.data, ArrayData::U32(_)));

        let strict = Options::new().with_str_encoding(StrEncoding::Utf16Strict);
        assert!(matches!(
            encode_text(array, &strict),
            Err(MarshalError::Encoding { .. })
        ));
    }

    #[test]
    fn test_bytes_to_utf16_only_when_ascii() {
        let options = Options::new();
        let ascii = NdArray::scalar(ArrayData::from_byte_strs(&[b"abc"])).unwrap();
        let units = encode_text(ascii.clone(), &options).unwrap();
        assert_eq!(units.data, ArrayData::U16(vec![97, 98, 99]));
        assert_eq!(decode_text(units.data, &ascii.kind(), 1).unwrap(), ascii.data);

        let binary = NdArray::scalar(ArrayData::from_byte_strs(&[[0xFFu8, 0x01]])).unwrap();
        assert_eq!(encode_text(binary.clone(), &options).unwrap(), binary);
    }

    #[test]
    fn test_decode_char_rows() {
        let array = NdArray::new(vec![2, 2], ArrayData::U16(vec![104, 105, 111, 0])).unwrap();
        let text = decode_char(array).unwrap();
        assert_eq!(text.shape, vec![2]);
        assert_eq!(text.data.strings().unwrap(), vec!["hi", "o"]);
    }

    #[test]
    fn test_check_kind_policies() {
        let options = Options::new();
        assert_eq!(check_kind(&ElementKind::F64, &options).unwrap(), Fitness::Compatible);
        assert!(matches!(
            check_kind(&ElementKind::F16, &options),
            Err(MarshalError::IncompatibleValue { .. })
        ));
        let emit = options.clone().with_incompatible_policy(IncompatiblePolicy::Emit);
        assert_eq!(check_kind(&ElementKind::F16, &emit).unwrap(), Fitness::Emit);
        let drop = options.with_incompatible_policy(IncompatiblePolicy::Drop);
        assert_eq!(check_kind(&ElementKind::F16, &drop).unwrap(), Fitness::Drop);
        assert_eq!(
            check_kind(&ElementKind::F16, &Options::plain()).unwrap(),
            Fitness::Compatible
        );
    }
}
