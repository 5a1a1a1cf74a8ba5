//! Raw little-endian dataset buffers.
//!
//! Compound elements are laid out record by record, fields packed in
//! declaration order with no padding.

use crate::error::StorageError;
use crate::model::{ArrayData, Complex, ElementKind};

fn le_bytes<T: Copy, const N: usize>(values: &[T], to: impl Fn(T) -> [u8; N]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * N);
    for &v in values {
        out.extend_from_slice(&to(v));
    }
    out
}

fn from_le<T, const N: usize>(bytes: &[u8], from: impl Fn([u8; N]) -> T) -> Vec<T> {
    bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut buf = [0u8; N];
            buf.copy_from_slice(chunk);
            from(buf)
        })
        .collect()
}

/// Encodes elements into their stored byte form.
pub fn encode_elements(data: &ArrayData) -> Result<Vec<u8>, StorageError> {
    let bytes = match data {
        ArrayData::Bool(v) => v.iter().map(|&b| b as u8).collect(),
        ArrayData::U8(v) => v.clone(),
        ArrayData::U16(v) | ArrayData::F16(v) => le_bytes(v.as_slice(), u16::to_le_bytes),
        ArrayData::U32(v) => le_bytes(v.as_slice(), u32::to_le_bytes),
        ArrayData::U64(v) => le_bytes(v.as_slice(), u64::to_le_bytes),
        ArrayData::I8(v) => v.iter().map(|&b| b as u8).collect(),
        ArrayData::I16(v) => le_bytes(v.as_slice(), i16::to_le_bytes),
        ArrayData::I32(v) => le_bytes(v.as_slice(), i32::to_le_bytes),
        ArrayData::I64(v) => le_bytes(v.as_slice(), i64::to_le_bytes),
        ArrayData::F32(v) => le_bytes(v.as_slice(), f32::to_le_bytes),
        ArrayData::F64(v) => le_bytes(v.as_slice(), f64::to_le_bytes),
        ArrayData::C64(v) => {
            let mut out = Vec::with_capacity(v.len() * 8);
            for c in v {
                out.extend_from_slice(&c.re.to_le_bytes());
                out.extend_from_slice(&c.im.to_le_bytes());
            }
            out
        }
        ArrayData::C128(v) => {
            let mut out = Vec::with_capacity(v.len() * 16);
            for c in v {
                out.extend_from_slice(&c.re.to_le_bytes());
                out.extend_from_slice(&c.im.to_le_bytes());
            }
            out
        }
        ArrayData::Bytes { data, .. } => data.clone(),
        ArrayData::Str { data, .. } => le_bytes(data.as_slice(), u32::to_le_bytes),
        ArrayData::Ref(v) => le_bytes(&v.iter().map(|r| r.0).collect::<Vec<_>>(), u64::to_le_bytes),
        ArrayData::Object(_) => {
            return Err(StorageError::UnstorableElementKind {
                kind: data.kind().name(),
            });
        }
        ArrayData::Compound(fields) => {
            let count = data.len();
            let mut columns = Vec::with_capacity(fields.len());
            for (_, field) in fields {
                let size = field.kind().item_size();
                columns.push((size, encode_elements(field)?));
            }
            let record: usize = columns.iter().map(|(s, _)| s).sum();
            let mut out = Vec::with_capacity(record * count);
            for i in 0..count {
                for (size, column) in &columns {
                    out.extend_from_slice(&column[i * size..(i + 1) * size]);
                }
            }
            out
        }
    };
    Ok(bytes)
}

/// Decodes `count` elements of `kind` from their stored byte form.
pub fn decode_elements(
    kind: &ElementKind,
    count: usize,
    bytes: &[u8],
) -> Result<ArrayData, StorageError> {
    let expected = kind.item_size() * count;
    if bytes.len() != expected {
        return Err(StorageError::BufferSizeMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    let data = match kind {
        ElementKind::Bool => ArrayData::Bool(bytes.iter().map(|&b| b != 0).collect()),
        ElementKind::U8 => ArrayData::U8(bytes.to_vec()),
        ElementKind::U16 => ArrayData::U16(from_le(bytes, u16::from_le_bytes)),
        ElementKind::F16 => ArrayData::F16(from_le(bytes, u16::from_le_bytes)),
        ElementKind::U32 => ArrayData::U32(from_le(bytes, u32::from_le_bytes)),
        ElementKind::U64 => ArrayData::U64(from_le(bytes, u64::from_le_bytes)),
        ElementKind::I8 => ArrayData::I8(bytes.iter().map(|&b| b as i8).collect()),
        ElementKind::I16 => ArrayData::I16(from_le(bytes, i16::from_le_bytes)),
        ElementKind::I32 => ArrayData::I32(from_le(bytes, i32::from_le_bytes)),
        ElementKind::I64 => ArrayData::I64(from_le(bytes, i64::from_le_bytes)),
        ElementKind::F32 => ArrayData::F32(from_le(bytes, f32::from_le_bytes)),
        ElementKind::F64 => ArrayData::F64(from_le(bytes, f64::from_le_bytes)),
        ElementKind::C64 => ArrayData::C64(from_le(bytes, |b: [u8; 8]| {
            let mut re = [0u8; 4];
            let mut im = [0u8; 4];
            re.copy_from_slice(&b[..4]);
            im.copy_from_slice(&b[4..]);
            Complex::new(f32::from_le_bytes(re), f32::from_le_bytes(im))
        })),
        ElementKind::C128 => ArrayData::C128(from_le(bytes, |b: [u8; 16]| {
            let mut re = [0u8; 8];
            let mut im = [0u8; 8];
            re.copy_from_slice(&b[..8]);
            im.copy_from_slice(&b[8..]);
            Complex::new(f64::from_le_bytes(re), f64::from_le_bytes(im))
        })),
        ElementKind::Bytes(width) => ArrayData::Bytes {
            width: *width,
            data: bytes.to_vec(),
        },
        ElementKind::Str(width) => ArrayData::Str {
            width: *width,
            data: from_le(bytes, u32::from_le_bytes),
        },
        ElementKind::Ref => ArrayData::Ref(
            from_le(bytes, u64::from_le_bytes)
                .into_iter()
                .map(crate::storage::NodeRef)
                .collect(),
        ),
        ElementKind::Object => {
            return Err(StorageError::UnstorableElementKind { kind: kind.name() });
        }
        ElementKind::Compound(fields) => {
            let record = kind.item_size();
            let mut out = Vec::with_capacity(fields.len());
            let mut offset = 0;
            for (name, field_kind) in fields {
                let size = field_kind.item_size();
                let mut column = Vec::with_capacity(size * count);
                for i in 0..count {
                    let start = i * record + offset;
                    column.extend_from_slice(&bytes[start..start + size]);
                }
                out.push((name.clone(), decode_elements(field_kind, count, &column)?));
                offset += size;
            }
            ArrayData::Compound(out)
        }
    };
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NodeRef;

    #[test]
    fn test_numeric_little_endian() {
        let bytes = encode_elements(&ArrayData::U16(vec![0x0102, 0xA0B0])).unwrap();
        assert_eq!(bytes, vec![0x02, 0x01, 0xB0, 0xA0]);
        assert_eq!(
            decode_elements(&ElementKind::U16, 2, &bytes).unwrap(),
            ArrayData::U16(vec![0x0102, 0xA0B0])
        );
    }

    #[test]
    fn test_compound_interleaves_records() {
        let data = ArrayData::Compound(vec![
            ("real".into(), ArrayData::F32(vec![1.0, 3.0])),
            ("imag".into(), ArrayData::F32(vec![2.0, 4.0])),
        ]);
        let bytes = encode_elements(&data).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[4..8], &2.0f32.to_le_bytes());
        let back = decode_elements(&data.kind(), 2, &bytes).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_refs_and_text() {
        let refs = ArrayData::Ref(vec![NodeRef(3), NodeRef(9)]);
        let bytes = encode_elements(&refs).unwrap();
        assert_eq!(decode_elements(&ElementKind::Ref, 2, &bytes).unwrap(), refs);

        let text = ArrayData::from_strs(&["ab", "c"]);
        let bytes = encode_elements(&text).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(decode_elements(&text.kind(), 2, &bytes).unwrap(), text);
    }

    #[test]
    fn test_object_unstorable() {
        let err = encode_elements(&ArrayData::Object(vec![])).unwrap_err();
        assert!(matches!(err, StorageError::UnstorableElementKind { .. }));
    }

    #[test]
    fn test_size_mismatch() {
        let err = decode_elements(&ElementKind::F64, 2, &[0u8; 15]).unwrap_err();
        assert!(matches!(err, StorageError::BufferSizeMismatch { expected: 16, actual: 15 }));
    }
}
