//! Serialized container images.
//!
//! An image is an optional 512-byte userblock followed by the node table:
//!
//! ```text
//! [userblock: 512 bytes]          only for files created in compat mode
//! "H5MF" version:u8
//! slab_len:varint node_count:varint
//! node*: id parent+1 name attrs body
//! ```
//!
//! Node ids of a compacted file are dense, and stored references are written
//! against those ids.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::codec::primitives::{Reader, Writer};
use crate::error::DecodeError;
use crate::limits::{
    BANNER_LEN, CHECKSUM_LEN, FORMAT_VERSION, HEADER_TAIL, MAGIC, MAX_ATTRIBUTES, MAX_BUFFER_LEN,
    MAX_COMPOUND_FIELDS, MAX_NAME_LEN, MAX_NODES, MAX_RANK, MAX_STRING_LEN, USERBLOCK_SIZE,
};
use crate::model::{shape_size, ElementKind};
use crate::storage::memory::{Node, NodeBody, StoredDataset};
use crate::storage::{Attribute, DatasetFilters, MemoryFile, NodeId};
use crate::util::format_asctime;

const NODE_GROUP: u8 = 0;
const NODE_DATASET: u8 = 1;

const ATTR_STR: u8 = 0;
const ATTR_INT: u8 = 1;
const ATTR_U64_ARRAY: u8 = 2;
const ATTR_STR_ARRAY: u8 = 3;

const FILTER_COMPRESS: u8 = 0x01;
const FILTER_SHUFFLE: u8 = 0x02;
const FILTER_CHECKSUM: u8 = 0x04;

// =============================================================================
// HEADER
// =============================================================================

/// Builds the 512-byte header written at the start of compat-mode files.
///
/// Bytes 0..116 hold the space-padded ASCII banner, bytes 116..128 the fixed
/// tail, and the rest is zero.
pub fn compat_header(created: SystemTime) -> [u8; USERBLOCK_SIZE] {
    let secs = created
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0);
    let banner = format!(
        "MATLAB 7.3 MAT-file, Platform: {}, Created on: {} HDF5 schema 1.00 .",
        std::env::consts::OS,
        format_asctime(secs)
    );

    let mut header = [0u8; USERBLOCK_SIZE];
    header[..BANNER_LEN].fill(b' ');
    for (slot, byte) in header[..BANNER_LEN]
        .iter_mut()
        .zip(banner.bytes().filter(u8::is_ascii))
    {
        *slot = byte;
    }
    header[BANNER_LEN..BANNER_LEN + HEADER_TAIL.len()].copy_from_slice(&HEADER_TAIL);
    header
}

/// Returns true when `bytes` begins with a compat header.
pub fn has_compat_header(bytes: &[u8]) -> bool {
    bytes.len() >= USERBLOCK_SIZE
        && bytes[..BANNER_LEN].is_ascii()
        && bytes[BANNER_LEN..BANNER_LEN + HEADER_TAIL.len()] == HEADER_TAIL
}

// =============================================================================
// ENCODING
// =============================================================================

fn write_kind(writer: &mut Writer, kind: &ElementKind) {
    match kind {
        ElementKind::Bool => writer.write_byte(0),
        ElementKind::U8 => writer.write_byte(1),
        ElementKind::U16 => writer.write_byte(2),
        ElementKind::U32 => writer.write_byte(3),
        ElementKind::U64 => writer.write_byte(4),
        ElementKind::I8 => writer.write_byte(5),
        ElementKind::I16 => writer.write_byte(6),
        ElementKind::I32 => writer.write_byte(7),
        ElementKind::I64 => writer.write_byte(8),
        ElementKind::F16 => writer.write_byte(9),
        ElementKind::F32 => writer.write_byte(10),
        ElementKind::F64 => writer.write_byte(11),
        ElementKind::C64 => writer.write_byte(12),
        ElementKind::C128 => writer.write_byte(13),
        ElementKind::Bytes(w) => {
            writer.write_byte(14);
            writer.write_varint(*w as u64);
        }
        ElementKind::Str(w) => {
            writer.write_byte(15);
            writer.write_varint(*w as u64);
        }
        ElementKind::Ref => writer.write_byte(16),
        ElementKind::Compound(fields) => {
            writer.write_byte(17);
            writer.write_varint(fields.len() as u64);
            for (name, field) in fields {
                writer.write_string(name);
                write_kind(writer, field);
            }
        }
        // Object buffers never reach storage.
        ElementKind::Object => writer.write_byte(18),
    }
}

fn write_attribute(writer: &mut Writer, value: &Attribute) {
    match value {
        Attribute::Str(s) => {
            writer.write_byte(ATTR_STR);
            writer.write_string(s);
        }
        Attribute::Int(v) => {
            writer.write_byte(ATTR_INT);
            writer.write_signed_varint(*v);
        }
        Attribute::U64Array(values) => {
            writer.write_byte(ATTR_U64_ARRAY);
            writer.write_varint(values.len() as u64);
            for &v in values {
                writer.write_varint(v);
            }
        }
        Attribute::StrArray(values) => {
            writer.write_byte(ATTR_STR_ARRAY);
            writer.write_varint(values.len() as u64);
            for v in values {
                writer.write_string(v);
            }
        }
    }
}

fn write_dataset(writer: &mut Writer, stored: &StoredDataset) {
    write_kind(writer, &stored.kind);
    writer.write_varint(stored.shape.len() as u64);
    for &dim in &stored.shape {
        writer.write_varint(dim as u64);
    }
    let mut flags = 0u8;
    if stored.filters.compression.is_some() {
        flags |= FILTER_COMPRESS;
    }
    if stored.filters.shuffle {
        flags |= FILTER_SHUFFLE;
    }
    if stored.checksum.is_some() {
        flags |= FILTER_CHECKSUM;
    }
    writer.write_byte(flags);
    if let Some(level) = stored.filters.compression {
        writer.write_signed_varint(level as i64);
    }
    writer.write_varint(stored.raw_len as u64);
    writer.write_bytes_prefixed(&stored.payload);
    if let Some(sum) = &stored.checksum {
        writer.write_bytes(sum);
    }
}

/// Serializes a file, userblock included.
///
/// Deleted slots are squeezed out first, so the node table of an image only
/// ever holds live nodes. A file whose reference datasets cannot be decoded
/// for rewriting is written with its holes instead.
pub fn encode_image(file: &MemoryFile) -> Vec<u8> {
    if file.slab_len() == file.node_count() {
        return encode_nodes(file);
    }
    match file.compacted() {
        Ok(compacted) => encode_nodes(&compacted),
        Err(err) => {
            warn!(error = %err, "cannot compact node table, keeping deleted slots");
            encode_nodes(file)
        }
    }
}

fn encode_nodes(file: &MemoryFile) -> Vec<u8> {
    let mut writer = Writer::with_capacity(USERBLOCK_SIZE + 1024);
    if let Some(userblock) = file.userblock() {
        writer.write_bytes(userblock);
    }
    writer.write_bytes(MAGIC);
    writer.write_byte(FORMAT_VERSION);
    writer.write_varint(file.nodes.len() as u64);
    writer.write_varint(file.node_count() as u64);

    for (id, node) in file.nodes.iter().enumerate() {
        let Some(node) = node else { continue };
        writer.write_varint(id as u64);
        writer.write_varint(node.parent.map_or(0, |p| p.0 as u64 + 1));
        writer.write_string(&node.name);
        writer.write_varint(node.attrs.len() as u64);
        for (key, value) in &node.attrs {
            writer.write_string(key);
            write_attribute(&mut writer, value);
        }
        match &node.body {
            NodeBody::Group(_) => writer.write_byte(NODE_GROUP),
            NodeBody::Dataset(stored) => {
                writer.write_byte(NODE_DATASET);
                write_dataset(&mut writer, stored);
            }
        }
    }
    writer.into_bytes()
}

// =============================================================================
// DECODING
// =============================================================================

fn read_kind(reader: &mut Reader<'_>, depth: usize) -> Result<ElementKind, DecodeError> {
    if depth > MAX_RANK {
        return Err(DecodeError::Malformed {
            context: "compound nesting too deep",
        });
    }
    let tag = reader.read_byte("element kind")?;
    let kind = match tag {
        0 => ElementKind::Bool,
        1 => ElementKind::U8,
        2 => ElementKind::U16,
        3 => ElementKind::U32,
        4 => ElementKind::U64,
        5 => ElementKind::I8,
        6 => ElementKind::I16,
        7 => ElementKind::I32,
        8 => ElementKind::I64,
        9 => ElementKind::F16,
        10 => ElementKind::F32,
        11 => ElementKind::F64,
        12 => ElementKind::C64,
        13 => ElementKind::C128,
        14 => ElementKind::Bytes(reader.read_len(MAX_BUFFER_LEN, "bytes width")?),
        15 => ElementKind::Str(reader.read_len(MAX_BUFFER_LEN, "str width")?),
        16 => ElementKind::Ref,
        17 => {
            let count = reader.read_len(MAX_COMPOUND_FIELDS, "compound fields")?;
            let mut fields = Vec::with_capacity(count);
            for _ in 0..count {
                let name = reader.read_string(MAX_NAME_LEN, "field name")?;
                fields.push((name, read_kind(reader, depth + 1)?));
            }
            ElementKind::Compound(fields)
        }
        tag => {
            return Err(DecodeError::InvalidTag {
                context: "element kind",
                tag,
            });
        }
    };
    Ok(kind)
}

fn read_attribute(reader: &mut Reader<'_>) -> Result<Attribute, DecodeError> {
    let tag = reader.read_byte("attribute tag")?;
    let value = match tag {
        ATTR_STR => Attribute::Str(reader.read_string(MAX_STRING_LEN, "attribute")?),
        ATTR_INT => Attribute::Int(reader.read_signed_varint("attribute")?),
        ATTR_U64_ARRAY => {
            let count = reader.read_len(MAX_BUFFER_LEN / 8, "attribute array")?;
            let mut values = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                values.push(reader.read_varint("attribute array")?);
            }
            Attribute::U64Array(values)
        }
        ATTR_STR_ARRAY => {
            let count = reader.read_len(MAX_ATTRIBUTES * 16, "attribute array")?;
            let mut values = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                values.push(reader.read_string(MAX_NAME_LEN, "attribute array")?);
            }
            Attribute::StrArray(values)
        }
        tag => {
            return Err(DecodeError::InvalidTag {
                context: "attribute",
                tag,
            });
        }
    };
    Ok(value)
}

fn read_dataset(reader: &mut Reader<'_>) -> Result<StoredDataset, DecodeError> {
    let kind = read_kind(reader, 0)?;
    if kind == ElementKind::Object {
        return Err(DecodeError::Malformed {
            context: "object dataset",
        });
    }
    let rank = reader.read_len(MAX_RANK, "rank")?;
    let mut shape = Vec::with_capacity(rank);
    for _ in 0..rank {
        shape.push(reader.read_len(MAX_BUFFER_LEN, "dimension")?);
    }
    let flags = reader.read_byte("filters")?;
    if flags & !(FILTER_COMPRESS | FILTER_SHUFFLE | FILTER_CHECKSUM) != 0 {
        return Err(DecodeError::InvalidTag {
            context: "filters",
            tag: flags,
        });
    }
    let compression = if flags & FILTER_COMPRESS != 0 {
        let level = reader.read_signed_varint("compression level")?;
        Some(i32::try_from(level).map_err(|_| DecodeError::Malformed {
            context: "compression level",
        })?)
    } else {
        None
    };
    let raw_len = reader.read_len(MAX_BUFFER_LEN, "raw length")?;
    let expected = shape
        .iter()
        .try_fold(kind.item_size(), |acc, &d| acc.checked_mul(d));
    if expected != Some(raw_len) {
        return Err(DecodeError::Malformed {
            context: "dataset length does not match shape",
        });
    }
    let payload = reader.read_bytes_prefixed(MAX_BUFFER_LEN, "payload")?;
    if compression.is_none() && payload.len() != raw_len {
        return Err(DecodeError::Malformed {
            context: "uncompressed payload length",
        });
    }
    let checksum = if flags & FILTER_CHECKSUM != 0 {
        let mut sum = [0u8; CHECKSUM_LEN];
        sum.copy_from_slice(reader.read_bytes(CHECKSUM_LEN, "checksum")?);
        Some(sum)
    } else {
        None
    };
    debug_assert_eq!(shape_size(&shape) * kind.item_size(), raw_len);
    Ok(StoredDataset {
        kind,
        shape,
        filters: DatasetFilters {
            compression,
            shuffle: flags & FILTER_SHUFFLE != 0,
            checksum: checksum.is_some(),
        },
        raw_len,
        payload,
        checksum,
    })
}

/// Deserializes a file produced by [`encode_image`].
pub fn decode_image(bytes: &[u8]) -> Result<MemoryFile, DecodeError> {
    let (userblock, body) = if bytes.len() >= 4 && &bytes[..4] == MAGIC {
        (None, bytes)
    } else if has_compat_header(bytes) {
        (Some(bytes[..USERBLOCK_SIZE].to_vec()), &bytes[USERBLOCK_SIZE..])
    } else {
        let mut found = [0u8; 4];
        let n = bytes.len().min(4);
        found[..n].copy_from_slice(&bytes[..n]);
        return Err(DecodeError::InvalidMagic { found });
    };

    let mut reader = Reader::new(body);
    let magic = reader.read_bytes(4, "magic")?;
    if magic != MAGIC {
        let mut found = [0u8; 4];
        found.copy_from_slice(magic);
        return Err(DecodeError::InvalidMagic { found });
    }
    let version = reader.read_byte("version")?;
    if version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion { version });
    }

    let slab_len = reader.read_len(MAX_NODES, "slab length")?;
    let count = reader.read_len(slab_len, "node count")?;
    let mut nodes: Vec<Option<Node>> = vec![None; slab_len];

    for _ in 0..count {
        let id = reader.read_len(slab_len.saturating_sub(1), "node id")?;
        if nodes[id].is_some() {
            return Err(DecodeError::Malformed {
                context: "duplicate node id",
            });
        }
        let parent = match reader.read_varint("parent")? {
            0 => None,
            p => Some(NodeId((p - 1) as usize)),
        };
        let name = reader.read_string(MAX_NAME_LEN, "node name")?;
        let attr_count = reader.read_len(MAX_ATTRIBUTES, "attribute count")?;
        let mut attrs = BTreeMap::new();
        for _ in 0..attr_count {
            let key = reader.read_string(MAX_NAME_LEN, "attribute key")?;
            attrs.insert(key, read_attribute(&mut reader)?);
        }
        let body = match reader.read_byte("node kind")? {
            NODE_GROUP => NodeBody::Group(BTreeMap::new()),
            NODE_DATASET => NodeBody::Dataset(read_dataset(&mut reader)?),
            tag => {
                return Err(DecodeError::InvalidTag {
                    context: "node kind",
                    tag,
                });
            }
        };
        nodes[id] = Some(Node {
            name,
            parent,
            attrs,
            body,
        });
    }
    if !reader.is_empty() {
        return Err(DecodeError::Malformed {
            context: "trailing bytes",
        });
    }

    link_children(&mut nodes)?;
    Ok(MemoryFile { nodes, userblock })
}

/// Rebuilds group child tables from parent links.
fn link_children(nodes: &mut [Option<Node>]) -> Result<(), DecodeError> {
    match nodes.first() {
        Some(Some(root)) if root.parent.is_none() && matches!(root.body, NodeBody::Group(_)) => {}
        _ => return Err(DecodeError::Malformed { context: "missing root group" }),
    }

    let mut links = Vec::new();
    for (id, node) in nodes.iter().enumerate().skip(1) {
        let Some(node) = node else { continue };
        match node.parent {
            Some(parent) if parent.0 < id => links.push((parent, node.name.clone(), NodeId(id))),
            _ => return Err(DecodeError::Malformed { context: "invalid parent link" }),
        }
    }
    for (parent, name, id) in links {
        if name.is_empty() || name.contains(['/', '\0']) {
            return Err(DecodeError::Malformed { context: "invalid node name" });
        }
        match nodes.get_mut(parent.0).and_then(|n| n.as_mut()).map(|n| &mut n.body) {
            Some(NodeBody::Group(children)) => {
                if children.insert(name, id).is_some() {
                    return Err(DecodeError::Malformed { context: "duplicate child name" });
                }
            }
            _ => return Err(DecodeError::Malformed { context: "parent is not a group" }),
        }
    }
    Ok(())
}

impl MemoryFile {
    /// Serializes the file; see [`encode_image`].
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_image(self)
    }

    /// Deserializes a file; see [`decode_image`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode_image(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArrayData;
    use crate::storage::{NodeRef, Storage};

    fn sample() -> MemoryFile {
        let mut file = MemoryFile::new();
        let root = file.root();
        let g = file.require_group(root, "g").unwrap();
        file.set_attribute(g, "MATLAB_class", Attribute::Str("struct".into())).unwrap();
        file.set_attribute(g, "MATLAB_fields", Attribute::StrArray(vec!["x".into()])).unwrap();
        let filters = DatasetFilters {
            compression: Some(3),
            shuffle: true,
            checksum: true,
        };
        let d = file
            .write_dataset(g, "x", &[2, 2], &ArrayData::F64(vec![1.0, 2.0, 3.0, 4.0]), &filters)
            .unwrap();
        file.set_attribute(d, "Python.Shape", Attribute::U64Array(vec![2, 2])).unwrap();
        file.set_attribute(d, "MATLAB_empty", Attribute::Int(-1)).unwrap();
        let r = file.reference(d).unwrap();
        file.write_dataset(root, "r", &[1], &ArrayData::Ref(vec![r]), &DatasetFilters::default())
            .unwrap();
        file.delete(root, "g").ok();
        let g = file.require_group(root, "g2").unwrap();
        file.write_dataset(g, "t", &[1], &ArrayData::from_strs(&["hé"]), &DatasetFilters::default())
            .unwrap();
        file
    }

    #[test]
    fn test_image_roundtrip_compacts_deleted_slots() {
        let file = sample();
        assert!(file.slab_len() > file.node_count());
        let bytes = encode_image(&file);
        let back = decode_image(&bytes).unwrap();
        assert_eq!(back, file.compacted().unwrap());
        assert_eq!(back.slab_len(), file.node_count());

        // the reference to the deleted dataset stays dangling
        let r = back.lookup("/r").unwrap().unwrap();
        let (_, data) = back.read_dataset(r).unwrap();
        assert_eq!(data, ArrayData::Ref(vec![crate::storage::memory::DANGLING]));
        assert!(back.dereference(crate::storage::memory::DANGLING).is_err());
        let t = back.lookup("/g2/t").unwrap().unwrap();
        assert_eq!(back.read_dataset(t).unwrap().1, ArrayData::from_strs(&["hé"]));
        assert_eq!(encode_image(&back), bytes);
    }

    #[test]
    fn test_compaction_rewrites_live_references() {
        let mut file = MemoryFile::new();
        let root = file.root();
        let filters = DatasetFilters {
            compression: Some(1),
            shuffle: true,
            checksum: true,
        };
        for _ in 0..5 {
            let g = file.require_group(root, "scratch").unwrap();
            file.write_dataset(g, "v", &[1], &ArrayData::U8(vec![1]), &filters).unwrap();
            file.delete(root, "scratch").unwrap();
        }
        let d = file
            .write_dataset(root, "d", &[3], &ArrayData::I64(vec![7, 8, 9]), &filters)
            .unwrap();
        let r = file.reference(d).unwrap();
        file.write_dataset(root, "r", &[2], &ArrayData::Ref(vec![r, NodeRef::NULL]), &filters)
            .unwrap();

        let back = decode_image(&encode_image(&file)).unwrap();
        assert_eq!(back.slab_len(), 3);
        let node = back.lookup("/r").unwrap().unwrap();
        let ArrayData::Ref(refs) = back.read_dataset(node).unwrap().1 else {
            panic!("expected references");
        };
        assert!(refs[1].is_null());
        let target = back.dereference(refs[0]).unwrap();
        assert_eq!(Some(target), back.lookup("/d").unwrap());
        assert_eq!(back.read_dataset(target).unwrap().1, ArrayData::I64(vec![7, 8, 9]));
    }

    #[test]
    fn test_checksummed_dataset_survives_image() {
        let mut file = MemoryFile::new();
        let root = file.root();
        let filters = DatasetFilters {
            compression: None,
            shuffle: false,
            checksum: true,
        };
        file.write_dataset(root, "c", &[2], &ArrayData::U16(vec![3, 4]), &filters).unwrap();
        let back = decode_image(&encode_image(&file)).unwrap();
        assert_eq!(back, file);
        let node = back.lookup("/c").unwrap().unwrap();
        assert_eq!(back.read_dataset(node).unwrap().1, ArrayData::U16(vec![3, 4]));
    }

    #[test]
    fn test_compat_header_layout() {
        let header = compat_header(UNIX_EPOCH);
        assert_eq!(header.len(), 512);
        assert!(header[..BANNER_LEN].starts_with(b"MATLAB 7.3 MAT-file, Platform: "));
        assert_eq!(
            &header[116..128],
            &[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x49, 0x4D]
        );
        assert!(header[128..].iter().all(|&b| b == 0));
        let banner = std::str::from_utf8(&header[..BANNER_LEN]).unwrap();
        assert!(banner.contains("Created on: Thu Jan  1 00:00:00 1970"));
        assert!(has_compat_header(&header));
    }

    #[test]
    fn test_compat_header_out_of_range_times() {
        let far = UNIX_EPOCH.checked_add(std::time::Duration::from_secs(i64::MAX as u64));
        if let Some(far) = far {
            assert!(has_compat_header(&compat_header(far)));
        }
        let before = UNIX_EPOCH - std::time::Duration::from_secs(60);
        let header = compat_header(before);
        let banner = std::str::from_utf8(&header[..BANNER_LEN]).unwrap();
        assert!(banner.contains("Created on: Thu Jan  1 00:00:00 1970"));
    }

    #[test]
    fn test_image_with_userblock() {
        let mut file = MemoryFile::with_userblock(compat_header(SystemTime::now()));
        let root = file.root();
        file.require_group(root, "a").unwrap();
        let bytes = file.to_bytes();
        assert_eq!(&bytes[116..128], &HEADER_TAIL);
        assert_eq!(&bytes[512..516], MAGIC);
        assert_eq!(MemoryFile::from_bytes(&bytes).unwrap(), file);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(decode_image(b"NOPE"), Err(DecodeError::InvalidMagic { .. })));
        let mut bytes = encode_image(&sample());
        bytes[4] = 9;
        assert!(matches!(
            decode_image(&bytes),
            Err(DecodeError::UnsupportedVersion { version: 9 })
        ));
        let bytes = encode_image(&sample());
        assert!(decode_image(&bytes[..bytes.len() - 3]).is_err());
    }
}
