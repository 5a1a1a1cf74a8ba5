//! Format constants and decoding limits.

/// Magic bytes opening a serialized container image.
pub const MAGIC: &[u8; 4] = b"H5MF";

/// Current container image version.
pub const FORMAT_VERSION: u8 = 1;

/// Size of the compat-mode header that precedes the image.
pub const USERBLOCK_SIZE: usize = 512;

/// Length of the space-padded ASCII banner at the start of the header.
pub const BANNER_LEN: usize = 116;

/// Fixed bytes 116..128 of the header: subsystem offset, version 0x0200, "IM".
pub const HEADER_TAIL: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0x02, 0x49, 0x4D];

/// Maximum bytes in a varint (64-bit value).
pub const MAX_VARINT_BYTES: usize = 10;

/// Maximum length of a node name or attribute key.
pub const MAX_NAME_LEN: usize = 64 * 1024;

/// Maximum length of a string attribute value.
pub const MAX_STRING_LEN: usize = 16 * 1024 * 1024;

/// Maximum number of attributes on one node.
pub const MAX_ATTRIBUTES: usize = 4096;

/// Maximum number of nodes in one image.
pub const MAX_NODES: usize = 1 << 24;

/// Maximum dataset rank.
pub const MAX_RANK: usize = 32;

/// Maximum raw dataset buffer size in an image.
pub const MAX_BUFFER_LEN: usize = 1 << 31;

/// Maximum fields in a compound element kind.
pub const MAX_COMPOUND_FIELDS: usize = 1024;

/// Number of hex characters in a generated arena entry name.
pub const ARENA_NAME_LEN: usize = 16;

/// Name of the canonical empty node inside the reference arena.
pub const CANONICAL_EMPTY_NAME: &str = "a";

/// Length of the truncated SHA-256 dataset checksum.
pub const CHECKSUM_LEN: usize = 4;

/// Default minimum raw size, in bytes, before compression is applied.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 16 * 1024;

/// Default zstd level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 7;
