//! Dataset filters: byte-shuffle, zstd compression and a truncated SHA-256 checksum.

use std::io::Read;

use sha2::{Digest, Sha256};

use crate::error::StorageError;
use crate::limits::CHECKSUM_LEN;

/// Regroups bytes so that byte `k` of every element is contiguous.
pub fn shuffle(bytes: &[u8], item_size: usize) -> Vec<u8> {
    if item_size <= 1 || bytes.len() % item_size != 0 {
        return bytes.to_vec();
    }
    let count = bytes.len() / item_size;
    let mut out = vec![0u8; bytes.len()];
    for (i, element) in bytes.chunks_exact(item_size).enumerate() {
        for (k, &b) in element.iter().enumerate() {
            out[k * count + i] = b;
        }
    }
    out
}

/// Inverse of [`shuffle`].
pub fn unshuffle(bytes: &[u8], item_size: usize) -> Vec<u8> {
    if item_size <= 1 || bytes.len() % item_size != 0 {
        return bytes.to_vec();
    }
    let count = bytes.len() / item_size;
    let mut out = vec![0u8; bytes.len()];
    for (i, element) in out.chunks_exact_mut(item_size).enumerate() {
        for (k, b) in element.iter_mut().enumerate() {
            *b = bytes[k * count + i];
        }
    }
    out
}

pub fn compress(bytes: &[u8], level: i32) -> Result<Vec<u8>, StorageError> {
    zstd::encode_all(bytes, level).map_err(|e| StorageError::CompressionFailed(e.to_string()))
}

/// Decompresses and checks the result against the recorded raw length.
pub fn decompress(bytes: &[u8], raw_len: usize) -> Result<Vec<u8>, StorageError> {
    let mut decoder =
        zstd::Decoder::new(bytes).map_err(|e| StorageError::DecompressionFailed(e.to_string()))?;
    let mut out = Vec::with_capacity(raw_len);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| StorageError::DecompressionFailed(e.to_string()))?;
    if out.len() != raw_len {
        return Err(StorageError::BufferSizeMismatch {
            expected: raw_len,
            actual: out.len(),
        });
    }
    Ok(out)
}

pub fn checksum(bytes: &[u8]) -> [u8; CHECKSUM_LEN] {
    let hash = Sha256::digest(bytes);
    let mut sum = [0u8; CHECKSUM_LEN];
    sum.copy_from_slice(&hash[..CHECKSUM_LEN]);
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shuffle_roundtrip() {
        let bytes: Vec<u8> = (0..24).collect();
        let shuffled = shuffle(&bytes, 4);
        assert_eq!(&shuffled[..6], &[0, 4, 8, 12, 16, 20]);
        assert_eq!(unshuffle(&shuffled, 4), bytes);
    }

    #[test]
    fn test_shuffle_ragged_is_identity() {
        let bytes = vec![1u8, 2, 3];
        assert_eq!(shuffle(&bytes, 2), bytes);
    }

    #[test]
    fn test_compress_roundtrip() {
        let bytes = vec![7u8; 10_000];
        let packed = compress(&bytes, 7).unwrap();
        assert!(packed.len() < bytes.len());
        assert_eq!(decompress(&packed, bytes.len()).unwrap(), bytes);
    }

    #[test]
    fn test_decompress_length_checked() {
        let packed = compress(&[1, 2, 3], 3).unwrap();
        assert!(matches!(
            decompress(&packed, 4),
            Err(StorageError::BufferSizeMismatch { expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_checksum_detects_change() {
        assert_ne!(checksum(b"abc"), checksum(b"abd"));
        assert_eq!(checksum(b"abc"), checksum(b"abc"));
    }
}
