//! Code-unit conversions between UTF-32 code points and UTF-16.

/// Returns true when every code point fits in one UTF-16 unit.
pub fn fits_utf16(code_points: &[u32]) -> bool {
    code_points.iter().all(|&c| c <= 0xFFFF)
}

/// Narrows code points to UTF-16 units. Returns `None` if any code point
/// would need a surrogate pair.
pub fn narrow_to_utf16(code_points: &[u32]) -> Option<Vec<u16>> {
    code_points.iter().map(|&c| u16::try_from(c).ok()).collect()
}

/// Decodes UTF-16 units, stopping at the first NUL.
pub fn decode_utf16(units: &[u16]) -> Result<String, String> {
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    char::decode_utf16(units[..end].iter().copied())
        .collect::<Result<String, _>>()
        .map_err(|e| format!("unpaired surrogate 0x{:04x}", e.unpaired_surrogate()))
}

/// Returns true when every byte is 7-bit ASCII.
pub fn is_ascii(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b < 0x80)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrowing() {
        assert_eq!(narrow_to_utf16(&[0x61, 0xE9]), Some(vec![0x61, 0xE9]));
        assert_eq!(narrow_to_utf16(&[0x1F600]), None);
        assert!(fits_utf16(&[0xFFFF]));
        assert!(!fits_utf16(&[0x10000]));
    }

    #[test]
    fn test_decode_utf16() {
        assert_eq!(decode_utf16(&[0x68, 0x69, 0, 0]).unwrap(), "hi");
        assert_eq!(decode_utf16(&[0xD83D, 0xDE00]).unwrap(), "\u{1F600}");
        assert!(decode_utf16(&[0xD83D]).is_err());
    }
}
