// Copyright (c) 2025 TRUSTEDGE LABS LLC
// MPL-2.0: https://mozilla.org/MPL/2.0/
// Project: ageseal — age-encryption.org/v1 file encryption.

//! Base encodings shared across the crate: the unpadded base64 used by the
//! header, the 64-column wrapped form used for stanza bodies, and the Bech32
//! encoding used for key strings.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use bech32::primitives::decode::CheckedHrpstring;
use bech32::{Bech32, Hrp};

use crate::error::KeyError;

/// Number of base64 characters per wrapped line.
pub(crate) const COLUMNS_PER_LINE: usize = 64;

/// Number of raw bytes that encode to one full wrapped line.
pub(crate) const BYTES_PER_LINE: usize = 48;

/// Encode bytes as unpadded standard base64.
pub(crate) fn base64_encode(data: &[u8]) -> String {
    STANDARD_NO_PAD.encode(data)
}

/// Decode unpadded standard base64, rejecting padding, whitespace, and
/// non-canonical trailing bits.
pub(crate) fn base64_decode(data: impl AsRef<[u8]>) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD_NO_PAD.decode(data)
}

/// Decode an unpadded base64 field into a fixed-size buffer.
///
/// Returns `None` if the field does not decode to exactly `N` bytes.
pub(crate) fn base64_arg<const N: usize>(arg: &str) -> Option<[u8; N]> {
    // A correct encoding of N bytes has a fixed character count; checking it
    // up front avoids decoding oversized fields.
    if arg.len() != (4 * N).div_ceil(3) {
        return None;
    }
    let decoded = base64_decode(arg).ok()?;
    let mut buf = [0u8; N];
    if decoded.len() != N {
        return None;
    }
    buf.copy_from_slice(&decoded);
    Some(buf)
}

/// Append `data` as unpadded base64 broken into 64-column lines, each
/// terminated by LF.
///
/// The final line is always strictly shorter than 64 columns; when the input
/// is a multiple of 48 bytes (including empty input) that final line is
/// empty.
pub(crate) fn push_wrapped_base64(out: &mut Vec<u8>, data: &[u8]) {
    let mut offset = 0;
    loop {
        let end = usize::min(offset + BYTES_PER_LINE, data.len());
        let line = &data[offset..end];
        out.extend_from_slice(base64_encode(line).as_bytes());
        out.push(b'\n');
        if line.len() < BYTES_PER_LINE {
            break;
        }
        offset = end;
    }
}

/// Encode `data` as a lowercase Bech32 string with the given prefix.
pub(crate) fn bech32_encode(hrp: &str, data: &[u8]) -> Result<String, KeyError> {
    let hrp = Hrp::parse(hrp).map_err(|e| KeyError::Bech32(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, data).map_err(|e| KeyError::Bech32(e.to_string()))
}

/// Encode `data` as an uppercase Bech32 string with the given prefix.
///
/// The checksum is computed over the lowercase form, so the result decodes
/// identically to its lowercase counterpart.
pub(crate) fn bech32_encode_upper(hrp: &str, data: &[u8]) -> Result<String, KeyError> {
    let hrp = Hrp::parse(hrp).map_err(|e| KeyError::Bech32(e.to_string()))?;
    bech32::encode_upper::<Bech32>(hrp, data).map_err(|e| KeyError::Bech32(e.to_string()))
}

/// Decode a Bech32 string, returning the lowercased prefix and the data.
///
/// Only the original Bech32 checksum is accepted, not Bech32m.
pub(crate) fn bech32_decode(s: &str) -> Result<(String, Vec<u8>), KeyError> {
    let checked =
        CheckedHrpstring::new::<Bech32>(s).map_err(|e| KeyError::Bech32(e.to_string()))?;
    let hrp = checked.hrp().to_string().to_lowercase();
    let data = checked.byte_iter().collect();
    Ok((hrp, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_round_trip() {
        let data = b"wrapped and bound";
        let encoded = base64_encode(data);
        assert!(!encoded.contains('='));
        assert_eq!(base64_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_base64_rejects_padding() {
        assert!(base64_decode("AAAA==").is_err());
    }

    #[test]
    fn test_base64_rejects_non_canonical_trailing_bits() {
        // "QUJD" is "ABC"; "QUJE" differs only in the final character, but a
        // 2-character tail must have zeroed low bits.
        assert!(base64_decode("QQ").is_ok());
        assert!(base64_decode("QR").is_err());
    }

    #[test]
    fn test_base64_arg_length_check() {
        let tag = base64_encode(&[1, 2, 3, 4]);
        assert_eq!(base64_arg::<4>(&tag), Some([1, 2, 3, 4]));
        assert_eq!(base64_arg::<5>(&tag), None);
        assert_eq!(base64_arg::<3>(&tag), None);
    }

    #[test]
    fn test_wrapped_base64_short_input() {
        let mut out = Vec::new();
        push_wrapped_base64(&mut out, &[0u8; 32]);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.split('\n').collect();
        assert_eq!(lines.len(), 2); // one 43-column line plus the empty split tail
        assert_eq!(lines[0].len(), 43);
        assert_eq!(lines[1], "");
    }

    #[test]
    fn test_wrapped_base64_full_line_gets_empty_tail() {
        let mut out = Vec::new();
        push_wrapped_base64(&mut out, &[7u8; BYTES_PER_LINE]);
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("\n\n"), "Expected empty final line: {text:?}");
        assert_eq!(text.lines().next().unwrap().len(), COLUMNS_PER_LINE);
    }

    #[test]
    fn test_wrapped_base64_empty_input() {
        let mut out = Vec::new();
        push_wrapped_base64(&mut out, &[]);
        assert_eq!(out, b"\n");
    }

    #[test]
    fn test_bech32_upper_and_lower_decode_identically() {
        let data = [42u8; 32];
        let lower = bech32_encode("age", &data).unwrap();
        let upper = bech32_encode_upper("age", &data).unwrap();
        assert_eq!(lower, upper.to_lowercase());
        assert_eq!(bech32_decode(&lower).unwrap(), ("age".to_string(), data.to_vec()));
        assert_eq!(bech32_decode(&upper).unwrap(), ("age".to_string(), data.to_vec()));
    }

    #[test]
    fn test_bech32_rejects_bad_checksum() {
        let mut s = bech32_encode("age", &[42u8; 32]).unwrap();
        s.pop();
        s.push('q');
        assert!(bech32_decode(&s).is_err());
    }
}
