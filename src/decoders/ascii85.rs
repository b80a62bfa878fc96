//! ASCII85Decode filter.

use crate::error::{Error, Result};

/// Decode base-85 encoded data, honoring the `z` group shortcut and the
/// `~>` end-of-data marker.
pub fn decode(input: &[u8]) -> Result<Vec<u8>> {
    // Optional <~ prefix used by some producers.
    let body: &[u8] = if input.starts_with(b"<~") { &input[2..] } else { input };

    let mut out = Vec::with_capacity(body.len() * 4 / 5);
    let mut group = [0u8; 5];
    let mut len = 0usize;

    for &byte in body {
        match byte {
            b'~' => break,
            b'\0' | b'\t' | b'\n' | b'\x0C' | b'\r' | b' ' => continue,
            b'z' if len == 0 => out.extend_from_slice(&[0, 0, 0, 0]),
            b'!'..=b'u' => {
                group[len] = byte - b'!';
                len += 1;
                if len == 5 {
                    push_group(&mut out, &group, 5)?;
                    len = 0;
                }
            }
            _ => return Err(Error::Decode(format!("invalid base-85 byte 0x{:02X}", byte))),
        }
    }

    if len == 1 {
        return Err(Error::Decode("truncated base-85 group".to_string()));
    }
    if len > 1 {
        // Pad with 'u' digits; a partial group of n chars yields n-1 bytes.
        for slot in group.iter_mut().skip(len) {
            *slot = 84;
        }
        push_group(&mut out, &group, len)?;
    }
    Ok(out)
}

fn push_group(out: &mut Vec<u8>, group: &[u8; 5], len: usize) -> Result<()> {
    let mut value: u32 = 0;
    for &digit in group {
        value = value
            .checked_mul(85)
            .and_then(|v| v.checked_add(digit as u32))
            .ok_or_else(|| Error::Decode("base-85 group overflow".to_string()))?;
    }
    let bytes = value.to_be_bytes();
    out.extend_from_slice(&bytes[..len - 1]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic() {
        assert_eq!(decode(b"87cURDZ~>").unwrap(), b"Hello");
    }

    #[test]
    fn test_prefix_and_whitespace() {
        assert_eq!(decode(b"<~87cUR\nDZ~>").unwrap(), b"Hello");
    }

    #[test]
    fn test_z_shortcut() {
        assert_eq!(decode(b"z~>").unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_invalid_byte() {
        assert!(decode(b"\x7F~>").is_err());
    }

    #[test]
    fn test_lone_final_digit_is_error() {
        assert!(decode(b"87cUR8~>").is_err());
    }
}
