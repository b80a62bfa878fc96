//! ASCIIHexDecode filter.

use crate::error::{Error, Result};

/// Decode hex-encoded data, ignoring whitespace, stopping at `>`.
///
/// An odd final digit is treated as if followed by `0`, per the PDF
/// specification.
pub fn decode(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() / 2);
    let mut high: Option<u8> = None;

    for &byte in input {
        match byte {
            b'>' => break,
            b'\0' | b'\t' | b'\n' | b'\x0C' | b'\r' | b' ' => continue,
            _ => {
                let digit = (byte as char)
                    .to_digit(16)
                    .ok_or_else(|| Error::Decode(format!("invalid hex digit 0x{:02X}", byte)))?
                    as u8;
                match high.take() {
                    Some(h) => out.push((h << 4) | digit),
                    None => high = Some(digit),
                }
            }
        }
    }

    if let Some(h) = high {
        out.push(h << 4);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic() {
        assert_eq!(decode(b"48656C6C6F>").unwrap(), b"Hello");
    }

    #[test]
    fn test_whitespace_ignored() {
        assert_eq!(decode(b"48 65 6C\n6C 6F>").unwrap(), b"Hello");
    }

    #[test]
    fn test_odd_digit_padded() {
        assert_eq!(decode(b"48656C6C6F4>").unwrap(), b"Hello\x40");
    }

    #[test]
    fn test_invalid_digit() {
        assert!(decode(b"4z>").is_err());
    }
}
