//! FlateDecode (zlib/deflate) decompression.
//!
//! The most common PDF compression filter. Uses the flate2 crate.

use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;

/// Decompress zlib-wrapped data.
///
/// Falls back to raw deflate for streams whose zlib header is corrupt, and
/// accepts partially recoverable data with a warning.
pub fn decode(input: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(input);
    let mut output = Vec::new();

    match decoder.read_to_end(&mut output) {
        Ok(_) => Ok(output),
        Err(e) => {
            if !output.is_empty() {
                log::warn!(
                    "FlateDecode partial recovery: {} bytes before corruption: {}",
                    output.len(),
                    e
                );
                return Ok(output);
            }

            // Some producers emit raw deflate data without the zlib wrapper.
            output.clear();
            let mut deflate = DeflateDecoder::new(input);
            match deflate.read_to_end(&mut output) {
                Ok(_) if !output.is_empty() => Ok(output),
                _ => Err(Error::Decode(format!("flate decompression failed: {}", e))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::flate_compress;

    #[test]
    fn test_round_trip() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let compressed = flate_compress(data).unwrap();
        assert_eq!(decode(&compressed).unwrap(), data);
    }

    #[test]
    fn test_garbage_fails() {
        assert!(decode(&[0xAB, 0xCD, 0xEF]).is_err());
    }

    #[test]
    fn test_raw_deflate_fallback() {
        use flate2::write::DeflateEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"raw deflate payload").unwrap();
        let raw = enc.finish().unwrap();
        assert_eq!(decode(&raw).unwrap(), b"raw deflate payload");
    }
}
