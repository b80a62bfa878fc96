//! LZWDecode decompression via the weezl crate.

use crate::error::{Error, Result};
use weezl::{decode::Decoder, BitOrder};

/// Decompress LZW data as stored in PDF streams (MSB-first, 8-bit codes).
///
/// `early_change` mirrors the `/EarlyChange` decode parameter; PDF defaults
/// it to 1, which matches TIFF's off-by-one code-size switching.
pub fn decode(input: &[u8], early_change: bool) -> Result<Vec<u8>> {
    let mut decoder = if early_change {
        Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
    } else {
        Decoder::new(BitOrder::Msb, 8)
    };
    decoder
        .decode(input)
        .map_err(|e| Error::Decode(format!("LZW decompression failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_stream() {
        // Encode with weezl and decode back.
        let data = b"-----A---B";
        let encoded = weezl::encode::Encoder::with_tiff_size_switch(BitOrder::Msb, 8)
            .encode(data)
            .unwrap();
        assert_eq!(decode(&encoded, true).unwrap(), data);
    }

    #[test]
    fn test_garbage_fails() {
        assert!(decode(&[0xFF, 0xFF, 0xFF, 0xFF], true).is_err());
    }
}
