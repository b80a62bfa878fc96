//! Stream filter decoding.
//!
//! The writer decodes input stream data only when it is about to re-encode
//! it (uncompress/recompress modes, QDF output, normalized content streams).
//! Filters are classified by decode level:
//!
//! - *generalized*: FlateDecode, LZWDecode, ASCIIHexDecode, ASCII85Decode
//! - *specialized*: RunLengthDecode
//! - lossy image filters (DCTDecode, JPXDecode) and CCITTFaxDecode are never
//!   decoded; streams carrying them pass through unchanged.

pub mod ascii85;
pub mod ascii_hex;
pub mod flate;
pub mod lzw;
pub mod predictor;
pub mod runlength;

pub use predictor::DecodeParams;

use crate::error::{Error, Result};

/// How far the writer is willing to decode stream filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DecodeLevel {
    /// Do not decode anything.
    None,
    /// Decode generalized filters only.
    #[default]
    Generalized,
    /// Also decode specialized lossless filters.
    Specialized,
    /// Decode everything decodable.
    All,
}

/// Decode-level class of a single filter name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterClass {
    /// Decodable at `DecodeLevel::Generalized` and above.
    Generalized,
    /// Decodable at `DecodeLevel::Specialized` and above.
    Specialized,
    /// Known filter this writer never decodes (lossy or unsupported).
    Opaque,
    /// Unrecognized filter name.
    Unknown,
}

/// Classify a filter name.
pub fn classify(filter: &str) -> FilterClass {
    match filter {
        "FlateDecode" | "Fl" | "LZWDecode" | "LZW" | "ASCIIHexDecode" | "AHx"
        | "ASCII85Decode" | "A85" => FilterClass::Generalized,
        "RunLengthDecode" | "RL" => FilterClass::Specialized,
        "DCTDecode" | "DCT" | "JPXDecode" | "CCITTFaxDecode" | "CCF" | "JBIG2Decode" => {
            FilterClass::Opaque
        }
        _ => FilterClass::Unknown,
    }
}

/// Whether a filter chain can be fully decoded at the given level.
pub fn decodable(filters: &[String], level: DecodeLevel) -> bool {
    filters.iter().all(|f| match classify(f) {
        FilterClass::Generalized => level >= DecodeLevel::Generalized,
        FilterClass::Specialized => level >= DecodeLevel::Specialized,
        FilterClass::Opaque | FilterClass::Unknown => false,
    })
}

/// Decode data through a filter chain, applying filters in order.
///
/// `params` carries the per-filter decode parameters (`/DecodeParms`),
/// aligned with `filters`; missing entries mean default parameters.
pub fn decode_stream(
    data: &[u8],
    filters: &[String],
    params: &[Option<DecodeParams>],
) -> Result<Vec<u8>> {
    let mut current = data.to_vec();
    for (i, filter) in filters.iter().enumerate() {
        let parms = params.get(i).cloned().flatten().unwrap_or_default();
        current = match filter.as_str() {
            "FlateDecode" | "Fl" => {
                let raw = flate::decode(&current)?;
                predictor::decode_predictor(&raw, &parms)?
            }
            "LZWDecode" | "LZW" => {
                let raw = lzw::decode(&current, parms.early_change)?;
                predictor::decode_predictor(&raw, &parms)?
            }
            "ASCIIHexDecode" | "AHx" => ascii_hex::decode(&current)?,
            "ASCII85Decode" | "A85" => ascii85::decode(&current)?,
            "RunLengthDecode" | "RL" => runlength::decode(&current)?,
            other => return Err(Error::UnsupportedFilter(other.to_string())),
        };
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("FlateDecode"), FilterClass::Generalized);
        assert_eq!(classify("RunLengthDecode"), FilterClass::Specialized);
        assert_eq!(classify("DCTDecode"), FilterClass::Opaque);
        assert_eq!(classify("NoSuchFilter"), FilterClass::Unknown);
    }

    #[test]
    fn test_decodable_levels() {
        let flate = vec!["FlateDecode".to_string()];
        assert!(!decodable(&flate, DecodeLevel::None));
        assert!(decodable(&flate, DecodeLevel::Generalized));

        let rle = vec!["RunLengthDecode".to_string()];
        assert!(!decodable(&rle, DecodeLevel::Generalized));
        assert!(decodable(&rle, DecodeLevel::Specialized));

        let dct = vec!["DCTDecode".to_string()];
        assert!(!decodable(&dct, DecodeLevel::All));
    }

    #[test]
    fn test_decode_chain() {
        // ASCIIHex wrapping of "Hello"
        let data = b"48656C6C6F>";
        let decoded = decode_stream(data, &["ASCIIHexDecode".to_string()], &[None]).unwrap();
        assert_eq!(decoded, b"Hello");
    }

    #[test]
    fn test_decode_flate_chain() {
        let compressed = crate::pipeline::flate_compress(b"stream payload").unwrap();
        let decoded =
            decode_stream(&compressed, &["FlateDecode".to_string()], &[None]).unwrap();
        assert_eq!(decoded, b"stream payload");
    }

    #[test]
    fn test_unknown_filter_errors() {
        let err = decode_stream(b"x", &["Bogus".to_string()], &[None]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFilter(_)));
    }
}
