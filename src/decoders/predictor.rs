//! Predictor decoding for Flate/LZW streams.
//!
//! PDF streams may apply a TIFF or PNG predictor before compression; the
//! predictor must be reversed after decompression to recover the data.

use crate::error::{Error, Result};

/// Decode parameters (`/DecodeParms`) relevant to Flate/LZW filters.
#[derive(Debug, Clone)]
pub struct DecodeParams {
    /// Predictor algorithm (1 = none, 2 = TIFF, 10-15 = PNG).
    pub predictor: i64,
    /// Number of columns (width in samples).
    pub columns: usize,
    /// Number of color components per sample.
    pub colors: usize,
    /// Bits per component.
    pub bits_per_component: usize,
    /// LZW early code-size change (`/EarlyChange`, default 1).
    pub early_change: bool,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
            early_change: true,
        }
    }
}

impl DecodeParams {
    /// Bytes of pixel data per row, excluding any predictor tag byte.
    pub fn pixel_bytes_per_row(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component).div_ceil(8)
    }

    /// Bytes per color sample, rounded up to at least one.
    pub fn bytes_per_pixel(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }
}

/// Reverse the predictor named in `params` over decompressed data.
pub fn decode_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    match params.predictor {
        1 => Ok(data.to_vec()),
        2 => decode_tiff(data, params),
        10..=15 => decode_png(data, params),
        other => Err(Error::Decode(format!("unsupported predictor: {}", other))),
    }
}

fn decode_tiff(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    if params.bits_per_component != 8 {
        return Err(Error::Decode(format!(
            "TIFF predictor with {} bits per component is not supported",
            params.bits_per_component
        )));
    }
    let row_len = params.pixel_bytes_per_row();
    let bpp = params.bytes_per_pixel();
    let mut out = data.to_vec();
    for row in out.chunks_mut(row_len) {
        for i in bpp..row.len() {
            row[i] = row[i].wrapping_add(row[i - bpp]);
        }
    }
    Ok(out)
}

fn decode_png(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let row_len = params.pixel_bytes_per_row();
    let bpp = params.bytes_per_pixel();
    let stride = row_len + 1;
    if row_len == 0 || data.len() % stride != 0 {
        return Err(Error::Decode(format!(
            "predicted data of {} bytes is not a whole number of {}-byte rows",
            data.len(),
            stride
        )));
    }

    let rows = data.len() / stride;
    let mut out = vec![0u8; rows * row_len];
    let mut prev = vec![0u8; row_len];

    for row in 0..rows {
        let tag = data[row * stride];
        let src = &data[row * stride + 1..(row + 1) * stride];
        let dst_start = row * row_len;
        for i in 0..row_len {
            let raw = src[i];
            let left = if i >= bpp { out[dst_start + i - bpp] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
            let value = match tag {
                0 => raw,
                1 => raw.wrapping_add(left),
                2 => raw.wrapping_add(up),
                3 => raw.wrapping_add(((left as u16 + up as u16) / 2) as u8),
                4 => raw.wrapping_add(paeth(left, up, up_left)),
                other => {
                    return Err(Error::Decode(format!("invalid PNG row filter tag: {}", other)));
                }
            };
            out[dst_start + i] = value;
        }
        prev.copy_from_slice(&out[dst_start..dst_start + row_len]);
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}
