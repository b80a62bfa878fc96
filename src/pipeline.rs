//! Byte-sink pipeline stack.
//!
//! All output produced by the writer flows through a LIFO stack of sinks.
//! The bottom of the stack collects the final file bytes; frames pushed on
//! top of it either count and forward (passthrough), swallow (discard),
//! capture into a buffer, or transform (Flate, PNG predictor, RC4, AES-CBC)
//! before handing bytes to the frame below.
//!
//! Every frame counts the bytes written *into* it; the count of the top
//! frame serves as the current file offset (or, inside a capture, as the
//! offset within the buffer being built). Activations are scoped: the
//! handle returned by an `activate_*` call must be popped in LIFO order,
//! and popping out of order is an internal logic error.

use md5::{Digest, Md5};

use crate::encryption::aes;
use crate::encryption::rc4::Rc4;
use crate::error::{Error, Result};

/// A transforming stage that can be pushed onto the stack.
#[derive(Debug, Clone)]
pub enum StreamFilter {
    /// Flate (zlib) compression.
    Flate,
    /// PNG up-predictor (predictor 12) row encoding, applied before Flate
    /// when writing cross-reference streams.
    PngUp {
        /// Row width in bytes, excluding the per-row predictor tag.
        columns: usize,
    },
    /// RC4 stream encryption with the given key.
    Rc4 {
        /// Per-object RC4 key.
        key: Vec<u8>,
    },
    /// AES-CBC encryption; the IV is emitted as the first 16 output bytes.
    Aes {
        /// Per-object AES key (16 or 32 bytes).
        key: Vec<u8>,
        /// Initialization vector.
        iv: [u8; 16],
    },
}

/// Handle identifying an activation. Must be passed back to
/// [`PipelineStack::pop`] in LIFO order.
#[derive(Debug)]
pub struct Activation(u64);

enum FrameKind {
    Bottom { out: Vec<u8> },
    Count,
    Discard,
    Capture { buf: Vec<u8> },
    Flate { buf: Vec<u8> },
    PngUp { buf: Vec<u8>, columns: usize },
    Rc4 { cipher: Rc4 },
    Aes { key: Vec<u8>, iv: [u8; 16], buf: Vec<u8> },
}

struct Frame {
    handle: u64,
    count: u64,
    kind: FrameKind,
}

/// LIFO stack of byte sinks.
pub struct PipelineStack {
    frames: Vec<Frame>,
    next_handle: u64,
    md5: Option<Md5>,
}

impl PipelineStack {
    /// Create a stack whose bottom sink collects bytes in memory.
    pub fn new() -> Self {
        Self {
            frames: vec![Frame {
                handle: 0,
                count: 0,
                kind: FrameKind::Bottom { out: Vec::new() },
            }],
            next_handle: 1,
            md5: None,
        }
    }

    fn push(&mut self, kind: FrameKind) -> Activation {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.frames.push(Frame {
            handle,
            count: 0,
            kind,
        });
        Activation(handle)
    }

    /// Push a counting passthrough frame.
    pub fn activate(&mut self) -> Activation {
        self.push(FrameKind::Count)
    }

    /// Push a frame that swallows everything written through it.
    pub fn activate_discard(&mut self) -> Activation {
        self.push(FrameKind::Discard)
    }

    /// Push a frame that captures bytes into a buffer, returned by `pop`.
    pub fn activate_capture(&mut self) -> Activation {
        self.push(FrameKind::Capture { buf: Vec::new() })
    }

    /// Push a chain of transforming frames under a single activation.
    ///
    /// Filters are listed outermost first: `[PngUp, Flate]` predicts rows
    /// and then compresses the predicted bytes.
    pub fn activate_filters(&mut self, filters: &[StreamFilter]) -> Activation {
        let handle = self.next_handle;
        self.next_handle += 1;
        for f in filters.iter().rev() {
            let kind = match f {
                StreamFilter::Flate => FrameKind::Flate { buf: Vec::new() },
                StreamFilter::PngUp { columns } => FrameKind::PngUp {
                    buf: Vec::new(),
                    columns: *columns,
                },
                StreamFilter::Rc4 { key } => FrameKind::Rc4 {
                    cipher: Rc4::new(key),
                },
                StreamFilter::Aes { key, iv } => FrameKind::Aes {
                    key: key.clone(),
                    iv: *iv,
                    buf: Vec::new(),
                },
            };
            self.frames.push(Frame {
                handle,
                count: 0,
                kind,
            });
        }
        Activation(handle)
    }

    /// Arm an MD5 digester over every byte reaching the bottom sink.
    ///
    /// Only one digester may exist at a time.
    pub fn activate_md5(&mut self) -> Result<()> {
        if self.md5.is_some() {
            return Err(Error::Internal(
                "MD5 pipeline stage is already active".to_string(),
            ));
        }
        self.md5 = Some(Md5::new());
        Ok(())
    }

    /// Finalize the MD5 digester, returning the lowercase hex digest and
    /// disabling further hashing.
    pub fn hex_digest(&mut self) -> Result<String> {
        let hasher = self
            .md5
            .take()
            .ok_or_else(|| Error::Internal("no MD5 pipeline stage is active".to_string()))?;
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(32);
        for byte in digest {
            hex.push_str(&format!("{:02x}", byte));
        }
        Ok(hex)
    }

    /// Raw 16-byte MD5 digest variant of [`hex_digest`](Self::hex_digest).
    pub fn raw_digest(&mut self) -> Result<[u8; 16]> {
        let hasher = self
            .md5
            .take()
            .ok_or_else(|| Error::Internal("no MD5 pipeline stage is active".to_string()))?;
        Ok(hasher.finalize().into())
    }

    /// Bytes written into the top frame so far.
    pub fn count(&self) -> u64 {
        self.frames.last().map(|f| f.count).unwrap_or(0)
    }

    /// Write bytes into the top of the stack.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let top = self.frames.len() - 1;
        self.write_at(top, data)
    }

    /// Write a string into the top of the stack.
    pub fn write_string(&mut self, s: &str) -> Result<()> {
        self.write_bytes(s.as_bytes())
    }

    fn write_at(&mut self, index: usize, data: &[u8]) -> Result<()> {
        let mut index = index;
        let mut owned: Option<Vec<u8>> = None;
        loop {
            let frame = &mut self.frames[index];
            let bytes: &[u8] = owned.as_deref().unwrap_or(data);
            frame.count += bytes.len() as u64;
            match &mut frame.kind {
                FrameKind::Bottom { out } => {
                    if let Some(hasher) = self.md5.as_mut() {
                        hasher.update(bytes);
                    }
                    out.extend_from_slice(bytes);
                    return Ok(());
                }
                FrameKind::Count => {}
                FrameKind::Discard => return Ok(()),
                FrameKind::Capture { buf } => {
                    buf.extend_from_slice(bytes);
                    return Ok(());
                }
                FrameKind::Flate { buf } | FrameKind::PngUp { buf, .. } | FrameKind::Aes { buf, .. } => {
                    buf.extend_from_slice(bytes);
                    return Ok(());
                }
                FrameKind::Rc4 { cipher } => {
                    let mut transformed = bytes.to_vec();
                    cipher.apply_keystream(&mut transformed);
                    owned = Some(transformed);
                }
            }
            if index == 0 {
                return Err(Error::Internal("pipeline bottom frame forwarded".to_string()));
            }
            index -= 1;
        }
    }

    /// Finish and remove all frames belonging to `activation`.
    ///
    /// The activation must be the most recent one still on the stack.
    /// Returns the captured buffer if the activation included a capture
    /// frame.
    pub fn pop(&mut self, activation: Activation) -> Result<Option<Vec<u8>>> {
        let Activation(handle) = activation;
        match self.frames.last() {
            Some(top) if top.handle == handle => {}
            _ => {
                return Err(Error::Internal(
                    "pipeline stack popped out of order".to_string(),
                ));
            }
        }
        let mut captured = None;
        while matches!(self.frames.last(), Some(f) if f.handle == handle) {
            let frame = self.frames.pop().expect("frame present");
            let below = self.frames.len() - 1;
            match frame.kind {
                FrameKind::Bottom { .. } => {
                    return Err(Error::Internal("pipeline bottom frame popped".to_string()));
                }
                FrameKind::Count | FrameKind::Discard | FrameKind::Rc4 { .. } => {}
                FrameKind::Capture { buf } => captured = Some(buf),
                FrameKind::Flate { buf } => {
                    let compressed = flate_compress(&buf)?;
                    self.write_at(below, &compressed)?;
                }
                FrameKind::PngUp { buf, columns } => {
                    let predicted = png_up_encode(&buf, columns)?;
                    self.write_at(below, &predicted)?;
                }
                FrameKind::Aes { key, iv, buf } => {
                    let encrypted = aes::encrypt_cbc(&key, &iv, &buf)?;
                    self.write_at(below, &encrypted)?;
                }
            }
        }
        Ok(captured)
    }

    /// Consume the stack and return the bytes collected at the bottom.
    ///
    /// All activations must have been popped.
    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        if self.frames.len() != 1 {
            return Err(Error::Internal(
                "pipeline stack finished with unpopped frames".to_string(),
            ));
        }
        match self.frames.pop().map(|f| f.kind) {
            Some(FrameKind::Bottom { out }) => Ok(out),
            _ => Err(Error::Internal("pipeline stack has no bottom frame".to_string())),
        }
    }

    /// Drop all collected output and frames above the bottom, resetting the
    /// stack for another pass.
    pub fn reset(&mut self) {
        self.frames.truncate(1);
        if let Some(Frame {
            count,
            kind: FrameKind::Bottom { out },
            ..
        }) = self.frames.first_mut()
        {
            out.clear();
            *count = 0;
        }
        self.md5 = None;
    }

    /// Borrow the bytes collected at the bottom so far.
    pub fn bottom_bytes(&self) -> &[u8] {
        match &self.frames[0].kind {
            FrameKind::Bottom { out } => out,
            _ => &[],
        }
    }
}

impl Default for PipelineStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Compress data with Flate (zlib wrapper), as used for `/FlateDecode`.
pub fn flate_compress(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Apply the PNG up predictor (type 2) row filter.
///
/// Each output row is a 0x02 tag byte followed by the byte-wise difference
/// from the previous row. Input length must be a whole number of rows.
pub fn png_up_encode(data: &[u8], columns: usize) -> Result<Vec<u8>> {
    if columns == 0 || data.len() % columns != 0 {
        return Err(Error::Internal(format!(
            "predictor input of {} bytes is not a whole number of {}-byte rows",
            data.len(),
            columns
        )));
    }
    let rows = data.len() / columns;
    let mut out = Vec::with_capacity(rows * (columns + 1));
    let mut prev = vec![0u8; columns];
    for row in 0..rows {
        let cur = &data[row * columns..(row + 1) * columns];
        out.push(2);
        for (i, &b) in cur.iter().enumerate() {
            out.push(b.wrapping_sub(prev[i]));
        }
        prev.copy_from_slice(cur);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bottom_counts_and_collects() {
        let mut stack = PipelineStack::new();
        stack.write_bytes(b"hello ").unwrap();
        stack.write_bytes(b"world").unwrap();
        assert_eq!(stack.count(), 11);
        assert_eq!(stack.into_bytes().unwrap(), b"hello world");
    }

    #[test]
    fn test_capture_does_not_reach_bottom() {
        let mut stack = PipelineStack::new();
        stack.write_bytes(b"head").unwrap();
        let h = stack.activate_capture();
        stack.write_bytes(b"captured").unwrap();
        assert_eq!(stack.count(), 8);
        let captured = stack.pop(h).unwrap().unwrap();
        assert_eq!(captured, b"captured");
        assert_eq!(stack.into_bytes().unwrap(), b"head");
    }

    #[test]
    fn test_discard() {
        let mut stack = PipelineStack::new();
        let h = stack.activate_discard();
        stack.write_bytes(b"vanishes").unwrap();
        stack.pop(h).unwrap();
        assert!(stack.into_bytes().unwrap().is_empty());
    }

    #[test]
    fn test_flate_round_trip() {
        use std::io::Read;

        let mut stack = PipelineStack::new();
        let h = stack.activate_filters(&[StreamFilter::Flate]);
        let payload = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        stack.write_bytes(payload).unwrap();
        stack.pop(h).unwrap();
        let out = stack.into_bytes().unwrap();
        assert!(out.len() < payload.len());

        let mut decoder = flate2::read::ZlibDecoder::new(&out[..]);
        let mut decoded = Vec::new();
        decoder.read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_pop_out_of_order_is_internal_error() {
        let mut stack = PipelineStack::new();
        let first = stack.activate();
        let _second = stack.activate();
        let err = stack.pop(first).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn test_md5_digest_over_bottom_bytes() {
        let mut stack = PipelineStack::new();
        stack.activate_md5().unwrap();
        stack.write_bytes(b"abc").unwrap();
        let digest = stack.hex_digest().unwrap();
        assert_eq!(digest, "900150983cd24fb0d6963f7d28e17f72");
        // Hashing is disabled afterwards.
        assert!(stack.hex_digest().is_err());
    }

    #[test]
    fn test_md5_ignores_captured_bytes() {
        let mut stack = PipelineStack::new();
        stack.activate_md5().unwrap();
        let h = stack.activate_capture();
        stack.write_bytes(b"not hashed").unwrap();
        stack.pop(h).unwrap();
        stack.write_bytes(b"abc").unwrap();
        assert_eq!(stack.hex_digest().unwrap(), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_png_up_encode_rows() {
        let data = [1u8, 2, 3, 1, 2, 4];
        let out = png_up_encode(&data, 3).unwrap();
        assert_eq!(out, vec![2, 1, 2, 3, 2, 0, 0, 1]);
    }

    #[test]
    fn test_png_up_encode_rejects_ragged_input() {
        assert!(png_up_encode(&[1, 2, 3, 4], 3).is_err());
    }

    #[test]
    fn test_nested_activations_count_independently() {
        let mut stack = PipelineStack::new();
        stack.write_bytes(b"0123").unwrap();
        let outer = stack.activate();
        stack.write_bytes(b"45").unwrap();
        let inner = stack.activate_capture();
        stack.write_bytes(b"678").unwrap();
        assert_eq!(stack.count(), 3);
        stack.pop(inner).unwrap();
        assert_eq!(stack.count(), 2);
        stack.pop(outer).unwrap();
        assert_eq!(stack.count(), 6);
    }
}
