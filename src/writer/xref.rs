//! Cross-reference emission.
//!
//! Both classic xref tables and PDF 1.5 cross-reference streams. Stream
//! bodies are rows of big-endian `(type, field1, field2)` triples, with
//! the PNG up predictor applied ahead of Flate when compression is on.

use byteorder::{BigEndian, WriteBytesExt};

use crate::error::{Error, Result};
use crate::object::{Dict, Object, ObjectRef};
use crate::pipeline::{flate_compress, png_up_encode};
use crate::writer::object_serializer::UnparseFlags;
use crate::writer::pdf_writer::{CurLength, NewObjEntry, PdfWriter, XrefEntry};

/// Bytes needed to represent a value big-endian.
pub(crate) fn bytes_needed(value: u64) -> usize {
    if value == 0 {
        1
    } else {
        (64 - value.leading_zeros() as usize).div_ceil(8)
    }
}

/// Everything needed to emit one cross-reference stream object.
pub(crate) struct XrefStreamSpec {
    /// Object number of the stream itself.
    pub id: u32,
    /// First object number covered by /Index.
    pub first: u32,
    /// Entries for objects `first .. first + entries.len()`.
    pub entries: Vec<XrefEntry>,
    /// /Size value.
    pub size: u32,
    /// /Prev offset, if any.
    pub prev: Option<u64>,
    /// Trailer keys to merge into the stream dictionary. References must
    /// already carry output object numbers.
    pub trailer: Dict,
    /// Whether to emit /Index explicitly.
    pub include_index: bool,
    /// Whether to predictor-compress the body.
    pub compress: bool,
    /// Force the width of field 1, for two-pass size stability.
    pub f1_override: Option<usize>,
    /// Declare the compression filters in the dictionary but leave the body
    /// raw (linearization pass 1, where only the slot size matters).
    pub skip_compression: bool,
}

impl PdfWriter<'_> {
    /// Input trailer with the writer-managed keys removed.
    pub(crate) fn filtered_trailer(&self) -> Dict {
        let mut trailer = self.doc.trailer().clone();
        for key in [
            "ID",
            "Encrypt",
            "Prev",
            "Index",
            "W",
            "Length",
            "Filter",
            "DecodeParms",
            "Type",
            "XRefStm",
        ] {
            trailer.shift_remove(key);
        }
        trailer
    }

    /// Rewrite every reference inside a value to its output number.
    ///
    /// Used for trailer dictionaries, which are unparsed without the
    /// renumbering pass so that writer-generated references (the encryption
    /// dictionary, /Prev-less xref chains) can be mixed in.
    pub(crate) fn renumber_value(&self, obj: &Object) -> Object {
        match obj {
            Object::Reference(r) => match self.renumbered(*r) {
                Some(new_id) => Object::reference(new_id, 0),
                None => Object::Null,
            },
            Object::Array(items) => {
                Object::Array(items.iter().map(|o| self.renumber_value(o)).collect())
            }
            Object::Dictionary(dict) => Object::Dictionary(
                dict.iter()
                    .map(|(k, v)| (k.clone(), self.renumber_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// The output trailer dictionary, fully renumbered.
    pub(crate) fn final_trailer(&mut self, size: u32, prev: Option<u64>) -> Result<Dict> {
        let (id1, id2) = if self.defer_id {
            // Deterministic /ID is taken from the pass-1 digest after the
            // pass completes; hold its 16-byte width with placeholders.
            (vec![0u8; 16], vec![0u8; 16])
        } else {
            self.generate_id()?;
            (self.id1.clone(), self.id2.clone())
        };
        let mut trailer = Dict::new();
        for (key, value) in self.filtered_trailer() {
            trailer.insert(key, self.renumber_value(&value));
        }
        trailer.insert("Size".to_string(), Object::Integer(size as i64));
        if let Some(prev) = prev {
            trailer.insert("Prev".to_string(), Object::Integer(prev as i64));
        }
        if self.encryption_dict_id > 0 {
            trailer.insert(
                "Encrypt".to_string(),
                Object::Reference(ObjectRef::new(self.encryption_dict_id, 0)),
            );
        }
        trailer.insert(
            "ID".to_string(),
            Object::Array(vec![Object::String(id1), Object::String(id2)]),
        );
        Ok(trailer)
    }

    fn xref_entry_for(&self, id: u32) -> XrefEntry {
        if id == 0 {
            XrefEntry::Free
        } else {
            self.new_obj
                .get(&id)
                .map(|e| e.xref)
                .unwrap_or(XrefEntry::Free)
        }
    }

    /// Write a classic cross-reference table plus trailer. Returns the
    /// offset of the `xref` keyword.
    pub(crate) fn write_standard_xref_table(&mut self, size: u32) -> Result<u64> {
        let offset = self.pipeline.count();
        self.pipeline.write_string(&format!("xref\n0 {}\n", size))?;
        for id in 0..size {
            match self.xref_entry_for(id) {
                XrefEntry::Free => {
                    let gen = if id == 0 { 65535 } else { 0 };
                    self.pipeline
                        .write_string(&format!("0000000000 {:05} f \n", gen))?;
                }
                XrefEntry::Uncompressed { offset } => {
                    self.pipeline
                        .write_string(&format!("{:010} 00000 n \n", offset))?;
                }
                XrefEntry::InStream { .. } => {
                    return Err(Error::Internal(
                        "compressed object in a cross-reference table".to_string(),
                    ));
                }
            }
        }
        let trailer = self.final_trailer(size, None)?;
        self.pipeline.write_string("trailer ")?;
        self.unparse_object(
            &Object::Dictionary(trailer),
            0,
            UnparseFlags::NO_ENCRYPTION | UnparseFlags::NO_RENUMBER,
            None,
        )?;
        self.pipeline.write_string("\n")?;
        Ok(offset)
    }

    /// Write a cross-reference stream for the standard (single-pass) path.
    /// Returns the offset of the stream object.
    pub(crate) fn write_standard_xref_stream(&mut self, xref_id: u32, size: u32) -> Result<u64> {
        let offset = self.pipeline.count();
        self.new_obj.insert(
            xref_id,
            NewObjEntry {
                xref: XrefEntry::Uncompressed { offset },
                length: 0,
            },
        );
        let entries: Vec<XrefEntry> = (0..size).map(|id| self.xref_entry_for(id)).collect();
        let trailer = self.final_trailer(size, None)?;
        let spec = XrefStreamSpec {
            id: xref_id,
            first: 0,
            entries,
            size,
            prev: None,
            trailer,
            include_index: false,
            compress: self.config.compress_streams && !self.config.qdf,
            f1_override: None,
            skip_compression: false,
        };
        self.write_xref_stream_object(&spec)?;
        Ok(offset)
    }

    /// Emit one cross-reference stream object at the current position.
    pub(crate) fn write_xref_stream_object(&mut self, spec: &XrefStreamSpec) -> Result<()> {
        let mut max_f1: u64 = 0;
        let mut max_f2: u64 = 0;
        for entry in &spec.entries {
            match entry {
                XrefEntry::Free => {}
                XrefEntry::Uncompressed { offset } => max_f1 = max_f1.max(*offset),
                XrefEntry::InStream { stream, index } => {
                    max_f1 = max_f1.max(*stream as u64);
                    max_f2 = max_f2.max(*index as u64);
                }
            }
        }
        let f1 = spec.f1_override.unwrap_or_else(|| bytes_needed(max_f1.max(spec.size as u64)));
        let f2 = bytes_needed(max_f2);
        let row = 1 + f1 + f2;

        let mut body = Vec::with_capacity(spec.entries.len() * row);
        for entry in &spec.entries {
            let (kind, field1, field2): (u8, u64, u64) = match entry {
                XrefEntry::Free => (0, 0, 0),
                XrefEntry::Uncompressed { offset } => (1, *offset, 0),
                XrefEntry::InStream { stream, index } => (2, *stream as u64, *index as u64),
            };
            body.push(kind);
            body.write_uint::<BigEndian>(field1, f1)
                .map_err(|e| Error::Internal(format!("xref row packing failed: {}", e)))?;
            body.write_uint::<BigEndian>(field2, f2)
                .map_err(|e| Error::Internal(format!("xref row packing failed: {}", e)))?;
        }

        let (data, compressed) = if spec.compress && !spec.skip_compression {
            let predicted = png_up_encode(&body, row)?;
            (flate_compress(&predicted)?, true)
        } else {
            (body, spec.compress)
        };

        let mut dict = Dict::new();
        dict.insert("Type".to_string(), Object::name("XRef"));
        dict.insert("Size".to_string(), Object::Integer(spec.size as i64));
        if spec.include_index {
            dict.insert(
                "Index".to_string(),
                Object::Array(vec![
                    Object::Integer(spec.first as i64),
                    Object::Integer(spec.entries.len() as i64),
                ]),
            );
        }
        if let Some(prev) = spec.prev {
            dict.insert("Prev".to_string(), Object::Integer(prev as i64));
        }
        dict.insert(
            "W".to_string(),
            Object::Array(vec![
                Object::Integer(1),
                Object::Integer(f1 as i64),
                Object::Integer(f2 as i64),
            ]),
        );
        if compressed {
            dict.insert("Filter".to_string(), Object::name("FlateDecode"));
            dict.insert(
                "DecodeParms".to_string(),
                Object::dict(vec![
                    ("Columns", Object::Integer(row as i64)),
                    ("Predictor", Object::Integer(12)),
                ]),
            );
        }
        for (key, value) in &spec.trailer {
            dict.insert(key.clone(), value.clone());
        }

        self.pipeline.write_string(&format!("{} 0 obj\n", spec.id))?;
        self.cur_object = (spec.id, 0);
        self.cur_stream_length = Some(CurLength::Direct(data.len() as u64));
        // Cross-reference streams are never encrypted.
        self.unparse_object(
            &Object::Dictionary(dict),
            0,
            UnparseFlags::STREAM | UnparseFlags::NO_ENCRYPTION | UnparseFlags::NO_RENUMBER,
            None,
        )?;
        self.pipeline.write_string("\nstream\n")?;
        self.pipeline.write_bytes(&data)?;
        self.pipeline.write_string("\nendstream\nendobj\n")?;
        Ok(())
    }
}
