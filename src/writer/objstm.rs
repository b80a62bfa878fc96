//! Object stream packing.
//!
//! An object stream (`/Type /ObjStm`) holds a sequence of non-stream
//! indirect objects behind a single stream, preceded by an `id offset`
//! header. The packer measures member offsets in a first pass through a
//! capture frame, then emits header and body, optionally Flate-compressed.

use crate::error::{Error, Result};
use crate::object::{Dict, Object};
use crate::pipeline::flate_compress;
use crate::writer::object_serializer::UnparseFlags;
use crate::writer::pdf_writer::{CurLength, PdfWriter};

impl PdfWriter<'_> {
    /// Write the object stream for `group` at the current output position.
    pub(crate) fn write_object_stream(&mut self, group: u32) -> Result<()> {
        let stream_id = *self
            .ostream_new_ids
            .get(&group)
            .ok_or_else(|| Error::Internal(format!("object stream group {} has no number", group)))?;
        let members = self.ostream_members.get(&group).cloned().unwrap_or_default();
        if members.len() > 100 {
            return Err(Error::Internal(format!(
                "object stream group {} has {} members",
                group,
                members.len()
            )));
        }

        // Pass 1: serialize members into a capture frame, recording the
        // byte offset of each. Strings inside are written unencrypted.
        let doc = self.doc;
        let activation = self.pipeline.activate_capture();
        let base = self.pipeline.count();
        let mut pairs: Vec<(u32, u64)> = Vec::with_capacity(members.len());
        for &m in &members {
            let new_id = self
                .renumbered(m)
                .ok_or_else(|| Error::Internal(format!("object stream member {} unnumbered", m)))?;
            if self.config.qdf && !self.config.no_original_object_ids {
                self.pipeline
                    .write_string(&format!("%% Original object ID: {} {}\n", m.id, m.gen))?;
            }
            pairs.push((new_id, self.pipeline.count() - base));
            let value = doc
                .get(m)
                .ok_or_else(|| Error::ObjectNotFound(m.id, m.gen))?;
            self.cur_object = (new_id, 0);
            self.unparse_object(value, 0, UnparseFlags::IN_OSTREAM, Some(m))?;
            self.pipeline.write_string("\n")?;
            self.indicate_progress();
        }
        let body = self
            .pipeline
            .pop(activation)?
            .ok_or_else(|| Error::Internal("object stream capture lost".to_string()))?;

        // Pass 2: header of id/offset pairs, then the member bodies.
        let mut header = String::new();
        for (id, offset) in &pairs {
            header.push_str(&format!("{} {} ", id, offset));
        }
        let header = format!("{}\n", header.trim_end());
        let first = header.len();

        let mut content = header.into_bytes();
        content.extend_from_slice(&body);

        let compress = self.config.compress_streams && !self.config.qdf;
        let (content, flate) = if compress {
            (flate_compress(&content)?, true)
        } else {
            (content, false)
        };

        let encrypt = self.encryption.is_some();
        let body_len = match &self.encryption {
            Some(state) => state.encrypted_stream_length(content.len() as u64),
            None => content.len() as u64,
        };

        let mut dict = Dict::new();
        dict.insert("Type".to_string(), Object::name("ObjStm"));
        dict.insert("N".to_string(), Object::Integer(pairs.len() as i64));
        dict.insert("First".to_string(), Object::Integer(first as i64));
        if flate {
            dict.insert("Filter".to_string(), Object::name("FlateDecode"));
        }

        let start = self.open_object(stream_id)?;
        self.cur_object = (stream_id, 0);
        self.cur_stream_length = Some(CurLength::Direct(body_len));
        self.write_dictionary_for_stream(&dict)?;
        self.pipeline.write_string("\nstream\n")?;
        if encrypt {
            let filter = self
                .encryption
                .as_ref()
                .expect("checked above")
                .stream_filter(stream_id, 0);
            let cipher = self.pipeline.activate_filters(&[filter]);
            self.pipeline.write_bytes(&content)?;
            self.pipeline.pop(cipher)?;
        } else {
            self.pipeline.write_bytes(&content)?;
        }
        self.pipeline.write_string("\nendstream\nendobj\n")?;
        self.close_object(stream_id, start);
        if self.config.qdf {
            self.pipeline.write_string("\n")?;
        }
        Ok(())
    }

    /// Unparse a dictionary under the stream flag so the pending /Length is
    /// appended.
    pub(crate) fn write_dictionary_for_stream(&mut self, dict: &Dict) -> Result<()> {
        let obj = Object::Dictionary(dict.clone());
        self.unparse_object(&obj, 0, UnparseFlags::STREAM | UnparseFlags::NO_ENCRYPTION, None)
    }
}
