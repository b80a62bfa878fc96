//! Recursive object unparser.
//!
//! Serializes objects to PDF syntax through the writer's pipeline,
//! rewriting indirect references to their new numbers, applying string and
//! stream encryption, deciding stream filtering, and producing either the
//! compact single-line form or the indented QDF form.

use bitflags::bitflags;

use crate::decoders::{self, DecodeLevel, DecodeParams};
use crate::error::Result;
use crate::object::{Dict, Object, ObjectRef};
use crate::pipeline::flate_compress;
use crate::writer::pdf_writer::{CurLength, PdfWriter};

bitflags! {
    /// Context flags threaded through the unparse recursion.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UnparseFlags: u32 {
        /// The dictionary being written belongs to a stream.
        const STREAM = 1 << 0;
        /// The stream data is being re-filtered by the writer.
        const FILTERED = 1 << 1;
        /// Inside an object stream; string encryption is suppressed.
        const IN_OSTREAM = 1 << 2;
        /// Force hex form for strings.
        const HEX_STRING = 1 << 3;
        /// Suppress encryption entirely (trailers, the encryption
        /// dictionary, signature /Contents).
        const NO_ENCRYPTION = 1 << 4;
        /// References already carry output numbers; write them verbatim.
        const NO_RENUMBER = 1 << 5;
    }
}

/// Outcome of the stream filtering decision.
pub(crate) struct FilteredStream {
    /// Whether the writer decoded the input data.
    pub filtered: bool,
    /// Whether the output data carries a fresh FlateDecode filter.
    pub compressed: bool,
    /// The bytes to write as the stream body (before encryption).
    pub data: Vec<u8>,
    /// Whether this is the document-level metadata stream.
    pub is_metadata: bool,
}

fn is_printable_ascii(data: &[u8]) -> bool {
    data.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..=0x7E).contains(&b))
}

/// Rewrite end-of-line sequences to bare newlines.
pub(crate) fn normalize_content_data(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            b'\r' => {
                out.push(b'\n');
                if data.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    out
}

impl PdfWriter<'_> {
    fn write_indent(&mut self, level: usize) -> Result<()> {
        const SPACES: &str = "                                                                ";
        let mut needed = 2 * level;
        while needed > 0 {
            let chunk = needed.min(SPACES.len());
            self.pipeline.write_string(&SPACES[..chunk])?;
            needed -= chunk;
        }
        Ok(())
    }

    /// Serialize one object at the given indentation level.
    ///
    /// `owner` is the input reference of the enclosing indirect object; it
    /// drives root-dictionary reconciliation and stream filtering decisions
    /// and is not propagated to children.
    pub(crate) fn unparse_object(
        &mut self,
        obj: &Object,
        level: usize,
        flags: UnparseFlags,
        owner: Option<ObjectRef>,
    ) -> Result<()> {
        match obj {
            Object::Null => self.pipeline.write_string("null"),
            Object::Boolean(b) => self.pipeline.write_string(if *b { "true" } else { "false" }),
            Object::Integer(i) => self.pipeline.write_string(&i.to_string()),
            Object::Real(r) => self.write_real(*r),
            Object::String(s) => self.write_string_object(s, flags),
            Object::Name(n) => self.write_name(n),
            Object::Array(items) => self.write_array(items, level, flags),
            Object::Dictionary(dict) => self.write_dictionary(dict, level, flags, owner),
            Object::Stream { dict, data } => self.write_stream(dict, data, level, flags, owner),
            Object::Reference(r) => {
                if flags.contains(UnparseFlags::NO_RENUMBER) {
                    return self.pipeline.write_string(&format!("{} {} R", r.id, r.gen));
                }
                match self.renumbered(*r) {
                    Some(new_id) => self.pipeline.write_string(&format!("{} 0 R", new_id)),
                    None => self.pipeline.write_string("null"),
                }
            }
        }
    }

    fn write_real(&mut self, value: f64) -> Result<()> {
        if !value.is_finite() {
            log::warn!("replacing non-finite real {} with 0", value);
            return self.pipeline.write_string("0");
        }
        if value.fract() == 0.0 && value.abs() < 1e15 {
            self.pipeline.write_string(&format!("{}", value as i64))
        } else {
            let formatted = format!("{:.5}", value);
            let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
            self.pipeline.write_string(trimmed)
        }
    }

    fn write_name(&mut self, name: &str) -> Result<()> {
        self.pipeline.write_string("/")?;
        for byte in name.bytes() {
            match byte {
                b'!' | b'"' | b'$'..=b'&' | b'\''..=b'.' | b'0'..=b'9' | b';' | b'<' | b'>'
                | b'?' | b'@' | b'A'..=b'Z' | b'^'..=b'z' | b'|' | b'~' => {
                    self.pipeline.write_bytes(&[byte])?;
                }
                _ => {
                    self.pipeline.write_string(&format!("#{:02X}", byte))?;
                }
            }
        }
        Ok(())
    }

    fn write_string_object(&mut self, data: &[u8], flags: UnparseFlags) -> Result<()> {
        let encrypted;
        let mut force_hex = flags.contains(UnparseFlags::HEX_STRING);
        let bytes: &[u8] = if self.encryption.is_some()
            && !flags.contains(UnparseFlags::IN_OSTREAM)
            && !flags.contains(UnparseFlags::NO_ENCRYPTION)
        {
            let state = self.encryption.as_ref().expect("checked above");
            encrypted = state.encrypt_string(data, self.cur_object.0, self.cur_object.1)?;
            // Hex keeps the serialized length a function of the data length
            // alone, which the two-pass linearizer depends on.
            force_hex = true;
            &encrypted
        } else {
            data
        };

        if force_hex || !is_printable_ascii(bytes) {
            self.pipeline.write_string("<")?;
            for byte in bytes {
                self.pipeline.write_string(&format!("{:02X}", byte))?;
            }
            self.pipeline.write_string(">")
        } else {
            self.pipeline.write_string("(")?;
            for &byte in bytes {
                match byte {
                    b'(' => self.pipeline.write_string("\\(")?,
                    b')' => self.pipeline.write_string("\\)")?,
                    b'\\' => self.pipeline.write_string("\\\\")?,
                    b'\n' => self.pipeline.write_string("\\n")?,
                    b'\r' => self.pipeline.write_string("\\r")?,
                    b'\t' => self.pipeline.write_string("\\t")?,
                    _ => self.pipeline.write_bytes(&[byte])?,
                }
            }
            self.pipeline.write_string(")")
        }
    }

    fn write_array(&mut self, items: &[Object], level: usize, flags: UnparseFlags) -> Result<()> {
        let child_flags = flags - UnparseFlags::STREAM - UnparseFlags::HEX_STRING;
        if self.config.qdf {
            self.pipeline.write_string("[\n")?;
            for item in items {
                self.write_indent(level + 1)?;
                self.unparse_object(item, level + 1, child_flags, None)?;
                self.pipeline.write_string("\n")?;
            }
            self.write_indent(level)?;
            self.pipeline.write_string("]")
        } else {
            // One space after the opening bracket; some consumers require it
            // for the /H entry of the linearization dictionary, so it is
            // applied uniformly.
            self.pipeline.write_string("[ ")?;
            for item in items {
                self.unparse_object(item, level, child_flags, None)?;
                self.pipeline.write_string(" ")?;
            }
            self.pipeline.write_string("]")
        }
    }

    fn write_dictionary(
        &mut self,
        dict: &Dict,
        level: usize,
        flags: UnparseFlags,
        owner: Option<ObjectRef>,
    ) -> Result<()> {
        let reconciled;
        let dict = if owner.is_some() && owner == self.doc.root_ref().ok() {
            reconciled = self.reconciled_root_dict(dict);
            &reconciled
        } else {
            dict
        };

        let is_signature = dict.get("Type").and_then(Object::as_name) == Some("Sig")
            && dict.contains_key("ByteRange");

        if self.config.qdf {
            self.pipeline.write_string("<<\n")?;
        } else {
            self.pipeline.write_string("<< ")?;
        }

        let entries: Vec<(String, Object)> =
            dict.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (key, value) in &entries {
            if value.is_null() {
                continue;
            }
            if flags.contains(UnparseFlags::STREAM) && key == "Length" {
                continue;
            }
            let mut child_flags = flags - UnparseFlags::STREAM - UnparseFlags::HEX_STRING;
            if is_signature && key == "Contents" {
                // Signature values are byte ranges over the final file and
                // must be written hex and unencrypted.
                child_flags |= UnparseFlags::HEX_STRING | UnparseFlags::NO_ENCRYPTION;
            }
            if flags.contains(UnparseFlags::NO_ENCRYPTION) && key == "ID" {
                child_flags |= UnparseFlags::HEX_STRING;
            }

            if self.config.qdf {
                self.write_indent(level + 1)?;
                self.write_name(key)?;
                self.pipeline.write_string(" ")?;
                self.unparse_object(value, level + 1, child_flags, None)?;
                self.pipeline.write_string("\n")?;
            } else {
                self.write_name(key)?;
                self.pipeline.write_string(" ")?;
                self.unparse_object(value, level, child_flags, None)?;
                self.pipeline.write_string(" ")?;
            }
        }

        if flags.contains(UnparseFlags::STREAM) {
            if let Some(length) = self.cur_stream_length.take() {
                if self.config.qdf {
                    self.write_indent(level + 1)?;
                }
                match length {
                    CurLength::Direct(n) => {
                        self.pipeline.write_string(&format!("/Length {}", n))?;
                    }
                    CurLength::Indirect(id) => {
                        self.pipeline.write_string(&format!("/Length {} 0 R", id))?;
                    }
                }
                if self.config.qdf {
                    self.pipeline.write_string("\n")?;
                } else {
                    self.pipeline.write_string(" ")?;
                }
            }
        }

        if self.config.qdf {
            self.write_indent(level)?;
        }
        self.pipeline.write_string(">>")
    }

    /// Reconcile /Extensions/ADBE on the document catalog with the final
    /// output version and extension level. Works on a shallow copy.
    fn reconciled_root_dict(&self, dict: &Dict) -> Dict {
        let mut d = dict.clone();
        let ext = self.final_extension_level;
        let existing = d
            .get("Extensions")
            .map(|e| self.doc.resolve(e))
            .and_then(Object::as_dict)
            .cloned();
        let mut extensions = existing.unwrap_or_default();

        if ext > 0 {
            let (major, minor) = self.final_version;
            let adbe = Object::dict(vec![
                ("BaseVersion", Object::name(&format!("{}.{}", major, minor))),
                ("ExtensionLevel", Object::Integer(ext as i64)),
            ]);
            extensions.insert("ADBE".to_string(), adbe);
            d.insert("Extensions".to_string(), Object::Dictionary(extensions));
        } else {
            extensions.shift_remove("ADBE");
            if extensions.is_empty() {
                d.shift_remove("Extensions");
            } else {
                d.insert("Extensions".to_string(), Object::Dictionary(extensions));
            }
        }
        d
    }

    fn write_stream(
        &mut self,
        dict: &Dict,
        data: &bytes::Bytes,
        level: usize,
        flags: UnparseFlags,
        owner: Option<ObjectRef>,
    ) -> Result<()> {
        let fs = self.will_filter_stream(owner, dict, data)?;
        let adjusted = self.adjusted_stream_dict(dict, &fs);

        let encrypt = self.encryption.is_some()
            && !flags.contains(UnparseFlags::IN_OSTREAM)
            && !flags.contains(UnparseFlags::NO_ENCRYPTION)
            && !(fs.is_metadata
                && !self
                    .encryption
                    .as_ref()
                    .map(|s| s.params().encrypt_metadata)
                    .unwrap_or(true));

        let body_len = if encrypt {
            self.encryption
                .as_ref()
                .expect("checked above")
                .encrypted_stream_length(fs.data.len() as u64)
        } else {
            fs.data.len() as u64
        };

        let new_id = self.cur_object.0;
        self.cur_stream_length = Some(match self.stream_length_ids.get(&new_id) {
            Some(&length_id) => {
                self.length_values.insert(length_id, body_len);
                CurLength::Indirect(length_id)
            }
            None => CurLength::Direct(body_len),
        });

        let mut dict_flags = flags | UnparseFlags::STREAM;
        if fs.filtered {
            dict_flags |= UnparseFlags::FILTERED;
        }
        self.write_dictionary(&adjusted, level, dict_flags, None)?;

        self.pipeline.write_string("\nstream\n")?;
        if encrypt {
            let filter = self
                .encryption
                .as_ref()
                .expect("checked above")
                .stream_filter(self.cur_object.0, self.cur_object.1);
            let activation = self.pipeline.activate_filters(&[filter]);
            self.pipeline.write_bytes(&fs.data)?;
            self.pipeline.pop(activation)?;
        } else {
            self.pipeline.write_bytes(&fs.data)?;
        }

        let needs_newline = self.config.newline_before_endstream
            || (self.config.qdf && fs.data.last() != Some(&b'\n'));
        if needs_newline {
            self.pipeline.write_string("\nendstream")
        } else {
            self.pipeline.write_string("endstream")
        }
    }

    /// Decide whether to decode and re-encode a stream, and produce the
    /// bytes to write.
    ///
    /// A decode failure is degraded to a raw pass-through with a warning;
    /// the raw write itself cannot fail.
    pub(crate) fn will_filter_stream(
        &mut self,
        owner: Option<ObjectRef>,
        dict: &Dict,
        data: &bytes::Bytes,
    ) -> Result<FilteredStream> {
        let filters = filter_names_of(dict);
        let is_metadata = owner.is_some() && owner == self.root_metadata;
        let normalize = match owner {
            Some(r) => self.normalized_streams.contains(&r),
            None => false,
        };
        let metadata_plain = is_metadata
            && self
                .encryption
                .as_ref()
                .map(|s| !s.params().encrypt_metadata)
                .unwrap_or(false);

        let mut decode_level = self.config.decode_level;
        let mut filter = self.config.compress_streams
            || decode_level > DecodeLevel::None
            || normalize
            || metadata_plain;

        // Flate-to-Flate round trips are pointless; keep the original bytes
        // unless re-compression was requested or the data must change form.
        if filter
            && filters.len() == 1
            && matches!(filters[0].as_str(), "FlateDecode" | "Fl")
            && !self.config.recompress_flate
            && self.config.compress_streams
            && decode_level <= DecodeLevel::Generalized
            && !self.config.qdf
            && !normalize
            && !metadata_plain
        {
            filter = false;
        }

        if metadata_plain {
            decode_level = DecodeLevel::All;
        }

        if data.is_empty() {
            filter = false;
        }

        if filter && !decoders::decodable(&filters, decode_level) {
            filter = false;
        }

        if filter {
            let params = decode_params_of(self.doc, dict, filters.len());
            match decoders::decode_stream(data, &filters, &params) {
                Ok(mut decoded) => {
                    if normalize {
                        decoded = normalize_content_data(&decoded);
                    }
                    if self.config.compress_streams && !self.config.qdf && !metadata_plain {
                        let compressed = flate_compress(&decoded)?;
                        return Ok(FilteredStream {
                            filtered: true,
                            compressed: true,
                            data: compressed,
                            is_metadata,
                        });
                    }
                    return Ok(FilteredStream {
                        filtered: true,
                        compressed: false,
                        data: decoded,
                        is_metadata,
                    });
                }
                Err(e) => {
                    log::warn!(
                        "stream decode failed for object {} {}: {}; writing raw data",
                        self.cur_object.0,
                        self.cur_object.1,
                        e
                    );
                }
            }
        }

        Ok(FilteredStream {
            filtered: false,
            compressed: false,
            data: data.to_vec(),
            is_metadata,
        })
    }

    /// Shallow-copied stream dictionary with /Length suppressed, filter
    /// entries matching the data actually written, empty /DecodeParms
    /// dropped, and /Crypt stripped from the filter chain.
    fn adjusted_stream_dict(&self, dict: &Dict, fs: &FilteredStream) -> Dict {
        let mut d = dict.clone();
        d.shift_remove("Length");

        let parms_empty = match d.get("DecodeParms") {
            Some(Object::Dictionary(p)) => p.is_empty(),
            Some(Object::Array(a)) => a.is_empty(),
            Some(Object::Null) | None => true,
            _ => false,
        };
        if parms_empty {
            d.shift_remove("DecodeParms");
        }

        if fs.filtered {
            if fs.compressed {
                d.insert("Filter".to_string(), Object::name("FlateDecode"));
                d.shift_remove("DecodeParms");
            } else {
                d.shift_remove("Filter");
                d.shift_remove("DecodeParms");
            }
        } else {
            strip_crypt(&mut d);
        }
        d
    }
}

/// Remove /Crypt from a stream's filter list and its paired decode
/// parameters.
fn strip_crypt(dict: &mut Dict) {
    match dict.get("Filter") {
        Some(Object::Name(n)) if n == "Crypt" => {
            dict.shift_remove("Filter");
            dict.shift_remove("DecodeParms");
        }
        Some(Object::Array(filters)) => {
            let keep: Vec<usize> = filters
                .iter()
                .enumerate()
                .filter(|(_, f)| f.as_name() != Some("Crypt"))
                .map(|(i, _)| i)
                .collect();
            if keep.len() == filters.len() {
                return;
            }
            let new_filters: Vec<Object> =
                keep.iter().map(|&i| filters[i].clone()).collect();
            let new_parms = match dict.get("DecodeParms") {
                Some(Object::Array(parms)) => {
                    let filtered: Vec<Object> = keep
                        .iter()
                        .filter_map(|&i| parms.get(i).cloned())
                        .collect();
                    Some(filtered)
                }
                _ => None,
            };
            dict.insert("Filter".to_string(), Object::Array(new_filters));
            if let Some(parms) = new_parms {
                dict.insert("DecodeParms".to_string(), Object::Array(parms));
            }
        }
        _ => {}
    }
}

fn filter_names_of(dict: &Dict) -> Vec<String> {
    match dict.get("Filter") {
        Some(Object::Name(n)) => vec![n.clone()],
        Some(Object::Array(arr)) => arr
            .iter()
            .filter_map(|o| o.as_name().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn decode_params_of(
    doc: &crate::document::Document,
    dict: &Dict,
    nfilters: usize,
) -> Vec<Option<DecodeParams>> {
    let parse = |obj: &Object| -> Option<DecodeParams> {
        let d = doc.resolve(obj).as_dict()?;
        let get_int = |key: &str, default: i64| {
            d.get(key)
                .map(|v| doc.resolve(v))
                .and_then(Object::as_integer)
                .unwrap_or(default)
        };
        Some(DecodeParams {
            predictor: get_int("Predictor", 1),
            columns: get_int("Columns", 1) as usize,
            colors: get_int("Colors", 1) as usize,
            bits_per_component: get_int("BitsPerComponent", 8) as usize,
            early_change: get_int("EarlyChange", 1) != 0,
        })
    };

    match dict.get("DecodeParms") {
        Some(Object::Array(arr)) => {
            let mut out: Vec<Option<DecodeParams>> =
                arr.iter().map(|item| parse(item)).collect();
            out.resize(nfilters, None);
            out
        }
        Some(obj) => {
            let mut out = vec![parse(obj)];
            out.resize(nfilters, None);
            out
        }
        None => vec![None; nfilters],
    }
}
