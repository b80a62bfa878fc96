//! PDF writer driver.
//!
//! Owns the output pipeline, the renumbering tables, and the encryption
//! state for the duration of one [`PdfWriter::write`] call. The driver
//! enqueues reachable objects (assigning new object numbers as it goes),
//! serializes them through the unparser, and finishes the file with the
//! cross-reference data and trailer. Standard, QDF, and PCLm paths are
//! driven from here; the linearized path lives in the linearization module
//! and reuses the same object-writing machinery.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use md5::{Digest, Md5};

use crate::document::Document;
use crate::encryption::{EncryptionParams, EncryptionState};
use crate::error::{Error, Result};
use crate::object::{Object, ObjectRef};
use crate::pipeline::PipelineStack;
use crate::writer::config::{EncryptionSpec, ObjectStreamMode, WriterConfig};

/// Fixed /ID bytes used by `static_id` so test suites get stable output.
pub(crate) const STATIC_ID: [u8; 16] = [
    0x31, 0x41, 0x59, 0x26, 0x53, 0x58, 0x97, 0x93, 0x23, 0x84, 0x62, 0x64, 0x33, 0x83, 0x27,
    0x95,
];

/// Renumbering record for one input object.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ObjTableEntry {
    /// New object number. 0 = unvisited, -1 = transient loop sentinel.
    pub renumber: i64,
    /// If > 0, the object-stream group this object is packed into.
    pub object_stream: u32,
    /// Original generation, kept for QDF origin comments.
    pub gen: u16,
}

/// Cross-reference entry for an output object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum XrefEntry {
    /// Free entry (object 0).
    Free,
    /// Uncompressed object at a byte offset.
    Uncompressed {
        /// Byte offset of `N 0 obj`.
        offset: u64,
    },
    /// Object stored in an object stream.
    InStream {
        /// New object number of the containing stream.
        stream: u32,
        /// Index within the stream.
        index: u32,
    },
}

/// Per-new-id record: where the object landed and how many bytes it took.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NewObjEntry {
    pub(crate) xref: XrefEntry,
    pub(crate) length: u64,
}

/// Unit of work on the writer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueItem {
    /// A regular indirect object.
    Object(ObjectRef),
    /// An object stream, identified by its group key.
    ObjectStream(u32),
    /// A writer-synthesized object (PCLm strip transforms), by index into
    /// the synthetic-object table.
    Synthetic(usize),
}

/// Pending /Length for the stream dictionary currently being written.
#[derive(Debug, Clone, Copy)]
pub(crate) enum CurLength {
    /// Inline integer.
    Direct(u64),
    /// Reference to a companion length object.
    Indirect(u32),
}

/// PDF writer.
///
/// Borrow a [`Document`], configure, call [`write`](Self::write), get bytes.
pub struct PdfWriter<'a> {
    pub(crate) doc: &'a Document,
    pub(crate) config: WriterConfig,
    pub(crate) pipeline: PipelineStack,

    pub(crate) obj: HashMap<ObjectRef, ObjTableEntry>,
    pub(crate) new_obj: BTreeMap<u32, NewObjEntry>,
    pub(crate) queue: VecDeque<QueueItem>,
    pub(crate) next_objid: u32,

    pub(crate) ostream_marked: HashSet<ObjectRef>,
    pub(crate) ostream_members: BTreeMap<u32, Vec<ObjectRef>>,
    pub(crate) ostream_new_ids: HashMap<u32, u32>,
    pub(crate) next_ostream_group: u32,

    pub(crate) stream_length_ids: HashMap<u32, u32>,
    pub(crate) length_values: HashMap<u32, u64>,

    pub(crate) synthetic: Vec<(u32, Object)>,

    pub(crate) encryption: Option<EncryptionState>,
    pub(crate) encryption_dict_id: u32,

    pub(crate) final_version: (i32, i32),
    pub(crate) final_extension_level: i32,

    pub(crate) id1: Vec<u8>,
    pub(crate) id2: Vec<u8>,
    pub(crate) id_generated: bool,

    pub(crate) page_index_of: HashMap<ObjectRef, usize>,
    pub(crate) contents_page: HashMap<ObjectRef, usize>,
    pub(crate) normalized_streams: HashSet<ObjectRef>,
    pub(crate) root_metadata: Option<ObjectRef>,

    pub(crate) cur_object: (u32, u16),
    pub(crate) cur_stream_length: Option<CurLength>,

    pub(crate) defer_id: bool,
    pub(crate) main_xref_slot: u64,

    pub(crate) setup_done: bool,
    pub(crate) events: u64,
}

impl<'a> PdfWriter<'a> {
    /// Create a writer over a document with the given configuration.
    pub fn new(doc: &'a Document, config: WriterConfig) -> Self {
        Self {
            doc,
            config,
            pipeline: PipelineStack::new(),
            obj: HashMap::new(),
            new_obj: BTreeMap::new(),
            queue: VecDeque::new(),
            next_objid: 1,
            ostream_marked: HashSet::new(),
            ostream_members: BTreeMap::new(),
            ostream_new_ids: HashMap::new(),
            next_ostream_group: 1,
            stream_length_ids: HashMap::new(),
            length_values: HashMap::new(),
            synthetic: Vec::new(),
            encryption: None,
            encryption_dict_id: 0,
            final_version: (1, 3),
            final_extension_level: 0,
            id1: Vec::new(),
            id2: Vec::new(),
            id_generated: false,
            page_index_of: HashMap::new(),
            contents_page: HashMap::new(),
            normalized_streams: HashSet::new(),
            root_metadata: None,
            cur_object: (0, 0),
            cur_stream_length: None,
            defer_id: false,
            main_xref_slot: 0,
            setup_done: false,
            events: 0,
        }
    }

    /// Serialize the document and return the output file bytes.
    pub fn write(mut self) -> Result<Vec<u8>> {
        self.setup()?;
        if self.config.pclm {
            self.write_pclm()
        } else if self.config.linearize {
            self.write_linearized()
        } else {
            self.write_standard()
        }
    }

    // ------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------

    pub(crate) fn setup(&mut self) -> Result<()> {
        if self.setup_done {
            return Ok(());
        }
        self.setup_done = true;

        // Companion length objects only exist in QDF output.
        if self.config.linearize || self.config.pclm {
            self.config.direct_stream_lengths = true;
        }
        // PCLm consumers read strip data exactly as the raster pipeline
        // produced it; stream data passes through untouched, and the
        // classic cross-reference table leaves no room for object streams.
        if self.config.pclm {
            self.config.compress_streams = false;
            self.config.decode_level = crate::decoders::DecodeLevel::None;
            self.config.object_streams = ObjectStreamMode::Disable;
        }

        self.setup_encryption()?;
        self.setup_object_streams()?;
        self.setup_version()?;
        self.setup_page_maps();
        Ok(())
    }

    fn setup_encryption(&mut self) -> Result<()> {
        if self.config.pclm {
            // The raster profile has no use for encryption.
            if self.config.encryption.is_some() {
                log::warn!("ignoring encryption for PCLm output");
            }
            return Ok(());
        }
        let params = if let Some(spec) = self.config.encryption.clone() {
            // Fresh encryption. R2-R4 need id1, so the /ID is fixed now.
            self.generate_id()?;
            let id1 = self.id1.clone();
            Some(match spec {
                EncryptionSpec::R2 {
                    user_password,
                    owner_password,
                    permissions,
                } => EncryptionParams::r2(&user_password, &owner_password, permissions, &id1),
                EncryptionSpec::R3 {
                    user_password,
                    owner_password,
                    permissions,
                } => EncryptionParams::r3(&user_password, &owner_password, permissions, &id1),
                EncryptionSpec::R4 {
                    user_password,
                    owner_password,
                    permissions,
                    use_aes,
                    encrypt_metadata,
                } => EncryptionParams::r4(
                    &user_password,
                    &owner_password,
                    permissions,
                    &id1,
                    use_aes || self.config.encrypt_use_aes,
                    encrypt_metadata,
                ),
                EncryptionSpec::R6 {
                    user_password,
                    owner_password,
                    permissions,
                    encrypt_metadata,
                } => EncryptionParams::r6(
                    &user_password,
                    &owner_password,
                    permissions,
                    encrypt_metadata,
                )?,
            })
        } else if self.config.preserve_encryption {
            match self.doc.encryption() {
                Some(input) => {
                    if self.config.deterministic_id {
                        return Err(Error::Usage(
                            "unable to generate a deterministic ID because the file to be \
                             written is encrypted"
                                .to_string(),
                        ));
                    }
                    let mut params = input.clone();
                    if params.v == 4 && self.config.encrypt_use_aes {
                        params.use_aes = true;
                    }
                    // id1 must stay byte-identical for the preserved keys to
                    // keep working.
                    self.generate_id()?;
                    Some(params)
                }
                None => None,
            }
        } else {
            None
        };

        if let Some(params) = params {
            if self.config.deterministic_id {
                return Err(Error::Usage(
                    "unable to generate a deterministic ID because the file to be written is \
                     encrypted"
                        .to_string(),
                ));
            }
            self.encryption = Some(EncryptionState::new(params, self.config.iv_source));
        }
        Ok(())
    }

    fn setup_object_streams(&mut self) -> Result<()> {
        let doc = self.doc;
        let mode = self.config.object_streams;
        if mode == ObjectStreamMode::Disable {
            return Ok(());
        }

        let encrypting = self.encryption.is_some();
        let linearizing = self.config.linearize;
        let root = doc.root_ref().ok();
        let pages: HashSet<ObjectRef> = doc.pages().iter().copied().collect();

        let eligible = |r: ObjectRef, value: &Object| -> bool {
            if r.gen != 0 || value.is_stream() {
                return false;
            }
            if linearizing && pages.contains(&r) {
                return false;
            }
            if (linearizing || encrypting) && Some(r) == root {
                return false;
            }
            true
        };

        match mode {
            ObjectStreamMode::Disable => {}
            ObjectStreamMode::Preserve => {
                for r in doc.all_refs() {
                    let Some(value) = doc.get(r) else { continue };
                    let in_stream = matches!(
                        doc.xref_type(r),
                        Some(crate::document::InputXrefType::InStream { .. })
                    );
                    if in_stream && eligible(r, value) {
                        self.ostream_marked.insert(r);
                    }
                }
            }
            ObjectStreamMode::Generate => {
                for r in doc.all_refs() {
                    let Some(value) = doc.get(r) else { continue };
                    if eligible(r, value) {
                        self.ostream_marked.insert(r);
                    }
                }
            }
        }

        // For non-linearized output, grouping happens up front. The
        // linearizer regroups per part instead so that no stream spans a
        // part boundary.
        if !linearizing {
            let mut marked: Vec<ObjectRef> = self.ostream_marked.iter().copied().collect();
            marked.sort();
            match mode {
                ObjectStreamMode::Preserve => {
                    // Group by input stream, capped at 100 members.
                    let mut by_stream: BTreeMap<(u32, usize), Vec<ObjectRef>> = BTreeMap::new();
                    let mut counts: HashMap<u32, usize> = HashMap::new();
                    for r in marked {
                        if let Some(crate::document::InputXrefType::InStream { stream_id, .. }) =
                            doc.xref_type(r)
                        {
                            let n = counts.entry(stream_id).or_insert(0);
                            by_stream.entry((stream_id, *n / 100)).or_default().push(r);
                            *n += 1;
                        }
                    }
                    for (_, members) in by_stream {
                        self.install_ostream_group(members);
                    }
                }
                ObjectStreamMode::Generate => {
                    for chunk in marked.chunks(100) {
                        self.install_ostream_group(chunk.to_vec());
                    }
                }
                ObjectStreamMode::Disable => {}
            }
        }
        Ok(())
    }

    pub(crate) fn install_ostream_group(&mut self, members: Vec<ObjectRef>) -> u32 {
        let group = self.next_ostream_group;
        self.next_ostream_group += 1;
        for &m in &members {
            let entry = self.obj.entry(m).or_insert(ObjTableEntry {
                renumber: 0,
                object_stream: 0,
                gen: m.gen,
            });
            entry.object_stream = group;
        }
        self.ostream_members.insert(group, members);
        group
    }

    fn setup_version(&mut self) -> Result<()> {
        if let Some(forced) = self.config.forced_pdf_version.clone() {
            match crate::document::parse_version(&forced) {
                Some(v) => {
                    self.final_version = v;
                    self.final_extension_level = self.config.forced_extension_level;
                    self.disable_incompatible_encryption();
                    return Ok(());
                }
                None => {
                    // An unparsable forced version is silently ignored.
                    log::debug!("ignoring unparsable forced PDF version {:?}", forced);
                }
            }
        }

        let mut version = self.doc.version_parts();
        let mut extension_level = self.doc.extension_level();

        if !self.ostream_marked.is_empty() || self.config.object_streams == ObjectStreamMode::Generate
        {
            version = version.max((1, 5));
        }
        if let Some(state) = &self.encryption {
            let p = state.params();
            let minimum = match (p.v, p.aes()) {
                (v, _) if v >= 5 => (1, 7),
                (4, true) => (1, 6),
                (4, false) => (1, 5),
                (2, _) => (1, 4),
                _ => (1, 3),
            };
            version = version.max(minimum);
            if p.v >= 5 {
                extension_level = extension_level.max(3);
            }
        }
        if self.config.linearize {
            // Linearized output always carries cross-reference streams.
            version = version.max((1, 5));
        }

        self.final_version = version;
        self.final_extension_level = extension_level;
        Ok(())
    }

    /// Drop encryption the forced output version cannot express.
    fn disable_incompatible_encryption(&mut self) {
        let Some(state) = &self.encryption else { return };
        let p = state.params();
        let (maj, min) = self.final_version;
        let ext = self.final_extension_level;
        let v = (maj, min);

        let disable = if v < (1, 3) {
            true
        } else if v < (1, 4) {
            p.v > 1 || p.r > 2
        } else if v < (1, 5) {
            p.v > 2 || p.r > 3
        } else if v < (1, 6) {
            p.aes()
        } else if v < (1, 7) || (v == (1, 7) && ext < 3) {
            p.v >= 5 || p.r >= 5
        } else {
            false
        };

        if disable {
            log::warn!(
                "disabling encryption: V={} R={} cannot be written as PDF {}.{}",
                p.v,
                p.r,
                maj,
                min
            );
            self.encryption = None;
        }
    }

    fn setup_page_maps(&mut self) {
        let doc = self.doc;
        for (i, &page) in doc.pages().iter().enumerate() {
            self.page_index_of.insert(page, i);
            if let Some(page_dict) = doc.get(page) {
                match page_dict.get("Contents") {
                    Some(Object::Reference(r)) => {
                        self.contents_page.insert(*r, i);
                    }
                    Some(Object::Array(items)) => {
                        for item in items {
                            if let Object::Reference(r) = item {
                                self.contents_page.insert(*r, i);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        if self.config.normalize_content {
            self.normalized_streams = self.contents_page.keys().copied().collect();
        }

        if let Ok(root) = doc.root_ref() {
            if let Some(Object::Reference(r)) = doc.get(root).and_then(|o| o.get("Metadata")) {
                self.root_metadata = Some(*r);
            }
        }
    }

    // ------------------------------------------------------------------
    // Enqueue and renumbering
    // ------------------------------------------------------------------

    /// New object number for an input reference, if it was assigned one.
    pub(crate) fn renumbered(&self, r: ObjectRef) -> Option<u32> {
        match self.obj.get(&r) {
            Some(e) if e.renumber > 0 => Some(e.renumber as u32),
            _ => None,
        }
    }

    pub(crate) fn assign_next_id(&mut self) -> u32 {
        let id = self.next_objid;
        self.next_objid += 1;
        id
    }

    /// Enqueue one indirect object, assigning its new number, then walk its
    /// children.
    pub(crate) fn enqueue_object(&mut self, r: ObjectRef) -> Result<()> {
        let doc = self.doc;
        let Some(value) = doc.get(r) else {
            // Dangling references serialize as null.
            return Ok(());
        };

        // QDF fixup tools expect exactly one cross-reference stream, at the
        // end of the file; input xref streams are dropped.
        if self.config.qdf && value.has_type("XRef") {
            return Ok(());
        }

        let entry = self.obj.entry(r).or_insert(ObjTableEntry {
            renumber: 0,
            object_stream: 0,
            gen: r.gen,
        });
        if entry.renumber != 0 {
            return Ok(());
        }

        let group = entry.object_stream;
        if group > 0 {
            entry.renumber = -1;
            self.enqueue_object_stream(group)?;
            if self.obj.get(&r).map(|e| e.renumber) == Some(-1) {
                return Err(Error::Internal(format!(
                    "object {} was not numbered by its object stream",
                    r
                )));
            }
        } else {
            let new_id = self.assign_next_id();
            self.obj.get_mut(&r).expect("entry exists").renumber = new_id as i64;
            self.queue.push_back(QueueItem::Object(r));
            if value.is_stream() && !self.config.direct_stream_lengths {
                let length_id = self.assign_next_id();
                self.stream_length_ids.insert(new_id, length_id);
            }
        }

        self.enqueue_value(value)
    }

    /// Enqueue the object stream for `group` and number all its members.
    pub(crate) fn enqueue_object_stream(&mut self, group: u32) -> Result<()> {
        if self.ostream_new_ids.contains_key(&group) {
            return Ok(());
        }
        let stream_id = self.assign_next_id();
        self.ostream_new_ids.insert(group, stream_id);
        self.queue.push_back(QueueItem::ObjectStream(group));
        self.assign_compressed_object_numbers(group, stream_id)?;

        let members = self.ostream_members.get(&group).cloned().unwrap_or_default();
        let doc = self.doc;
        for m in members {
            if let Some(value) = doc.get(m) {
                self.enqueue_value(value)?;
            }
        }
        Ok(())
    }

    /// Give every member of an object stream its new number and type-2
    /// cross-reference entry.
    pub(crate) fn assign_compressed_object_numbers(
        &mut self,
        group: u32,
        stream_id: u32,
    ) -> Result<()> {
        let members = self.ostream_members.get(&group).cloned().unwrap_or_default();
        for (index, m) in members.into_iter().enumerate() {
            let new_id = self.assign_next_id();
            let entry = self.obj.entry(m).or_insert(ObjTableEntry {
                renumber: 0,
                object_stream: group,
                gen: m.gen,
            });
            entry.renumber = new_id as i64;
            self.new_obj.insert(
                new_id,
                NewObjEntry {
                    xref: XrefEntry::InStream {
                        stream: stream_id,
                        index: index as u32,
                    },
                    length: 0,
                },
            );
        }
        Ok(())
    }

    /// Walk a direct object's children, enqueueing every reference found.
    pub(crate) fn enqueue_value(&mut self, obj: &Object) -> Result<()> {
        match obj {
            Object::Reference(r) => self.enqueue_object(*r),
            Object::Array(items) => {
                for item in items {
                    self.enqueue_value(item)?;
                }
                Ok(())
            }
            Object::Dictionary(dict) => {
                for value in dict.values() {
                    self.enqueue_value(value)?;
                }
                Ok(())
            }
            Object::Stream { dict, .. } => {
                for value in dict.values() {
                    self.enqueue_value(value)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Assign a number and queue an object without walking its children.
    ///
    /// The PCLm path uses this to pin page-major output ordering before
    /// the general graph walk (which follows /Parent links) fills in the
    /// rest of the document.
    pub(crate) fn enqueue_object_shallow(&mut self, r: ObjectRef) -> Result<()> {
        let doc = self.doc;
        let Some(value) = doc.get(r) else {
            return Ok(());
        };
        let entry = self.obj.entry(r).or_insert(ObjTableEntry {
            renumber: 0,
            object_stream: 0,
            gen: r.gen,
        });
        if entry.renumber != 0 {
            return Ok(());
        }
        let new_id = self.assign_next_id();
        self.obj.get_mut(&r).expect("entry exists").renumber = new_id as i64;
        self.queue.push_back(QueueItem::Object(r));
        if value.is_stream() && !self.config.direct_stream_lengths {
            let length_id = self.assign_next_id();
            self.stream_length_ids.insert(new_id, length_id);
        }
        Ok(())
    }

    /// Enqueue an object the writer created itself, assigning it a number.
    pub(crate) fn enqueue_synthetic(&mut self, obj: Object) -> u32 {
        let new_id = self.assign_next_id();
        let index = self.synthetic.len();
        self.synthetic.push((new_id, obj));
        self.queue.push_back(QueueItem::Synthetic(index));
        new_id
    }

    /// Enqueue the document root and the remaining trailer values.
    pub(crate) fn enqueue_roots(&mut self) -> Result<()> {
        if self.config.preserve_unreferenced {
            for r in self.doc.all_refs() {
                self.enqueue_object(r)?;
            }
        }
        let root = self.doc.root_ref()?;
        self.enqueue_object(root)?;
        let trailer = self.filtered_trailer();
        for value in trailer.values() {
            self.enqueue_value(value)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Object writing
    // ------------------------------------------------------------------

    pub(crate) fn indicate_progress(&mut self) {
        self.events += 1;
        if self.events % 100 == 0 {
            log::debug!("wrote {} objects", self.events);
        }
    }

    /// Write one queued item at the current output position.
    pub(crate) fn write_object_item(&mut self, item: QueueItem) -> Result<()> {
        match item {
            QueueItem::Object(r) => self.write_indirect_object(r),
            QueueItem::ObjectStream(group) => self.write_object_stream(group),
            QueueItem::Synthetic(index) => self.write_synthetic_object(index),
        }
    }

    fn write_synthetic_object(&mut self, index: usize) -> Result<()> {
        let (new_id, obj) = self
            .synthetic
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no synthetic object at index {}", index)))?;
        let start = self.open_object(new_id)?;
        self.cur_object = (new_id, 0);
        self.unparse_object(
            &obj,
            0,
            crate::writer::object_serializer::UnparseFlags::empty(),
            None,
        )?;
        self.pipeline.write_string("\nendobj\n")?;
        self.close_object(new_id, start);
        self.indicate_progress();
        Ok(())
    }

    fn write_indirect_object(&mut self, r: ObjectRef) -> Result<()> {
        let doc = self.doc;
        let Some(value) = doc.get(r) else {
            return Err(Error::ObjectNotFound(r.id, r.gen));
        };
        let new_id = self
            .renumbered(r)
            .ok_or_else(|| Error::Internal(format!("object {} has no new number", r)))?;

        if self.config.qdf {
            if let Some(&page) = self.page_index_of.get(&r) {
                self.pipeline.write_string(&format!("%% Page {}\n", page + 1))?;
            }
            if let Some(&page) = self.contents_page.get(&r) {
                self.pipeline
                    .write_string(&format!("%% Contents for page {}\n", page + 1))?;
            }
            if !self.config.no_original_object_ids {
                self.pipeline
                    .write_string(&format!("%% Original object ID: {} {}\n", r.id, r.gen))?;
            }
        }

        let start = self.open_object(new_id)?;
        self.cur_object = (new_id, 0);
        self.unparse_object(value, 0, crate::writer::object_serializer::UnparseFlags::empty(), Some(r))?;
        self.pipeline.write_string("\nendobj\n")?;
        self.close_object(new_id, start);

        if self.config.qdf {
            self.pipeline.write_string("\n")?;
        }

        // Companion length object for indirect stream lengths.
        if let Some(&length_id) = self.stream_length_ids.get(&new_id) {
            let length = self.length_values.get(&length_id).copied().unwrap_or(0);
            let start = self.open_object(length_id)?;
            self.pipeline.write_string(&format!("{}", length))?;
            self.pipeline.write_string("\nendobj\n")?;
            self.close_object(length_id, start);
            if self.config.qdf {
                self.pipeline.write_string("\n")?;
            }
        }

        self.indicate_progress();
        Ok(())
    }

    /// Record the xref entry for an object and emit its `N 0 obj` line.
    /// Returns the object's start offset.
    pub(crate) fn open_object(&mut self, new_id: u32) -> Result<u64> {
        let offset = self.pipeline.count();
        self.new_obj.insert(
            new_id,
            NewObjEntry {
                xref: XrefEntry::Uncompressed { offset },
                length: 0,
            },
        );
        self.pipeline.write_string(&format!("{} 0 obj\n", new_id))?;
        Ok(offset)
    }

    /// Record an object's byte length from the pipeline counter delta.
    pub(crate) fn close_object(&mut self, new_id: u32, start: u64) {
        let length = self.pipeline.count() - start;
        if let Some(entry) = self.new_obj.get_mut(&new_id) {
            entry.length = length;
        }
    }

    pub(crate) fn write_queue(&mut self) -> Result<()> {
        while let Some(item) = self.queue.pop_front() {
            self.write_object_item(item)?;
        }
        Ok(())
    }

    /// Write the encryption dictionary as its own indirect object.
    pub(crate) fn write_encryption_dict(&mut self) -> Result<()> {
        let Some(state) = self.encryption.clone() else {
            return Ok(());
        };
        if self.encryption_dict_id == 0 {
            self.encryption_dict_id = self.assign_next_id();
        }
        let id = self.encryption_dict_id;
        let dict = Object::Dictionary(state.dictionary());
        let start = self.open_object(id)?;
        self.cur_object = (id, 0);
        self.unparse_object(
            &dict,
            0,
            crate::writer::object_serializer::UnparseFlags::NO_ENCRYPTION,
            None,
        )?;
        self.pipeline.write_string("\nendobj\n")?;
        self.close_object(id, start);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Header and /ID
    // ------------------------------------------------------------------

    pub(crate) fn write_header(&mut self) -> Result<()> {
        let (major, minor) = self.final_version;
        self.pipeline
            .write_string(&format!("%PDF-{}.{}\n", major, minor))?;
        if self.config.pclm {
            self.pipeline.write_string("%PCLm 1.0\n")?;
        } else {
            // Binary marker so transfer tools treat the file as binary.
            self.pipeline.write_bytes(b"%\xBF\xF7\xA2\xFE\n")?;
        }
        if self.config.qdf {
            self.pipeline.write_string("%QDF-1.0\n")?;
        }
        if !self.config.extra_header_text.is_empty() {
            let text = self.config.extra_header_text.clone();
            self.pipeline.write_string(&text)?;
            if !text.ends_with('\n') {
                self.pipeline.write_string("\n")?;
            }
        }
        Ok(())
    }

    fn input_id1(&self) -> Option<Vec<u8>> {
        let id = self.doc.trailer().get("ID")?;
        let array = self.doc.resolve(id).as_array()?;
        array.first()?.as_string().map(|s| s.to_vec())
    }

    /// Generate /ID values. For the deterministic path the MD5 pipeline
    /// digest must already cover everything up to the cross-reference data.
    pub(crate) fn generate_id(&mut self) -> Result<()> {
        if self.id_generated {
            return Ok(());
        }
        self.id_generated = true;

        if self.config.static_id {
            self.id1 = STATIC_ID.to_vec();
            self.id2 = STATIC_ID.to_vec();
            return Ok(());
        }

        if self.config.deterministic_id {
            self.id2 = self.pipeline.raw_digest()?.to_vec();
        } else {
            let mut hasher = Md5::new();
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default();
            hasher.update(now.as_nanos().to_le_bytes());
            hasher.update(self.config.output_name.as_bytes());
            hasher.update(b" pdf_scribe ");
            if let Some(info) = self.doc.trailer().get("Info") {
                if let Some(info_dict) = self.doc.resolve(info).as_dict() {
                    for value in info_dict.values() {
                        if let Some(s) = self.doc.resolve(value).as_string() {
                            hasher.update(s);
                        }
                    }
                }
            }
            self.id2 = hasher.finalize().to_vec();
        }

        self.id1 = self.input_id1().unwrap_or_else(|| self.id2.clone());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Standard path
    // ------------------------------------------------------------------

    fn write_standard(mut self) -> Result<Vec<u8>> {
        if self.config.deterministic_id {
            self.pipeline.activate_md5()?;
        }
        self.write_header()?;
        self.enqueue_roots()?;
        self.write_queue()?;
        self.write_encryption_dict()?;

        let uses_xref_stream = self
            .new_obj
            .values()
            .any(|e| matches!(e.xref, XrefEntry::InStream { .. }));

        self.generate_id()?;

        let xref_offset;
        if uses_xref_stream {
            let xref_id = self.assign_next_id();
            let size = self.next_objid;
            xref_offset = self.write_standard_xref_stream(xref_id, size)?;
        } else {
            let size = self.next_objid;
            xref_offset = self.write_standard_xref_table(size)?;
        }

        self.pipeline
            .write_string(&format!("startxref\n{}\n%%EOF\n", xref_offset))?;
        self.pipeline.into_bytes()
    }

    // ------------------------------------------------------------------
    // PCLm path
    // ------------------------------------------------------------------

    /// PCLm: a restricted raster subset. Pages carry their raster data as
    /// horizontal image strips under /Resources /XObject; objects are
    /// enqueued page by page (page, content stream, then each strip
    /// followed by a synthesized transform stream that places it), so a
    /// raster consumer can stream the file front to back.
    fn write_pclm(mut self) -> Result<Vec<u8>> {
        if self.config.deterministic_id {
            self.pipeline.activate_md5()?;
        }
        self.write_header()?;

        let doc = self.doc;
        for &page in doc.pages() {
            self.enqueue_object_shallow(page)?;
            let Some(page_dict) = doc.get(page) else { continue };
            if let Some(contents) = page_dict.get("Contents") {
                self.enqueue_value(contents)?;
            }
            // Each strip gets a companion content stream drawing it; the
            // strip data itself passes through byte for byte.
            let resources = doc.resolve(page_dict.get("Resources").unwrap_or(&Object::Null));
            if let Some(xobjects) = resources
                .get("XObject")
                .map(|x| doc.resolve(x))
                .and_then(Object::as_dict)
            {
                let mut names: Vec<String> = xobjects.keys().cloned().collect();
                names.sort();
                for name in &names {
                    if let Some(strip) = xobjects.get(name) {
                        self.enqueue_value(strip)?;
                        self.enqueue_synthetic(strip_transform_stream(name));
                    }
                }
            }
        }
        // Pick up whatever the shallow pass skipped: the pages' remaining
        // children (parent links, annotations) and the document level.
        for &page in doc.pages() {
            if let Some(page_dict) = doc.get(page) {
                self.enqueue_value(page_dict)?;
            }
        }
        self.enqueue_roots()?;
        self.write_queue()?;

        self.generate_id()?;
        let size = self.next_objid;
        let xref_offset = self.write_standard_xref_table(size)?;
        self.pipeline
            .write_string(&format!("startxref\n{}\n%%EOF\n", xref_offset))?;
        self.pipeline.into_bytes()
    }
}

/// Content stream placing one PCLm image strip on the page.
fn strip_transform_stream(name: &str) -> Object {
    let content = format!("q /{} Do Q\n", name);
    Object::Stream {
        dict: crate::object::Dict::new(),
        data: bytes::Bytes::from(content.into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;

    fn three_page_doc() -> Document {
        let mut doc = Document::new("1.5");
        doc.add_object(
            ObjectRef::new(1, 0),
            Object::dict(vec![("Type", Object::name("Catalog")), ("Pages", Object::reference(2, 0))]),
        );
        doc.add_object(
            ObjectRef::new(2, 0),
            Object::dict(vec![
                ("Type", Object::name("Pages")),
                (
                    "Kids",
                    Object::Array(vec![
                        Object::reference(3, 0),
                        Object::reference(5, 0),
                        Object::reference(7, 0),
                    ]),
                ),
                ("Count", Object::Integer(3)),
            ]),
        );
        for (page_id, content_id) in [(3u32, 4u32), (5, 6), (7, 8)] {
            doc.add_object(
                ObjectRef::new(page_id, 0),
                Object::dict(vec![
                    ("Type", Object::name("Page")),
                    ("Parent", Object::reference(2, 0)),
                    ("Contents", Object::reference(content_id, 0)),
                ]),
            );
            let mut dict = crate::object::Dict::new();
            dict.insert("Length".to_string(), Object::Integer(8));
            doc.add_object(
                ObjectRef::new(content_id, 0),
                Object::Stream {
                    dict,
                    data: bytes::Bytes::from_static(b"0 0 m S\n"),
                },
            );
        }
        let mut trailer = crate::object::Dict::new();
        trailer.insert("Root".to_string(), Object::reference(1, 0));
        trailer.insert("Size".to_string(), Object::Integer(9));
        doc.set_trailer(trailer);
        doc.set_pages(vec![ObjectRef::new(3, 0), ObjectRef::new(5, 0), ObjectRef::new(7, 0)]);
        doc
    }

    #[test]
    fn test_enqueue_assigns_monotonic_numbers_root_first() {
        let doc = three_page_doc();
        let mut writer = PdfWriter::new(&doc, WriterConfig::new());
        writer.setup().unwrap();
        writer.enqueue_roots().unwrap();

        assert_eq!(writer.renumbered(ObjectRef::new(1, 0)), Some(1));
        // All eight objects numbered, contiguously from 1.
        let mut seen: Vec<u32> = (1..=8)
            .map(|id| writer.renumbered(ObjectRef::new(id, 0)).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, (1..=8).collect::<Vec<u32>>());
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let doc = three_page_doc();
        let mut writer = PdfWriter::new(&doc, WriterConfig::new());
        writer.setup().unwrap();
        writer.enqueue_roots().unwrap();
        let first = writer.renumbered(ObjectRef::new(3, 0));
        writer.enqueue_roots().unwrap();
        assert_eq!(writer.renumbered(ObjectRef::new(3, 0)), first);
        assert_eq!(writer.queue.len(), 8);
    }

    #[test]
    fn test_cycle_does_not_loop() {
        let mut doc = Document::new("1.4");
        doc.add_object(
            ObjectRef::new(1, 0),
            Object::dict(vec![("Type", Object::name("Catalog")), ("Next", Object::reference(2, 0))]),
        );
        doc.add_object(
            ObjectRef::new(2, 0),
            Object::dict(vec![("Prev", Object::reference(1, 0))]),
        );
        let mut trailer = crate::object::Dict::new();
        trailer.insert("Root".to_string(), Object::reference(1, 0));
        doc.set_trailer(trailer);

        let mut writer = PdfWriter::new(&doc, WriterConfig::new());
        writer.setup().unwrap();
        writer.enqueue_roots().unwrap();
        assert_eq!(writer.renumbered(ObjectRef::new(1, 0)), Some(1));
        assert_eq!(writer.renumbered(ObjectRef::new(2, 0)), Some(2));
    }

    #[test]
    fn test_indirect_length_reservation() {
        let doc = three_page_doc();
        let mut config = WriterConfig::new();
        config.direct_stream_lengths(false);
        let mut writer = PdfWriter::new(&doc, config);
        writer.setup().unwrap();
        writer.enqueue_roots().unwrap();
        // Each of the three content streams reserves a companion number.
        assert_eq!(writer.stream_length_ids.len(), 3);
        // Companion ids never collide with object ids.
        let all: HashSet<u32> = writer
            .obj
            .values()
            .filter(|e| e.renumber > 0)
            .map(|e| e.renumber as u32)
            .chain(writer.stream_length_ids.values().copied())
            .collect();
        assert_eq!(all.len(), 11);
    }

    #[test]
    fn test_static_id_value() {
        let doc = three_page_doc();
        let mut config = WriterConfig::new();
        config.static_id(true);
        let mut writer = PdfWriter::new(&doc, config);
        writer.generate_id().unwrap();
        assert_eq!(writer.id1, STATIC_ID.to_vec());
        assert_eq!(writer.id2, STATIC_ID.to_vec());
    }

    #[test]
    fn test_version_minimum_for_object_streams() {
        let mut doc = three_page_doc();
        doc.add_object_in_stream(ObjectRef::new(20, 0), Object::Integer(1), 19, 0);
        let mut writer = PdfWriter::new(&doc, WriterConfig::new());
        writer.setup().unwrap();
        assert_eq!(writer.final_version, (1, 5));
    }

    #[test]
    fn test_object_stream_membership_restrictions() {
        let mut doc = three_page_doc();
        doc.add_object(ObjectRef::new(20, 5), Object::Integer(1)); // gen != 0

        // Plain generate: everything but streams and the gen-5 object.
        let mut config = WriterConfig::new();
        config.object_streams(crate::writer::config::ObjectStreamMode::Generate);
        let mut writer = PdfWriter::new(&doc, config);
        writer.setup().unwrap();
        assert!(writer.ostream_marked.contains(&ObjectRef::new(1, 0)));
        assert!(!writer.ostream_marked.contains(&ObjectRef::new(4, 0))); // stream
        assert!(!writer.ostream_marked.contains(&ObjectRef::new(20, 5)));

        // Encrypting excludes the catalog.
        let mut config = WriterConfig::new();
        config.object_streams(crate::writer::config::ObjectStreamMode::Generate);
        config
            .encrypt(crate::writer::config::EncryptionSpec::R3 {
                user_password: b"u".to_vec(),
                owner_password: b"o".to_vec(),
                permissions: crate::encryption::Permissions::all(),
            })
            .unwrap();
        let mut writer = PdfWriter::new(&doc, config);
        writer.setup().unwrap();
        assert!(!writer.ostream_marked.contains(&ObjectRef::new(1, 0)));
        assert!(writer.ostream_marked.contains(&ObjectRef::new(2, 0)));

        // Linearizing excludes page dictionaries as well.
        let mut config = WriterConfig::new();
        config.object_streams(crate::writer::config::ObjectStreamMode::Generate);
        config.linearize(true).unwrap();
        let mut writer = PdfWriter::new(&doc, config);
        writer.setup().unwrap();
        assert!(!writer.ostream_marked.contains(&ObjectRef::new(1, 0)));
        assert!(!writer.ostream_marked.contains(&ObjectRef::new(3, 0)));
        assert!(writer.ostream_marked.contains(&ObjectRef::new(2, 0)));
    }

    #[test]
    fn test_forced_version_garbage_silently_ignored() {
        let doc = three_page_doc();
        let mut config = WriterConfig::new();
        config.forced_pdf_version("not-a-version", 0);
        let mut writer = PdfWriter::new(&doc, config);
        writer.setup().unwrap();
        assert_eq!(writer.final_version, (1, 5));
    }
}
