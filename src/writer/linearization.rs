//! Linearized ("fast web view") output.
//!
//! Linearization reorders objects into nine parts so a viewer can render
//! the first page from a prefix of the file:
//!
//! 1. header, 2. linearization parameter dictionary, 3. first-page
//! cross-reference stream, 4. catalog and document-level objects, 5. hint
//! stream, 6. first-page objects, 7. remaining pages, 8. objects shared
//! between pages, 9. everything else, then the main cross-reference stream.
//!
//! The file is written twice. Pass 1 lays everything out with placeholder
//! values and records offsets; the hint stream is then built from those
//! offsets; pass 2 rewrites the file with real values, shifting recorded
//! offsets past the hint-stream slot by the hint object's length. Slots
//! whose content changes between passes (the linearization dictionary and
//! both cross-reference streams) carry reserved padding that pass 2
//! reconciles exactly.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::decoders::DecodeLevel;
use crate::encryption::rc4::rc4_crypt;
use crate::error::{Error, Result};
use crate::object::{Dict, Object, ObjectRef};
use crate::pipeline::{flate_compress, StreamFilter};
use crate::writer::hints::{build_hint_tables, HintInputs};
use crate::writer::pdf_writer::{NewObjEntry, PdfWriter, QueueItem, XrefEntry};
use crate::writer::xref::XrefStreamSpec;

/// How an indirect object is reached from the document root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum ObjUser {
    /// The document catalog itself.
    Root,
    /// Value of a trailer key.
    TrailerKey(String),
    /// Value of a catalog key.
    RootKey(String),
    /// Reachable from page N.
    Page(usize),
    /// Reachable from page N's thumbnail.
    Thumb(usize),
}

/// Classified object sets, ordered for writing.
pub(crate) struct LinParts {
    pub part4: Vec<ObjectRef>,
    pub part6: Vec<ObjectRef>,
    pub part7: Vec<Vec<ObjectRef>>,
    pub part8: Vec<ObjectRef>,
    pub part9: Vec<ObjectRef>,
    pub users: HashMap<ObjectRef, BTreeSet<ObjUser>>,
}

/// Numbering and item layout for one linearized write.
pub(crate) struct LinLayout {
    pub lin_id: u32,
    pub first_xref_id: u32,
    pub main_xref_id: u32,
    pub hint_id: u32,
    pub enc_id: u32,
    pub first_page_id: u32,
    pub first_half_first: u32,
    pub size: u32,
    pub second_count: u32,
    pub part4_items: Vec<QueueItem>,
    pub part6_items: Vec<QueueItem>,
    pub second_items: Vec<QueueItem>,
    /// Top-level item ids per page (page 0 is the part 6 span).
    pub page_item_ids: Vec<Vec<u32>>,
    pub part6_ids: Vec<u32>,
    pub part8_ids: Vec<u32>,
    pub outline_ids: Vec<u32>,
    /// Shared-object identifiers referenced by each page.
    pub page_shared: Vec<Vec<u32>>,
    pub npages: usize,
}

/// Offsets and slot sizes recorded by pass 1.
#[derive(Debug, Default)]
pub(crate) struct LinRecord {
    pub new_obj: BTreeMap<u32, NewObjEntry>,
    pub lin_slot: u64,
    pub first_xref_offset: u64,
    pub first_xref_slot: u64,
    pub hint_slot: u64,
    pub part6_end: u64,
    pub main_xref_offset: u64,
    pub file_size: u64,
}

impl LinRecord {
    fn offset_of(&self, id: u32) -> u64 {
        match self.new_obj.get(&id) {
            Some(NewObjEntry {
                xref: XrefEntry::Uncompressed { offset },
                ..
            }) => *offset,
            _ => 0,
        }
    }

    fn length_of(&self, id: u32) -> u64 {
        self.new_obj.get(&id).map(|e| e.length).unwrap_or(0)
    }
}

const LIN_DICT_PAD: usize = 200;

fn xref_stream_pad(body_len: usize) -> usize {
    16 + 5 * body_len.div_ceil(16384)
}

impl PdfWriter<'_> {
    /// Which rewritten stream keys to ignore while computing object users:
    /// 1 skips /Length, 2 also skips /Filter and /DecodeParms.
    fn skip_stream_parameters(&self) -> u8 {
        if self.config.compress_streams || self.config.decode_level > DecodeLevel::None {
            2
        } else {
            1
        }
    }

    /// Map every reachable indirect object to the set of users that reach
    /// it.
    pub(crate) fn compute_object_users(&self) -> Result<HashMap<ObjectRef, BTreeSet<ObjUser>>> {
        let doc = self.doc;
        let skip = self.skip_stream_parameters();
        let mut users: HashMap<ObjectRef, BTreeSet<ObjUser>> = HashMap::new();
        let mut seen: HashSet<(ObjectRef, ObjUser)> = HashSet::new();

        fn traverse(
            doc: &crate::document::Document,
            obj: &Object,
            user: &ObjUser,
            skip: u8,
            users: &mut HashMap<ObjectRef, BTreeSet<ObjUser>>,
            seen: &mut HashSet<(ObjectRef, ObjUser)>,
        ) {
            match obj {
                Object::Reference(r) => {
                    if doc.get(*r).is_none() {
                        return;
                    }
                    if !seen.insert((*r, user.clone())) {
                        return;
                    }
                    users.entry(*r).or_default().insert(user.clone());
                    traverse(doc, doc.resolve_ref(*r), user, skip, users, seen);
                }
                Object::Array(items) => {
                    for item in items {
                        traverse(doc, item, user, skip, users, seen);
                    }
                }
                Object::Dictionary(dict) => {
                    for (key, value) in dict {
                        // Upward links would drag whole sibling subtrees
                        // into every user set.
                        if key == "Parent" {
                            continue;
                        }
                        traverse(doc, value, user, skip, users, seen);
                    }
                }
                Object::Stream { dict, .. } => {
                    for (key, value) in dict {
                        if key == "Parent" {
                            continue;
                        }
                        if key == "Length" && skip >= 1 {
                            continue;
                        }
                        if (key == "Filter" || key == "DecodeParms") && skip >= 2 {
                            continue;
                        }
                        traverse(doc, value, user, skip, users, seen);
                    }
                }
                _ => {}
            }
        }

        let trailer = self.filtered_trailer();
        for (key, value) in &trailer {
            if key == "Root" {
                // The root user tags the catalog itself; its content is
                // covered by the per-key traversal below.
                if let Some(r) = value.as_reference() {
                    users.entry(r).or_default().insert(ObjUser::Root);
                }
                continue;
            }
            let user = ObjUser::TrailerKey(key.clone());
            traverse(doc, value, &user, skip, &mut users, &mut seen);
        }

        let root = doc.root_ref()?;
        if let Some(root_dict) = doc.get(root).and_then(Object::as_dict) {
            for (key, value) in root_dict {
                if key == "Pages" {
                    // The pages subtree is tagged page by page; tagging it
                    // from the catalog would mark every page object shared.
                    continue;
                }
                let user = ObjUser::RootKey(key.clone());
                traverse(doc, value, &user, skip, &mut users, &mut seen);
            }
        }

        for (i, &page) in doc.pages().iter().enumerate() {
            users.entry(page).or_default().insert(ObjUser::Page(i));
            if let Some(page_dict) = doc.get(page).and_then(Object::as_dict) {
                for (key, value) in page_dict {
                    if key == "Parent" {
                        continue;
                    }
                    let user = if key == "Thumb" {
                        ObjUser::Thumb(i)
                    } else {
                        ObjUser::Page(i)
                    };
                    traverse(doc, value, &user, skip, &mut users, &mut seen);
                }
            }
        }

        // Pages-tree nodes are written in part 9; tag them here so they are
        // accounted for without dragging the subtree into one user set.
        for node in self.pages_tree_nodes() {
            users
                .entry(node)
                .or_default()
                .insert(ObjUser::RootKey("Pages".to_string()));
        }

        Ok(users)
    }

    fn pages_tree_nodes(&self) -> Vec<ObjectRef> {
        let doc = self.doc;
        let mut nodes = Vec::new();
        let mut visited = HashSet::new();
        let Ok(root) = doc.root_ref() else { return nodes };
        let Some(pages_ref) = doc.get(root).and_then(|o| o.get("Pages")).and_then(Object::as_reference)
        else {
            return nodes;
        };

        let mut stack = vec![pages_ref];
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            if self.page_index_of.contains_key(&node) {
                continue;
            }
            let Some(dict) = doc.get(node) else { continue };
            nodes.push(node);
            if let Some(kids) = dict.get("Kids").map(|k| doc.resolve(k)).and_then(Object::as_array) {
                // Reverse so the stack pops kids in document order.
                for kid in kids.iter().rev() {
                    if let Some(r) = kid.as_reference() {
                        stack.push(r);
                    }
                }
            }
        }
        nodes
    }

    /// Classify every reachable object into its linearization part.
    pub(crate) fn classify_linearization(&self) -> Result<LinParts> {
        let doc = self.doc;
        let npages = doc.pages().len();
        if npages == 0 {
            return Err(Error::InvalidPdf(
                "cannot linearize a document with no pages".to_string(),
            ));
        }
        let users = self.compute_object_users()?;
        let root = doc.root_ref()?;
        let tree_nodes = self.pages_tree_nodes();
        let tree_set: HashSet<ObjectRef> = tree_nodes.iter().copied().collect();

        let part4_root_keys = [
            "ViewerPreferences",
            "PageMode",
            "Threads",
            "OpenAction",
            "AcroForm",
        ];
        let page_mode_outlines = doc
            .get(root)
            .and_then(|o| o.get("PageMode"))
            .and_then(Object::as_name)
            == Some("UseOutlines");

        let mut part4_rest: BTreeSet<ObjectRef> = BTreeSet::new();
        let mut p6_private: BTreeSet<ObjectRef> = BTreeSet::new();
        let mut p6_shared: BTreeSet<ObjectRef> = BTreeSet::new();
        let mut page_private: Vec<BTreeSet<ObjectRef>> = vec![BTreeSet::new(); npages];
        let mut part8: BTreeSet<ObjectRef> = BTreeSet::new();
        let mut thumbs_private: BTreeSet<(usize, ObjectRef)> = BTreeSet::new();
        let mut thumbs_shared: BTreeSet<ObjectRef> = BTreeSet::new();
        let mut outlines: BTreeSet<ObjectRef> = BTreeSet::new();
        let mut p9_rest: BTreeSet<ObjectRef> = BTreeSet::new();

        let sorted: BTreeMap<ObjectRef, &BTreeSet<ObjUser>> =
            users.iter().map(|(k, v)| (*k, v)).collect();
        for (r, uset) in sorted {
            if r == root || tree_set.contains(&r) || self.page_index_of.contains_key(&r) {
                continue;
            }

            let in_part4 = uset.iter().any(|u| match u {
                ObjUser::RootKey(k) => part4_root_keys.contains(&k.as_str()),
                ObjUser::TrailerKey(k) => k == "Encrypt",
                _ => false,
            });
            if in_part4 {
                part4_rest.insert(r);
                continue;
            }

            let only_outlines = uset
                .iter()
                .all(|u| matches!(u, ObjUser::RootKey(k) if k == "Outlines"));
            if only_outlines {
                outlines.insert(r);
                continue;
            }

            let pages_of: BTreeSet<usize> = uset
                .iter()
                .filter_map(|u| match u {
                    ObjUser::Page(i) => Some(*i),
                    _ => None,
                })
                .collect();
            let thumbs_of: BTreeSet<usize> = uset
                .iter()
                .filter_map(|u| match u {
                    ObjUser::Thumb(i) => Some(*i),
                    _ => None,
                })
                .collect();
            let has_other = uset.iter().any(|u| {
                matches!(u, ObjUser::Root | ObjUser::RootKey(_) | ObjUser::TrailerKey(_))
            });

            if pages_of.contains(&0) {
                if pages_of.len() == 1 && thumbs_of.is_empty() && !has_other {
                    p6_private.insert(r);
                } else {
                    p6_shared.insert(r);
                }
            } else if pages_of.len() == 1 && thumbs_of.is_empty() && !has_other {
                page_private[*pages_of.iter().next().expect("one page")].insert(r);
            } else if pages_of.len() > 1 {
                part8.insert(r);
            } else if thumbs_of.len() == 1 && pages_of.is_empty() && !has_other {
                thumbs_private.insert((*thumbs_of.iter().next().expect("one thumb"), r));
            } else if thumbs_of.len() > 1 {
                thumbs_shared.insert(r);
            } else {
                p9_rest.insert(r);
            }
        }

        let mut part4 = vec![root];
        part4.extend(part4_rest.iter().copied());

        let pages = doc.pages();
        let mut part6 = vec![pages[0]];
        part6.extend(p6_private.iter().copied());
        part6.extend(p6_shared.iter().copied());
        if page_mode_outlines {
            part6.extend(outlines.iter().copied());
        }

        let mut part7 = Vec::with_capacity(npages.saturating_sub(1));
        for (k, &page) in pages.iter().enumerate().skip(1) {
            let mut seg = vec![page];
            seg.extend(page_private[k].iter().copied());
            part7.push(seg);
        }

        let part8_vec: Vec<ObjectRef> = part8.iter().copied().collect();

        let mut part9: Vec<ObjectRef> = tree_nodes;
        part9.extend(thumbs_private.iter().map(|(_, r)| *r));
        part9.extend(thumbs_shared.iter().copied());
        if !page_mode_outlines {
            part9.extend(outlines.iter().copied());
        }
        part9.extend(p9_rest.iter().copied());

        let placed = part4.len()
            + part6.len()
            + part7.iter().map(Vec::len).sum::<usize>()
            + part8_vec.len()
            + part9.len();
        if placed != users.len() {
            return Err(Error::Internal(format!(
                "linearization classification placed {} of {} objects; \
                 is the catalog inside the pages tree?",
                placed,
                users.len()
            )));
        }

        Ok(LinParts {
            part4,
            part6,
            part7,
            part8: part8_vec,
            part9,
            users,
        })
    }

    // ------------------------------------------------------------------
    // Layout and numbering
    // ------------------------------------------------------------------

    /// Convert a part's object list into write items, regrouping marked
    /// objects into per-part object streams of at most 100 members.
    ///
    /// The second return value maps each object of `part` to the index of
    /// the item that carries it (members map to their stream's item).
    fn lin_items(&mut self, part: &[ObjectRef]) -> (Vec<QueueItem>, Vec<usize>) {
        let marked: Vec<ObjectRef> = part
            .iter()
            .copied()
            .filter(|r| self.ostream_marked.contains(r))
            .collect();
        let mut groups: std::collections::VecDeque<u32> = marked
            .chunks(100)
            .map(|chunk| self.install_ostream_group(chunk.to_vec()))
            .collect();

        let mut items = Vec::new();
        let mut item_of = Vec::with_capacity(part.len());
        let mut member_count = 0usize;
        let mut stream_item = 0usize;
        for &r in part {
            if self.ostream_marked.contains(&r) {
                if member_count % 100 == 0 {
                    stream_item = items.len();
                    items.push(QueueItem::ObjectStream(
                        groups.pop_front().expect("group allocated"),
                    ));
                }
                member_count += 1;
                item_of.push(stream_item);
            } else {
                item_of.push(items.len());
                items.push(QueueItem::Object(r));
            }
        }
        (items, item_of)
    }

    fn assign_lin_item_numbers(&mut self, items: &[QueueItem]) -> Result<Vec<u32>> {
        let mut item_ids = Vec::with_capacity(items.len());
        for item in items {
            match item {
                QueueItem::Object(r) => {
                    let id = self.assign_next_id();
                    self.obj
                        .get_mut(r)
                        .ok_or_else(|| Error::Internal(format!("object {} missing from table", r)))?
                        .renumber = id as i64;
                    item_ids.push(id);
                }
                QueueItem::ObjectStream(group) => {
                    let id = self.assign_next_id();
                    self.ostream_new_ids.insert(*group, id);
                    self.assign_compressed_object_numbers(*group, id)?;
                    item_ids.push(id);
                }
                QueueItem::Synthetic(_) => {
                    return Err(Error::Internal(
                        "synthetic object in linearized layout".to_string(),
                    ));
                }
            }
        }
        Ok(item_ids)
    }

    fn build_lin_layout(&mut self, parts: &LinParts) -> Result<LinLayout> {
        // Make sure every classified object has a table entry to number.
        for r in parts
            .part4
            .iter()
            .chain(parts.part6.iter())
            .chain(parts.part7.iter().flatten())
            .chain(parts.part8.iter())
            .chain(parts.part9.iter())
        {
            self.obj.entry(*r).or_insert(crate::writer::pdf_writer::ObjTableEntry {
                renumber: 0,
                object_stream: 0,
                gen: r.gen,
            });
        }

        let npages = self.doc.pages().len();
        let mut page_item_ids: Vec<Vec<u32>> = vec![Vec::new(); npages];

        // Second half first: parts 7, 8, 9 take the low numbers so both
        // cross-reference streams cover contiguous ranges.
        let mut second_items = Vec::new();
        let part7_segments: Vec<Vec<QueueItem>> = parts
            .part7
            .iter()
            .map(|seg| self.lin_items(seg).0)
            .collect();
        for (k, seg_items) in part7_segments.iter().enumerate() {
            let ids = self.assign_lin_item_numbers(seg_items)?;
            page_item_ids[k + 1] = ids;
            second_items.extend(seg_items.iter().copied());
        }
        let (part8_items, part8_item_of) = self.lin_items(&parts.part8);
        let part8_ids = self.assign_lin_item_numbers(&part8_items)?;
        second_items.extend(part8_items.iter().copied());
        let (part9_items, _) = self.lin_items(&parts.part9);
        self.assign_lin_item_numbers(&part9_items)?;
        second_items.extend(part9_items.iter().copied());

        let second_count = self.next_objid - 1;
        let main_xref_id = self.assign_next_id();
        let lin_id = self.assign_next_id();
        let first_xref_id = self.assign_next_id();

        let (part4_items, _) = self.lin_items(&parts.part4);
        self.assign_lin_item_numbers(&part4_items)?;
        let enc_id = if self.encryption.is_some() {
            self.assign_next_id()
        } else {
            0
        };
        let hint_id = self.assign_next_id();
        let (part6_items, _) = self.lin_items(&parts.part6);
        let part6_ids = self.assign_lin_item_numbers(&part6_items)?;
        page_item_ids[0] = part6_ids.clone();

        let first_page_id = *part6_ids
            .first()
            .ok_or_else(|| Error::Internal("first page section is empty".to_string()))?;
        let size = self.next_objid;

        let outline_ids: Vec<u32> = parts
            .users
            .iter()
            .filter(|(_, uset)| {
                uset.iter()
                    .all(|u| matches!(u, ObjUser::RootKey(k) if k == "Outlines"))
            })
            .filter_map(|(r, _)| self.renumbered(*r))
            .collect::<BTreeSet<u32>>()
            .into_iter()
            .collect();

        // Which shared groups each page references: part 6 entries first,
        // then part 8, indexed in that order.
        let mut page_shared: Vec<Vec<u32>> = vec![Vec::new(); npages];
        for (pos, r) in parts.part8.iter().enumerate() {
            let Some(uset) = parts.users.get(r) else { continue };
            let item = part8_item_of[pos];
            for user in uset {
                if let ObjUser::Page(k) = user {
                    if *k > 0 {
                        page_shared[*k].push((part6_ids.len() + item) as u32);
                    }
                }
            }
        }
        for shared in &mut page_shared {
            shared.sort_unstable();
            shared.dedup();
        }

        self.encryption_dict_id = enc_id;

        Ok(LinLayout {
            lin_id,
            first_xref_id,
            main_xref_id,
            hint_id,
            enc_id,
            first_page_id,
            first_half_first: lin_id,
            size,
            second_count,
            part4_items,
            part6_items,
            second_items,
            page_item_ids,
            part6_ids,
            part8_ids,
            outline_ids,
            page_shared,
            npages,
        })
    }

    // ------------------------------------------------------------------
    // Two-pass writing
    // ------------------------------------------------------------------

    /// Entry point for the linearized path.
    pub(crate) fn write_linearized(mut self) -> Result<Vec<u8>> {
        if self.config.preserve_unreferenced {
            log::warn!("ignoring preserve_unreferenced for linearized output");
        }
        let parts = self.classify_linearization()?;
        let layout = self.build_lin_layout(&parts)?;

        // Pass 1.
        if self.config.deterministic_id {
            self.defer_id = true;
            self.pipeline.activate_md5()?;
        }
        let mut rec = LinRecord::default();
        self.run_lin_pass(1, &layout, &mut rec, None, 0)?;
        rec.new_obj = self.new_obj.clone();
        if let Some(path) = self.config.linearize_pass1.clone() {
            std::fs::write(path, self.pipeline.bottom_bytes())?;
        }
        if self.config.deterministic_id {
            self.defer_id = false;
            self.id_generated = false;
            self.id2 = self.pipeline.raw_digest()?.to_vec();
            self.id1 = self.input_id1_or(&self.id2.clone());
            self.id_generated = true;
        }

        // Hint stream, iterated until its own length stabilizes.
        let mut hint_len = 0u64;
        let mut hint_bytes = Vec::new();
        for _ in 0..10 {
            hint_bytes = self.build_hint_object(&layout, &rec, hint_len)?;
            if hint_bytes.len() as u64 == hint_len {
                break;
            }
            hint_len = hint_bytes.len() as u64;
        }
        if hint_bytes.len() as u64 != hint_len {
            return Err(Error::Internal(
                "hint stream length failed to converge".to_string(),
            ));
        }

        // Pass 2.
        self.pipeline.reset();
        self.run_lin_pass(2, &layout, &mut rec, Some(&hint_bytes), hint_len)?;
        self.pipeline.into_bytes()
    }

    pub(crate) fn input_id1_or(&self, fallback: &[u8]) -> Vec<u8> {
        self.doc
            .trailer()
            .get("ID")
            .map(|id| self.doc.resolve(id))
            .and_then(Object::as_array)
            .and_then(|a| a.first())
            .and_then(Object::as_string)
            .map(|s| s.to_vec())
            .unwrap_or_else(|| fallback.to_vec())
    }

    fn lin_dict_text(
        &mut self,
        layout: &LinLayout,
        file_size: u64,
        hint_offset: u64,
        hint_len: u64,
        part6_end: u64,
        main_xref: u64,
    ) -> Result<Vec<u8>> {
        let mut dict = Dict::new();
        dict.insert("Linearized".to_string(), Object::Integer(1));
        dict.insert("L".to_string(), Object::Integer(file_size as i64));
        dict.insert(
            "H".to_string(),
            Object::Array(vec![
                Object::Integer(hint_offset as i64),
                Object::Integer(hint_len as i64),
            ]),
        );
        dict.insert("O".to_string(), Object::Integer(layout.first_page_id as i64));
        dict.insert("E".to_string(), Object::Integer(part6_end as i64));
        dict.insert("N".to_string(), Object::Integer(layout.npages as i64));
        dict.insert("T".to_string(), Object::Integer(main_xref as i64));

        let activation = self.pipeline.activate_capture();
        self.unparse_object(
            &Object::Dictionary(dict),
            0,
            crate::writer::object_serializer::UnparseFlags::NO_ENCRYPTION,
            None,
        )?;
        self.pipeline
            .pop(activation)?
            .ok_or_else(|| Error::Internal("linearization dictionary capture lost".to_string()))
    }

    fn write_pad(&mut self, count: usize) -> Result<()> {
        const SPACES: [u8; 64] = [b' '; 64];
        let mut remaining = count;
        while remaining > 0 {
            let chunk = remaining.min(SPACES.len());
            self.pipeline.write_bytes(&SPACES[..chunk])?;
            remaining -= chunk;
        }
        Ok(())
    }

    /// Pass-2 offset of an object: pass-1 offset, shifted past the hint
    /// slot.
    fn adjusted_offset(&self, rec: &LinRecord, layout: &LinLayout, id: u32, hint_len: u64) -> u64 {
        if id == layout.hint_id {
            return rec.hint_slot;
        }
        let offset = rec.offset_of(id);
        if offset >= rec.hint_slot {
            offset + hint_len
        } else {
            offset
        }
    }

    fn first_xref_entries(
        &self,
        rec: &LinRecord,
        layout: &LinLayout,
        pass: u8,
        hint_len: u64,
    ) -> Vec<XrefEntry> {
        let first = layout.first_half_first;
        (first..layout.size)
            .map(|id| {
                if id == layout.first_xref_id {
                    return XrefEntry::Uncompressed {
                        offset: rec.first_xref_offset,
                    };
                }
                if id == layout.hint_id {
                    return XrefEntry::Uncompressed {
                        offset: rec.hint_slot,
                    };
                }
                match self.new_obj.get(&id).map(|e| e.xref) {
                    Some(XrefEntry::InStream { stream, index }) => {
                        XrefEntry::InStream { stream, index }
                    }
                    _ if pass == 1 => XrefEntry::Uncompressed { offset: 0 },
                    _ => XrefEntry::Uncompressed {
                        offset: self.adjusted_offset(rec, layout, id, hint_len),
                    },
                }
            })
            .collect()
    }

    fn run_lin_pass(
        &mut self,
        pass: u8,
        layout: &LinLayout,
        rec: &mut LinRecord,
        hint_bytes: Option<&[u8]>,
        hint_len: u64,
    ) -> Result<()> {
        let compress = self.config.compress_streams;

        self.write_header()?;

        // Part 2: linearization parameter dictionary in a fixed-size slot.
        let lin_start = self.pipeline.count();
        self.new_obj.insert(
            layout.lin_id,
            NewObjEntry {
                xref: XrefEntry::Uncompressed { offset: lin_start },
                length: 0,
            },
        );
        let prefix = format!("{} 0 obj\n", layout.lin_id);
        let suffix = "\nendobj\n";
        if pass == 1 {
            let text = self.lin_dict_text(layout, 0, 0, 0, 0, 0)?;
            self.pipeline.write_string(&prefix)?;
            self.pipeline.write_bytes(&text)?;
            self.write_pad(LIN_DICT_PAD)?;
            self.pipeline.write_string(suffix)?;
            rec.lin_slot = self.pipeline.count() - lin_start;
        } else {
            let text = self.lin_dict_text(
                layout,
                rec.file_size + hint_len,
                rec.hint_slot,
                hint_len,
                rec.part6_end + hint_len,
                rec.main_xref_offset + hint_len,
            )?;
            let fixed = prefix.len() + text.len() + suffix.len();
            let pad = (rec.lin_slot as usize).checked_sub(fixed).ok_or_else(|| {
                Error::Internal(
                    "insufficient padding reserved for linearization dictionary".to_string(),
                )
            })?;
            self.pipeline.write_string(&prefix)?;
            self.pipeline.write_bytes(&text)?;
            self.write_pad(pad)?;
            self.pipeline.write_string(suffix)?;
        }

        // Part 3: first-page cross-reference stream in a padded slot.
        let first_xref_start = self.pipeline.count();
        if pass == 1 {
            rec.first_xref_offset = first_xref_start;
        } else if first_xref_start != rec.first_xref_offset {
            return Err(Error::Internal(format!(
                "pass 2 first cross-reference offset moved: {} != {}",
                first_xref_start, rec.first_xref_offset
            )));
        }
        let entries = self.first_xref_entries(rec, layout, pass, hint_len);
        let trailer = self.final_trailer(layout.size, None)?;
        let prev = if pass == 1 {
            // Placeholder with the widest offset pass 2 could need.
            9_999_999_999
        } else {
            rec.main_xref_offset + hint_len
        };
        let spec = XrefStreamSpec {
            id: layout.first_xref_id,
            first: layout.first_half_first,
            entries,
            size: layout.size,
            prev: Some(prev),
            trailer,
            include_index: true,
            compress,
            f1_override: Some(4),
            skip_compression: false,
        };
        self.write_xref_stream_slot(&spec, pass, first_xref_start, &mut rec.first_xref_slot)?;
        self.new_obj.insert(
            layout.first_xref_id,
            NewObjEntry {
                xref: XrefEntry::Uncompressed {
                    offset: first_xref_start,
                },
                length: self.pipeline.count() - first_xref_start,
            },
        );
        self.pipeline.write_string("startxref\n0\n%%EOF\n")?;

        // Part 4.
        for &item in &layout.part4_items {
            self.write_object_item(item)?;
        }
        self.write_encryption_dict()?;

        // Part 5: hint stream slot.
        let hint_start = self.pipeline.count();
        if pass == 1 {
            rec.hint_slot = hint_start;
        } else {
            if hint_start != rec.hint_slot {
                return Err(Error::Internal(format!(
                    "pass 2 hint slot moved: {} != {}",
                    hint_start, rec.hint_slot
                )));
            }
            let bytes = hint_bytes.expect("pass 2 has hint bytes");
            self.pipeline.write_bytes(bytes)?;
            self.new_obj.insert(
                layout.hint_id,
                NewObjEntry {
                    xref: XrefEntry::Uncompressed { offset: hint_start },
                    length: bytes.len() as u64,
                },
            );
        }

        // Part 6.
        for &item in &layout.part6_items {
            self.write_object_item(item)?;
        }
        if pass == 1 {
            rec.part6_end = self.pipeline.count();
        } else if self.pipeline.count() != rec.part6_end + hint_len {
            return Err(Error::Internal(format!(
                "pass 2 first-page section ends at {} instead of {}",
                self.pipeline.count(),
                rec.part6_end + hint_len
            )));
        }

        // Parts 7-9.
        for &item in &layout.second_items {
            self.write_object_item(item)?;
        }

        // Part 11: main cross-reference stream in a padded slot.
        let main_start = self.pipeline.count();
        if pass == 1 {
            rec.main_xref_offset = main_start;
        } else if main_start != rec.main_xref_offset + hint_len {
            return Err(Error::Internal(format!(
                "pass 2 main cross-reference offset moved: {} != {}",
                main_start,
                rec.main_xref_offset + hint_len
            )));
        }
        self.new_obj.insert(
            layout.main_xref_id,
            NewObjEntry {
                xref: XrefEntry::Uncompressed { offset: main_start },
                length: 0,
            },
        );
        let main_count = layout.second_count + 2;
        let entries: Vec<XrefEntry> = (0..main_count)
            .map(|id| {
                if id == 0 {
                    XrefEntry::Free
                } else if id == layout.main_xref_id {
                    XrefEntry::Uncompressed { offset: main_start }
                } else {
                    self.new_obj
                        .get(&id)
                        .map(|e| e.xref)
                        .unwrap_or(XrefEntry::Free)
                }
            })
            .collect();
        let trailer = self.final_trailer(layout.size, None)?;
        let spec = XrefStreamSpec {
            id: layout.main_xref_id,
            first: 0,
            entries,
            size: layout.size,
            prev: None,
            trailer,
            include_index: true,
            compress,
            f1_override: Some(4),
            skip_compression: false,
        };
        if pass == 1 {
            let mut slot = 0u64;
            self.write_xref_stream_slot(&spec, pass, main_start, &mut slot)?;
            self.main_xref_slot = slot;
        } else {
            let mut slot = self.main_xref_slot;
            self.write_xref_stream_slot(&spec, pass, main_start, &mut slot)?;
        }

        self.pipeline
            .write_string(&format!("startxref\n{}\n%%EOF\n", rec.first_xref_offset))?;

        if pass == 1 {
            rec.file_size = self.pipeline.count();
        } else if self.pipeline.count() != rec.file_size + hint_len {
            return Err(Error::Internal(format!(
                "pass 2 produced {} bytes instead of {}",
                self.pipeline.count(),
                rec.file_size + hint_len
            )));
        }
        Ok(())
    }

    /// Write a cross-reference stream into a size-reconciled slot.
    ///
    /// Pass 1 writes the body uncompressed (while the dictionary already
    /// claims its final filters) and reserves worst-case Flate expansion
    /// after it; pass 2 serializes into a buffer and pads to the recorded
    /// slot exactly.
    fn write_xref_stream_slot(
        &mut self,
        spec: &XrefStreamSpec,
        pass: u8,
        start: u64,
        slot: &mut u64,
    ) -> Result<()> {
        if pass == 1 {
            let row = 1 + 4 + xref_f2(&spec.entries);
            let body_len = spec.entries.len() * row;
            let skip = XrefStreamSpec {
                skip_compression: true,
                ..clone_spec(spec)
            };
            self.write_xref_stream_object(&skip)?;
            self.write_pad(xref_stream_pad(body_len))?;
            *slot = self.pipeline.count() - start;
        } else {
            let activation = self.pipeline.activate_capture();
            self.write_xref_stream_object(spec)?;
            let bytes = self
                .pipeline
                .pop(activation)?
                .ok_or_else(|| Error::Internal("cross-reference capture lost".to_string()))?;
            let pad = (*slot as usize).checked_sub(bytes.len()).ok_or_else(|| {
                Error::Internal(
                    "insufficient padding reserved for cross-reference stream".to_string(),
                )
            })?;
            self.pipeline.write_bytes(&bytes)?;
            self.write_pad(pad)?;
        }
        Ok(())
    }

    /// Serialize the complete hint stream object from pass-1 offsets,
    /// shifted by the current hint length guess.
    fn build_hint_object(
        &mut self,
        layout: &LinLayout,
        rec: &LinRecord,
        hint_len: u64,
    ) -> Result<Vec<u8>> {
        let mut offsets: HashMap<u32, u64> = HashMap::new();
        let mut lengths: HashMap<u32, u64> = HashMap::new();
        for (&id, entry) in &rec.new_obj {
            if let XrefEntry::Uncompressed { .. } = entry.xref {
                offsets.insert(id, self.adjusted_offset(rec, layout, id, hint_len));
                lengths.insert(id, rec.length_of(id));
            }
        }

        let inputs = HintInputs {
            page_item_ids: &layout.page_item_ids,
            page_shared: &layout.page_shared,
            part6_ids: &layout.part6_ids,
            part8_ids: &layout.part8_ids,
            outline_ids: &layout.outline_ids,
            first_page_id: layout.first_page_id,
            offsets: &offsets,
            lengths: &lengths,
        };
        let tables = build_hint_tables(&inputs)?;

        let compress = self.config.compress_streams;
        let data = if compress {
            flate_compress(&tables.data)?
        } else {
            tables.data.clone()
        };
        let (data, body_len) = match self.encryption.clone() {
            Some(state) => {
                let encrypted = match state.stream_filter(layout.hint_id, 0) {
                    StreamFilter::Rc4 { key } => rc4_crypt(&key, &data),
                    StreamFilter::Aes { key, iv } => {
                        crate::encryption::aes::encrypt_cbc(&key, &iv, &data)?
                    }
                    _ => data,
                };
                let len = encrypted.len() as u64;
                (encrypted, len)
            }
            None => {
                let len = data.len() as u64;
                (data, len)
            }
        };

        let mut dict = Dict::new();
        if compress {
            dict.insert("Filter".to_string(), Object::name("FlateDecode"));
        }
        dict.insert("S".to_string(), Object::Integer(tables.shared_offset as i64));
        if let Some(outline_offset) = tables.outline_offset {
            dict.insert("O".to_string(), Object::Integer(outline_offset as i64));
        }

        let activation = self.pipeline.activate_capture();
        self.pipeline
            .write_string(&format!("{} 0 obj\n", layout.hint_id))?;
        self.cur_stream_length = Some(crate::writer::pdf_writer::CurLength::Direct(body_len));
        self.write_dictionary_for_stream(&dict)?;
        self.pipeline.write_string("\nstream\n")?;
        self.pipeline.write_bytes(&data)?;
        self.pipeline.write_string("\nendstream\nendobj\n")?;
        self.pipeline
            .pop(activation)?
            .ok_or_else(|| Error::Internal("hint stream capture lost".to_string()))
    }
}

fn xref_f2(entries: &[XrefEntry]) -> usize {
    let max_index = entries
        .iter()
        .map(|e| match e {
            XrefEntry::InStream { index, .. } => *index as u64,
            _ => 0,
        })
        .max()
        .unwrap_or(0);
    crate::writer::xref::bytes_needed(max_index)
}

fn clone_spec(spec: &XrefStreamSpec) -> XrefStreamSpec {
    XrefStreamSpec {
        id: spec.id,
        first: spec.first,
        entries: spec.entries.clone(),
        size: spec.size,
        prev: spec.prev,
        trailer: spec.trailer.clone(),
        include_index: spec.include_index,
        compress: spec.compress,
        f1_override: spec.f1_override,
        skip_compression: false,
    }
}
