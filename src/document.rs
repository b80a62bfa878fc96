//! Input object graph.
//!
//! The writer does not parse PDFs. It consumes a [`Document`]: the object
//! graph a parser produced, together with the trailer, the flattened page
//! list, the input cross-reference classification of each object, and any
//! parser-derived encryption parameters. The writer borrows the document for
//! the duration of one write and never mutates it; output-only adjustments
//! are made on shallow copies.

use std::collections::HashMap;

use crate::encryption::EncryptionParams;
use crate::error::{Error, Result};
use crate::object::{Dict, Object, ObjectRef};

static NULL_OBJECT: Object = Object::Null;

/// How an object was stored in the input file's cross-reference data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputXrefType {
    /// Regular uncompressed indirect object (xref type 1).
    Uncompressed,
    /// Member of an object stream (xref type 2).
    InStream {
        /// Object number of the containing `/ObjStm`.
        stream_id: u32,
        /// Position of this object within the stream.
        index: u32,
    },
}

/// An in-memory PDF document as produced by a parser.
#[derive(Debug, Default, Clone)]
pub struct Document {
    version: String,
    extension_level: i32,
    trailer: Dict,
    objects: HashMap<ObjectRef, Object>,
    xref_types: HashMap<ObjectRef, InputXrefType>,
    pages: Vec<ObjectRef>,
    object_ranges: HashMap<ObjectRef, (u64, u64)>,
    encryption: Option<EncryptionParams>,
}

impl Document {
    /// Create an empty document claiming the given PDF version (e.g. "1.5").
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            ..Self::default()
        }
    }

    /// The header version of the input file.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Version as (major, minor), tolerating malformed strings as (1, 0).
    pub fn version_parts(&self) -> (i32, i32) {
        parse_version(&self.version).unwrap_or((1, 0))
    }

    /// Adobe extension level declared by the input, 0 if none.
    pub fn extension_level(&self) -> i32 {
        self.extension_level
    }

    /// Set the Adobe extension level.
    pub fn set_extension_level(&mut self, level: i32) {
        self.extension_level = level;
    }

    /// Install an indirect object stored uncompressed in the input.
    pub fn add_object(&mut self, r: ObjectRef, obj: Object) {
        self.objects.insert(r, obj);
        self.xref_types.insert(r, InputXrefType::Uncompressed);
    }

    /// Install an indirect object that lived inside an object stream.
    pub fn add_object_in_stream(&mut self, r: ObjectRef, obj: Object, stream_id: u32, index: u32) {
        self.objects.insert(r, obj);
        self.xref_types
            .insert(r, InputXrefType::InStream { stream_id, index });
    }

    /// Record the source byte range of an object (used only for
    /// linearization checking of existing files).
    pub fn set_object_range(&mut self, r: ObjectRef, offset: u64, length: u64) {
        self.object_ranges.insert(r, (offset, length));
    }

    /// Source byte range of an object, if known.
    pub fn object_range(&self, r: ObjectRef) -> Option<(u64, u64)> {
        self.object_ranges.get(&r).copied()
    }

    /// Set the trailer dictionary.
    pub fn set_trailer(&mut self, trailer: Dict) {
        self.trailer = trailer;
    }

    /// The input trailer dictionary.
    pub fn trailer(&self) -> &Dict {
        &self.trailer
    }

    /// Set the flattened, ordered page list.
    pub fn set_pages(&mut self, pages: Vec<ObjectRef>) {
        self.pages = pages;
    }

    /// The flattened page list, in document order.
    pub fn pages(&self) -> &[ObjectRef] {
        &self.pages
    }

    /// Install parser-derived encryption parameters.
    pub fn set_encryption(&mut self, params: EncryptionParams) {
        self.encryption = Some(params);
    }

    /// Parser-derived encryption parameters, if the input was encrypted.
    pub fn encryption(&self) -> Option<&EncryptionParams> {
        self.encryption.as_ref()
    }

    /// Look up an indirect object by reference.
    pub fn get(&self, r: ObjectRef) -> Option<&Object> {
        self.objects.get(&r)
    }

    /// Input cross-reference classification of an object.
    pub fn xref_type(&self, r: ObjectRef) -> Option<InputXrefType> {
        self.xref_types.get(&r).copied()
    }

    /// All indirect object references, in ascending (id, gen) order.
    pub fn all_refs(&self) -> Vec<ObjectRef> {
        let mut refs: Vec<ObjectRef> = self.objects.keys().copied().collect();
        refs.sort();
        refs
    }

    /// Number of indirect objects in the document.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Highest object number present in the input.
    pub fn max_object_id(&self) -> u32 {
        self.objects.keys().map(|r| r.id).max().unwrap_or(0)
    }

    /// Follow reference chains until a non-reference object is reached.
    ///
    /// Dangling references resolve to null, matching the PDF convention that
    /// a reference to a missing object denotes the null object. Reference
    /// cycles also bottom out at null.
    pub fn resolve<'a>(&'a self, obj: &'a Object) -> &'a Object {
        let mut cur = obj;
        let mut depth = 0;
        while let Object::Reference(r) = cur {
            match self.objects.get(r) {
                Some(next) => cur = next,
                None => return &NULL_OBJECT,
            }
            depth += 1;
            if depth > 64 {
                return &NULL_OBJECT;
            }
        }
        cur
    }

    /// Resolve a reference directly.
    pub fn resolve_ref(&self, r: ObjectRef) -> &Object {
        self.objects.get(&r).unwrap_or(&NULL_OBJECT)
    }

    /// The document catalog reference from the trailer's `/Root`.
    pub fn root_ref(&self) -> Result<ObjectRef> {
        self.trailer
            .get("Root")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::InvalidPdf("trailer has no /Root entry".to_string()))
    }
}

/// Parse a "major.minor" version string.
pub(crate) fn parse_version(s: &str) -> Option<(i32, i32)> {
    let (major, minor) = s.split_once('.')?;
    let major: i32 = major.trim().parse().ok()?;
    let minor: i32 = minor.trim().parse().ok()?;
    if major < 0 || minor < 0 {
        return None;
    }
    Some((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        let mut doc = Document::new("1.5");
        doc.add_object(
            ObjectRef::new(1, 0),
            Object::dict(vec![("Type", Object::name("Catalog")), ("Pages", Object::reference(2, 0))]),
        );
        doc.add_object(
            ObjectRef::new(2, 0),
            Object::dict(vec![
                ("Type", Object::name("Pages")),
                ("Kids", Object::Array(vec![Object::reference(3, 0)])),
                ("Count", Object::Integer(1)),
            ]),
        );
        doc.add_object(
            ObjectRef::new(3, 0),
            Object::dict(vec![("Type", Object::name("Page")), ("Parent", Object::reference(2, 0))]),
        );
        let mut trailer = Dict::new();
        trailer.insert("Root".to_string(), Object::reference(1, 0));
        trailer.insert("Size".to_string(), Object::Integer(4));
        doc.set_trailer(trailer);
        doc.set_pages(vec![ObjectRef::new(3, 0)]);
        doc
    }

    #[test]
    fn test_root_ref() {
        let doc = sample();
        assert_eq!(doc.root_ref().unwrap(), ObjectRef::new(1, 0));
    }

    #[test]
    fn test_missing_root_is_data_error() {
        let doc = Document::new("1.4");
        assert!(doc.root_ref().is_err());
    }

    #[test]
    fn test_resolve_follows_references() {
        let doc = sample();
        let root = Object::reference(1, 0);
        let resolved = doc.resolve(&root);
        assert!(resolved.has_type("Catalog"));
    }

    #[test]
    fn test_resolve_dangling_is_null() {
        let doc = sample();
        let dangling = Object::reference(99, 0);
        assert!(doc.resolve(&dangling).is_null());
    }

    #[test]
    fn test_resolve_cycle_bottoms_out() {
        let mut doc = Document::new("1.4");
        doc.add_object(ObjectRef::new(1, 0), Object::reference(2, 0));
        doc.add_object(ObjectRef::new(2, 0), Object::reference(1, 0));
        let start = Object::reference(1, 0);
        assert!(doc.resolve(&start).is_null());
    }

    #[test]
    fn test_xref_type_tracking() {
        let mut doc = sample();
        doc.add_object_in_stream(ObjectRef::new(10, 0), Object::Integer(5), 9, 0);
        assert_eq!(
            doc.xref_type(ObjectRef::new(10, 0)),
            Some(InputXrefType::InStream { stream_id: 9, index: 0 })
        );
        assert_eq!(doc.xref_type(ObjectRef::new(1, 0)), Some(InputXrefType::Uncompressed));
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("1.7"), Some((1, 7)));
        assert_eq!(parse_version("2.0"), Some((2, 0)));
        assert_eq!(parse_version("junk"), None);
        assert_eq!(parse_version("1.x"), None);
    }
}
