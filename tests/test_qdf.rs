//! Integration tests for QDF output.

use bytes::Bytes;
use pdf_scribe::object::Dict;
use pdf_scribe::{Document, Object, ObjectRef, PdfWriter, WriterConfig};

fn three_page_doc() -> Document {
    let mut doc = Document::new("1.5");
    doc.add_object(
        ObjectRef::new(1, 0),
        Object::dict(vec![
            ("Type", Object::name("Catalog")),
            ("Pages", Object::reference(2, 0)),
        ]),
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
        // Flate-compressed content so QDF has something to uncompress.
        let raw = b"q 1 0 0 1 0 0 cm BT ET Q\n";
        let compressed = {
            use std::io::Write;
            let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(raw).unwrap();
            enc.finish().unwrap()
        };
        let mut dict = Dict::new();
        dict.insert("Length".to_string(), Object::Integer(compressed.len() as i64));
        dict.insert("Filter".to_string(), Object::name("FlateDecode"));
        doc.add_object(
            ObjectRef::new(content_id, 0),
            Object::Stream {
                dict,
                data: Bytes::from(compressed),
            },
        );
    }
    let mut trailer = Dict::new();
    trailer.insert("Root".to_string(), Object::reference(1, 0));
    trailer.insert("Size".to_string(), Object::Integer(9));
    doc.set_trailer(trailer);
    doc.set_pages(vec![ObjectRef::new(3, 0), ObjectRef::new(5, 0), ObjectRef::new(7, 0)]);
    doc
}

fn qdf_output() -> String {
    let doc = three_page_doc();
    let mut config = WriterConfig::new();
    config.qdf(true).unwrap();
    let output = PdfWriter::new(&doc, config).write().unwrap();
    // Only the binary-marker line is non-UTF8.
    String::from_utf8_lossy(&output).into_owned()
}

#[test]
fn test_qdf_header_lines() {
    let text = qdf_output();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("%PDF-1.5"));
    let binary = lines.next().unwrap();
    assert!(binary.starts_with('%'));
    assert_eq!(lines.next(), Some("%QDF-1.0"));
}

#[test]
fn test_qdf_has_no_flate() {
    let text = qdf_output();
    assert!(!text.contains("/Filter /FlateDecode"));
    // Content is decoded and readable.
    assert!(text.contains("q 1 0 0 1 0 0 cm BT ET Q"));
}

#[test]
fn test_qdf_indirect_stream_lengths() {
    let text = qdf_output();
    // Every stream dictionary stores its length as a reference, and each
    // companion object holds the value.
    let refs = text.matches("/Length").count();
    assert!(refs >= 3);
    let indirect = text
        .lines()
        .filter(|line| line.trim_start().starts_with("/Length") && line.trim_end().ends_with("0 R"))
        .count();
    assert_eq!(indirect, 3);
}

#[test]
fn test_qdf_page_banners() {
    let text = qdf_output();
    for n in 1..=3 {
        assert!(text.contains(&format!("%% Page {}\n", n)), "missing page banner {}", n);
        assert!(
            text.contains(&format!("%% Contents for page {}\n", n)),
            "missing contents banner {}",
            n
        );
    }
}

#[test]
fn test_qdf_original_object_ids() {
    let text = qdf_output();
    assert!(text.contains("%% Original object ID: 1 0"));
    assert!(text.contains("%% Original object ID: 3 0"));
}

#[test]
fn test_qdf_suppressed_object_ids() {
    let doc = three_page_doc();
    let mut config = WriterConfig::new();
    config.qdf(true).unwrap();
    config.no_original_object_ids(true);
    let output = PdfWriter::new(&doc, config).write().unwrap();
    let text = String::from_utf8_lossy(&output);
    assert!(!text.contains("%% Original object ID"));
    assert!(text.contains("%% Page 1"));
}

#[test]
fn test_qdf_blank_line_after_endobj() {
    let text = qdf_output();
    assert!(text.contains("endobj\n\n"));
}

#[test]
fn test_qdf_dictionaries_are_indented() {
    let text = qdf_output();
    assert!(text.contains("<<\n  /Type /Catalog\n"));
}

#[test]
fn test_qdf_skips_input_xref_streams() {
    let mut doc = three_page_doc();
    let mut dict = Dict::new();
    dict.insert("Type".to_string(), Object::name("XRef"));
    dict.insert("Size".to_string(), Object::Integer(9));
    doc.add_object(
        ObjectRef::new(60, 0),
        Object::Stream {
            dict,
            data: Bytes::from_static(&[0u8; 12]),
        },
    );
    // Make it reachable so only the QDF rule excludes it.
    let mut trailer = doc.trailer().clone();
    trailer.insert("SomeKey".to_string(), Object::reference(60, 0));
    doc.set_trailer(trailer);

    let mut config = WriterConfig::new();
    config.qdf(true).unwrap();
    let output = PdfWriter::new(&doc, config).write().unwrap();
    let text = String::from_utf8_lossy(&output);
    let body = &text[..text.rfind("xref").unwrap()];
    assert!(!body.contains("/Type /XRef"));
}
