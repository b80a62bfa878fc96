//! Integration tests for PCLm output.

use bytes::Bytes;
use pdf_scribe::object::Dict;
use pdf_scribe::{Document, Object, ObjectRef, PdfWriter, WriterConfig};

/// A two-page raster document in PCLm shape: each page has a content
/// stream and two horizontal image strips under /Resources /XObject.
fn raster_doc() -> Document {
    let mut doc = Document::new("1.4");
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
                Object::Array(vec![Object::reference(3, 0), Object::reference(8, 0)]),
            ),
            ("Count", Object::Integer(2)),
        ]),
    );

    let mut next = 3u32;
    for _ in 0..2 {
        let page_id = next;
        let content_id = next + 1;
        let strip0_id = next + 2;
        let strip1_id = next + 3;
        next += 5;

        doc.add_object(
            ObjectRef::new(page_id, 0),
            Object::dict(vec![
                ("Type", Object::name("Page")),
                ("Parent", Object::reference(2, 0)),
                ("MediaBox", Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(612),
                    Object::Integer(792),
                ])),
                ("Contents", Object::reference(content_id, 0)),
                (
                    "Resources",
                    Object::dict(vec![(
                        "XObject",
                        Object::dict(vec![
                            ("Image0", Object::reference(strip0_id, 0)),
                            ("Image1", Object::reference(strip1_id, 0)),
                        ]),
                    )]),
                ),
            ]),
        );

        let mut content_dict = Dict::new();
        content_dict.insert("Length".to_string(), Object::Integer(21));
        doc.add_object(
            ObjectRef::new(content_id, 0),
            Object::Stream {
                dict: content_dict,
                data: Bytes::from_static(b"612 0 0 792 0 0 cm\nq\n"),
            },
        );

        for (strip_id, offset) in [(strip0_id, 0i64), (strip1_id, 396)] {
            let mut dict = Dict::new();
            dict.insert("Type".to_string(), Object::name("XObject"));
            dict.insert("Subtype".to_string(), Object::name("Image"));
            dict.insert("Width".to_string(), Object::Integer(612));
            dict.insert("Height".to_string(), Object::Integer(396));
            dict.insert("ColorSpace".to_string(), Object::name("DeviceGray"));
            dict.insert("BitsPerComponent".to_string(), Object::Integer(8));
            dict.insert("StripOffset".to_string(), Object::Integer(offset));
            dict.insert("Length".to_string(), Object::Integer(8));
            doc.add_object(
                ObjectRef::new(strip_id, 0),
                Object::Stream {
                    dict,
                    data: Bytes::from_static(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]),
                },
            );
        }
    }

    let mut trailer = Dict::new();
    trailer.insert("Root".to_string(), Object::reference(1, 0));
    trailer.insert("Size".to_string(), Object::Integer(13));
    doc.set_trailer(trailer);
    doc.set_pages(vec![ObjectRef::new(3, 0), ObjectRef::new(8, 0)]);
    doc
}

fn pclm_output() -> Vec<u8> {
    let doc = raster_doc();
    let mut config = WriterConfig::new();
    config.pclm(true).unwrap();
    PdfWriter::new(&doc, config).write().unwrap()
}

#[test]
fn test_pclm_header_lines() {
    let output = pclm_output();
    let text = String::from_utf8_lossy(&output);
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("%PDF-1.4"));
    assert_eq!(lines.next(), Some("%PCLm 1.0"));
}

#[test]
fn test_pclm_synthesizes_strip_transform_streams() {
    let output = pclm_output();
    let text = String::from_utf8_lossy(&output);
    // One synthesized transform stream per strip: two strips on each of
    // two pages.
    assert_eq!(text.matches("q /Image0 Do Q").count(), 2);
    assert_eq!(text.matches("q /Image1 Do Q").count(), 2);
}

#[test]
fn test_pclm_transform_streams_are_new_objects() {
    let output = pclm_output();
    let text = String::from_utf8_lossy(&output);
    // Ten input objects plus four synthesized transforms, so /Size is 15.
    assert!(text.contains("/Size 15"));
    // Each transform is a complete indirect stream object.
    let pos = text.find("q /Image0 Do Q").unwrap();
    let before = &text[..pos];
    assert!(before.rfind("stream\n").unwrap() > before.rfind("obj\n").unwrap());
    let after = &text[pos..];
    assert!(after.find("endstream\nendobj").is_some());
}

#[test]
fn test_pclm_page_strip_ordering() {
    let output = pclm_output();
    let text = String::from_utf8_lossy(&output);

    // Page, then its content stream, then each strip followed by its
    // transform; the catalog comes after the pages.
    let page = text.find("/Type /Page ").expect("page dictionary");
    let content = text.find("612 0 0 792 0 0 cm").expect("page content");
    let strip = text.find("/Subtype /Image").expect("image strip");
    let transform = text.find("q /Image0 Do Q").expect("strip transform");
    let catalog = text.find("/Type /Catalog").expect("catalog");

    assert!(page < content, "page before its content stream");
    assert!(content < strip, "content stream before the strips");
    assert!(strip < transform, "strip before its transform stream");
    assert!(transform < catalog, "document objects after the pages");
}

#[test]
fn test_pclm_strip_data_passes_through_raw() {
    let output = pclm_output();
    // Strip bytes are written exactly as provided, never re-filtered.
    let strip_bytes = [0x11u8, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
    let occurrences = output
        .windows(strip_bytes.len())
        .filter(|w| *w == strip_bytes)
        .count();
    assert_eq!(occurrences, 4);
    let text = String::from_utf8_lossy(&output);
    assert!(!text.contains("/Filter /FlateDecode"));
}

#[test]
fn test_pclm_uses_classic_xref_table() {
    let output = pclm_output();
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("\nxref\n0 15\n"));
    assert!(!text.contains("/Type /XRef"));
    assert_eq!(text.matches("%%EOF").count(), 1);

    // startxref points at the table.
    let pos = text.rfind("startxref\n").unwrap();
    let offset: usize = text[pos + 10..].lines().next().unwrap().trim().parse().unwrap();
    assert!(output[offset..].starts_with(b"xref\n"));
}

#[test]
fn test_pclm_transform_length_is_exact() {
    let output = pclm_output();
    let text = String::from_utf8_lossy(&output);
    // "q /Image0 Do Q\n" is 15 bytes.
    let pos = text.find("q /Image0 Do Q").unwrap();
    let dict = &text[..pos];
    let obj_start = dict.rfind(" 0 obj").unwrap();
    assert!(dict[obj_start..].contains("/Length 15"));
}
