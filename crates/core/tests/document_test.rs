//! Opening documents: cross-reference chains, object streams, hybrid
//! files and broken input.

mod common;

use common::{fixture, open_fixture, page_content};
use folio_core::document::SectionKind;
use folio_core::{
    DocumentContext, ErrorPolicy, ObjectId, PDFObject, ParseOptions, PdfError, Reference,
};
use std::collections::BTreeSet;

fn oid(id: u32) -> ObjectId {
    ObjectId::new(id, 0)
}

fn object(doc: &DocumentContext, id: u32) -> PDFObject {
    doc.get_object(oid(id)).unwrap().unwrap()
}

#[test]
fn scenario_a_classic_table() {
    let doc = open_fixture("scenario_a.pdf");
    assert_eq!(doc.header_version(), Some("1.4"));
    assert_eq!(doc.object_ids(), (1..=5).map(oid).collect::<Vec<_>>());
    assert_eq!(doc.xref().sections().len(), 1);
    assert_eq!(doc.xref().sections()[0].kind, SectionKind::Table);

    let root = doc.root().unwrap();
    assert_eq!(root.get("Type").unwrap().as_name().unwrap(), "Catalog");
    let pages = doc.deref(root.get("Pages").unwrap()).unwrap();
    let kids = pages.get("Kids").unwrap().as_array().unwrap();
    let page = doc.deref(&kids[0]).unwrap();
    let contents = doc.deref(page.get("Contents").unwrap()).unwrap();
    let stream = contents.as_stream().unwrap();
    assert_eq!(doc.decode_stream(stream).unwrap(), page_content());

    let info = doc.deref(doc.trailer().get("Info").unwrap()).unwrap();
    assert_eq!(info.get("Title").unwrap().as_string().unwrap(), b"Scenario");
}

#[test]
fn scenario_b_incremental_streams_match_scenario_a() {
    let a = open_fixture("scenario_a.pdf");
    let b = open_fixture("scenario_b.pdf");

    let sections = b.xref().sections();
    assert_eq!(sections.len(), 3);
    assert!(sections.iter().all(|s| s.kind == SectionKind::Stream));
    assert!(sections.windows(2).all(|w| w[0].offset > w[1].offset));

    for id in a.object_ids() {
        let left = a.get_object(id).unwrap().unwrap();
        let right = b.get_object(id).unwrap().unwrap();
        match (&left, &right) {
            (PDFObject::Stream(l), PDFObject::Stream(r)) => {
                assert_eq!(a.decode_stream(l).unwrap(), b.decode_stream(r).unwrap());
            }
            _ => assert_eq!(left, right, "object {id}"),
        }
    }

    let a_ids: BTreeSet<_> = a.object_ids().into_iter().collect();
    for id in b.object_ids() {
        if a_ids.contains(&id) {
            continue;
        }
        let obj = b.get_object(id).unwrap().unwrap();
        let kind = obj.as_stream().unwrap().type_name();
        assert!(matches!(kind, Some("XRef" | "ObjStm")), "object {id} is {kind:?}");
    }

    assert_eq!(
        b.resolve(oid(5)),
        Some(Reference::Compressed { stream_id: 8, index: 0 })
    );
    assert!(matches!(b.resolve(oid(6)), Some(Reference::Free { .. })));
    assert_eq!(b.xref().entry(6).unwrap().generation, 1);
    assert_eq!(b.get_object(oid(6)).unwrap(), None);

    assert_eq!(b.trailer().get("Size"), Some(&PDFObject::Int(11)));
    assert_eq!(b.trailer().get("Info"), Some(&PDFObject::Ref(oid(5))));
}

#[test]
fn scenario_b_predictor_stream_attrs() {
    let doc = open_fixture("scenario_b.pdf");
    let content = object(&doc, 4);
    let stream = content.as_stream().unwrap();
    let parms = stream.get("DecodeParms").unwrap();
    assert_eq!(parms.get("Predictor"), Some(&PDFObject::Int(12)));
    assert_eq!(doc.decode_stream(stream).unwrap(), page_content());
}

#[test]
fn all_streams_decode_in_object_order() {
    let doc = open_fixture("scenario_b.pdf");
    let decoded = doc.decode_all_streams().unwrap();
    let ids: Vec<u32> = decoded.iter().map(|(id, _)| id.id).collect();
    assert_eq!(ids, vec![4, 7, 8, 9, 10]);
    assert_eq!(decoded[0].1, page_content());
}

#[test]
fn hybrid_file_reads_compressed_objects() {
    let doc = open_fixture("hybrid.pdf");
    let sections = doc.xref().sections();
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].kind, SectionKind::Hybrid);

    assert_eq!(
        doc.resolve(oid(3)),
        Some(Reference::Compressed { stream_id: 2, index: 0 })
    );
    assert!(matches!(doc.resolve(oid(5)), Some(Reference::Used { .. })));

    let extra = doc.deref(doc.root().unwrap().get("Extra").unwrap()).unwrap();
    assert_eq!(extra.get("Kind").unwrap().as_name().unwrap(), "Hyb");
    assert_eq!(object(&doc, 4), PDFObject::String(b"in stream".to_vec()));
}

#[test]
fn parse_info_inside_object_stream() {
    let doc = open_fixture("hybrid.pdf");
    let info = doc.parse_info(oid(4)).unwrap().unwrap();
    assert_eq!(info.parent_stream_id, Some(2));
    assert_eq!(info.value_bytes(), b"(in stream)");
    assert!(info.crypt.is_none());
    assert_eq!(*info.object().unwrap(), PDFObject::String(b"in stream".to_vec()));
    assert!(info.resolve(oid(0)).unwrap().is_free());
}

#[test]
fn newer_free_entry_hides_older_object() {
    let doc = open_fixture("free_precedence.pdf");
    assert_eq!(doc.xref().sections().len(), 2);
    assert!(matches!(doc.resolve(oid(7)), Some(Reference::Free { .. })));
    // A free entry answers for every generation.
    assert!(matches!(
        doc.resolve(ObjectId::new(7, 3)),
        Some(Reference::Free { .. })
    ));
    assert_eq!(doc.get_object(oid(7)).unwrap(), None);
    assert_eq!(object(&doc, 8), PDFObject::String(b"new eight".to_vec()));
    assert_eq!(doc.object_ids(), vec![oid(1), oid(8)]);
}

#[test]
fn cyclic_prev_chain_is_fatal() {
    for recover in [false, true] {
        let options = ParseOptions::new().recover_xref(recover);
        match DocumentContext::open(fixture("cyclic_prev.pdf"), options) {
            Err(PdfError::Structural { msg, .. }) => assert!(msg.contains("cyclic"), "{msg}"),
            other => panic!("expected a structural error, got {other:?}"),
        }
    }
}

#[test]
fn length_mismatch_reports_both_lengths() {
    let strict = open_fixture("length_mismatch.pdf");
    match strict.get_object(oid(2)) {
        Err(PdfError::LengthMismatch { declared, actual, .. }) => {
            assert_eq!((declared, actual), (10, 5));
        }
        other => panic!("expected LengthMismatch, got {other:?}"),
    }
    assert!(strict.get_object(oid(1)).unwrap().is_some());

    let lenient = DocumentContext::open(
        fixture("length_mismatch.pdf"),
        ParseOptions::new().error_policy(ErrorPolicy::SkipObject),
    )
    .unwrap();
    assert_eq!(lenient.get_object(oid(2)).unwrap(), None);
    assert!(lenient.decode_all_streams().unwrap().is_empty());
}

#[test]
fn broken_startxref_needs_recovery() {
    let mut data = fixture("scenario_a.pdf");
    let at = data.windows(9).rposition(|w| w == b"startxref").unwrap();
    data.truncate(at);
    data.extend_from_slice(b"startxref\n999999\n%%EOF\n");

    assert!(DocumentContext::open(data.clone(), ParseOptions::default()).is_err());

    let doc = DocumentContext::open(data, ParseOptions::new().recover_xref(true)).unwrap();
    assert_eq!(doc.xref().sections()[0].kind, SectionKind::Recovered);
    assert_eq!(doc.object_ids(), (1..=5).map(oid).collect::<Vec<_>>());
    let contents = object(&doc, 4);
    assert_eq!(doc.decode_stream(contents.as_stream().unwrap()).unwrap(), page_content());
    assert_eq!(
        doc.root().unwrap().get("Type").unwrap().as_name().unwrap(),
        "Catalog"
    );
}

#[test]
fn objects_load_from_many_threads() {
    let doc = open_fixture("scenario_b.pdf");
    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for id in doc.object_ids() {
                    assert!(doc.get_object_shared(id).unwrap().is_some());
                }
                assert_eq!(
                    object(&doc, 5).get("Producer").unwrap().as_string().unwrap(),
                    b"folio fixtures"
                );
            });
        }
    });
}
