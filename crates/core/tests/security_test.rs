//! Standard security handler: known-answer tests for the key algorithms
//! and encrypted documents end to end.

mod common;

use common::{fixture, open_fixture, page_content};
use folio_core::codec::rc4;
use folio_core::document::{CryptMethod, Cryptor, EncryptionState, StreamEncoding};
use folio_core::model::objects::name;
use folio_core::{
    AccessLevel, Dict, DocumentContext, ObjectId, PDFObject, PDFStream, ParseOptions, PdfError,
    PdfWriter, XRefFormat,
};

const DOCID: [u8; 16] = [
    101, 26, 148, 254, 235, 120, 104, 211, 18, 169, 123, 55, 114, 112, 134, 14,
];

// V=1, R=2, 40-bit key. Owner "foo", user "baz".
const RC4_40_O: [u8; 32] = [
    1, 169, 240, 206, 242, 141, 0, 248, 223, 176, 37, 143, 94, 240, 197, 92, 157, 247, 200, 22,
    149, 143, 54, 49, 0, 175, 119, 236, 2, 38, 36, 84,
];
const RC4_40_U: [u8; 32] = [
    105, 75, 157, 162, 248, 9, 199, 124, 114, 119, 140, 251, 202, 194, 4, 129, 178, 114, 5, 208,
    231, 211, 34, 98, 54, 130, 131, 100, 102, 106, 151, 8,
];

// V=2, R=3, 128-bit key. Owner "foo", user "baz".
const RC4_128_O: [u8; 32] = [
    208, 72, 209, 82, 158, 83, 93, 24, 132, 205, 56, 86, 54, 123, 24, 75, 74, 144, 223, 1, 230, 55,
    209, 110, 202, 6, 91, 175, 78, 100, 144, 11,
];
const RC4_128_U: [u8; 32] = [
    9, 52, 18, 54, 59, 157, 50, 124, 122, 197, 1, 68, 199, 199, 85, 241, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0,
];

fn encrypt_dict(v: i64, r: i64, length: i64, o: &[u8], u: &[u8]) -> Dict {
    let mut dict = Dict::new();
    dict.insert("Filter".into(), name("Standard"));
    dict.insert("V".into(), PDFObject::Int(v));
    dict.insert("R".into(), PDFObject::Int(r));
    dict.insert("Length".into(), PDFObject::Int(length));
    dict.insert("P".into(), PDFObject::Int(-4));
    dict.insert("O".into(), PDFObject::String(o.to_vec()));
    dict.insert("U".into(), PDFObject::String(u.to_vec()));
    dict
}

fn rc4_128() -> EncryptionState {
    EncryptionState::from_dict(&encrypt_dict(2, 3, 128, &RC4_128_O, &RC4_128_U), &DOCID).unwrap()
}

#[test]
fn arcfour_known_answers() {
    let cases: [(&[u8], &[u8], &str); 3] = [
        (b"Key", b"Plaintext", "bbf316e8d940af0ad3"),
        (b"Wiki", b"pedia", "1021bf0420"),
        (b"Secret", b"Attack at dawn", "45a01f645fc35b383552544b9bf5"),
    ];
    for (key, plain, expected) in cases {
        assert_eq!(hex::encode(rc4(key, plain).unwrap()), expected);
    }
}

#[test]
fn rc4_40_passwords() {
    let mut state =
        EncryptionState::from_dict(&encrypt_dict(1, 2, 40, &RC4_40_O, &RC4_40_U), &DOCID).unwrap();
    assert_eq!(state.key_len(), 5);
    assert_eq!(hex::encode(state.compute_file_key(b"baz")), "115e6afda4");
    assert_eq!(state.compute_user_hash(&state.compute_file_key(b"baz")).unwrap(), RC4_40_U);
    assert_eq!(state.compute_owner_hash(b"foo", b"baz").unwrap(), RC4_40_O);

    assert_eq!(state.authenticate("baz").unwrap().access_level, AccessLevel::User);
    assert_eq!(state.authenticate("foo").unwrap().access_level, AccessLevel::Owner);
    assert_eq!(hex::encode(state.file_key().unwrap()), "115e6afda4");
}

#[test]
fn rc4_128_passwords() {
    let mut state = rc4_128();
    let key = state.check_user_password(b"baz").unwrap().unwrap();
    assert_eq!(hex::encode(&key), "c2a59ca0a50e5b4ccff13e4bcf0e3b18");
    assert_eq!(state.compute_owner_hash(b"foo", b"baz").unwrap(), RC4_128_O);
    assert_eq!(state.check_owner_password(b"foo").unwrap(), Some(key.clone()));
    assert_eq!(state.check_user_password(b"foo").unwrap(), None);

    let denied = state.authenticate("wrong").unwrap();
    assert_eq!(denied.access_level, AccessLevel::None);
    assert!(state.file_key().is_none());

    let auth = state.authenticate("foo").unwrap();
    assert_eq!(auth.access_level, AccessLevel::Owner);
    assert_eq!(auth.string_cryptor, Cryptor::Rc4 { file_key: key });
    // A later failure keeps the key already granted.
    state.authenticate("nope").unwrap();
    assert_eq!(state.access_level(), AccessLevel::Owner);
}

#[test]
fn rc4_object_encryption_known_answer() {
    let key = hex::decode("c2a59ca0a50e5b4ccff13e4bcf0e3b18").unwrap();
    let cryptor = Cryptor::Rc4 { file_key: key };
    let id = ObjectId::new(5, 0);
    let sealed = cryptor.encrypt(b"Hello, encrypted world", id).unwrap();
    assert_eq!(hex::encode(&sealed), "b3f62c5cf9d7649d05af1d909a89a20d4638942c0404");
    assert_eq!(cryptor.decrypt(&sealed, id).unwrap(), b"Hello, encrypted world");
    assert_ne!(cryptor.encrypt(b"Hello, encrypted world", ObjectId::new(5, 1)).unwrap(), sealed);
}

#[test]
fn scenario_c_wrong_password_opens_locked() {
    let mut doc = open_fixture("scenario_c_rc4.pdf");
    assert!(doc.is_encrypted());
    assert_eq!(doc.access_level(), AccessLevel::None);
    assert_eq!(doc.encryption().unwrap().revision, 3);

    // Objects without strings still load.
    assert!(doc.root().unwrap().get("Pages").is_some());
    assert!(matches!(
        doc.get_object(ObjectId::new(5, 0)),
        Err(PdfError::EncryptionError(_))
    ));
    let contents = doc.get_object(ObjectId::new(4, 0)).unwrap().unwrap();
    assert!(doc.decode_stream(contents.as_stream().unwrap()).is_err());

    let auth = doc.authenticate("baz").unwrap();
    assert_eq!(auth.access_level, AccessLevel::User);
    assert_eq!(doc.access_level(), AccessLevel::User);
    let info = doc.get_object(ObjectId::new(5, 0)).unwrap().unwrap();
    assert_eq!(info.get("Title").unwrap().as_string().unwrap(), b"Hello, encrypted world");
}

#[test]
fn scenario_c_owner_password() {
    let doc =
        DocumentContext::open(fixture("scenario_c_rc4.pdf"), ParseOptions::new().password("foo"))
            .unwrap();
    assert_eq!(doc.access_level(), AccessLevel::Owner);

    let contents = doc.get_object(ObjectId::new(4, 0)).unwrap().unwrap();
    assert_eq!(doc.decode_stream(contents.as_stream().unwrap()).unwrap(), page_content());

    // The /Encrypt dictionary itself is stored in the clear.
    let encrypt = doc.get_object(ObjectId::new(6, 0)).unwrap().unwrap();
    assert_eq!(encrypt.get("O").unwrap().as_string().unwrap(), RC4_128_O);

    let info = doc.parse_info(ObjectId::new(5, 0)).unwrap().unwrap();
    let crypt = info.crypt.as_ref().unwrap();
    assert_eq!(crypt.object_id, ObjectId::new(5, 0));
    assert!(info.value_bytes().starts_with(b"<< /Title <"));
    assert!(doc.parse_info(ObjectId::new(6, 0)).unwrap().unwrap().crypt.is_none());
}

/// A small AESV2 document built with the writer.
fn aes_document() -> (Vec<u8>, ObjectId, ObjectId) {
    let state = EncryptionState::new_standard(
        4,
        128,
        -3904,
        "owner",
        "user",
        b"0123456789abcdef",
        CryptMethod::AesV2,
    )
    .unwrap();
    let mut writer = PdfWriter::new("1.6");
    writer.set_encryption(&state).unwrap();
    let mut info = Dict::new();
    info.insert("Title".into(), PDFObject::String(b"AES secret".to_vec()));
    info.insert(
        "Keywords".into(),
        PDFObject::Array(vec![PDFObject::String(b"one".to_vec()), PDFObject::Int(2)]),
    );
    let info = writer.add_object(PDFObject::Dict(info)).unwrap();
    let content = writer
        .add_stream(Dict::new(), &page_content(), StreamEncoding::Flate)
        .unwrap();
    let mut catalog = Dict::new();
    catalog.insert("Type".into(), name("Catalog"));
    let catalog = writer.add_object(PDFObject::Dict(catalog)).unwrap();
    writer.set_root(catalog);
    writer.set_trailer("Info", PDFObject::Ref(info));
    (writer.finish(XRefFormat::Table).unwrap(), info, content)
}

#[test]
fn aesv2_document_round_trip() {
    let (pdf, info, content) = aes_document();
    assert!(!pdf.windows(10).any(|w| w == b"AES secret"));

    let doc = DocumentContext::open(pdf.clone(), ParseOptions::new().password("user")).unwrap();
    assert_eq!(doc.access_level(), AccessLevel::User);
    let state = doc.encryption().unwrap();
    assert_eq!((state.version, state.revision), (4, 4));
    assert_eq!(state.string_method, CryptMethod::AesV2);
    assert_eq!(state.permissions, -3904);

    let info = doc.get_object(info).unwrap().unwrap();
    assert_eq!(info.get("Title").unwrap().as_string().unwrap(), b"AES secret");
    let keywords = info.get("Keywords").unwrap().as_array().unwrap();
    assert_eq!(keywords[0], PDFObject::String(b"one".to_vec()));
    let stream = doc.get_object(content).unwrap().unwrap();
    assert_eq!(doc.decode_stream(stream.as_stream().unwrap()).unwrap(), page_content());

    let owner = DocumentContext::open(pdf.clone(), ParseOptions::new().password("owner")).unwrap();
    assert_eq!(owner.access_level(), AccessLevel::Owner);
    let locked = DocumentContext::open(pdf, ParseOptions::default()).unwrap();
    assert_eq!(locked.access_level(), AccessLevel::None);
}

#[test]
fn aesv2_fixture_decrypts() {
    let doc =
        DocumentContext::open(fixture("scenario_aes.pdf"), ParseOptions::new().password("user"))
            .unwrap();
    assert_eq!(doc.access_level(), AccessLevel::User);
    let state = doc.encryption().unwrap();
    assert_eq!((state.version, state.revision), (4, 4));
    assert_eq!(state.stream_method, CryptMethod::AesV2);
    assert_eq!(
        hex::encode(state.file_key().unwrap()),
        "aab248f700caac15bab4d2839f7b0761"
    );

    let info = doc.get_object(ObjectId::new(5, 0)).unwrap().unwrap();
    assert_eq!(info.get("Title").unwrap().as_string().unwrap(), b"AES fixture secret");
    let contents = doc.get_object(ObjectId::new(4, 0)).unwrap().unwrap();
    assert_eq!(doc.decode_stream(contents.as_stream().unwrap()).unwrap(), page_content());

    let owner =
        DocumentContext::open(fixture("scenario_aes.pdf"), ParseOptions::new().password("owner"))
            .unwrap();
    assert_eq!(owner.access_level(), AccessLevel::Owner);
    assert_eq!(open_fixture("scenario_aes.pdf").access_level(), AccessLevel::None);
}

#[test]
fn oversized_rc4_key_is_rejected_on_open() {
    let mut writer = PdfWriter::new("1.4");
    let encrypt = writer
        .add_object(PDFObject::Dict(encrypt_dict(2, 3, 256, &RC4_128_O, &RC4_128_U)))
        .unwrap();
    let catalog = writer.add_object(PDFObject::Dict(Dict::new())).unwrap();
    writer.set_root(catalog);
    writer.set_trailer("Encrypt", PDFObject::Ref(encrypt));
    let id = PDFObject::String(DOCID.to_vec());
    writer.set_trailer("ID", PDFObject::Array(vec![id.clone(), id]));
    let pdf = writer.finish(XRefFormat::Table).unwrap();

    assert!(matches!(
        DocumentContext::open(pdf, ParseOptions::default()),
        Err(PdfError::EncryptionError(_))
    ));
    assert!(matches!(
        EncryptionState::from_dict(&encrypt_dict(5, 4, 128, &RC4_128_O, &RC4_128_U), &DOCID),
        Err(PdfError::EncryptionError(_))
    ));
}

#[test]
fn identity_crypt_filter_bypasses_decryption() {
    let state =
        EncryptionState::new_standard(4, 128, -4, "foo", "baz", &DOCID, CryptMethod::Rc4).unwrap();
    let auth = state.authentication().unwrap();
    let mut writer = PdfWriter::new("1.6");
    let encrypt = writer.add_object(PDFObject::Dict(state.to_dict())).unwrap();

    let mut parms = Dict::new();
    parms.insert("Name".into(), name("Identity"));
    let mut attrs = Dict::new();
    attrs.insert("Filter".into(), PDFObject::Array(vec![name("Crypt")]));
    attrs.insert("DecodeParms".into(), PDFObject::Array(vec![PDFObject::Dict(parms)]));
    let plain = writer
        .add_stream(attrs, b"stored in the clear", StreamEncoding::Raw)
        .unwrap();

    let sealed = writer.alloc_id();
    let payload = auth.stream_cryptor.encrypt(b"sealed payload", sealed).unwrap();
    writer
        .write_object(sealed, &PDFObject::Stream(Box::new(PDFStream::new(Dict::new(), payload))))
        .unwrap();

    let catalog = writer.add_object(PDFObject::Dict(Dict::new())).unwrap();
    writer.set_root(catalog);
    writer.set_trailer("Encrypt", PDFObject::Ref(encrypt));
    let id = PDFObject::String(DOCID.to_vec());
    writer.set_trailer("ID", PDFObject::Array(vec![id.clone(), id]));
    let pdf = writer.finish(XRefFormat::Table).unwrap();

    let doc = DocumentContext::open(pdf, ParseOptions::new().password("baz")).unwrap();
    assert_eq!(doc.access_level(), AccessLevel::User);
    let decode = |id| {
        let obj = doc.get_object(id).unwrap().unwrap();
        doc.decode_stream(obj.as_stream().unwrap()).unwrap()
    };
    assert_eq!(decode(plain), b"stored in the clear");
    assert_eq!(decode(sealed), b"sealed payload");
}

#[test]
fn metadata_stays_clear_without_encrypt_metadata() {
    let mut state =
        EncryptionState::new_standard(4, 128, -4, "foo", "baz", &DOCID, CryptMethod::Rc4).unwrap();
    state.encrypt_metadata = false;
    let key = state.compute_file_key(b"baz");
    state.user_hash = state.compute_user_hash(&key).unwrap();
    let cryptor = Cryptor::Rc4 { file_key: key };

    let mut writer = PdfWriter::new("1.6");
    let encrypt = writer.add_object(PDFObject::Dict(state.to_dict())).unwrap();
    let mut attrs = Dict::new();
    attrs.insert("Type".into(), name("Metadata"));
    attrs.insert("Subtype".into(), name("XML"));
    let metadata = writer
        .add_stream(attrs, b"<x:xmpmeta/>", StreamEncoding::Raw)
        .unwrap();
    let body = writer.alloc_id();
    let payload = cryptor.encrypt(b"page body", body).unwrap();
    writer
        .write_object(body, &PDFObject::Stream(Box::new(PDFStream::new(Dict::new(), payload))))
        .unwrap();
    let mut catalog = Dict::new();
    catalog.insert("Metadata".into(), PDFObject::Ref(metadata));
    let catalog = writer.add_object(PDFObject::Dict(catalog)).unwrap();
    writer.set_root(catalog);
    writer.set_trailer("Encrypt", PDFObject::Ref(encrypt));
    let id = PDFObject::String(DOCID.to_vec());
    writer.set_trailer("ID", PDFObject::Array(vec![id.clone(), id]));
    let pdf = writer.finish(XRefFormat::Table).unwrap();

    let doc = DocumentContext::open(pdf, ParseOptions::new().password("baz")).unwrap();
    assert_eq!(doc.access_level(), AccessLevel::User);
    assert!(!doc.encryption().unwrap().encrypt_metadata);
    let decode = |id| {
        let obj = doc.get_object(id).unwrap().unwrap();
        doc.decode_stream(obj.as_stream().unwrap()).unwrap()
    };
    assert_eq!(decode(metadata), b"<x:xmpmeta/>");
    assert_eq!(decode(body), b"page body");
}

#[test]
fn incremental_update_keeps_encryption() {
    let doc =
        DocumentContext::open(fixture("scenario_c_rc4.pdf"), ParseOptions::new().password("foo"))
            .unwrap();
    let mut writer = PdfWriter::incremental(&doc).unwrap();
    let mut info = Dict::new();
    info.insert("Title".into(), PDFObject::String(b"Revised".to_vec()));
    writer
        .write_object(ObjectId::new(5, 0), &PDFObject::Dict(info))
        .unwrap();
    let pdf = writer.finish(XRefFormat::Table).unwrap();
    assert!(!pdf.windows(7).any(|w| w == b"Revised"));

    let updated = DocumentContext::open(pdf, ParseOptions::new().password("baz")).unwrap();
    assert_eq!(updated.xref().sections().len(), 2);
    let info = updated.get_object(ObjectId::new(5, 0)).unwrap().unwrap();
    assert_eq!(info.get("Title").unwrap().as_string().unwrap(), b"Revised");
    let contents = updated.get_object(ObjectId::new(4, 0)).unwrap().unwrap();
    assert_eq!(
        updated.decode_stream(contents.as_stream().unwrap()).unwrap(),
        page_content()
    );
}

#[test]
fn incremental_update_needs_a_key() {
    let doc = open_fixture("scenario_c_rc4.pdf");
    assert!(matches!(
        PdfWriter::incremental(&doc),
        Err(PdfError::EncryptionError(_))
    ));
}

#[test]
fn aes_256_is_not_implemented() {
    let mut dict = encrypt_dict(5, 6, 256, &[0; 48], &[0; 48]);
    let mut cf = Dict::new();
    let mut std_cf = Dict::new();
    std_cf.insert("CFM".into(), name("AESV3"));
    cf.insert("StdCF".into(), PDFObject::Dict(std_cf));
    dict.insert("CF".into(), PDFObject::Dict(cf));
    dict.insert("StmF".into(), name("StdCF"));
    dict.insert("StrF".into(), name("StdCF"));

    let mut state = EncryptionState::from_dict(&dict, &DOCID).unwrap();
    assert_eq!(state.key_length_bits, 256);
    assert_eq!(state.stream_method, CryptMethod::AesV3);
    assert!(matches!(state.authenticate(""), Err(PdfError::NotImplemented(_))));
}
