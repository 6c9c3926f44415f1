//! Property checks for the byte scanner and object parser, driven by a
//! seeded generator.

mod common;

use common::XorShift64;
use folio_core::model::serialize_object;
use folio_core::parser::{
    ByteScanner, Direction, ObjectParser, ValueKind, escape_literal, serialize_hex,
    serialize_literal, unescape_literal,
};
use folio_core::{Dict, ObjectId, PDFObject};

const ROUNDS: usize = 300;

fn naive_find(hay: &[u8], needle: &[u8], lo: usize, hi: usize, forward: bool) -> Option<usize> {
    if hi < lo || hi - lo < needle.len() {
        return None;
    }
    let mut starts = lo..=hi - needle.len();
    let pred = |&s: &usize| &hay[s..s + needle.len()] == needle;
    if forward {
        starts.find(pred)
    } else {
        starts.rev().find(pred)
    }
}

#[test]
fn find_subsequence_agrees_with_naive_search() {
    let mut rng = XorShift64::new(0x5eed);
    for _ in 0..ROUNDS {
        let hay_len = 1 + rng.below(64);
        let hay = rng.bytes_from(b"ab ", hay_len);
        let needle_len = 1 + rng.below(3);
        let needle = rng.bytes_from(b"ab", needle_len);
        let lo = rng.below(hay.len());
        let hi = lo + rng.below(hay.len() - lo + 1);
        let scanner = ByteScanner::new(hay.clone());
        for (direction, forward) in [(Direction::Forward, true), (Direction::Backward, false)] {
            let found = scanner
                .find_subsequence(&needle, direction, lo, hi, false)
                .map(|b| b.start);
            assert_eq!(found, naive_find(&hay, &needle, lo, hi, forward), "{hay:?} {needle:?}");
            if let Some(start) = found {
                assert!(start >= lo && start + needle.len() <= hi);
            }
        }
    }
}

#[test]
fn closed_only_skips_prefix_matches() {
    let scanner = ByteScanner::new(b"/Root 1 0 R".to_vec());
    let hit = scanner
        .find_subsequence(b"R", Direction::Forward, 0, scanner.len(), true)
        .unwrap();
    assert_eq!(hit.start, 10);
    let back = scanner
        .find_subsequence(b"Root", Direction::Backward, 0, scanner.len(), true)
        .unwrap();
    assert_eq!(back.start, 1);
    // Backward matches must not be preceded by a regular byte.
    assert!(
        scanner
            .find_subsequence(b"oot", Direction::Backward, 0, scanner.len(), true)
            .is_none()
    );
}

#[test]
fn literal_strings_survive_escaping() {
    let mut rng = XorShift64::new(42);
    for _ in 0..ROUNDS {
        let len = rng.below(48);
        let data = rng.bytes(len);
        let text = serialize_literal(&data);
        let scanner = ByteScanner::new(text.clone());
        let parsed = scanner.parse_literal_string(0).unwrap();
        assert_eq!(parsed.value.value, data);
        assert_eq!(parsed.bounds.end, text.len());
        assert_eq!(parsed.bounds.content_range(), 1..text.len() - 1);
    }
}

#[test]
fn every_escape_class_round_trips() {
    let data = b"a\nb\rc\td\x08e\x0cf(g)h\\i";
    let escaped = escape_literal(data);
    assert_eq!(escaped, b"a\\nb\\rc\\td\\be\\ff\\(g\\)h\\\\i");
    assert_eq!(unescape_literal(&escaped), data);
    assert_eq!(unescape_literal(b"\\101\\0\\\n"), b"A\0");
}

#[test]
fn hex_strings_decode_written_bytes() {
    let mut rng = XorShift64::new(7);
    for _ in 0..ROUNDS {
        let len = rng.below(32);
        let data = rng.bytes(len);
        let text = serialize_hex(&data);
        let parsed = ByteScanner::new(text.clone()).parse_hex_string(0).unwrap();
        assert_eq!(parsed.value.hex, data);
        assert_eq!(parsed.bounds.end, text.len());
    }
    let odd = ByteScanner::new(b"<4 1 4>".to_vec()).parse_hex_string(0).unwrap();
    assert_eq!(odd.value.hex, vec![0x41, 0x40]);
    assert_eq!(odd.value.text, "414");
}

#[test]
fn numbers_parse_back() {
    let mut rng = XorShift64::new(99);
    for _ in 0..ROUNDS {
        let n = rng.next_u64() as i64 >> rng.below(60);
        let text = n.to_string();
        let parsed = ByteScanner::new(text.into_bytes()).parse_number(0).unwrap();
        assert_eq!(parsed.value.as_i64(), Some(n));
    }
    let scanner = ByteScanner::new(b"-.5 12abc".to_vec());
    assert_eq!(scanner.parse_number(0).unwrap().value.as_f64(), -0.5);
    assert!(scanner.parse_number(4).is_none());
}

fn random_object(rng: &mut XorShift64, depth: usize) -> PDFObject {
    let pick = if depth == 0 { rng.below(6) } else { rng.below(8) };
    match pick {
        0 => PDFObject::Null,
        1 => PDFObject::Bool(rng.below(2) == 1),
        2 => PDFObject::Int(rng.next_u64() as i32 as i64),
        3 => {
            let len = rng.below(12);
            PDFObject::String(rng.bytes(len))
        }
        4 => {
            let len = 1 + rng.below(6);
            PDFObject::Name(String::from_utf8(rng.bytes_from(b"ABCxyz019", len)).unwrap())
        }
        5 => PDFObject::Ref(ObjectId::new(1 + rng.below(500) as u32, rng.below(3) as u16)),
        6 => PDFObject::Array((0..rng.below(5)).map(|_| random_object(rng, depth - 1)).collect()),
        _ => {
            let mut dict = Dict::new();
            for i in 0..rng.below(5) {
                dict.insert(format!("K{i}"), random_object(rng, depth - 1));
            }
            PDFObject::Dict(dict)
        }
    }
}

#[test]
fn serialized_objects_parse_back() {
    let mut rng = XorShift64::new(2024);
    for _ in 0..ROUNDS {
        let obj = random_object(&mut rng, 3);
        let text = serialize_object(&obj);
        let scanner = ByteScanner::new(text.clone());
        let (parsed, end) = ObjectParser::new(&scanner).parse_at(0).unwrap();
        assert_eq!(parsed, obj, "{}", String::from_utf8_lossy(&text));
        assert_eq!(end, text.len());
        let (_, bounds) = scanner.get_value_bounds(0).unwrap();
        assert_eq!(bounds.end, text.len());
    }
}

#[test]
fn bounds_skip_delimiters_inside_strings() {
    let text = b"<< /A (>> ]) /B [<41> (\\)) [1]] >> rest".to_vec();
    let scanner = ByteScanner::new(text);
    let dict = scanner.get_dict_bounds(0).unwrap();
    assert_eq!(&scanner.data()[dict.start..dict.end], b"<< /A (>> ]) /B [<41> (\\)) [1]] >>");
    let array = scanner.get_array_bounds(16).unwrap();
    assert_eq!(&scanner.data()[array.content_range()], b"<41> (\\)) [1]");
}

#[test]
fn references_render_back_to_their_bytes() {
    let mut rng = XorShift64::new(77);
    for _ in 0..ROUNDS {
        let tokens: Vec<String> = (0..1 + rng.below(12))
            .map(|_| match rng.below(4) {
                0 => "R".to_string(),
                1 => "obj".to_string(),
                2 => "/N".to_string(),
                _ => (rng.below(40)).to_string(),
            })
            .collect();
        let scanner = ByteScanner::new(tokens.join(" ").into_bytes());
        for i in 0..scanner.len() {
            // Lookahead skips leading whitespace; only test token starts.
            if scanner.data()[i] == b' ' || scanner.classify_value_at(i) != ValueKind::Reference {
                continue;
            }
            let parsed = scanner.parse_reference(i).unwrap();
            let rendered = format!("{} {} R", parsed.value.id, parsed.value.generation);
            assert_eq!(&scanner.data()[i..parsed.bounds.end], rendered.as_bytes());
        }
    }
}

#[test]
fn classify_references_and_headers() {
    let scanner = ByteScanner::new(b"12 0 R 12 0 obj 7 %c\n".to_vec());
    assert_eq!(scanner.classify_value_at(0), ValueKind::Reference);
    assert_eq!(scanner.classify_value_at(7), ValueKind::Number);
    assert_eq!(scanner.classify_value_at(16), ValueKind::Number);
    assert_eq!(scanner.classify_value_at(18), ValueKind::Comment);
    let (id, value_start) = scanner.parse_object_header(7).unwrap();
    assert_eq!(id, ObjectId::new(12, 0));
    assert_eq!(value_start, 16);
}

#[test]
fn whitespace_skipping_is_idempotent() {
    let mut rng = XorShift64::new(3);
    for _ in 0..ROUNDS {
        let len = rng.below(40);
        let data = rng.bytes_from(b" \t\r\n%ax", len);
        let scanner = ByteScanner::new(data);
        let i = rng.below(scanner.len() + 1);
        let j = scanner.skip_whitespace_and_comments(i);
        assert!(j >= i);
        assert_eq!(scanner.skip_whitespace_and_comments(j), j);
    }
}
