//! Writing objects back to PDF syntax.

use super::objects::{Dict, PDFObject};
use crate::parser::scanner::is_regular;
use crate::parser::strings::{serialize_hex, serialize_literal};
use std::io::Write as _;

/// Serialize a single object into a fresh buffer.
pub fn serialize_object(obj: &PDFObject) -> Vec<u8> {
    let mut out = Vec::new();
    write_object(&mut out, obj);
    out
}

/// Append the PDF syntax for `obj` to `out`.
///
/// Streams are written with their attribute dictionary as stored; callers
/// that change the payload are responsible for `/Length`.
pub fn write_object(out: &mut Vec<u8>, obj: &PDFObject) {
    match obj {
        PDFObject::Null => out.extend_from_slice(b"null"),
        PDFObject::Bool(true) => out.extend_from_slice(b"true"),
        PDFObject::Bool(false) => out.extend_from_slice(b"false"),
        PDFObject::Int(n) => {
            let _ = write!(out, "{n}");
        }
        PDFObject::Real(n) => write_real(out, *n),
        PDFObject::Name(name) => write_name(out, name),
        PDFObject::String(bytes) => {
            if bytes
                .iter()
                .all(|&b| (0x20..0x7f).contains(&b) || matches!(b, b'\n' | b'\r' | b'\t'))
            {
                out.extend_from_slice(&serialize_literal(bytes));
            } else {
                out.extend_from_slice(&serialize_hex(bytes));
            }
        }
        PDFObject::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                write_object(out, item);
            }
            out.push(b']');
        }
        PDFObject::Dict(dict) => write_dict(out, dict),
        PDFObject::Stream(stream) => {
            write_dict(out, &stream.attrs);
            out.extend_from_slice(b"\nstream\n");
            out.extend_from_slice(stream.rawdata());
            out.extend_from_slice(b"\nendstream");
        }
        PDFObject::Ref(id) => {
            let _ = write!(out, "{} {} R", id.id, id.generation);
        }
    }
}

fn write_dict(out: &mut Vec<u8>, dict: &Dict) {
    out.extend_from_slice(b"<<");
    for (key, value) in dict {
        out.push(b' ');
        write_name(out, key);
        out.push(b' ');
        write_object(out, value);
    }
    out.extend_from_slice(b" >>");
}

/// Names are stored one char per byte; bytes that would end the token are
/// written as `#xx`.
fn write_name(out: &mut Vec<u8>, name: &str) {
    out.push(b'/');
    for c in name.chars() {
        let b = u8::try_from(u32::from(c)).unwrap_or(b'?');
        if is_regular(b) && b != b'#' && (0x21..0x7f).contains(&b) {
            out.push(b);
        } else {
            let _ = write!(out, "#{b:02X}");
        }
    }
}

/// Reals never use exponent notation and always carry a decimal point, so
/// they read back as reals.
fn write_real(out: &mut Vec<u8>, n: f64) {
    if !n.is_finite() {
        out.push(b'0');
        return;
    }
    let text = format!("{n}");
    out.extend_from_slice(text.as_bytes());
    if !text.contains('.') {
        out.extend_from_slice(b".0");
    }
}
