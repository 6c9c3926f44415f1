//! PDF value parser - builds [`PDFObject`]s from scanner tokens.
//!
//! Handles indirect references (`num num R`) through the scanner's
//! lookahead, so `12 0 obj` headers never turn into references.

use super::scanner::{Bounds, ByteScanner, Number};
use crate::error::{PdfError, Result};
use crate::filter::payload_range;
use crate::model::objects::{Dict, ObjectId, PDFObject, PDFStream};

/// Nesting limit for arrays and dictionaries.
const MAX_DEPTH: usize = 256;

/// An `id gen obj ... endobj` block read from a buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct IndirectObject {
    pub id: ObjectId,
    pub object: PDFObject,
    /// Whole block through `endobj`; content is the value span (through
    /// `endstream` for streams).
    pub bounds: Bounds,
}

/// Recursive-descent parser over a [`ByteScanner`].
pub struct ObjectParser<'a> {
    scanner: &'a ByteScanner,
}

impl<'a> ObjectParser<'a> {
    pub const fn new(scanner: &'a ByteScanner) -> Self {
        Self { scanner }
    }

    /// Parse the value starting at or after `pos`.
    ///
    /// Returns the value and the index right after it. Streams are not
    /// handled here: a stream's dictionary comes back as a `Dict` and the
    /// caller looks for the `stream` keyword.
    pub fn parse_at(&self, pos: usize) -> Result<(PDFObject, usize)> {
        self.parse_value(pos, 0)
    }

    /// Read the indirect object whose header starts at `pos`.
    ///
    /// `stream_length` turns the `/Length` entry of a stream dictionary
    /// into a byte count; it is how callers resolve indirect lengths. The
    /// payload must match that count exactly.
    pub fn read_indirect(
        &self,
        pos: usize,
        stream_length: &dyn Fn(&PDFObject) -> Result<usize>,
    ) -> Result<IndirectObject> {
        let s = self.scanner;
        if pos >= s.len() {
            return Err(PdfError::structural(
                pos,
                format!("object offset beyond end of data ({} bytes)", s.len()),
            ));
        }
        let (id, value_start) = s
            .parse_object_header(pos)
            .ok_or_else(|| PdfError::structural(pos, "expected 'id gen obj'"))?;
        let (object, mut end) = self.parse_at(value_start)?;

        let object = match object {
            PDFObject::Dict(attrs) => {
                let kw = s.skip_whitespace_and_comments(end);
                if s.parse_keyword(kw, b"stream").is_some() {
                    let data_start = s
                        .stream_data_start(kw)
                        .ok_or_else(|| PdfError::structural(kw, "bad EOL after 'stream'"))?;
                    let length = attrs
                        .get("Length")
                        .ok_or_else(|| PdfError::KeyError("Length".into()))
                        .and_then(stream_length)?;
                    let range = payload_range(s, data_start, length)?;
                    let end_kw = s.skip_whitespace(range.end);
                    end = end_kw + b"endstream".len();
                    let mut stream = PDFStream::new(attrs, s.slice(range.clone()));
                    stream.id = Some(id);
                    stream.data_offset = range.start;
                    PDFObject::Stream(Box::new(stream))
                } else {
                    PDFObject::Dict(attrs)
                }
            }
            other => other,
        };

        let k = s.skip_whitespace_and_comments(end);
        let endobj = s
            .parse_keyword(k, b"endobj")
            .ok_or_else(|| PdfError::structural(k, format!("missing 'endobj' for object {id}")))?;
        Ok(IndirectObject {
            id,
            object,
            bounds: Bounds::with_content(pos, endobj.end, value_start..end),
        })
    }

    fn parse_value(&self, pos: usize, depth: usize) -> Result<(PDFObject, usize)> {
        if depth > MAX_DEPTH {
            return Err(PdfError::structural(pos, "objects nested too deeply"));
        }
        let s = self.scanner;
        let i = s.skip_whitespace_and_comments(pos);
        let Some(b) = s.byte_at(i) else {
            return Err(PdfError::UnexpectedEof);
        };
        match b {
            b'/' => {
                let name = s
                    .parse_name(i)
                    .ok_or_else(|| PdfError::structural(i, "bad name"))?;
                Ok((PDFObject::Name(name.value), name.bounds.end))
            }
            b'(' => {
                let lit = s
                    .parse_literal_string(i)
                    .ok_or_else(|| PdfError::structural(i, "unterminated literal string"))?;
                Ok((PDFObject::String(lit.value.value), lit.bounds.end))
            }
            b'<' if s.byte_at(i + 1) == Some(b'<') => self.parse_dict(i, depth),
            b'<' => {
                let hex = s
                    .parse_hex_string(i)
                    .ok_or_else(|| PdfError::structural(i, "bad hex string"))?;
                Ok((PDFObject::String(hex.value.hex), hex.bounds.end))
            }
            b'[' => self.parse_array(i, depth),
            b'0'..=b'9' | b'+' | b'-' | b'.' => {
                if let Some(r) = s.parse_reference(i) {
                    return Ok((PDFObject::Ref(r.value), r.bounds.end));
                }
                let num = s
                    .parse_number(i)
                    .ok_or_else(|| PdfError::structural(i, "bad number"))?;
                let obj = match num.value {
                    Number::Integer(n) => PDFObject::Int(n),
                    Number::Real(n) => PDFObject::Real(n),
                };
                Ok((obj, num.bounds.end))
            }
            _ => {
                if let Some(b) = s.parse_boolean(i) {
                    return Ok((PDFObject::Bool(b.value), b.bounds.end));
                }
                if let Some(n) = s.parse_null(i) {
                    return Ok((PDFObject::Null, n.end));
                }
                Err(PdfError::structural(
                    i,
                    format!("unexpected byte 0x{b:02x} where a value was expected"),
                ))
            }
        }
    }

    fn parse_array(&self, start: usize, depth: usize) -> Result<(PDFObject, usize)> {
        let s = self.scanner;
        let mut items = Vec::new();
        let mut i = start + 1;
        loop {
            i = s.skip_whitespace_and_comments(i);
            match s.byte_at(i) {
                None => return Err(PdfError::structural(start, "unterminated array")),
                Some(b']') => return Ok((PDFObject::Array(items), i + 1)),
                Some(_) => {
                    let (value, end) = self.parse_value(i, depth + 1)?;
                    items.push(value);
                    i = end;
                }
            }
        }
    }

    fn parse_dict(&self, start: usize, depth: usize) -> Result<(PDFObject, usize)> {
        let s = self.scanner;
        let mut dict = Dict::new();
        let mut i = start + 2;
        loop {
            i = s.skip_whitespace_and_comments(i);
            if s.starts_with_at(i, b">>") {
                return Ok((PDFObject::Dict(dict), i + 2));
            }
            if i >= s.len() {
                return Err(PdfError::structural(start, "unterminated dictionary"));
            }
            let key = s
                .parse_name(i)
                .ok_or_else(|| PdfError::structural(i, "dictionary key is not a name"))?;
            let (value, end) = self.parse_value(key.bounds.end, depth + 1)?;
            dict.insert(key.value, value);
            i = end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::objects::ObjectId;

    fn parse(data: &[u8]) -> PDFObject {
        let scanner = ByteScanner::new(data.to_vec());
        ObjectParser::new(&scanner).parse_at(0).unwrap().0
    }

    #[test]
    fn test_parse_dict_with_refs() {
        let obj = parse(b"<< /Type /Catalog /Pages 2 0 R /Kids [3 0 R 4 0 R 5] >>");
        let dict = obj.as_dict().unwrap();
        assert_eq!(dict["Type"].as_name().unwrap(), "Catalog");
        assert_eq!(dict["Pages"].as_objref().unwrap(), ObjectId::new(2, 0));
        let kids = dict["Kids"].as_array().unwrap();
        assert_eq!(kids.len(), 3);
        assert_eq!(kids[2], PDFObject::Int(5));
    }

    #[test]
    fn test_parse_scalars() {
        assert_eq!(parse(b"  % lead\n-3.5"), PDFObject::Real(-3.5));
        assert_eq!(parse(b"(a\\)b)"), PDFObject::String(b"a)b".to_vec()));
        assert_eq!(parse(b"<414>"), PDFObject::String(vec![0x41, 0x40]));
        assert_eq!(parse(b"false"), PDFObject::Bool(false));
        assert_eq!(parse(b"null"), PDFObject::Null);
    }

    #[test]
    fn test_number_before_obj_keyword() {
        let scanner = ByteScanner::new(b"12 0 obj".to_vec());
        let (obj, end) = ObjectParser::new(&scanner).parse_at(0).unwrap();
        assert_eq!(obj, PDFObject::Int(12));
        assert_eq!(end, 2);
    }

    fn direct_length(obj: &PDFObject) -> Result<usize> {
        obj.as_usize()
    }

    #[test]
    fn test_read_indirect_stream() {
        let data = b"4 0 obj\n<< /Length 5 >>\nstream\nHELLO\nendstream\nendobj\n";
        let scanner = ByteScanner::new(data.to_vec());
        let ind = ObjectParser::new(&scanner)
            .read_indirect(0, &direct_length)
            .unwrap();
        assert_eq!(ind.id, ObjectId::new(4, 0));
        let stream = ind.object.as_stream().unwrap();
        assert_eq!(stream.rawdata(), b"HELLO");
        assert_eq!(stream.id, Some(ObjectId::new(4, 0)));
        assert_eq!(ind.bounds.end, data.len() - 1);
    }

    #[test]
    fn test_read_indirect_requires_endobj() {
        let scanner = ByteScanner::new(b"4 0 obj 42 5 0 obj".to_vec());
        assert!(matches!(
            ObjectParser::new(&scanner).read_indirect(0, &direct_length),
            Err(PdfError::Structural { .. })
        ));
    }

    #[test]
    fn test_errors() {
        for bad in [&b"<< /A 1"[..], b"[1 2", b"<< 1 2 >>", b"endobj"] {
            let scanner = ByteScanner::new(bad.to_vec());
            assert!(ObjectParser::new(&scanner).parse_at(0).is_err());
        }
        let deep = vec![b'['; 1000];
        let scanner = ByteScanner::new(deep);
        assert!(matches!(
            ObjectParser::new(&scanner).parse_at(0),
            Err(PdfError::Structural { .. })
        ));
    }
}
