//! Object streams (`/Type /ObjStm`).
//!
//! The decoded body starts with `N` pairs `objnum offset` and is followed,
//! from byte `/First` on, by the concatenated object bodies. Offsets are
//! relative to `/First`.

use crate::error::{PdfError, Result};
use crate::model::objects::{PDFObject, PDFStream};
use crate::parser::object::ObjectParser;
use crate::parser::scanner::{Bounds, ByteScanner};

/// Parsed header of one decoded object stream.
#[derive(Debug, Clone)]
pub struct ObjectStreamIndex {
    pub stream_id: u32,
    scanner: ByteScanner,
    first: usize,
    entries: Vec<(u32, usize)>,
}

impl ObjectStreamIndex {
    /// Read the header of `stream`, whose decoded payload is `decoded`.
    pub fn parse(stream_id: u32, stream: &PDFStream, decoded: Vec<u8>) -> Result<Self> {
        let int = |key: &str| -> Result<usize> {
            stream
                .get(key)
                .ok_or_else(|| PdfError::KeyError(format!("{key} in object stream {stream_id}")))?
                .as_usize()
        };
        let n = int("N")?;
        let first = int("First")?;
        if first > decoded.len() {
            return Err(PdfError::structural(
                first,
                format!("object stream {stream_id}: /First beyond decoded data"),
            ));
        }

        let scanner = ByteScanner::new(decoded);
        let mut entries = Vec::with_capacity(n.min(first / 4 + 1));
        let mut i = 0;
        for _ in 0..n {
            let (id, end) = read_header_int(&scanner, i, first, stream_id)?;
            let (offset, end) = read_header_int(&scanner, end, first, stream_id)?;
            let id = u32::try_from(id).map_err(|_| {
                PdfError::structural(i, format!("object stream {stream_id}: bad object number"))
            })?;
            entries.push((id, offset as usize));
            i = end;
        }
        Ok(Self {
            stream_id,
            scanner,
            first,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Object numbers in slot order.
    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    /// Decoded payload of the stream.
    pub const fn scanner(&self) -> &ByteScanner {
        &self.scanner
    }

    /// Parse the object in slot `index`, checking it is object `expected`.
    pub fn object_at(&self, index: usize, expected: u32) -> Result<PDFObject> {
        let pos = self.slot_start(index, expected)?;
        let (object, _) = ObjectParser::new(&self.scanner).parse_at(pos)?;
        Ok(object)
    }

    /// Span of the value in slot `index` within [`Self::scanner`].
    pub fn slot_bounds(&self, index: usize, expected: u32) -> Result<Bounds> {
        let pos = self.slot_start(index, expected)?;
        let start = self.scanner.skip_whitespace_and_comments(pos);
        let (_, end) = ObjectParser::new(&self.scanner).parse_at(start)?;
        Ok(Bounds::with_content(start, end, start..end))
    }

    fn slot_start(&self, index: usize, expected: u32) -> Result<usize> {
        let &(id, offset) = self.entries.get(index).ok_or_else(|| {
            PdfError::structural(
                0,
                format!(
                    "object stream {} has {} objects, index {index} requested",
                    self.stream_id,
                    self.entries.len()
                ),
            )
        })?;
        if id != expected {
            return Err(PdfError::structural(
                0,
                format!(
                    "object stream {} slot {index} holds object {id}, not {expected}",
                    self.stream_id
                ),
            ));
        }
        let pos = self.first + offset;
        if pos >= self.scanner.len() {
            return Err(PdfError::structural(
                pos,
                format!("object {id} offset beyond object stream {}", self.stream_id),
            ));
        }
        Ok(pos)
    }
}

fn read_header_int(
    scanner: &ByteScanner,
    pos: usize,
    first: usize,
    stream_id: u32,
) -> Result<(u64, usize)> {
    let i = scanner.skip_whitespace_and_comments(pos);
    scanner
        .parse_number(i)
        .filter(|n| n.bounds.end <= first)
        .and_then(|n| {
            let v = u64::try_from(n.value.as_i64()?).ok()?;
            Some((v, n.bounds.end))
        })
        .ok_or_else(|| {
            PdfError::structural(i, format!("object stream {stream_id}: bad header"))
        })
}
