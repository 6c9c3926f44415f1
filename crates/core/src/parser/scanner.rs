//! Byte-level lexical primitives over an immutable buffer.
//!
//! Every operation takes an explicit start index and never mutates the
//! scanner, so the same buffer can be scanned from several places at once
//! and decoded stream bodies reuse exactly the same primitives.

use super::strings::{HexString, LiteralString, decode_hex_digits, unescape_literal};
use crate::model::objects::ObjectId;
use bytes::Bytes;
use std::ops::Range;

/// Lexical class of a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteClass {
    Whitespace,
    Delimiter,
    Regular,
    Digit,
}

/// Classify a byte according to the PDF character sets.
pub const fn classify(b: u8) -> ByteClass {
    match b {
        0x00 | 0x09 | 0x0a | 0x0c | 0x0d | 0x20 => ByteClass::Whitespace,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%' => {
            ByteClass::Delimiter
        }
        b'0'..=b'9' => ByteClass::Digit,
        _ => ByteClass::Regular,
    }
}

#[inline]
pub const fn is_whitespace(b: u8) -> bool {
    matches!(classify(b), ByteClass::Whitespace)
}

#[inline]
pub const fn is_delimiter(b: u8) -> bool {
    matches!(classify(b), ByteClass::Delimiter)
}

/// Regular bytes are everything that is neither whitespace nor a delimiter,
/// digits included.
#[inline]
pub const fn is_regular(b: u8) -> bool {
    matches!(classify(b), ByteClass::Regular | ByteClass::Digit)
}

#[inline]
const fn is_eol(b: u8) -> bool {
    b == b'\r' || b == b'\n'
}

/// A lexical span. `end` is exclusive.
///
/// Invariant: `start <= content.start <= content.end <= end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bounds {
    pub start: usize,
    pub end: usize,
    /// Inner span, e.g. the bytes between delimiters or a stream payload.
    pub content: Option<Range<usize>>,
}

impl Bounds {
    pub const fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            content: None,
        }
    }

    pub const fn with_content(start: usize, end: usize, content: Range<usize>) -> Self {
        Self {
            start,
            end,
            content: Some(content),
        }
    }

    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn content_start(&self) -> usize {
        self.content.as_ref().map_or(self.start, |c| c.start)
    }

    pub fn content_end(&self) -> usize {
        self.content.as_ref().map_or(self.end, |c| c.end)
    }

    /// The inner span, or the whole span when there is none.
    pub fn content_range(&self) -> Range<usize> {
        self.content_start()..self.content_end()
    }
}

/// Direction for [`ByteScanner::find_subsequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A token value together with where it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub bounds: Bounds,
}

impl<T> Parsed<T> {
    const fn new(value: T, bounds: Bounds) -> Self {
        Self { value, bounds }
    }
}

/// A numeric token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i64),
    Real(f64),
}

impl Number {
    pub const fn as_i64(self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(n),
            Self::Real(_) => None,
        }
    }

    pub const fn as_f64(self) -> f64 {
        match self {
            Self::Integer(n) => n as f64,
            Self::Real(n) => n,
        }
    }
}

/// Result of a one-token lookahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Boolean,
    Number,
    StringLiteral,
    StringHex,
    Name,
    Array,
    Dictionary,
    Stream,
    Reference,
    Comment,
    Unknown,
}

/// Lexical scanner over a shared, immutable byte buffer.
#[derive(Debug, Clone, Default)]
pub struct ByteScanner {
    data: Bytes,
}

impl ByteScanner {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// The scanned bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The underlying shared buffer.
    pub const fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn byte_at(&self, i: usize) -> Option<u8> {
        self.data.get(i).copied()
    }

    /// Zero-copy sub-slice of the buffer. Out of range bounds are clamped.
    pub fn slice(&self, range: Range<usize>) -> Bytes {
        let end = range.end.min(self.data.len());
        let start = range.start.min(end);
        self.data.slice(start..end)
    }

    pub fn starts_with_at(&self, i: usize, needle: &[u8]) -> bool {
        self.data
            .get(i..)
            .is_some_and(|rest| rest.starts_with(needle))
    }

    /// Search `needle` inside `[min_index, max_index)`.
    ///
    /// Forward returns the first match, backward the last one. With
    /// `closed_only`, a match directly followed (in the search direction)
    /// by a regular byte is skipped, so `R` never matches the start of
    /// `Root`.
    pub fn find_subsequence(
        &self,
        needle: &[u8],
        direction: Direction,
        min_index: usize,
        max_index: usize,
        closed_only: bool,
    ) -> Option<Bounds> {
        let data = self.data();
        let max_index = max_index.min(data.len());
        if needle.is_empty() || max_index < min_index || max_index - min_index < needle.len() {
            return None;
        }
        let last_start = max_index - needle.len();
        let is_match = |s: usize| -> bool {
            if &data[s..s + needle.len()] != needle {
                return false;
            }
            if !closed_only {
                return true;
            }
            let neighbour = match direction {
                Direction::Forward => data.get(s + needle.len()).copied(),
                Direction::Backward => s.checked_sub(1).map(|p| data[p]),
            };
            !neighbour.is_some_and(is_regular)
        };
        let found = match direction {
            Direction::Forward => (min_index..=last_start).find(|&s| is_match(s)),
            Direction::Backward => (min_index..=last_start).rev().find(|&s| is_match(s)),
        };
        found.map(|s| Bounds::new(s, s + needle.len()))
    }

    /// Skip whitespace only.
    pub fn skip_whitespace(&self, mut i: usize) -> usize {
        let data = self.data();
        while i < data.len() && is_whitespace(data[i]) {
            i += 1;
        }
        i
    }

    /// Skip whitespace and `%` comments. Returns the index of the next
    /// significant byte, or the buffer length.
    pub fn skip_whitespace_and_comments(&self, mut i: usize) -> usize {
        let data = self.data();
        while i < data.len() {
            if is_whitespace(data[i]) {
                i += 1;
            } else if data[i] == b'%' {
                i = self.comment_end(i);
            } else {
                break;
            }
        }
        i
    }

    /// End of the comment starting at `i` (the EOL byte is not included).
    fn comment_end(&self, i: usize) -> usize {
        let data = self.data();
        let mut j = i + 1;
        while j < data.len() && !is_eol(data[j]) {
            j += 1;
        }
        j
    }

    /// Bounds of a `%` comment at `i`; content excludes the `%`.
    pub fn get_comment_bounds(&self, i: usize) -> Option<Bounds> {
        if self.byte_at(i)? != b'%' {
            return None;
        }
        let end = self.comment_end(i);
        Some(Bounds::with_content(i, end, i + 1..end))
    }

    /// Whether the exact keyword `kw` starts at `i` and is not followed by
    /// a regular byte.
    pub fn parse_keyword(&self, i: usize, kw: &[u8]) -> Option<Bounds> {
        if !self.starts_with_at(i, kw) {
            return None;
        }
        let end = i + kw.len();
        if self.byte_at(end).is_some_and(is_regular) {
            return None;
        }
        Some(Bounds::new(i, end))
    }

    /// Parse an integer or real starting exactly at `i`.
    ///
    /// The token has to end at whitespace, a delimiter or the end of the
    /// buffer; `12abc` and `1.2.3` are not numbers.
    pub fn parse_number(&self, i: usize) -> Option<Parsed<Number>> {
        let data = self.data();
        let mut j = i;
        if matches!(data.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        let mut digits = 0usize;
        let mut has_dot = false;
        while let Some(&b) = data.get(j) {
            if b.is_ascii_digit() {
                digits += 1;
            } else if b == b'.' && !has_dot {
                has_dot = true;
            } else {
                break;
            }
            j += 1;
        }
        if digits == 0 || data.get(j).is_some_and(|&b| is_regular(b)) {
            return None;
        }
        let text = std::str::from_utf8(&data[i..j]).ok()?;
        let value = if has_dot {
            Number::Real(text.parse().ok()?)
        } else {
            match text.parse::<i64>() {
                Ok(n) => Number::Integer(n),
                // Out of i64 range; keep the magnitude as a real.
                Err(_) => Number::Real(text.parse().ok()?),
            }
        };
        Some(Parsed::new(value, Bounds::new(i, j)))
    }

    /// Parse an unsigned integer written with digits only.
    fn parse_unsigned(&self, i: usize) -> Option<Parsed<u64>> {
        if !self.byte_at(i)?.is_ascii_digit() {
            return None;
        }
        let parsed = self.parse_number(i)?;
        let n = u64::try_from(parsed.value.as_i64()?).ok()?;
        Some(Parsed::new(n, parsed.bounds))
    }

    /// Parse a `/Name` at `i`. The value excludes the slash; `#xx`
    /// sequences are kept as written.
    pub fn parse_name(&self, i: usize) -> Option<Parsed<String>> {
        let data = self.data();
        if data.get(i) != Some(&b'/') {
            return None;
        }
        let mut j = i + 1;
        while j < data.len() && is_regular(data[j]) {
            j += 1;
        }
        let name = name_from_bytes(&data[i + 1..j]);
        Some(Parsed::new(name, Bounds::with_content(i, j, i + 1..j)))
    }

    pub fn parse_boolean(&self, i: usize) -> Option<Parsed<bool>> {
        if let Some(b) = self.parse_keyword(i, b"true") {
            return Some(Parsed::new(true, b));
        }
        self.parse_keyword(i, b"false")
            .map(|b| Parsed::new(false, b))
    }

    pub fn parse_null(&self, i: usize) -> Option<Bounds> {
        self.parse_keyword(i, b"null")
    }

    /// Parse a `( ... )` string at `i`.
    ///
    /// Unescaped parentheses nest; `\(` and `\)` are data. Returns `None`
    /// for an unterminated string.
    pub fn parse_literal_string(&self, i: usize) -> Option<Parsed<LiteralString>> {
        let data = self.data();
        if data.get(i) != Some(&b'(') {
            return None;
        }
        let mut depth = 1usize;
        let mut j = i + 1;
        loop {
            match *data.get(j)? {
                b'\\' => {
                    // The escaped byte never counts as a delimiter.
                    j += 2;
                    continue;
                }
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
            j += 1;
        }
        let raw = data[i + 1..j].to_vec();
        let value = unescape_literal(&raw);
        Some(Parsed::new(
            LiteralString { value, raw },
            Bounds::with_content(i, j + 1, i + 1..j),
        ))
    }

    /// Parse a `< ... >` hex string at `i`. `<<` is not a hex string.
    pub fn parse_hex_string(&self, i: usize) -> Option<Parsed<HexString>> {
        let data = self.data();
        if data.get(i) != Some(&b'<') || data.get(i + 1) == Some(&b'<') {
            return None;
        }
        let mut digits = Vec::new();
        let mut j = i + 1;
        loop {
            let b = *data.get(j)?;
            if b == b'>' {
                break;
            }
            if b.is_ascii_hexdigit() {
                digits.push(b);
            } else if !is_whitespace(b) {
                return None;
            }
            j += 1;
        }
        let hex = decode_hex_digits(&digits);
        let text = String::from_utf8(digits).ok()?;
        Some(Parsed::new(
            HexString {
                text,
                hex,
                raw: data[i + 1..j].to_vec(),
            },
            Bounds::with_content(i, j + 1, i + 1..j),
        ))
    }

    /// Parse `id gen R` at `i`.
    pub fn parse_reference(&self, i: usize) -> Option<Parsed<ObjectId>> {
        let id = self.parse_unsigned(i)?;
        let j = self.skip_whitespace_and_comments(id.bounds.end);
        if j == id.bounds.end {
            return None;
        }
        let generation = self.parse_unsigned(j)?;
        let k = self.skip_whitespace_and_comments(generation.bounds.end);
        if k == generation.bounds.end {
            return None;
        }
        let r = self.parse_keyword(k, b"R")?;
        let object_id = ObjectId::new(
            u32::try_from(id.value).ok()?,
            u16::try_from(generation.value).ok()?,
        );
        Some(Parsed::new(object_id, Bounds::new(i, r.end)))
    }

    /// Bounds of the `[ ... ]` array at `i`, nesting-aware. Content is the
    /// span between the brackets.
    pub fn get_array_bounds(&self, i: usize) -> Option<Bounds> {
        let data = self.data();
        if data.get(i) != Some(&b'[') {
            return None;
        }
        let mut depth = 0usize;
        let mut j = i;
        while j < data.len() {
            match data[j] {
                b'(' => {
                    j = self.parse_literal_string(j)?.bounds.end;
                    continue;
                }
                b'%' => {
                    j = self.comment_end(j);
                    continue;
                }
                b'<' if data.get(j + 1) == Some(&b'<') => {
                    j = self.get_dict_bounds(j)?.end;
                    continue;
                }
                b'<' => {
                    j = self.parse_hex_string(j)?.bounds.end;
                    continue;
                }
                b'[' => depth += 1,
                b']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(Bounds::with_content(i, j + 1, i + 1..j));
                    }
                }
                _ => {}
            }
            j += 1;
        }
        None
    }

    /// Bounds of the `<< ... >>` dictionary at `i`. Content is the span
    /// between the delimiters.
    ///
    /// `<<` and `>>` are consumed as whole two-byte tokens, so a byte that
    /// already paired up is never reused: `>>>` closes one level and leaves
    /// a stray `>`. Single `<`/`>` only occur as hex string delimiters, and
    /// anything inside a literal string is skipped.
    pub fn get_dict_bounds(&self, i: usize) -> Option<Bounds> {
        let data = self.data();
        if !self.starts_with_at(i, b"<<") {
            return None;
        }
        let mut depth = 0usize;
        let mut j = i;
        while j < data.len() {
            match data[j] {
                b'(' => j = self.parse_literal_string(j)?.bounds.end,
                b'%' => j = self.comment_end(j),
                b'<' if data.get(j + 1) == Some(&b'<') => {
                    depth += 1;
                    j += 2;
                }
                b'<' => j = self.parse_hex_string(j)?.bounds.end,
                b'>' if data.get(j + 1) == Some(&b'>') => {
                    depth -= 1;
                    j += 2;
                    if depth == 0 {
                        return Some(Bounds::with_content(i, j, i + 2..j - 2));
                    }
                }
                // Unpaired '>' cannot appear in a well-formed dictionary.
                b'>' => return None,
                _ => j += 1,
            }
        }
        None
    }

    /// Bounds of a stream whose `stream` keyword starts at `i`.
    ///
    /// Content is the payload up to (not including) the end-of-line marker
    /// in front of the first `endstream`. The declared `/Length` is checked
    /// separately by the filter pipeline.
    pub fn get_stream_bounds(&self, i: usize) -> Option<Bounds> {
        let data_start = self.stream_data_start(i)?;
        let end_kw =
            self.find_subsequence(b"endstream", Direction::Forward, data_start, self.len(), true)?;
        let payload_end = self.strip_eol_before(data_start, end_kw.start);
        Some(Bounds::with_content(i, end_kw.end, data_start..payload_end))
    }

    /// Index of the first payload byte after the `stream` keyword at `i`.
    pub fn stream_data_start(&self, i: usize) -> Option<usize> {
        let kw = self.parse_keyword(i, b"stream")?;
        let data = self.data();
        let mut j = kw.end;
        match (data.get(j), data.get(j + 1)) {
            (Some(b'\r'), Some(b'\n')) => j += 2,
            (Some(b'\n' | b'\r'), _) => j += 1,
            // Nothing follows the keyword: empty payload at the end of data.
            (None, _) => {}
            _ => return None,
        }
        Some(j)
    }

    /// Index after a single EOL marker (`\r\n`, `\r` or `\n`) at `i`, or `i`.
    pub(crate) fn skip_eol(&self, i: usize) -> usize {
        match (self.byte_at(i), self.byte_at(i + 1)) {
            (Some(b'\r'), Some(b'\n')) => i + 2,
            (Some(b'\r' | b'\n'), _) => i + 1,
            _ => i,
        }
    }

    /// Move `end` back over a single EOL marker, never before `floor`.
    pub(crate) fn strip_eol_before(&self, floor: usize, end: usize) -> usize {
        let data = self.data();
        if end >= floor + 2 && &data[end - 2..end] == b"\r\n" {
            end - 2
        } else if end > floor && is_eol(data[end - 1]) {
            end - 1
        } else {
            end
        }
    }

    /// Bounds of `id gen obj <value> endobj` starting at `i`.
    ///
    /// Content is the span of the value itself. For streams the value span
    /// runs through `endstream`.
    pub fn get_indirect_object_bounds(&self, i: usize) -> Option<Parsed<ObjectId>> {
        let (id, value_start) = self.parse_object_header(i)?;
        let (_, value) = self.get_value_bounds(value_start)?;
        let k = self.skip_whitespace_and_comments(value.end);
        let endobj = self.parse_keyword(k, b"endobj")?;
        Some(Parsed::new(
            id,
            Bounds::with_content(i, endobj.end, value.start..value.end),
        ))
    }

    /// Parse `id gen obj` at `i`. Returns the id and the index of the first
    /// significant byte after `obj`.
    pub fn parse_object_header(&self, i: usize) -> Option<(ObjectId, usize)> {
        let id = self.parse_unsigned(i)?;
        let j = self.skip_whitespace_and_comments(id.bounds.end);
        let generation = self.parse_unsigned(j)?;
        let k = self.skip_whitespace_and_comments(generation.bounds.end);
        let obj = self.parse_keyword(k, b"obj")?;
        let object_id = ObjectId::new(
            u32::try_from(id.value).ok()?,
            u16::try_from(generation.value).ok()?,
        );
        Some((object_id, self.skip_whitespace_and_comments(obj.end)))
    }

    /// Kind and bounds of the value starting at `i` (leading whitespace is
    /// skipped).
    pub fn get_value_bounds(&self, i: usize) -> Option<(ValueKind, Bounds)> {
        let i = self.skip_whitespace(i);
        let kind = self.classify_value_at(i);
        let bounds = match kind {
            ValueKind::Null => self.parse_null(i)?,
            ValueKind::Boolean => self.parse_boolean(i)?.bounds,
            ValueKind::Number => self.parse_number(i)?.bounds,
            ValueKind::Reference => self.parse_reference(i)?.bounds,
            ValueKind::Name => self.parse_name(i)?.bounds,
            ValueKind::StringLiteral => self.parse_literal_string(i)?.bounds,
            ValueKind::StringHex => self.parse_hex_string(i)?.bounds,
            ValueKind::Array => self.get_array_bounds(i)?,
            ValueKind::Dictionary => self.get_dict_bounds(i)?,
            ValueKind::Stream => {
                let dict = self.get_dict_bounds(i)?;
                let kw = self.skip_whitespace_and_comments(dict.end);
                let stream = self.get_stream_bounds(kw)?;
                Bounds::with_content(i, stream.end, stream.content_range())
            }
            ValueKind::Comment => self.get_comment_bounds(i)?,
            ValueKind::Unknown => return None,
        };
        Some((kind, bounds))
    }

    /// One-token lookahead classification of the value at `i`.
    ///
    /// `12 0 R` is a reference; `12 0 obj` and a lone `12` are numbers.
    pub fn classify_value_at(&self, i: usize) -> ValueKind {
        let i = self.skip_whitespace(i);
        let Some(b) = self.byte_at(i) else {
            return ValueKind::Unknown;
        };
        match b {
            b'%' => ValueKind::Comment,
            b'(' => ValueKind::StringLiteral,
            b'[' => ValueKind::Array,
            b'/' => ValueKind::Name,
            b'<' if self.byte_at(i + 1) == Some(b'<') => match self.get_dict_bounds(i) {
                Some(dict) => {
                    let k = self.skip_whitespace_and_comments(dict.end);
                    if self.parse_keyword(k, b"stream").is_some() {
                        ValueKind::Stream
                    } else {
                        ValueKind::Dictionary
                    }
                }
                None => ValueKind::Unknown,
            },
            b'<' => ValueKind::StringHex,
            b'0'..=b'9' | b'+' | b'-' | b'.' => {
                if self.parse_number(i).is_none() {
                    ValueKind::Unknown
                } else if self.parse_reference(i).is_some() {
                    ValueKind::Reference
                } else {
                    ValueKind::Number
                }
            }
            b't' | b'f' if self.parse_boolean(i).is_some() => ValueKind::Boolean,
            b'n' if self.parse_null(i).is_some() => ValueKind::Null,
            _ => ValueKind::Unknown,
        }
    }
}

/// Map name bytes to a `String` one char per byte, so arbitrary bytes
/// survive.
pub(crate) fn name_from_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}
