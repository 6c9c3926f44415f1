//! Cross-reference resolution.
//!
//! Walks the incremental-update chain from the last `startxref` back
//! through every `/Prev`, reading classic tables, xref streams and hybrid
//! files, and merges everything into one [`XRefMap`].

use crate::error::{PdfError, Result};
use crate::filter;
use crate::model::objects::{Dict, ObjectId, PDFObject};
use crate::parser::object::ObjectParser;
use crate::parser::scanner::{ByteScanner, Direction};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

/// Where the bytes of an object live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    /// Indirect object at a byte offset in the file.
    Used { offset: usize },
    /// Object `index` inside the object stream `stream_id`.
    Compressed { stream_id: u32, index: usize },
    /// Deleted object; `next_free_id` links the free list.
    Free { next_free_id: u32 },
}

impl Reference {
    pub const fn is_free(&self) -> bool {
        matches!(self, Self::Free { .. })
    }
}

/// One cross-reference record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XRefEntry {
    /// Generation of the object. Compressed objects are always 0; for free
    /// entries this is the generation the id would be reused with.
    pub generation: u16,
    pub reference: Reference,
}

/// How a revision stores its cross-reference data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Table,
    Stream,
    /// A table whose trailer points at an extra xref stream (`/XRefStm`).
    Hybrid,
    /// Rebuilt by scanning the file for object headers.
    Recovered,
}

/// One revision's cross-reference data.
#[derive(Debug, Clone)]
pub struct XRefSection {
    pub kind: SectionKind,
    pub offset: usize,
    pub entries: FxHashMap<u32, XRefEntry>,
    pub trailer: Dict,
}

impl XRefSection {
    fn new(kind: SectionKind, offset: usize) -> Self {
        Self {
            kind,
            offset,
            entries: FxHashMap::default(),
            trailer: Dict::new(),
        }
    }

    fn offset_entry(&self, key: &str) -> Result<Option<usize>> {
        self.trailer
            .get(key)
            .map(|v| v.as_usize())
            .transpose()
    }

    /// `/Prev` of this revision.
    pub fn prev(&self) -> Result<Option<usize>> {
        self.offset_entry("Prev")
    }

    /// `/XRefStm` of a table revision.
    pub fn xref_stm(&self) -> Result<Option<usize>> {
        self.offset_entry("XRefStm")
    }

    /// Fold the xref stream of a hybrid file into its table.
    ///
    /// Compressed entries from the stream replace whatever the table says
    /// (usually a placeholder free record); other stream entries only fill
    /// gaps.
    fn absorb_hybrid(&mut self, stream: Self) {
        for (id, entry) in stream.entries {
            if matches!(entry.reference, Reference::Compressed { .. }) {
                self.entries.insert(id, entry);
            } else {
                self.entries.entry(id).or_insert(entry);
            }
        }
        self.kind = SectionKind::Hybrid;
    }
}

/// Summary of a section that went into an [`XRefMap`].
#[derive(Debug, Clone)]
pub struct SectionInfo {
    pub kind: SectionKind,
    pub offset: usize,
    pub entries: usize,
    pub trailer: Dict,
}

/// Merged cross-reference map of a document.
#[derive(Debug, Clone, Default)]
pub struct XRefMap {
    entries: FxHashMap<u32, XRefEntry>,
    trailer: Dict,
    sections: Vec<SectionInfo>,
}

impl XRefMap {
    /// Look up an object.
    ///
    /// A freed id resolves to its [`Reference::Free`] entry whatever the
    /// requested generation; in-use entries only match their exact
    /// generation.
    pub fn resolve(&self, id: ObjectId) -> Option<Reference> {
        let entry = self.entries.get(&id.id)?;
        match entry.reference {
            Reference::Free { .. } => Some(entry.reference),
            _ if entry.generation == id.generation => Some(entry.reference),
            _ => None,
        }
    }

    /// Raw entry for an object number.
    pub fn entry(&self, id: u32) -> Option<&XRefEntry> {
        self.entries.get(&id)
    }

    /// All in-use objects, sorted.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.reference.is_free())
            .map(|(&id, e)| ObjectId::new(id, e.generation))
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Every entry including free ones, sorted by object number.
    pub fn entries(&self) -> Vec<(u32, XRefEntry)> {
        let mut all: Vec<_> = self.entries.iter().map(|(&id, &e)| (id, e)).collect();
        all.sort_unstable_by_key(|(id, _)| *id);
        all
    }

    /// Merged trailer. Each key keeps the value from the newest revision
    /// that has it.
    pub const fn trailer(&self) -> &Dict {
        &self.trailer
    }

    /// Sections newest first.
    pub fn sections(&self) -> &[SectionInfo] {
        &self.sections
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge a section that is older than everything merged so far.
    fn merge_older(&mut self, section: XRefSection) {
        for (&id, &entry) in &section.entries {
            self.entries.entry(id).or_insert(entry);
        }
        for (key, value) in &section.trailer {
            if !self.trailer.contains_key(key) {
                self.trailer.insert(key.clone(), value.clone());
            }
        }
        self.sections.push(SectionInfo {
            kind: section.kind,
            offset: section.offset,
            entries: section.entries.len(),
            trailer: section.trailer,
        });
    }
}

/// Offset named by the last `startxref` in the file.
pub fn find_startxref(scanner: &ByteScanner) -> Result<usize> {
    let kw = scanner
        .find_subsequence(b"startxref", Direction::Backward, 0, scanner.len(), true)
        .ok_or_else(|| PdfError::structural(scanner.len(), "no 'startxref' keyword"))?;
    let i = scanner.skip_whitespace_and_comments(kw.end);
    let num = scanner
        .parse_number(i)
        .and_then(|n| n.value.as_i64())
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| PdfError::structural(i, "'startxref' is not followed by an offset"))?;
    Ok(num)
}

/// Build the cross-reference map by following the `/Prev` chain.
pub fn load(scanner: &ByteScanner) -> Result<XRefMap> {
    load_with(scanner, false)
}

/// Like [`load`], but rebuilds the map with [`recover`] when the chain
/// cannot be read and `recover_broken` is set. A cyclic chain stays fatal.
pub fn load_with(scanner: &ByteScanner, recover_broken: bool) -> Result<XRefMap> {
    let fallback = |err: PdfError| -> Result<XRefMap> {
        if recover_broken {
            warn!(%err, "cross-reference chain unreadable, scanning for objects");
            recover(scanner)
        } else {
            Err(err)
        }
    };

    let start = match find_startxref(scanner) {
        Ok(start) => start,
        Err(err) => return fallback(err),
    };
    let mut map = XRefMap::default();
    let mut visited = FxHashSet::default();
    let mut next = Some(start);

    while let Some(offset) = next {
        if !visited.insert(offset) {
            return Err(PdfError::structural(
                offset,
                "cyclic /Prev chain in cross-reference sections",
            ));
        }
        let section = match read_revision(scanner, offset, &mut visited) {
            Ok(section) => section,
            Err(err) if is_cycle(&err) => return Err(err),
            Err(err) => return fallback(err),
        };
        debug!(
            kind = ?section.kind,
            offset,
            entries = section.entries.len(),
            "read xref section"
        );
        next = match section.prev() {
            Ok(prev) => prev,
            Err(err) => return fallback(err),
        };
        map.merge_older(section);
    }
    Ok(map)
}

const XREF_STM_CYCLE: &str = "/XRefStm points at a visited section";

fn is_cycle(err: &PdfError) -> bool {
    matches!(err, PdfError::Structural { msg, .. } if msg == XREF_STM_CYCLE)
}

/// One revision, with the `/XRefStm` of a hybrid file folded in.
fn read_revision(
    scanner: &ByteScanner,
    offset: usize,
    visited: &mut FxHashSet<usize>,
) -> Result<XRefSection> {
    let mut section = read_section(scanner, offset)?;
    if section.kind == SectionKind::Table
        && let Some(stm) = section.xref_stm()?
    {
        if !visited.insert(stm) {
            return Err(PdfError::structural(stm, XREF_STM_CYCLE));
        }
        let stream = read_stream(scanner, stm)?;
        section.absorb_hybrid(stream);
    }
    Ok(section)
}

/// Read the table or stream section at `offset`.
pub fn read_section(scanner: &ByteScanner, offset: usize) -> Result<XRefSection> {
    let i = scanner.skip_whitespace(offset);
    if scanner.parse_keyword(i, b"xref").is_some() {
        read_table(scanner, i)
    } else {
        read_stream(scanner, offset)
    }
}

fn expect_unsigned(scanner: &ByteScanner, i: usize, what: &str) -> Result<(u64, usize)> {
    let parsed = scanner
        .parse_number(i)
        .filter(|_| scanner.byte_at(i).is_some_and(|b| b.is_ascii_digit()))
        .ok_or_else(|| PdfError::structural(i, format!("expected {what}")))?;
    let n = parsed
        .value
        .as_i64()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| PdfError::structural(i, format!("expected {what}")))?;
    Ok((n, parsed.bounds.end))
}

/// Classic `xref` table followed by `trailer << ... >>`.
fn read_table(scanner: &ByteScanner, offset: usize) -> Result<XRefSection> {
    let mut section = XRefSection::new(SectionKind::Table, offset);
    let mut i = offset + b"xref".len();

    loop {
        i = scanner.skip_whitespace_and_comments(i);
        if i >= scanner.len() {
            return Err(PdfError::structural(offset, "xref table without trailer"));
        }
        if let Some(kw) = scanner.parse_keyword(i, b"trailer") {
            i = kw.end;
            break;
        }

        let (start, end) = expect_unsigned(scanner, i, "subsection start")?;
        i = scanner.skip_whitespace(end);
        let (count, end) = expect_unsigned(scanner, i, "subsection count")?;
        i = end;

        let mut base = start;
        for n in 0..count {
            i = scanner.skip_whitespace(i);
            let record = i;
            let (field1, end) = expect_unsigned(scanner, i, "xref record offset")?;
            i = scanner.skip_whitespace(end);
            let (generation, end) = expect_unsigned(scanner, i, "xref record generation")?;
            i = scanner.skip_whitespace(end);
            let marker = if scanner.parse_keyword(i, b"n").is_some() {
                b'n'
            } else if scanner.parse_keyword(i, b"f").is_some() {
                b'f'
            } else {
                return Err(PdfError::structural(i, "xref record marker must be 'n' or 'f'"));
            };
            i += 1;

            // Some writers start the first subsection at 1 but still emit the
            // object 0 head of the free list.
            if n == 0 && base > 0 && marker == b'f' && field1 == 0 && generation == 65535 {
                warn!(start = base, "renumbering xref subsection to start at 0");
                base -= 1;
            }

            let id = u32::try_from(base + n)
                .map_err(|_| PdfError::structural(record, "object number out of range"))?;
            let generation = u16::try_from(generation)
                .map_err(|_| PdfError::structural(record, "generation out of range"))?;
            let reference = if marker == b'n' {
                Reference::Used {
                    offset: field1 as usize,
                }
            } else {
                Reference::Free {
                    next_free_id: u32::try_from(field1).unwrap_or(0),
                }
            };
            section.entries.insert(
                id,
                XRefEntry {
                    generation,
                    reference,
                },
            );
        }
    }

    let (trailer, _) = ObjectParser::new(scanner).parse_at(i)?;
    section.trailer = match trailer {
        PDFObject::Dict(d) => d,
        other => {
            return Err(PdfError::TypeError {
                expected: "trailer dict",
                got: other.type_name(),
            });
        }
    };
    Ok(section)
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// Xref stream (`/Type /XRef`) at `offset`.
fn read_stream(scanner: &ByteScanner, offset: usize) -> Result<XRefSection> {
    let direct_length = |obj: &PDFObject| -> Result<usize> {
        match obj {
            PDFObject::Ref(_) => Err(PdfError::structural(
                offset,
                "xref stream /Length must be a direct integer",
            )),
            other => other.as_usize(),
        }
    };
    let indirect = ObjectParser::new(scanner).read_indirect(offset, &direct_length)?;
    let stream = indirect.object.as_stream().map_err(|_| {
        PdfError::structural(offset, "expected 'xref' or an xref stream object")
    })?;
    if stream.type_name() != Some("XRef") {
        return Err(PdfError::structural(offset, "stream at xref offset is not /Type /XRef"));
    }

    let widths = stream
        .get("W")
        .ok_or_else(|| PdfError::KeyError("W".into()))?
        .as_array()?;
    if widths.len() != 3 {
        return Err(PdfError::structural(offset, "/W must have 3 elements"));
    }
    let mut w = [0usize; 3];
    for (slot, value) in w.iter_mut().zip(widths) {
        *slot = value.as_usize()?;
        if *slot > 8 {
            return Err(PdfError::structural(offset, "/W field wider than 8 bytes"));
        }
    }
    let entry_size = w[0] + w[1] + w[2];
    if entry_size == 0 {
        return Err(PdfError::structural(offset, "/W describes empty records"));
    }

    let size = stream
        .get("Size")
        .ok_or_else(|| PdfError::KeyError("Size".into()))?
        .as_usize()?;
    let index: Vec<(u64, usize)> = match stream.get("Index") {
        Some(idx) => {
            let arr = idx.as_array()?;
            if arr.len() % 2 != 0 {
                return Err(PdfError::structural(offset, "/Index must hold pairs"));
            }
            arr.chunks_exact(2)
                .map(|pair| Ok((pair[0].as_usize()? as u64, pair[1].as_usize()?)))
                .collect::<Result<_>>()?
        }
        None => vec![(0, size)],
    };

    let chain = filter::filter_chain(&stream.attrs)?;
    let data = filter::decode(stream.rawdata(), &chain)?;

    let mut section = XRefSection::new(SectionKind::Stream, offset);
    let mut records = data.chunks_exact(entry_size);
    'subsections: for (start, count) in index {
        for n in 0..count as u64 {
            let Some(record) = records.next() else {
                warn!(offset, "xref stream data ends before /Index is exhausted");
                break 'subsections;
            };
            let (f0, rest) = record.split_at(w[0]);
            let (f1, f2) = rest.split_at(w[1]);
            // A zero-width type field defaults to 1.
            let kind = if w[0] == 0 { 1 } else { read_be(f0) };
            let (field1, field2) = (read_be(f1), read_be(f2));
            let id = u32::try_from(start + n)
                .map_err(|_| PdfError::structural(offset, "object number out of range"))?;

            let entry = match kind {
                0 => XRefEntry {
                    generation: u16::try_from(field2).unwrap_or(u16::MAX),
                    reference: Reference::Free {
                        next_free_id: u32::try_from(field1).unwrap_or(0),
                    },
                },
                1 => XRefEntry {
                    generation: u16::try_from(field2).map_err(|_| {
                        PdfError::structural(offset, "generation out of range")
                    })?,
                    reference: Reference::Used {
                        offset: field1 as usize,
                    },
                },
                2 => XRefEntry {
                    generation: 0,
                    reference: Reference::Compressed {
                        stream_id: u32::try_from(field1).map_err(|_| {
                            PdfError::structural(offset, "object stream number out of range")
                        })?,
                        index: field2 as usize,
                    },
                },
                // Unknown types are null references.
                _ => continue,
            };
            section.entries.insert(id, entry);
        }
    }

    for (key, value) in &stream.attrs {
        if !matches!(
            key.as_str(),
            "Length" | "Filter" | "DecodeParms" | "W" | "Index" | "Type"
        ) {
            section.trailer.insert(key.clone(), value.clone());
        }
    }
    Ok(section)
}

/// Rebuild a map by scanning for `id gen obj` headers.
///
/// Later headers override earlier ones, as later bytes belong to newer
/// revisions. The trailer is assembled from every `trailer` dictionary and
/// xref stream dictionary in the file, newest first.
pub fn recover(scanner: &ByteScanner) -> Result<XRefMap> {
    use regex::bytes::Regex;

    let re = Regex::new(r"(\d+)\s+(\d+)\s+obj\b")
        .map_err(|e| PdfError::DecodeError(e.to_string()))?;
    let mut section = XRefSection::new(SectionKind::Recovered, 0);
    let mut stream_trailers = Vec::new();
    let parser = ObjectParser::new(scanner);

    for cap in re.captures_iter(scanner.data()) {
        let Some(whole) = cap.get(0) else { continue };
        let pos = whole.start();
        // Only accept headers on a token boundary.
        if pos > 0 && scanner.byte_at(pos - 1).is_some_and(|b| b.is_ascii_digit()) {
            continue;
        }
        let parse = |m: &[u8]| std::str::from_utf8(m).ok().and_then(|s| s.parse::<u64>().ok());
        let (Some(id), Some(generation)) = (parse(&cap[1]), parse(&cap[2])) else {
            continue;
        };
        let (Ok(id), Ok(generation)) = (u32::try_from(id), u16::try_from(generation)) else {
            continue;
        };
        section.entries.insert(
            id,
            XRefEntry {
                generation,
                reference: Reference::Used { offset: pos },
            },
        );
        // Xref streams double as trailers.
        let header_end = whole.end();
        let value = scanner.skip_whitespace_and_comments(header_end);
        if let Ok((PDFObject::Dict(d), _)) = parser.parse_at(value)
            && d.get("Type").and_then(|t| t.as_name().ok()) == Some("XRef")
        {
            stream_trailers.push(d);
        }
    }
    if section.entries.is_empty() {
        return Err(PdfError::structural(0, "no objects found while recovering xref"));
    }

    let mut trailers = Vec::new();
    let mut from = 0;
    while let Some(kw) =
        scanner.find_subsequence(b"trailer", Direction::Forward, from, scanner.len(), true)
    {
        if let Ok((PDFObject::Dict(d), _)) = parser.parse_at(kw.end) {
            trailers.push(d);
        }
        from = kw.end;
    }
    trailers.extend(stream_trailers);
    for trailer in trailers.into_iter().rev() {
        for (key, value) in trailer {
            if !section.trailer.contains_key(&key) {
                section.trailer.insert(key, value);
            }
        }
    }

    warn!(
        objects = section.entries.len(),
        "rebuilt cross-reference map by scanning object headers"
    );
    let mut map = XRefMap::default();
    map.merge_older(section);
    Ok(map)
}
