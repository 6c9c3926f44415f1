//! PDF writer.
//!
//! Produces complete files or incremental revisions appended to an
//! existing file. Each call to [`PdfWriter::finish`] closes the revision
//! with a classic table or an xref stream; object streams need the latter.

use super::context::DocumentContext;
use super::security::{Cryptor, EncryptionState};
use super::xref::{self, Reference, XRefEntry};
use crate::codec::flate::deflate;
use crate::codec::predictor::{PngFilter, PredictorParams, apply_png_filter};
use crate::error::{PdfError, Result};
use crate::model::objects::{Dict, ObjectId, PDFObject, PDFStream, name};
use crate::model::serialize::write_object;
use std::collections::BTreeMap;
use std::io::Write as _;
use tracing::debug;

/// How a revision's cross-reference section is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XRefFormat {
    #[default]
    Table,
    Stream,
}

/// Encoding applied to a stream payload by [`PdfWriter::add_stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEncoding {
    Raw,
    Flate,
    /// Flate over PNG-filtered rows of `columns` samples with `colors`
    /// 8-bit components each.
    FlatePng {
        columns: usize,
        colors: usize,
        filter: PngFilter,
    },
}

#[derive(Debug, Clone)]
struct Crypt {
    strings: Cryptor,
    streams: Cryptor,
    /// The `/Encrypt` dictionary is written in the clear.
    encrypt_id: ObjectId,
}

/// Writes one PDF revision.
#[derive(Debug)]
pub struct PdfWriter {
    buf: Vec<u8>,
    entries: BTreeMap<u32, XRefEntry>,
    next_id: u32,
    prev: Option<usize>,
    trailer: Dict,
    crypt: Option<Crypt>,
}

fn field_width(max: u64) -> usize {
    let bits = 64 - max.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

impl PdfWriter {
    /// Start a new file with a `%PDF-{version}` header.
    pub fn new(version: &str) -> Self {
        let mut buf = format!("%PDF-{version}\n").into_bytes();
        // Binary marker so transfer tools treat the file as binary.
        buf.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");
        Self {
            buf,
            entries: BTreeMap::new(),
            next_id: 1,
            prev: None,
            trailer: Dict::new(),
            crypt: None,
        }
    }

    /// Start an incremental update on top of an opened document.
    ///
    /// The new revision's trailer carries over `/Root`, `/Info`, `/ID` and
    /// `/Encrypt`, and points back at the current revision with `/Prev`.
    /// Objects of an encrypted document are encrypted with the keys the
    /// document was authenticated with.
    pub fn incremental(doc: &DocumentContext) -> Result<Self> {
        let mut buf = doc.scanner().data().to_vec();
        if buf.last().is_some_and(|b| !matches!(b, b'\n' | b'\r')) {
            buf.push(b'\n');
        }
        let prev = xref::find_startxref(doc.scanner())?;
        let size = doc
            .trailer()
            .get("Size")
            .map(PDFObject::as_usize)
            .transpose()?
            .unwrap_or(0);
        let next_id = u32::try_from(size)
            .map_err(|_| PdfError::structural(prev, "/Size out of range"))?
            .max(1);

        let mut trailer = Dict::new();
        for key in ["Root", "Info", "ID", "Encrypt"] {
            if let Some(value) = doc.trailer().get(key) {
                trailer.insert(key.to_string(), value.clone());
            }
        }

        let crypt = match (doc.encryption(), doc.trailer().get("Encrypt")) {
            (Some(state), Some(PDFObject::Ref(encrypt_id))) => {
                let auth = state.authentication().ok_or_else(|| {
                    PdfError::EncryptionError("cannot update an unauthenticated document".into())
                })?;
                Some(Crypt {
                    strings: auth.string_cryptor,
                    streams: auth.stream_cryptor,
                    encrypt_id: *encrypt_id,
                })
            }
            (Some(_), _) => {
                return Err(PdfError::NotImplemented(
                    "incremental update of a document with a direct /Encrypt dictionary".into(),
                ));
            }
            (None, _) => None,
        };

        Ok(Self {
            buf,
            entries: BTreeMap::new(),
            next_id,
            prev: Some(prev),
            trailer,
            crypt,
        })
    }

    /// Reserve the next object number.
    pub fn alloc_id(&mut self) -> ObjectId {
        let id = ObjectId::new(self.next_id, 0);
        self.next_id += 1;
        id
    }

    pub fn set_trailer(&mut self, key: &str, value: PDFObject) {
        self.trailer.insert(key.to_string(), value);
    }

    pub fn set_root(&mut self, root: ObjectId) {
        self.set_trailer("Root", PDFObject::Ref(root));
    }

    /// Encrypt everything written from now on with `state`, which must hold
    /// a file key (as [`EncryptionState::new_standard`] does).
    ///
    /// Writes the `/Encrypt` dictionary and sets `/Encrypt` and `/ID` in
    /// the trailer.
    pub fn set_encryption(&mut self, state: &EncryptionState) -> Result<ObjectId> {
        let auth = state.authentication().ok_or_else(|| {
            PdfError::EncryptionError("encryption state has no file key".into())
        })?;
        let encrypt_id = self.alloc_id();
        self.write_object(encrypt_id, &PDFObject::Dict(state.to_dict()))?;
        self.crypt = Some(Crypt {
            strings: auth.string_cryptor,
            streams: auth.stream_cryptor,
            encrypt_id,
        });
        self.set_trailer("Encrypt", PDFObject::Ref(encrypt_id));
        let file_id = PDFObject::String(state.file_id.clone());
        self.set_trailer("ID", PDFObject::Array(vec![file_id.clone(), file_id]));
        Ok(encrypt_id)
    }

    fn cryptors(&self, id: ObjectId) -> Option<(&Cryptor, &Cryptor)> {
        self.crypt
            .as_ref()
            .filter(|c| c.encrypt_id != id)
            .map(|c| (&c.strings, &c.streams))
    }

    /// Write `obj` as indirect object `id`. Stream `/Length` is set to the
    /// stored payload size; strings and stream payloads are encrypted when
    /// encryption is on.
    pub fn write_object(&mut self, id: ObjectId, obj: &PDFObject) -> Result<()> {
        let obj = match self.cryptors(id) {
            Some((strings, streams)) => encrypt_object(obj.clone(), id, strings, streams)?,
            None => obj.clone(),
        };
        let obj = match obj {
            PDFObject::Stream(mut stream) => {
                let len = stream.rawdata().len();
                stream
                    .attrs
                    .insert("Length".into(), PDFObject::Int(len as i64));
                PDFObject::Stream(stream)
            }
            other => other,
        };

        let offset = self.buf.len();
        let _ = writeln!(self.buf, "{} {} obj", id.id, id.generation);
        write_object(&mut self.buf, &obj);
        self.buf.extend_from_slice(b"\nendobj\n");
        self.entries.insert(
            id.id,
            XRefEntry {
                generation: id.generation,
                reference: Reference::Used { offset },
            },
        );
        self.next_id = self.next_id.max(id.id + 1);
        Ok(())
    }

    /// Allocate an id and write `obj` under it.
    pub fn add_object(&mut self, obj: PDFObject) -> Result<ObjectId> {
        let id = self.alloc_id();
        self.write_object(id, &obj)?;
        Ok(id)
    }

    /// Encode `data` and write it as a stream with `attrs`.
    pub fn add_stream(
        &mut self,
        mut attrs: Dict,
        data: &[u8],
        encoding: StreamEncoding,
    ) -> Result<ObjectId> {
        let payload = match encoding {
            StreamEncoding::Raw => data.to_vec(),
            StreamEncoding::Flate => {
                attrs.insert("Filter".into(), name("FlateDecode"));
                deflate(data)?
            }
            StreamEncoding::FlatePng {
                columns,
                colors,
                filter,
            } => {
                let params = PredictorParams::png(columns, colors);
                params.checked_row_len()?;
                let mut parms = Dict::new();
                parms.insert("Predictor".into(), PDFObject::Int(params.predictor));
                parms.insert("Colors".into(), PDFObject::Int(colors as i64));
                parms.insert("Columns".into(), PDFObject::Int(columns as i64));
                attrs.insert("Filter".into(), name("FlateDecode"));
                attrs.insert("DecodeParms".into(), PDFObject::Dict(parms));
                deflate(&apply_png_filter(data, filter, &params))?
            }
        };
        self.add_object(PDFObject::Stream(Box::new(PDFStream::new(attrs, payload))))
    }

    /// Mark `id` deleted. The free entry carries the next generation.
    pub fn free_object(&mut self, id: ObjectId) {
        self.entries.insert(
            id.id,
            XRefEntry {
                generation: id.generation.saturating_add(1),
                reference: Reference::Free { next_free_id: 0 },
            },
        );
    }

    /// Pack `objects` into one Flate-compressed object stream.
    ///
    /// Each object gets a fresh id (returned in order). Streams cannot be
    /// packed.
    pub fn add_object_stream(&mut self, objects: &[PDFObject]) -> Result<Vec<ObjectId>> {
        let ids: Vec<ObjectId> = objects.iter().map(|_| self.alloc_id()).collect();
        let mut header = Vec::new();
        let mut body = Vec::new();
        for (id, obj) in ids.iter().zip(objects) {
            if matches!(obj, PDFObject::Stream(_)) {
                return Err(PdfError::TypeError {
                    expected: "non-stream object",
                    got: "stream",
                });
            }
            let _ = write!(header, "{} {} ", id.id, body.len());
            write_object(&mut body, obj);
            body.push(b'\n');
        }
        let first = header.len();
        header.extend_from_slice(&body);

        let mut attrs = Dict::new();
        attrs.insert("Type".into(), name("ObjStm"));
        attrs.insert("N".into(), PDFObject::Int(objects.len() as i64));
        attrs.insert("First".into(), PDFObject::Int(first as i64));
        let stream_id = self.add_stream(attrs, &header, StreamEncoding::Flate)?;
        for (index, id) in ids.iter().enumerate() {
            self.entries.insert(
                id.id,
                XRefEntry {
                    generation: 0,
                    reference: Reference::Compressed {
                        stream_id: stream_id.id,
                        index,
                    },
                },
            );
        }
        Ok(ids)
    }

    /// Link free entries into a list headed by object 0.
    fn link_free_list(&mut self) {
        let full_file = self.prev.is_none();
        if full_file {
            self.entries.entry(0).or_insert(XRefEntry {
                generation: 65535,
                reference: Reference::Free { next_free_id: 0 },
            });
        }
        let free: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, e)| e.reference.is_free())
            .map(|(&id, _)| id)
            .collect();
        for (i, id) in free.iter().enumerate() {
            let next = free.get(i + 1).copied().unwrap_or(0);
            if let Some(entry) = self.entries.get_mut(id) {
                entry.reference = Reference::Free { next_free_id: next };
            }
        }
    }

    fn trailer_dict(&self, size: u32) -> Dict {
        let mut trailer = Dict::new();
        trailer.insert("Size".into(), PDFObject::Int(i64::from(size)));
        if let Some(prev) = self.prev {
            trailer.insert("Prev".into(), PDFObject::Int(prev as i64));
        }
        for (key, value) in &self.trailer {
            trailer.insert(key.clone(), value.clone());
        }
        trailer
    }

    /// Close the revision and return the whole file.
    pub fn finish(mut self, format: XRefFormat) -> Result<Vec<u8>> {
        if format == XRefFormat::Table
            && self
                .entries
                .values()
                .any(|e| matches!(e.reference, Reference::Compressed { .. }))
        {
            return Err(PdfError::NotImplemented(
                "object streams with a cross-reference table".into(),
            ));
        }
        let xref_offset = match format {
            XRefFormat::Table => self.write_table(),
            XRefFormat::Stream => self.write_xref_stream()?,
        };
        let _ = write!(self.buf, "startxref\n{xref_offset}\n%%EOF\n");
        debug!(
            objects = self.entries.len(),
            ?format,
            bytes = self.buf.len(),
            "finished revision"
        );
        Ok(self.buf)
    }

    /// Runs of consecutive object numbers.
    fn subsections(&self) -> Vec<(u32, Vec<XRefEntry>)> {
        let mut runs: Vec<(u32, Vec<XRefEntry>)> = Vec::new();
        for (&id, &entry) in &self.entries {
            match runs.last_mut() {
                Some((start, run)) if *start + run.len() as u32 == id => run.push(entry),
                _ => runs.push((id, vec![entry])),
            }
        }
        runs
    }

    fn write_table(&mut self) -> usize {
        self.link_free_list();
        let offset = self.buf.len();
        self.buf.extend_from_slice(b"xref\n");
        for (start, run) in self.subsections() {
            let _ = writeln!(self.buf, "{start} {}", run.len());
            for entry in run {
                let (field, marker) = match entry.reference {
                    Reference::Used { offset } => (offset as u64, 'n'),
                    Reference::Free { next_free_id } => (u64::from(next_free_id), 'f'),
                    Reference::Compressed { .. } => continue,
                };
                let _ = writeln!(self.buf, "{field:010} {:05} {marker} ", entry.generation);
            }
        }
        let trailer = self.trailer_dict(self.next_id);
        self.buf.extend_from_slice(b"trailer\n");
        write_object(&mut self.buf, &PDFObject::Dict(trailer));
        self.buf.push(b'\n');
        offset
    }

    fn write_xref_stream(&mut self) -> Result<usize> {
        let id = self.alloc_id();
        let offset = self.buf.len();
        self.entries.insert(
            id.id,
            XRefEntry {
                generation: 0,
                reference: Reference::Used { offset },
            },
        );
        self.link_free_list();

        let (mut max1, mut max2) = (0u64, 0u64);
        for entry in self.entries.values() {
            let (f1, f2) = match entry.reference {
                Reference::Used { offset } => (offset as u64, u64::from(entry.generation)),
                Reference::Compressed { stream_id, index } => (u64::from(stream_id), index as u64),
                Reference::Free { next_free_id } => {
                    (u64::from(next_free_id), u64::from(entry.generation))
                }
            };
            max1 = max1.max(f1);
            max2 = max2.max(f2);
        }
        let w = [1, field_width(max1), field_width(max2)];

        let mut data = Vec::new();
        let mut index = Vec::new();
        for (start, run) in self.subsections() {
            index.push(PDFObject::Int(i64::from(start)));
            index.push(PDFObject::Int(run.len() as i64));
            for entry in run {
                let (kind, f1, f2) = match entry.reference {
                    Reference::Free { next_free_id } => {
                        (0u8, u64::from(next_free_id), u64::from(entry.generation))
                    }
                    Reference::Used { offset } => (1, offset as u64, u64::from(entry.generation)),
                    Reference::Compressed { stream_id, index } => {
                        (2, u64::from(stream_id), index as u64)
                    }
                };
                data.push(kind);
                data.extend_from_slice(&f1.to_be_bytes()[8 - w[1]..]);
                data.extend_from_slice(&f2.to_be_bytes()[8 - w[2]..]);
            }
        }

        let mut attrs = self.trailer_dict(self.next_id);
        attrs.insert("Type".into(), name("XRef"));
        attrs.insert(
            "W".into(),
            PDFObject::Array(w.iter().map(|&n| PDFObject::Int(n as i64)).collect()),
        );
        attrs.insert("Index".into(), PDFObject::Array(index));
        attrs.insert("Filter".into(), name("FlateDecode"));
        let payload = deflate(&data)?;
        attrs.insert("Length".into(), PDFObject::Int(payload.len() as i64));

        // Xref streams are never encrypted, so this bypasses write_object.
        let stream = PDFObject::Stream(Box::new(PDFStream::new(attrs, payload)));
        let _ = writeln!(self.buf, "{} {} obj", id.id, id.generation);
        write_object(&mut self.buf, &stream);
        self.buf.extend_from_slice(b"\nendobj\n");
        Ok(offset)
    }
}

fn encrypt_object(
    object: PDFObject,
    id: ObjectId,
    strings: &Cryptor,
    streams: &Cryptor,
) -> Result<PDFObject> {
    Ok(match object {
        PDFObject::String(data) => PDFObject::String(strings.encrypt(&data, id)?),
        PDFObject::Array(items) => PDFObject::Array(
            items
                .into_iter()
                .map(|item| encrypt_object(item, id, strings, streams))
                .collect::<Result<_>>()?,
        ),
        PDFObject::Dict(dict) => PDFObject::Dict(encrypt_dict(dict, id, strings, streams)?),
        PDFObject::Stream(stream) => {
            let attrs = encrypt_dict(stream.attrs.clone(), id, strings, streams)?;
            let data = streams.encrypt(stream.rawdata(), id)?;
            PDFObject::Stream(Box::new(PDFStream::new(attrs, data)))
        }
        other => other,
    })
}

fn encrypt_dict(dict: Dict, id: ObjectId, strings: &Cryptor, streams: &Cryptor) -> Result<Dict> {
    dict.into_iter()
        .map(|(key, value)| Ok((key, encrypt_object(value, id, strings, streams)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ParseOptions;

    #[test]
    fn test_field_width() {
        assert_eq!(field_width(0), 1);
        assert_eq!(field_width(255), 1);
        assert_eq!(field_width(256), 2);
        assert_eq!(field_width(u64::from(u32::MAX)), 4);
    }

    #[test]
    fn test_table_roundtrip() {
        let mut writer = PdfWriter::new("1.4");
        let catalog = writer.alloc_id();
        let mut dict = Dict::new();
        dict.insert("Type".into(), name("Catalog"));
        writer.write_object(catalog, &PDFObject::Dict(dict)).unwrap();
        let text = writer
            .add_stream(Dict::new(), b"BT ET", StreamEncoding::Flate)
            .unwrap();
        writer.set_root(catalog);
        let pdf = writer.finish(XRefFormat::Table).unwrap();

        let doc = DocumentContext::open(pdf, ParseOptions::default()).unwrap();
        assert_eq!(doc.header_version(), Some("1.4"));
        assert_eq!(doc.object_ids(), vec![catalog, text]);
        let obj = doc.get_object(text).unwrap().unwrap();
        assert_eq!(doc.decode_stream(obj.as_stream().unwrap()).unwrap(), b"BT ET");
        assert!(doc.resolve(ObjectId::new(0, 65535)).unwrap().is_free());
    }

    #[test]
    fn test_object_stream_needs_xref_stream() {
        let mut writer = PdfWriter::new("1.5");
        writer.add_object_stream(&[PDFObject::Int(1)]).unwrap();
        assert!(matches!(
            writer.finish(XRefFormat::Table),
            Err(PdfError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_xref_stream_with_object_stream() {
        let mut writer = PdfWriter::new("1.5");
        let ids = writer
            .add_object_stream(&[
                PDFObject::String(b"first".to_vec()),
                PDFObject::Array(vec![PDFObject::Int(1), PDFObject::Real(2.5)]),
            ])
            .unwrap();
        writer.set_root(ids[0]);
        let pdf = writer.finish(XRefFormat::Stream).unwrap();

        let doc = DocumentContext::open(pdf, ParseOptions::default()).unwrap();
        assert!(matches!(
            doc.resolve(ids[1]),
            Some(Reference::Compressed { index: 1, .. })
        ));
        assert_eq!(doc.root().unwrap(), PDFObject::String(b"first".to_vec()));
        assert_eq!(
            doc.get_object(ids[1]).unwrap().unwrap(),
            PDFObject::Array(vec![PDFObject::Int(1), PDFObject::Real(2.5)])
        );
        let info = doc.parse_info(ids[1]).unwrap().unwrap();
        assert_eq!(info.value_bytes(), b"[1 2.5]");
        assert!(info.parent_stream_id.is_some());
    }
}
