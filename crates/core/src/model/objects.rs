//! PDF object types.

use crate::error::{PdfError, Result};
use bytes::Bytes;
use indexmap::IndexMap;
use std::fmt;

/// Dictionary (name -> object mapping). Keeps the order keys were read or
/// inserted in, so serialized output is stable.
pub type Dict = IndexMap<String, PDFObject>;

/// Identity of an indirect object: `(id, generation)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId {
    pub id: u32,
    pub generation: u16,
}

impl ObjectId {
    pub const fn new(id: u32, generation: u16) -> Self {
        Self { id, generation }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.generation)
    }
}

impl From<(u32, u16)> for ObjectId {
    fn from((id, generation): (u32, u16)) -> Self {
        Self::new(id, generation)
    }
}

/// A parsed PDF value.
#[derive(Debug, Clone, PartialEq)]
pub enum PDFObject {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    Int(i64),
    Real(f64),
    /// Name object without the leading slash (e.g. `Type`, `Font`)
    Name(String),
    /// String (byte array), literal or hex in the source
    String(Vec<u8>),
    /// `[ ... ]`
    Array(Vec<Self>),
    /// Dictionary
    Dict(Dict),
    /// Dictionary followed by a byte payload.
    Stream(Box<PDFStream>),
    /// `n g R`
    Ref(ObjectId),
}

impl PDFObject {
    /// True for `null`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The value of a boolean.
    pub const fn as_bool(&self) -> Result<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            _ => Err(self.type_error("bool")),
        }
    }

    /// The value of an integer.
    pub const fn as_int(&self) -> Result<i64> {
        match self {
            Self::Int(n) => Ok(*n),
            _ => Err(self.type_error("int")),
        }
    }

    /// Get as a non-negative integer that fits in `usize`.
    pub fn as_usize(&self) -> Result<usize> {
        let n = self.as_int()?;
        usize::try_from(n).map_err(|_| PdfError::TypeError {
            expected: "non-negative int",
            got: "negative int",
        })
    }

    /// Any number, widened to f64.
    pub const fn as_num(&self) -> Result<f64> {
        match self {
            Self::Int(n) => Ok(*n as f64),
            Self::Real(n) => Ok(*n),
            _ => Err(self.type_error("number")),
        }
    }

    /// A name without its leading slash.
    pub fn as_name(&self) -> Result<&str> {
        match self {
            Self::Name(s) => Ok(s),
            _ => Err(self.type_error("name")),
        }
    }

    /// The bytes of a string (literal or hex).
    pub fn as_string(&self) -> Result<&[u8]> {
        match self {
            Self::String(s) => Ok(s),
            _ => Err(self.type_error("string")),
        }
    }

    /// Borrow the elements of an array.
    pub const fn as_array(&self) -> Result<&Vec<Self>> {
        match self {
            Self::Array(arr) => Ok(arr),
            _ => Err(self.type_error("array")),
        }
    }

    /// Get as dictionary. A stream yields its attribute dictionary.
    pub fn as_dict(&self) -> Result<&Dict> {
        match self {
            Self::Dict(d) => Ok(d),
            Self::Stream(s) => Ok(&s.attrs),
            _ => Err(self.type_error("dict")),
        }
    }

    /// Borrow a stream.
    pub fn as_stream(&self) -> Result<&PDFStream> {
        match self {
            Self::Stream(s) => Ok(s),
            _ => Err(self.type_error("stream")),
        }
    }

    /// The target of an indirect reference.
    pub const fn as_objref(&self) -> Result<ObjectId> {
        match self {
            Self::Ref(r) => Ok(*r),
            _ => Err(self.type_error("ref")),
        }
    }

    /// Look up `key` when this is a dictionary or a stream.
    pub fn get(&self, key: &str) -> Option<&PDFObject> {
        match self {
            Self::Dict(d) => d.get(key),
            Self::Stream(s) => s.attrs.get(key),
            _ => None,
        }
    }

    /// Short kind name used in `TypeError`.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Real(_) => "real",
            Self::Name(_) => "name",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Dict(_) => "dict",
            Self::Stream(_) => "stream",
            Self::Ref(_) => "ref",
        }
    }

    const fn type_error(&self, expected: &'static str) -> PdfError {
        PdfError::TypeError {
            expected,
            got: self.type_name(),
        }
    }
}

impl From<i64> for PDFObject {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for PDFObject {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<ObjectId> for PDFObject {
    fn from(id: ObjectId) -> Self {
        Self::Ref(id)
    }
}

impl From<Dict> for PDFObject {
    fn from(d: Dict) -> Self {
        Self::Dict(d)
    }
}

/// Build a name object.
pub fn name(s: &str) -> PDFObject {
    PDFObject::Name(s.to_string())
}

/// PDF Stream - dictionary attributes + raw payload as stored in the file.
///
/// The payload is neither decrypted nor decoded; both happen on demand in
/// [`DocumentContext::decode_stream`](crate::document::DocumentContext::decode_stream).
#[derive(Debug, Clone, PartialEq)]
pub struct PDFStream {
    /// Stream dictionary.
    pub attrs: Dict,
    /// Raw (possibly encrypted and encoded) data
    rawdata: Bytes,
    /// Object the stream belongs to, when read from a document
    pub id: Option<ObjectId>,
    /// Absolute byte offset of the payload in its buffer
    pub data_offset: usize,
}

impl PDFStream {
    /// Build a stream from its dictionary and stored bytes.
    pub fn new(attrs: Dict, rawdata: impl Into<Bytes>) -> Self {
        Self {
            attrs,
            rawdata: rawdata.into(),
            id: None,
            data_offset: 0,
        }
    }

    /// Stored payload, still filtered.
    pub fn rawdata(&self) -> &[u8] {
        self.rawdata.as_ref()
    }

    /// Stored payload as a cheap clone.
    pub fn rawdata_bytes(&self) -> Bytes {
        self.rawdata.clone()
    }

    /// Look up a key in the stream dictionary.
    pub fn get(&self, name: &str) -> Option<&PDFObject> {
        self.attrs.get(name)
    }

    /// `/Type` of the stream, if it is a direct name.
    pub fn type_name(&self) -> Option<&str> {
        self.get("Type").and_then(|t| t.as_name().ok())
    }
}
