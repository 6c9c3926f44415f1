//! PDF lexing and parsing.
//!
//! - `scanner`: byte-level token primitives and bounds detection
//! - `strings`: literal/hex string escaping and serialization
//! - `object`: value parser producing `PDFObject`s

pub mod object;
pub mod scanner;
pub mod strings;

pub use object::ObjectParser;
pub use scanner::{
    ByteClass, ByteScanner, Bounds, Direction, Number, Parsed, ValueKind, classify,
};
pub use strings::{
    HexString, LiteralString, escape_literal, serialize_hex, serialize_literal, unescape_literal,
};
