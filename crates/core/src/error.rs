//! Error types for the folio PDF core.

use crate::model::objects::ObjectId;
use thiserror::Error;

/// Primary error type for PDF parsing operations.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Malformed token, unbalanced delimiters, missing keyword or a broken
    /// cross-reference chain.
    #[error("structural error at byte {pos}: {msg}")]
    Structural { pos: usize, msg: String },

    #[error("stream at byte {pos} declares /Length {declared} but spans {actual} bytes")]
    LengthMismatch {
        pos: usize,
        declared: usize,
        actual: usize,
    },

    #[error("unsupported filter: {0}")]
    UnsupportedFilter(String),

    #[error("unsupported crypt method: {0}")]
    UnsupportedCryptMethod(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("type error: expected {expected}, got {got}")]
    TypeError {
        expected: &'static str,
        got: &'static str,
    },

    #[error("key not found: {0}")]
    KeyError(String),

    #[error("PDF object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("encryption error: {0}")]
    EncryptionError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PdfError {
    /// Shorthand for a [`PdfError::Structural`] at `pos`.
    pub fn structural(pos: usize, msg: impl Into<String>) -> Self {
        Self::Structural {
            pos,
            msg: msg.into(),
        }
    }

    /// Whether the error only concerns the object being decoded, so that a
    /// caller running with [`ErrorPolicy::SkipObject`](crate::options::ErrorPolicy)
    /// may skip that object and carry on with the rest of the document.
    pub const fn is_object_local(&self) -> bool {
        matches!(
            self,
            Self::LengthMismatch { .. }
                | Self::UnsupportedFilter(_)
                | Self::UnsupportedCryptMethod(_)
                | Self::NotImplemented(_)
                | Self::DecodeError(_)
        )
    }
}

/// Convenience Result type alias for PdfError.
pub type Result<T> = std::result::Result<T, PdfError>;
