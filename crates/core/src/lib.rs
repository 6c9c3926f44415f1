//! folio - PDF container core.
//!
//! Byte-level scanning, cross-reference resolution, stream decoding and the
//! standard security handler, exposed through [`DocumentContext`].
//!
//! ```no_run
//! use folio_core::{DocumentContext, ObjectId, ParseOptions};
//!
//! let data = std::fs::read("file.pdf")?;
//! let doc = DocumentContext::open(data, ParseOptions::new().password("secret"))?;
//! if let Some(obj) = doc.get_object(ObjectId::new(1, 0))? {
//!     println!("{obj:?}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod codec;
pub mod document;
pub mod error;
pub mod filter;
pub mod model;
pub mod options;
pub mod parser;

pub use document::{AccessLevel, DocumentContext, ParseInfo, PdfWriter, Reference, XRefFormat};
pub use error::{PdfError, Result};
pub use model::{Dict, ObjectId, PDFObject, PDFStream};
pub use options::{ErrorPolicy, ParseOptions};
