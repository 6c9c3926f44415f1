//! PDF model types.
//!
//! - `objects` - PDF object types (PDFObject, PDFStream, ObjectId)
//! - `serialize` - writing objects back to PDF syntax

pub mod objects;
pub mod serialize;

pub use objects::{Dict, ObjectId, PDFObject, PDFStream};
pub use serialize::{serialize_object, write_object};
