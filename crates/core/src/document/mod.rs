//! Document layer - cross-references, object streams, security and the
//! document context.
//!
//! - `xref` - `startxref`/`/Prev` chain walking and the merged xref map
//! - `objstm` - object stream headers and slots
//! - `security` - standard security handler (RC4, AES)
//! - `context` - `DocumentContext`, the lazily loaded object graph
//! - `writer` - `PdfWriter` for full files and incremental updates

pub mod context;
pub mod objstm;
pub mod security;
pub mod writer;
pub mod xref;

pub use context::{CryptInfo, DocumentContext, ParseInfo};
pub use objstm::ObjectStreamIndex;
pub use security::{
    AccessLevel, Authentication, CryptMethod, Cryptor, EncryptionState, PASSWORD_PADDING,
};
pub use writer::{PdfWriter, StreamEncoding, XRefFormat};
pub use xref::{Reference, SectionKind, XRefEntry, XRefMap};
