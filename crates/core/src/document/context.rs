//! Document context - the addressable object graph of one file.
//!
//! Ties the merged cross-reference map, object streams and the security
//! handler together. Objects are loaded lazily by [`ObjectId`], strings are
//! decrypted on load, and stream payloads are decrypted and decoded on
//! demand by [`DocumentContext::decode_stream`].

use super::objstm::ObjectStreamIndex;
use super::security::{AccessLevel, Authentication, CryptMethod, Cryptor, EncryptionState};
use super::xref::{self, Reference, XRefMap};
use crate::error::{PdfError, Result};
use crate::filter::{self, FilterStep};
use crate::model::objects::{Dict, ObjectId, PDFObject, PDFStream};
use crate::options::{ErrorPolicy, ParseOptions};
use crate::parser::object::ObjectParser;
use crate::parser::scanner::{Bounds, ByteScanner, Direction};
use bytes::Bytes;
use indexmap::IndexMap;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Reference hops [`DocumentContext::deref`] follows before giving up.
const MAX_REF_CHAIN: usize = 32;

/// How far into the file the `%PDF-` header may start.
const HEADER_WINDOW: usize = 1024;

struct ObjectCache {
    capacity: usize,
    map: IndexMap<ObjectId, Arc<PDFObject>>,
}

impl ObjectCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: IndexMap::new(),
        }
    }

    fn get(&mut self, id: ObjectId) -> Option<Arc<PDFObject>> {
        if self.capacity == 0 {
            return None;
        }
        let index = self.map.get_index_of(&id)?;
        let value = Arc::clone(self.map.get_index(index)?.1);
        if index + 1 != self.map.len() {
            self.map.move_index(index, self.map.len() - 1);
        }
        Some(value)
    }

    fn insert(&mut self, id: ObjectId, value: Arc<PDFObject>) {
        if self.capacity == 0 {
            return;
        }
        self.map.shift_remove(&id);
        self.map.insert(id, value);
        if self.map.len() > self.capacity {
            self.map.shift_remove_index(0);
        }
    }

    fn clear(&mut self) {
        self.map.clear();
    }
}

thread_local! {
    static RESOLVING: RefCell<FxHashSet<ObjectId>> = RefCell::new(FxHashSet::default());
}

/// Marks an object as being loaded on this thread, so that a `/Length`
/// or object stream that leads back to it fails instead of recursing.
struct ResolveGuard {
    id: ObjectId,
}

impl ResolveGuard {
    fn enter(id: ObjectId) -> Result<Self> {
        let fresh = RESOLVING.with(|set| set.borrow_mut().insert(id));
        if !fresh {
            return Err(PdfError::structural(
                0,
                format!("circular reference while loading object {id}"),
            ));
        }
        Ok(Self { id })
    }
}

impl Drop for ResolveGuard {
    fn drop(&mut self) {
        RESOLVING.with(|set| {
            set.borrow_mut().remove(&self.id);
        });
    }
}

fn locked() -> PdfError {
    PdfError::EncryptionError("document is encrypted and no password matched".into())
}

/// Ciphers that apply to one object, handed to higher-level parsers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptInfo {
    pub object_id: ObjectId,
    pub string_cryptor: Cryptor,
    pub stream_cryptor: Cryptor,
}

/// Where an object's bytes are and how to interpret them.
///
/// This is what dictionary-level parsers built on the core receive: the
/// buffer holding the object (the file, or the decoded object stream it
/// lives in), its bounds, the ciphers for its strings and streams, and a
/// handle back to the document for resolving references.
#[derive(Debug, Clone)]
pub struct ParseInfo<'a> {
    pub object_id: ObjectId,
    pub scanner: ByteScanner,
    /// For file objects the whole `obj ... endobj` block with the value as
    /// content; for compressed objects just the value.
    pub bounds: Bounds,
    /// `None` for unencrypted documents and for objects inside object
    /// streams, whose stream was decrypted as a whole.
    pub crypt: Option<CryptInfo>,
    pub parent_stream_id: Option<u32>,
    context: &'a DocumentContext,
}

impl<'a> ParseInfo<'a> {
    pub const fn context(&self) -> &'a DocumentContext {
        self.context
    }

    /// Source bytes of the value.
    pub fn value_bytes(&self) -> &[u8] {
        let range = self.bounds.content_range();
        self.scanner.data().get(range).unwrap_or_default()
    }

    pub fn resolve(&self, id: ObjectId) -> Option<Reference> {
        self.context.resolve(id)
    }

    /// The object itself, strings decrypted.
    pub fn object(&self) -> Result<Arc<PDFObject>> {
        self.context
            .get_object_shared(self.object_id)?
            .ok_or(PdfError::ObjectNotFound(self.object_id))
    }

    pub fn decode_stream(&self, stream: &PDFStream) -> Result<Vec<u8>> {
        self.context.decode_stream(stream)
    }
}

/// An opened document.
///
/// All lookups take `&self`; the context is `Sync` and objects can be
/// loaded and decoded from several threads at once.
pub struct DocumentContext {
    scanner: ByteScanner,
    xref: XRefMap,
    version: Option<String>,
    options: ParseOptions,
    encryption: Option<EncryptionState>,
    auth: Option<Authentication>,
    /// The `/Encrypt` dictionary's own id; its strings are never encrypted.
    encrypt_id: Option<ObjectId>,
    cache: Mutex<ObjectCache>,
    objstms: Mutex<FxHashMap<u32, Arc<ObjectStreamIndex>>>,
}

impl std::fmt::Debug for DocumentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentContext")
            .field("len", &self.scanner.len())
            .field("version", &self.version)
            .field("objects", &self.xref.len())
            .field("encrypted", &self.encryption.is_some())
            .finish_non_exhaustive()
    }
}

impl DocumentContext {
    /// Read the cross-reference chain of `data`, set up the security
    /// handler if the trailer names one, and try `options.password`.
    ///
    /// A password that matches neither hash is not an error: the document
    /// opens with [`AccessLevel::None`] and only unencrypted content is
    /// readable until [`Self::authenticate`] succeeds.
    pub fn open(data: impl Into<Bytes>, options: ParseOptions) -> Result<Self> {
        let scanner = ByteScanner::new(data);
        let version = header_version(&scanner);
        if version.is_none() {
            warn!("no %PDF- header found");
        }
        let xref = xref::load_with(&scanner, options.recover_xref)?;
        debug!(
            objects = xref.len(),
            sections = xref.sections().len(),
            "loaded cross-reference map"
        );
        let mut doc = Self {
            scanner,
            xref,
            version,
            cache: Mutex::new(ObjectCache::new(options.cache_capacity)),
            objstms: Mutex::new(FxHashMap::default()),
            options,
            encryption: None,
            auth: None,
            encrypt_id: None,
        };
        doc.setup_encryption()?;
        Ok(doc)
    }

    fn setup_encryption(&mut self) -> Result<()> {
        let Some(encrypt) = self.xref.trailer().get("Encrypt").cloned() else {
            return Ok(());
        };
        if let PDFObject::Ref(id) = encrypt {
            self.encrypt_id = Some(id);
        }
        let dict = self.deref(&encrypt)?;
        let state = EncryptionState::from_dict(dict.as_dict()?, &self.file_id())?;
        debug!(
            version = state.version,
            revision = state.revision,
            key_bits = state.key_length_bits,
            "document is encrypted"
        );
        self.encryption = Some(state);
        self.clear_caches();

        let password = self.options.password.clone();
        match self.authenticate(&password) {
            Ok(auth) if auth.access_level == AccessLevel::None => {
                warn!("password matches neither owner nor user hash");
            }
            Ok(_) => {}
            Err(PdfError::NotImplemented(what)) => {
                warn!(%what, "document left unauthenticated");
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Try another password.
    ///
    /// On success the new keys replace the old ones and cached objects are
    /// dropped; a failed attempt leaves the current keys in place. An
    /// unencrypted document always grants owner access.
    pub fn authenticate(&mut self, password: &str) -> Result<Authentication> {
        let Some(state) = self.encryption.as_mut() else {
            return Ok(Authentication {
                access_level: AccessLevel::Owner,
                string_cryptor: Cryptor::Identity,
                stream_cryptor: Cryptor::Identity,
            });
        };
        let auth = state.authenticate(password)?;
        if auth.access_level != AccessLevel::None {
            self.auth = Some(auth.clone());
            self.clear_caches();
        }
        Ok(auth)
    }

    fn clear_caches(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
        if let Ok(mut objstms) = self.objstms.lock() {
            objstms.clear();
        }
    }

    /// Version from the `%PDF-x.y` header.
    pub fn header_version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub const fn scanner(&self) -> &ByteScanner {
        &self.scanner
    }

    pub const fn xref(&self) -> &XRefMap {
        &self.xref
    }

    /// Merged trailer.
    pub const fn trailer(&self) -> &Dict {
        self.xref.trailer()
    }

    pub const fn options(&self) -> &ParseOptions {
        &self.options
    }

    pub const fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    pub const fn encryption(&self) -> Option<&EncryptionState> {
        self.encryption.as_ref()
    }

    /// Access granted by the last successful password, `None` before one
    /// matched. Unencrypted documents report owner access.
    pub fn access_level(&self) -> AccessLevel {
        match (&self.encryption, &self.auth) {
            (None, _) => AccessLevel::Owner,
            (Some(_), Some(auth)) => auth.access_level,
            (Some(_), None) => AccessLevel::None,
        }
    }

    /// First element of the trailer `/ID`, empty when absent.
    pub fn file_id(&self) -> Vec<u8> {
        self.xref
            .trailer()
            .get("ID")
            .and_then(|id| id.as_array().ok())
            .and_then(|ids| ids.first())
            .and_then(|first| first.as_string().ok())
            .map(<[u8]>::to_vec)
            .unwrap_or_default()
    }

    /// Where object `id` lives, if anywhere.
    pub fn resolve(&self, id: ObjectId) -> Option<Reference> {
        self.xref.resolve(id)
    }

    /// Every in-use object, sorted.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.xref.object_ids()
    }

    /// The document catalog (`/Root`).
    pub fn root(&self) -> Result<PDFObject> {
        let root = self
            .trailer()
            .get("Root")
            .ok_or_else(|| PdfError::KeyError("Root".into()))?;
        self.deref(root)
    }

    fn skips(&self, err: &PdfError) -> bool {
        self.options.error_policy == ErrorPolicy::SkipObject && err.is_object_local()
    }

    /// Load object `id`. Free and unknown objects are `None`.
    pub fn get_object(&self, id: ObjectId) -> Result<Option<PDFObject>> {
        Ok(self.get_object_shared(id)?.map(|obj| (*obj).clone()))
    }

    /// Like [`Self::get_object`], without cloning the cached value.
    ///
    /// Under [`ErrorPolicy::SkipObject`] an object that cannot be read
    /// because of an unsupported filter or crypt method or a bad `/Length`
    /// is logged and reported as `None`.
    pub fn get_object_shared(&self, id: ObjectId) -> Result<Option<Arc<PDFObject>>> {
        if let Ok(mut cache) = self.cache.lock()
            && let Some(obj) = cache.get(id)
        {
            return Ok(Some(obj));
        }

        let _guard = ResolveGuard::enter(id)?;
        let loaded = match self.load_object(id) {
            Ok(loaded) => loaded,
            Err(err) if self.skips(&err) => {
                warn!(object = %id, %err, "skipping object");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let Some(obj) = loaded else {
            return Ok(None);
        };
        let obj = Arc::new(obj);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(id, Arc::clone(&obj));
        }
        Ok(Some(obj))
    }

    fn load_object(&self, id: ObjectId) -> Result<Option<PDFObject>> {
        match self.xref.resolve(id) {
            None | Some(Reference::Free { .. }) => Ok(None),
            Some(Reference::Used { offset }) => {
                let indirect = self.read_indirect_at(offset, id)?;
                self.decrypt_object(indirect.object, id).map(Some)
            }
            Some(Reference::Compressed { stream_id, index }) => {
                let objstm = self.object_stream(stream_id)?;
                objstm.object_at(index, id.id).map(Some)
            }
        }
    }

    fn read_indirect_at(
        &self,
        offset: usize,
        id: ObjectId,
    ) -> Result<crate::parser::object::IndirectObject> {
        let length = |obj: &PDFObject| self.stream_length(obj);
        let indirect = ObjectParser::new(&self.scanner).read_indirect(offset, &length)?;
        if indirect.id != id {
            return Err(PdfError::structural(
                offset,
                format!("expected object {id}, found {}", indirect.id),
            ));
        }
        Ok(indirect)
    }

    fn stream_length(&self, length: &PDFObject) -> Result<usize> {
        match length {
            PDFObject::Ref(id) => self
                .get_object_shared(*id)?
                .ok_or(PdfError::ObjectNotFound(*id))?
                .as_usize(),
            other => other.as_usize(),
        }
    }

    /// Decoded index of object stream `stream_id`.
    fn object_stream(&self, stream_id: u32) -> Result<Arc<ObjectStreamIndex>> {
        if let Ok(objstms) = self.objstms.lock()
            && let Some(index) = objstms.get(&stream_id)
        {
            return Ok(Arc::clone(index));
        }

        let entry = self
            .xref
            .entry(stream_id)
            .copied()
            .ok_or(PdfError::ObjectNotFound(ObjectId::new(stream_id, 0)))?;
        let container = ObjectId::new(stream_id, entry.generation);
        match entry.reference {
            Reference::Used { .. } => {}
            Reference::Compressed { .. } => {
                return Err(PdfError::structural(
                    0,
                    format!("object stream {stream_id} is itself inside an object stream"),
                ));
            }
            Reference::Free { .. } => return Err(PdfError::ObjectNotFound(container)),
        }

        let obj = self
            .get_object_shared(container)?
            .ok_or(PdfError::ObjectNotFound(container))?;
        let stream = obj.as_stream()?;
        let decoded = self.decode_stream(stream)?;
        let index = Arc::new(ObjectStreamIndex::parse(stream_id, stream, decoded)?);
        debug!(stream_id, objects = index.len(), "indexed object stream");
        if let Ok(mut objstms) = self.objstms.lock() {
            objstms.insert(stream_id, Arc::clone(&index));
        }
        Ok(index)
    }

    /// Follow references until a direct object. A reference to a missing
    /// or free object is `null`.
    pub fn deref(&self, obj: &PDFObject) -> Result<PDFObject> {
        let mut current = obj.clone();
        for _ in 0..MAX_REF_CHAIN {
            let PDFObject::Ref(id) = current else {
                return Ok(current);
            };
            current = self
                .get_object_shared(id)?
                .map_or(PDFObject::Null, |o| (*o).clone());
        }
        Err(PdfError::structural(0, "reference chain too long"))
    }

    fn decrypt_object(&self, object: PDFObject, id: ObjectId) -> Result<PDFObject> {
        if self.encryption.is_none() || self.encrypt_id == Some(id) {
            return Ok(object);
        }
        // Xref streams are never encrypted.
        if let PDFObject::Stream(stream) = &object
            && stream.type_name() == Some("XRef")
        {
            return Ok(object);
        }
        let cryptor = self.auth.as_ref().map(|auth| &auth.string_cryptor);
        decrypt_strings(object, id, cryptor)
    }

    /// Decrypt and decode a stream's payload.
    ///
    /// `/Filter` and `/DecodeParms` may be indirect. The payload is
    /// decrypted first unless the stream's `/Crypt` filter is `Identity`,
    /// it is `/Metadata` in a document with `EncryptMetadata false`, or it
    /// is an xref stream.
    pub fn decode_stream(&self, stream: &PDFStream) -> Result<Vec<u8>> {
        let attrs = self.filter_attrs(stream)?;
        let chain = filter::filter_chain(&attrs)?;
        let data = self.decrypt_stream_data(stream, &chain)?;
        filter::decode(&data, &chain)
    }

    fn filter_attrs(&self, stream: &PDFStream) -> Result<Dict> {
        let mut attrs = Dict::new();
        for key in ["Filter", "DecodeParms"] {
            let Some(value) = stream.get(key) else {
                continue;
            };
            let value = match self.deref(value)? {
                PDFObject::Array(items) => PDFObject::Array(
                    items
                        .iter()
                        .map(|item| self.deref(item))
                        .collect::<Result<_>>()?,
                ),
                other => other,
            };
            attrs.insert(key.to_string(), value);
        }
        Ok(attrs)
    }

    fn decrypt_stream_data(&self, stream: &PDFStream, chain: &[FilterStep]) -> Result<Bytes> {
        let raw = stream.rawdata_bytes();
        let (Some(state), Some(id)) = (&self.encryption, stream.id) else {
            return Ok(raw);
        };
        if self.encrypt_id == Some(id) || stream.type_name() == Some("XRef") {
            return Ok(raw);
        }
        if let Some(name) = filter::explicit_crypt_filter(chain) {
            let method = state.crypt_filter_method(name)?;
            if method == CryptMethod::None {
                return Ok(raw);
            }
            let key = state.file_key().ok_or_else(locked)?;
            return Cryptor::for_method(method, key)
                .decrypt(&raw, id)
                .map(Bytes::from);
        }
        if !state.encrypt_metadata && stream.type_name() == Some("Metadata") {
            return Ok(raw);
        }
        let auth = self.auth.as_ref().ok_or_else(locked)?;
        if auth.stream_cryptor.is_identity() {
            return Ok(raw);
        }
        auth.stream_cryptor.decrypt(&raw, id).map(Bytes::from)
    }

    /// Handoff for a dictionary-level parser. `None` for free or unknown
    /// objects.
    pub fn parse_info(&self, id: ObjectId) -> Result<Option<ParseInfo<'_>>> {
        match self.xref.resolve(id) {
            None | Some(Reference::Free { .. }) => Ok(None),
            Some(Reference::Used { offset }) => {
                let indirect = self.read_indirect_at(offset, id)?;
                Ok(Some(ParseInfo {
                    object_id: id,
                    scanner: self.scanner.clone(),
                    bounds: indirect.bounds,
                    crypt: self.crypt_info(id),
                    parent_stream_id: None,
                    context: self,
                }))
            }
            Some(Reference::Compressed { stream_id, index }) => {
                let objstm = self.object_stream(stream_id)?;
                Ok(Some(ParseInfo {
                    object_id: id,
                    scanner: objstm.scanner().clone(),
                    bounds: objstm.slot_bounds(index, id.id)?,
                    crypt: None,
                    parent_stream_id: Some(stream_id),
                    context: self,
                }))
            }
        }
    }

    fn crypt_info(&self, id: ObjectId) -> Option<CryptInfo> {
        if self.encrypt_id == Some(id) {
            return None;
        }
        let auth = self.auth.as_ref()?;
        Some(CryptInfo {
            object_id: id,
            string_cryptor: auth.string_cryptor.clone(),
            stream_cryptor: auth.stream_cryptor.clone(),
        })
    }

    /// Decode every stream object in parallel, in object order.
    ///
    /// Under [`ErrorPolicy::SkipObject`] streams that cannot be decoded
    /// are logged and left out.
    pub fn decode_all_streams(&self) -> Result<Vec<(ObjectId, Vec<u8>)>> {
        self.object_ids()
            .into_par_iter()
            .map(|id| -> Result<Option<(ObjectId, Vec<u8>)>> {
                let Some(obj) = self.get_object_shared(id)? else {
                    return Ok(None);
                };
                let PDFObject::Stream(stream) = obj.as_ref() else {
                    return Ok(None);
                };
                match self.decode_stream(stream) {
                    Ok(data) => Ok(Some((id, data))),
                    Err(err) if self.skips(&err) => {
                        warn!(object = %id, %err, "skipping stream");
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            })
            .filter_map(Result::transpose)
            .collect()
    }
}

fn decrypt_strings(
    object: PDFObject,
    id: ObjectId,
    cryptor: Option<&Cryptor>,
) -> Result<PDFObject> {
    Ok(match object {
        PDFObject::String(data) => {
            let cryptor = cryptor.ok_or_else(locked)?;
            PDFObject::String(cryptor.decrypt(&data, id)?)
        }
        PDFObject::Array(items) => PDFObject::Array(
            items
                .into_iter()
                .map(|item| decrypt_strings(item, id, cryptor))
                .collect::<Result<_>>()?,
        ),
        PDFObject::Dict(dict) => PDFObject::Dict(decrypt_dict(dict, id, cryptor)?),
        PDFObject::Stream(mut stream) => {
            stream.attrs = decrypt_dict(std::mem::take(&mut stream.attrs), id, cryptor)?;
            PDFObject::Stream(stream)
        }
        other => other,
    })
}

fn decrypt_dict(dict: Dict, id: ObjectId, cryptor: Option<&Cryptor>) -> Result<Dict> {
    dict.into_iter()
        .map(|(key, value)| Ok((key, decrypt_strings(value, id, cryptor)?)))
        .collect()
}

fn header_version(scanner: &ByteScanner) -> Option<String> {
    let window = scanner.len().min(HEADER_WINDOW);
    let header = scanner.find_subsequence(b"%PDF-", Direction::Forward, 0, window, false)?;
    let version: Vec<u8> = scanner.data()[header.end..]
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .copied()
        .collect();
    (!version.is_empty()).then(|| String::from_utf8_lossy(&version).into_owned())
}
