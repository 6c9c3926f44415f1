//! Standard security handler.
//!
//! Password authentication and key derivation for revisions 2 to 4
//! (RC4 and AES-128), plus per-object string/stream encryption for RC4,
//! AESV2 and AESV3. Revision 5/6 password authentication is not
//! implemented; an AESV3 cryptor can still be built from a known key.

use crate::codec::aes::{self, AES_BLOCK};
use crate::codec::arcfour::rc4;
use crate::error::{PdfError, Result};
use crate::model::objects::{Dict, ObjectId, PDFObject, name};
use indexmap::IndexMap;
use tracing::debug;

/// Password padding string (ISO 32000-1, 7.6.3.3).
pub const PASSWORD_PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Encryption method of a crypt filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptMethod {
    None,
    Rc4,
    AesV2,
    AesV3,
}

impl CryptMethod {
    /// Parse a `/CFM` name.
    pub fn from_cfm(cfm: &str) -> Result<Self> {
        match cfm {
            "None" => Ok(Self::None),
            "V2" => Ok(Self::Rc4),
            "AESV2" => Ok(Self::AesV2),
            "AESV3" => Ok(Self::AesV3),
            other => Err(PdfError::UnsupportedCryptMethod(other.to_string())),
        }
    }

    /// The `/CFM` name.
    pub const fn cfm(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Rc4 => "V2",
            Self::AesV2 => "AESV2",
            Self::AesV3 => "AESV3",
        }
    }
}

/// Outcome of a password check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessLevel {
    None,
    User,
    Owner,
}

/// Per-object string or stream cipher.
///
/// Encryption and decryption are pure functions of the key, the object id
/// and the bytes, so one cryptor can be shared across threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cryptor {
    Identity,
    Rc4 { file_key: Vec<u8> },
    AesV2 { file_key: Vec<u8> },
    AesV3 { file_key: Vec<u8> },
}

impl Cryptor {
    /// Cryptor for `method` keyed by the file key.
    pub fn for_method(method: CryptMethod, file_key: &[u8]) -> Self {
        match method {
            CryptMethod::None => Self::Identity,
            CryptMethod::Rc4 => Self::Rc4 {
                file_key: file_key.to_vec(),
            },
            CryptMethod::AesV2 => Self::AesV2 {
                file_key: file_key.to_vec(),
            },
            CryptMethod::AesV3 => Self::AesV3 {
                file_key: file_key.to_vec(),
            },
        }
    }

    pub const fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Key used for object `id` (Algorithm 1). AESV3 uses the file key as
    /// is; Identity has no key.
    pub fn object_key(&self, id: ObjectId) -> Vec<u8> {
        match self {
            Self::Identity => Vec::new(),
            Self::Rc4 { file_key } => derive_object_key(file_key, id, false),
            Self::AesV2 { file_key } => derive_object_key(file_key, id, true),
            Self::AesV3 { file_key } => file_key.clone(),
        }
    }

    pub fn decrypt(&self, data: &[u8], id: ObjectId) -> Result<Vec<u8>> {
        match self {
            Self::Identity => Ok(data.to_vec()),
            Self::Rc4 { .. } => rc4(&self.object_key(id), data),
            Self::AesV2 { .. } | Self::AesV3 { .. } => {
                aes::decrypt_with_iv(&self.object_key(id), data)
            }
        }
    }

    /// Encrypt for object `id`. The AES IV is derived from the key and the
    /// plaintext, so equal inputs give equal output.
    pub fn encrypt(&self, data: &[u8], id: ObjectId) -> Result<Vec<u8>> {
        match self {
            Self::Identity => Ok(data.to_vec()),
            Self::Rc4 { .. } => rc4(&self.object_key(id), data),
            Self::AesV2 { .. } | Self::AesV3 { .. } => {
                let key = self.object_key(id);
                let mut context = md5::Context::new();
                context.consume(&key);
                context.consume(data);
                let iv: [u8; AES_BLOCK] = context.finalize().0;
                aes::encrypt_with_iv(&key, &iv, data)
            }
        }
    }
}

fn derive_object_key(file_key: &[u8], id: ObjectId, aes_salt: bool) -> Vec<u8> {
    let mut context = md5::Context::new();
    context.consume(file_key);
    context.consume(&id.id.to_le_bytes()[..3]);
    context.consume(id.generation.to_le_bytes());
    if aes_salt {
        context.consume(b"sAlT");
    }
    let n = (file_key.len() + 5).min(16);
    context.finalize().0[..n].to_vec()
}

/// Result of [`EncryptionState::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    pub access_level: AccessLevel,
    pub string_cryptor: Cryptor,
    pub stream_cryptor: Cryptor,
}

impl Authentication {
    const fn denied() -> Self {
        Self {
            access_level: AccessLevel::None,
            string_cryptor: Cryptor::Identity,
            stream_cryptor: Cryptor::Identity,
        }
    }
}

/// Standard security handler configuration of one document.
#[derive(Debug, Clone)]
pub struct EncryptionState {
    pub filter: String,
    pub version: i64,
    pub revision: i64,
    pub permissions: i32,
    pub encrypt_metadata: bool,
    pub key_length_bits: usize,
    pub string_method: CryptMethod,
    pub stream_method: CryptMethod,
    /// Stored `/O`.
    pub owner_hash: Vec<u8>,
    /// Stored `/U`.
    pub user_hash: Vec<u8>,
    /// First element of the trailer `/ID`.
    pub file_id: Vec<u8>,
    crypt_filters: IndexMap<String, CryptMethod>,
    file_key: Option<Vec<u8>>,
    access_level: AccessLevel,
}

fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PASSWORD_PADDING[..32 - len]);
    padded
}

/// Drop the padding tail from a recovered padded password.
fn strip_padding(padded: &[u8]) -> &[u8] {
    let len = padded.len().min(32);
    (0..=len)
        .find(|&k| padded[k..len] == PASSWORD_PADDING[..len - k])
        .map_or(&padded[..len], |k| &padded[..k])
}

fn xor_key(key: &[u8], counter: u8) -> Vec<u8> {
    key.iter().map(|b| b ^ counter).collect()
}

fn get_int(encrypt: &Dict, key: &str) -> Result<i64> {
    encrypt
        .get(key)
        .ok_or_else(|| PdfError::EncryptionError(format!("missing /{key} in /Encrypt")))?
        .as_int()
}

fn get_bytes(encrypt: &Dict, key: &str) -> Result<Vec<u8>> {
    encrypt
        .get(key)
        .ok_or_else(|| PdfError::EncryptionError(format!("missing /{key} in /Encrypt")))?
        .as_string()
        .map(<[u8]>::to_vec)
}

impl EncryptionState {
    /// Read an `/Encrypt` dictionary. `file_id` is the first element of the
    /// trailer `/ID` (empty when absent).
    pub fn from_dict(encrypt: &Dict, file_id: &[u8]) -> Result<Self> {
        let filter = encrypt
            .get("Filter")
            .and_then(|f| f.as_name().ok())
            .unwrap_or("Standard")
            .to_string();
        if filter != "Standard" {
            return Err(PdfError::UnsupportedCryptMethod(format!(
                "security handler /{filter}"
            )));
        }
        let version = encrypt
            .get("V")
            .map(PDFObject::as_int)
            .transpose()?
            .unwrap_or(0);
        let revision = get_int(encrypt, "R")?;
        if !(2..=6).contains(&revision) {
            return Err(PdfError::UnsupportedCryptMethod(format!(
                "standard security handler revision {revision}"
            )));
        }

        let mut crypt_filters = IndexMap::new();
        let (key_length_bits, string_method, stream_method) = match version {
            0 | 1 => (40, CryptMethod::Rc4, CryptMethod::Rc4),
            2 | 3 => {
                let bits = encrypt
                    .get("Length")
                    .map(PDFObject::as_usize)
                    .transpose()?
                    .unwrap_or(40);
                (bits, CryptMethod::Rc4, CryptMethod::Rc4)
            }
            4 | 5 => {
                if let Some(cf) = encrypt.get("CF") {
                    for (cf_name, params) in cf.as_dict()? {
                        let cfm = params
                            .get("CFM")
                            .and_then(|m| m.as_name().ok())
                            .unwrap_or("None");
                        crypt_filters.insert(cf_name.clone(), CryptMethod::from_cfm(cfm)?);
                    }
                }
                let lookup = |key: &str| -> Result<CryptMethod> {
                    let filter_name = encrypt
                        .get(key)
                        .and_then(|n| n.as_name().ok())
                        .unwrap_or("Identity");
                    if filter_name == "Identity" {
                        return Ok(CryptMethod::None);
                    }
                    crypt_filters.get(filter_name).copied().ok_or_else(|| {
                        PdfError::UnsupportedCryptMethod(format!(
                            "crypt filter /{filter_name} not in /CF"
                        ))
                    })
                };
                let strf = lookup("StrF")?;
                let stmf = lookup("StmF")?;
                let bits = if version == 5 { 256 } else { 128 };
                (bits, strf, stmf)
            }
            other => {
                return Err(PdfError::UnsupportedCryptMethod(format!(
                    "standard security handler version {other}"
                )));
            }
        };
        if key_length_bits % 8 != 0 || !(40..=256).contains(&key_length_bits) {
            return Err(PdfError::EncryptionError(format!(
                "invalid key length {key_length_bits} bits"
            )));
        }
        // Algorithm 2 keys are cut from a 16-byte MD5 digest.
        if revision <= 4 && key_length_bits > 128 {
            return Err(PdfError::EncryptionError(format!(
                "{key_length_bits}-bit key with revision {revision}"
            )));
        }

        let encrypt_metadata = encrypt
            .get("EncryptMetadata")
            .and_then(|b| b.as_bool().ok())
            .unwrap_or(true);

        Ok(Self {
            filter,
            version,
            revision,
            // P is a signed 32-bit field; files also write it unsigned.
            permissions: get_int(encrypt, "P")? as i32,
            encrypt_metadata,
            key_length_bits,
            string_method,
            stream_method,
            owner_hash: get_bytes(encrypt, "O")?,
            user_hash: get_bytes(encrypt, "U")?,
            file_id: file_id.to_vec(),
            crypt_filters,
            file_key: None,
            access_level: AccessLevel::None,
        })
    }

    /// Configure a new standard security handler for writing.
    ///
    /// Revision 2 uses 40-bit RC4, revision 3 RC4 with `key_bits` and
    /// revision 4 `method` (RC4 or AESV2) with a 128-bit key. The returned
    /// state is already authenticated as owner.
    pub fn new_standard(
        revision: i64,
        key_bits: usize,
        permissions: i32,
        owner_password: &str,
        user_password: &str,
        file_id: &[u8],
        method: CryptMethod,
    ) -> Result<Self> {
        let (version, key_length_bits, method) = match revision {
            2 => (1, 40, CryptMethod::Rc4),
            3 => (2, key_bits, CryptMethod::Rc4),
            4 => match method {
                CryptMethod::Rc4 | CryptMethod::AesV2 => (4, 128, method),
                other => {
                    return Err(PdfError::UnsupportedCryptMethod(format!(
                        "{} with revision 4",
                        other.cfm()
                    )));
                }
            },
            5 | 6 => {
                return Err(PdfError::NotImplemented(
                    "AES-256 standard security handler (revision 5/6)".into(),
                ));
            }
            other => {
                return Err(PdfError::UnsupportedCryptMethod(format!(
                    "standard security handler revision {other}"
                )));
            }
        };
        if key_length_bits % 8 != 0 || !(40..=128).contains(&key_length_bits) {
            return Err(PdfError::EncryptionError(format!(
                "invalid key length {key_length_bits} bits"
            )));
        }

        let mut crypt_filters = IndexMap::new();
        if version == 4 {
            crypt_filters.insert("StdCF".to_string(), method);
        }
        let mut state = Self {
            filter: "Standard".into(),
            version,
            revision,
            permissions,
            encrypt_metadata: true,
            key_length_bits,
            string_method: method,
            stream_method: method,
            owner_hash: Vec::new(),
            user_hash: Vec::new(),
            file_id: file_id.to_vec(),
            crypt_filters,
            file_key: None,
            access_level: AccessLevel::None,
        };
        state.owner_hash =
            state.compute_owner_hash(owner_password.as_bytes(), user_password.as_bytes())?;
        let key = state.compute_file_key(user_password.as_bytes());
        state.user_hash = state.compute_user_hash(&key)?;
        state.file_key = Some(key);
        state.access_level = AccessLevel::Owner;
        Ok(state)
    }

    /// The `/Encrypt` dictionary describing this state.
    pub fn to_dict(&self) -> Dict {
        let mut dict = Dict::new();
        dict.insert("Filter".into(), name(&self.filter));
        dict.insert("V".into(), PDFObject::Int(self.version));
        dict.insert("R".into(), PDFObject::Int(self.revision));
        dict.insert("Length".into(), PDFObject::Int(self.key_length_bits as i64));
        dict.insert("P".into(), PDFObject::Int(i64::from(self.permissions)));
        dict.insert("O".into(), PDFObject::String(self.owner_hash.clone()));
        dict.insert("U".into(), PDFObject::String(self.user_hash.clone()));
        if self.version >= 4 {
            let mut cf = Dict::new();
            for (cf_name, method) in &self.crypt_filters {
                let mut params = Dict::new();
                params.insert("CFM".into(), name(method.cfm()));
                params.insert("AuthEvent".into(), name("DocOpen"));
                params.insert(
                    "Length".into(),
                    PDFObject::Int((self.key_length_bits / 8) as i64),
                );
                cf.insert(cf_name.clone(), PDFObject::Dict(params));
            }
            dict.insert("CF".into(), PDFObject::Dict(cf));
            let filter_of = |method: CryptMethod| {
                self.crypt_filters
                    .iter()
                    .find(|(_, m)| **m == method)
                    .map_or("Identity", |(n, _)| n.as_str())
            };
            dict.insert("StmF".into(), name(filter_of(self.stream_method)));
            dict.insert("StrF".into(), name(filter_of(self.string_method)));
            if !self.encrypt_metadata {
                dict.insert("EncryptMetadata".into(), PDFObject::Bool(false));
            }
        }
        dict
    }

    /// File key length in bytes.
    pub const fn key_len(&self) -> usize {
        if self.revision == 2 {
            5
        } else {
            self.key_length_bits / 8
        }
    }

    /// Algorithm 2: file key from a (user) password.
    pub fn compute_file_key(&self, password: &[u8]) -> Vec<u8> {
        let n = self.key_len().min(16);
        let mut context = md5::Context::new();
        context.consume(pad_password(password));
        context.consume(&self.owner_hash[..self.owner_hash.len().min(32)]);
        context.consume(self.permissions.to_le_bytes());
        context.consume(&self.file_id);
        if self.revision >= 4 && !self.encrypt_metadata {
            context.consume([0xFF, 0xFF, 0xFF, 0xFF]);
        }
        let mut digest = context.finalize().0;
        if self.revision >= 3 {
            for _ in 0..50 {
                digest = md5::compute(&digest[..n]).0;
            }
        }
        digest[..n].to_vec()
    }

    /// RC4 key derived from the owner password (Algorithm 3, steps a-d).
    fn owner_key(&self, owner_password: &[u8]) -> Vec<u8> {
        let mut digest = md5::compute(pad_password(owner_password)).0;
        if self.revision >= 3 {
            for _ in 0..50 {
                digest = md5::compute(digest).0;
            }
        }
        digest[..self.key_len().min(16)].to_vec()
    }

    /// Algorithm 3: the `/O` value. An empty owner password falls back to
    /// the user password.
    pub fn compute_owner_hash(
        &self,
        owner_password: &[u8],
        user_password: &[u8],
    ) -> Result<Vec<u8>> {
        let owner = if owner_password.is_empty() {
            user_password
        } else {
            owner_password
        };
        let key = self.owner_key(owner);
        let mut result = rc4(&key, &pad_password(user_password))?;
        if self.revision >= 3 {
            for i in 1..20u8 {
                result = rc4(&xor_key(&key, i), &result)?;
            }
        }
        Ok(result)
    }

    /// Algorithms 4 and 5: the `/U` value for a file key.
    pub fn compute_user_hash(&self, file_key: &[u8]) -> Result<Vec<u8>> {
        if self.revision == 2 {
            return rc4(file_key, &PASSWORD_PADDING);
        }
        let mut context = md5::Context::new();
        context.consume(PASSWORD_PADDING);
        context.consume(&self.file_id);
        let mut result = rc4(file_key, &context.finalize().0)?;
        for i in 1..20u8 {
            result = rc4(&xor_key(file_key, i), &result)?;
        }
        // 16 bytes of arbitrary padding.
        result.extend_from_slice(&PASSWORD_PADDING[..16]);
        Ok(result)
    }

    /// File key if `password` is the user password.
    pub fn check_user_password(&self, password: &[u8]) -> Result<Option<Vec<u8>>> {
        let key = self.compute_file_key(password);
        let computed = self.compute_user_hash(&key)?;
        let matches = if self.revision == 2 {
            computed == self.user_hash
        } else {
            self.user_hash.len() >= 16 && computed[..16] == self.user_hash[..16]
        };
        Ok(matches.then_some(key))
    }

    /// File key if `password` is the owner password (Algorithm 7).
    pub fn check_owner_password(&self, password: &[u8]) -> Result<Option<Vec<u8>>> {
        let key = self.owner_key(password);
        let mut recovered = self.owner_hash.clone();
        if self.revision == 2 {
            recovered = rc4(&key, &recovered)?;
        } else {
            for i in (0..20u8).rev() {
                recovered = rc4(&xor_key(&key, i), &recovered)?;
            }
        }
        self.check_user_password(strip_padding(&recovered))
    }

    /// Try `password` as owner, then as user password.
    ///
    /// A failed attempt is reported as [`AccessLevel::None`] and leaves any
    /// key cached by an earlier successful attempt in place.
    pub fn authenticate(&mut self, password: &str) -> Result<Authentication> {
        if self.revision >= 5 {
            return Err(PdfError::NotImplemented(
                "AES-256 password authentication (revision 5/6)".into(),
            ));
        }
        let password = password.as_bytes();
        let (level, key) = if let Some(key) = self.check_owner_password(password)? {
            (AccessLevel::Owner, key)
        } else if let Some(key) = self.check_user_password(password)? {
            (AccessLevel::User, key)
        } else {
            debug!(revision = self.revision, "password did not match");
            return Ok(Authentication::denied());
        };
        debug!(revision = self.revision, access = ?level, "authenticated");
        self.file_key = Some(key);
        self.access_level = level;
        self.authentication().ok_or_else(|| {
            PdfError::EncryptionError("file key missing after authentication".into())
        })
    }

    /// Cryptors for the cached file key, if a password has matched.
    pub fn authentication(&self) -> Option<Authentication> {
        let key = self.file_key.as_deref()?;
        Some(Authentication {
            access_level: self.access_level,
            string_cryptor: Cryptor::for_method(self.string_method, key),
            stream_cryptor: Cryptor::for_method(self.stream_method, key),
        })
    }

    pub fn file_key(&self) -> Option<&[u8]> {
        self.file_key.as_deref()
    }

    pub const fn access_level(&self) -> AccessLevel {
        self.access_level
    }

    /// Method of a named crypt filter (`/Crypt` stream filter).
    pub fn crypt_filter_method(&self, filter_name: &str) -> Result<CryptMethod> {
        if filter_name == "Identity" {
            return Ok(CryptMethod::None);
        }
        self.crypt_filters
            .get(filter_name)
            .copied()
            .ok_or_else(|| PdfError::UnsupportedCryptMethod(format!("crypt filter /{filter_name}")))
    }
}
