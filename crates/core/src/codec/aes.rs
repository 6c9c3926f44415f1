//! AES-CBC helpers for PDF encryption.
//!
//! Encrypted strings and streams carry their 16-byte IV in front of the
//! ciphertext and are padded with PKCS#7.

use crate::error::{PdfError, Result};
use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cbc::{Decryptor, Encryptor};

type Aes128CbcDec = Decryptor<aes::Aes128>;
type Aes256CbcDec = Decryptor<aes::Aes256>;
type Aes128CbcEnc = Encryptor<aes::Aes128>;
type Aes256CbcEnc = Encryptor<aes::Aes256>;

pub const AES_BLOCK: usize = 16;

fn key_error(len: usize) -> PdfError {
    PdfError::EncryptionError(format!("AES key must be 16 or 32 bytes, got {len}"))
}

/// Decrypt data using AES-CBC with a 128 or 256 bit key. No padding is
/// removed; `data` must be a whole number of blocks.
pub fn aes_cbc_decrypt(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() % AES_BLOCK != 0 {
        return Err(PdfError::DecodeError(format!(
            "AES ciphertext length {} is not a multiple of {AES_BLOCK}",
            data.len()
        )));
    }
    let bad_iv = |_| PdfError::EncryptionError("AES IV must be 16 bytes".into());
    let mut buf = data.to_vec();
    match key.len() {
        16 => {
            let cipher = Aes128CbcDec::new_from_slices(key, iv).map_err(bad_iv)?;
            cipher
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .map_err(|e| PdfError::DecodeError(e.to_string()))?;
        }
        32 => {
            let cipher = Aes256CbcDec::new_from_slices(key, iv).map_err(bad_iv)?;
            cipher
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .map_err(|e| PdfError::DecodeError(e.to_string()))?;
        }
        n => return Err(key_error(n)),
    }
    Ok(buf)
}

/// Encrypt data using AES-CBC with PKCS#7 padding.
pub fn aes_cbc_encrypt(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let bad_iv = |_| PdfError::EncryptionError("AES IV must be 16 bytes".into());
    let mut buf = vec![0u8; data.len() + AES_BLOCK];
    buf[..data.len()].copy_from_slice(data);
    let written = match key.len() {
        16 => Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(bad_iv)?
            .encrypt_padded_mut::<Pkcs7>(&mut buf, data.len())
            .map_err(|e| PdfError::EncryptionError(e.to_string()))?
            .len(),
        32 => Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(bad_iv)?
            .encrypt_padded_mut::<Pkcs7>(&mut buf, data.len())
            .map_err(|e| PdfError::EncryptionError(e.to_string()))?
            .len(),
        n => return Err(key_error(n)),
    };
    buf.truncate(written);
    Ok(buf)
}

/// Decrypt `IV || ciphertext` and strip the padding.
///
/// Input shorter than one block decrypts to nothing.
pub fn decrypt_with_iv(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < AES_BLOCK {
        return Ok(Vec::new());
    }
    let (iv, ciphertext) = data.split_at(AES_BLOCK);
    let plain = aes_cbc_decrypt(key, iv, ciphertext)?;
    Ok(unpad_aes(&plain).to_vec())
}

/// Encrypt and prepend `iv` to the ciphertext.
pub fn encrypt_with_iv(key: &[u8], iv: &[u8; AES_BLOCK], data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(AES_BLOCK + data.len() + AES_BLOCK);
    out.extend_from_slice(iv);
    out.extend_from_slice(&aes_cbc_encrypt(key, iv, data)?);
    Ok(out)
}

/// Remove PKCS#7 padding from AES-decrypted data.
///
/// Returns data unchanged if padding is invalid:
/// - Padding byte value is 0 or > 16
/// - Not enough bytes for claimed padding
/// - Padding bytes are not all equal to the padding length
pub fn unpad_aes(data: &[u8]) -> &[u8] {
    let Some(&last) = data.last() else {
        return data;
    };
    let pad_len = last as usize;
    if pad_len == 0 || pad_len > AES_BLOCK || pad_len > data.len() {
        return data;
    }
    let start = data.len() - pad_len;
    if data[start..].iter().any(|&b| b as usize != pad_len) {
        return data;
    }
    &data[..start]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpad() {
        assert_eq!(unpad_aes(b"abc\x03\x03\x03"), b"abc");
        assert_eq!(unpad_aes(b"abc\x03\x02\x03"), b"abc\x03\x02\x03");
        assert_eq!(unpad_aes(b"abc\x00"), b"abc\x00");
        assert_eq!(unpad_aes(b""), b"");
    }

    #[test]
    fn test_iv_prefixed_roundtrip() {
        let key = [7u8; 16];
        let iv = [9u8; 16];
        for len in [0usize, 1, 15, 16, 17, 40] {
            let plain: Vec<u8> = (0..len as u8).collect();
            let sealed = encrypt_with_iv(&key, &iv, &plain).unwrap();
            assert_eq!(&sealed[..16], &iv);
            assert_eq!((sealed.len() - 16) % 16, 0);
            assert_eq!(decrypt_with_iv(&key, &sealed).unwrap(), plain);
        }
    }

    #[test]
    fn test_bad_inputs() {
        assert!(aes_cbc_decrypt(&[0u8; 15], &[0u8; 16], &[0u8; 16]).is_err());
        assert!(aes_cbc_decrypt(&[0u8; 16], &[0u8; 16], &[0u8; 15]).is_err());
        assert!(decrypt_with_iv(&[0u8; 16], &[0u8; 8]).unwrap().is_empty());
    }
}
