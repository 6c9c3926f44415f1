//! Codec modules for PDF stream compression and encryption.
//!
//! This module contains:
//! - `aes`: AES-CBC encryption/decryption
//! - `arcfour`: RC4 encryption
//! - `flate`: zlib inflate/deflate
//! - `predictor`: PNG/TIFF predictor reversal

pub mod aes;
pub mod arcfour;
pub mod flate;
pub mod predictor;

// Re-export main functions for convenience
pub use aes::{aes_cbc_decrypt, aes_cbc_encrypt, unpad_aes};
pub use arcfour::{Arcfour, rc4};
pub use flate::{deflate, inflate};
pub use predictor::{PngFilter, PredictorParams};
