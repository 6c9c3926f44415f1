//! zlib (FlateDecode) compression.

use crate::error::{PdfError, Result};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Write};

/// Inflate a zlib stream.
///
/// A stream that breaks off part way (bad checksum, truncated tail) yields
/// whatever was decoded up to the failure. Input that produces no output at
/// all is a decode error.
pub fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::with_capacity(data.len() * 2);
    match decoder.read_to_end(&mut decompressed) {
        Ok(_) => Ok(decompressed),
        Err(err) => {
            let partial = decompress_corrupted(data);
            if partial.is_empty() && !data.is_empty() {
                return Err(PdfError::DecodeError(format!("FlateDecode: {err}")));
            }
            tracing::warn!(
                recovered = partial.len(),
                error = %err,
                "corrupted Flate stream, keeping partial output"
            );
            Ok(partial)
        }
    }
}

/// Deflate `data` into a zlib stream.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Best-effort decompression: feed one byte at a time and keep every byte
/// produced before the decoder gives up.
fn decompress_corrupted(data: &[u8]) -> Vec<u8> {
    use flate2::{Decompress, FlushDecompress, Status};
    let mut decoder = Decompress::new(true);
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut buf = [0u8; 4096];
    let mut i = 0usize;
    while i < data.len() {
        let before_out = decoder.total_out();
        let before_in = decoder.total_in();
        let res = decoder.decompress(&data[i..i + 1], &mut buf, FlushDecompress::None);
        let produced = (decoder.total_out() - before_out) as usize;
        out.extend_from_slice(&buf[..produced]);
        let consumed = (decoder.total_in() - before_in) as usize;
        i += consumed.max(1);
        match res {
            Ok(Status::StreamEnd) | Err(_) => break,
            Ok(_) => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let text = b"BT /F1 24 Tf 72 720 Td (Hello, world!) Tj ET\n".repeat(20);
        let packed = deflate(&text).unwrap();
        assert!(packed.len() < text.len());
        assert_eq!(inflate(&packed).unwrap(), text);
    }

    #[test]
    fn truncated_stream_keeps_prefix() {
        let text = b"0123456789".repeat(500);
        let packed = deflate(&text).unwrap();
        let out = inflate(&packed[..packed.len() - 4]).unwrap();
        assert!(text.starts_with(&out));
        assert!(!out.is_empty());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(matches!(
            inflate(b"definitely not zlib"),
            Err(PdfError::DecodeError(_))
        ));
    }
}
