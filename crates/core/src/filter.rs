//! Stream filter pipeline.
//!
//! A stream payload is located by its declared `/Length`, decrypted by the
//! caller, then run through the `/Filter` chain. Only Flate (with optional
//! predictor) is decoded; every other filter is reported as unsupported
//! rather than passed through.

use crate::codec::flate::inflate;
use crate::codec::predictor::{self, PredictorParams};
use crate::error::{PdfError, Result};
use crate::model::objects::{Dict, PDFObject};
use crate::parser::scanner::{ByteScanner, Direction};
use std::ops::Range;

/// One decoding step from a `/Filter` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterStep {
    /// `FlateDecode`, followed by predictor reversal when the parameters
    /// name one.
    Flate(PredictorParams),
    /// `Crypt` with the crypt filter name from its parameters.
    Crypt(String),
}

/// Build the decoding chain from a stream dictionary.
///
/// `/Filter` and `/DecodeParms` must already be direct objects.
pub fn filter_chain(attrs: &Dict) -> Result<Vec<FilterStep>> {
    let names: Vec<&str> = match attrs.get("Filter") {
        None | Some(PDFObject::Null) => return Ok(Vec::new()),
        Some(PDFObject::Name(name)) => vec![name.as_str()],
        Some(PDFObject::Array(items)) => items
            .iter()
            .map(|item| item.as_name())
            .collect::<Result<_>>()?,
        Some(other) => {
            return Err(PdfError::TypeError {
                expected: "name or array",
                got: other.type_name(),
            });
        }
    };
    let parms: Vec<Option<&Dict>> = match attrs.get("DecodeParms") {
        None | Some(PDFObject::Null) => vec![None; names.len()],
        Some(PDFObject::Dict(d)) => {
            let mut v = vec![None; names.len()];
            if let Some(first) = v.first_mut() {
                *first = Some(d);
            }
            v
        }
        Some(PDFObject::Array(items)) => (0..names.len())
            .map(|i| items.get(i).and_then(|p| p.as_dict().ok()))
            .collect(),
        Some(other) => {
            return Err(PdfError::TypeError {
                expected: "dict or array",
                got: other.type_name(),
            });
        }
    };

    names
        .into_iter()
        .zip(parms)
        .map(|(name, parms)| match name {
            "FlateDecode" | "Fl" => Ok(FilterStep::Flate(match parms {
                Some(d) => PredictorParams::from_dict(d)?,
                None => PredictorParams::default(),
            })),
            "Crypt" => {
                let crypt_name = parms
                    .and_then(|d| d.get("Name"))
                    .and_then(|n| n.as_name().ok())
                    .unwrap_or("Identity");
                Ok(FilterStep::Crypt(crypt_name.to_string()))
            }
            other => Err(PdfError::UnsupportedFilter(other.to_string())),
        })
        .collect()
}

/// The crypt filter a stream names explicitly, if any.
pub fn explicit_crypt_filter(chain: &[FilterStep]) -> Option<&str> {
    chain.iter().find_map(|step| match step {
        FilterStep::Crypt(name) => Some(name.as_str()),
        FilterStep::Flate(_) => None,
    })
}

/// Run already-decrypted payload bytes through `chain`.
pub fn decode(data: &[u8], chain: &[FilterStep]) -> Result<Vec<u8>> {
    let mut output = data.to_vec();
    for step in chain {
        match step {
            FilterStep::Flate(params) => {
                output = inflate(&output)?;
                if params.predictor != 1 {
                    output = predictor::decode(&output, params)?;
                }
            }
            // Decryption is applied before the chain runs.
            FilterStep::Crypt(_) => {}
        }
    }
    Ok(output)
}

/// Locate a stream payload that starts at `data_start` and declares
/// `declared` bytes.
///
/// The declared length is accepted only when `endstream` follows it,
/// after at most one EOL marker. Otherwise the actual span up to the first
/// `endstream` is measured and reported as a
/// [`PdfError::LengthMismatch`].
pub fn payload_range(
    scanner: &ByteScanner,
    data_start: usize,
    declared: usize,
) -> Result<Range<usize>> {
    if let Some(end) = data_start.checked_add(declared).filter(|&e| e <= scanner.len()) {
        let k = scanner.skip_eol(end);
        if scanner.parse_keyword(k, b"endstream").is_some() {
            return Ok(data_start..end);
        }
    }
    let end_kw = scanner
        .find_subsequence(b"endstream", Direction::Forward, data_start, scanner.len(), true)
        .ok_or_else(|| PdfError::structural(data_start, "missing endstream"))?;
    let actual = scanner.strip_eol_before(data_start, end_kw.start) - data_start;
    Err(PdfError::LengthMismatch {
        pos: data_start,
        declared,
        actual,
    })
}
