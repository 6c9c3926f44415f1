//! PNG and TIFF predictors (`/DecodeParms /Predictor`).
//!
//! Rows are `ceil(columns * colors * bpc / 8)` bytes; PNG-predicted data
//! carries one extra filter-tag byte in front of every row.

use crate::error::{PdfError, Result};
use crate::model::objects::Dict;

/// Per-row PNG filter tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PngFilter {
    None = 0,
    Sub = 1,
    Up = 2,
    Average = 3,
    Paeth = 4,
}

impl PngFilter {
    pub const ALL: [Self; 5] = [Self::None, Self::Sub, Self::Up, Self::Average, Self::Paeth];

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::None),
            1 => Some(Self::Sub),
            2 => Some(Self::Up),
            3 => Some(Self::Average),
            4 => Some(Self::Paeth),
            _ => None,
        }
    }
}

/// Predictor settings from a `/DecodeParms` dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictorParams {
    pub predictor: i64,
    pub colors: usize,
    pub bits_per_component: usize,
    pub columns: usize,
}

impl Default for PredictorParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
        }
    }
}

impl PredictorParams {
    /// PNG parameters with the given column count and 8-bit samples.
    pub const fn png(columns: usize, colors: usize) -> Self {
        Self {
            predictor: 12,
            colors,
            bits_per_component: 8,
            columns,
        }
    }

    /// Read the predictor entries; missing entries take their defaults.
    pub fn from_dict(parms: &Dict) -> Result<Self> {
        let mut params = Self::default();
        let int = |key: &str| -> Result<Option<i64>> {
            parms.get(key).map(|v| v.as_int()).transpose()
        };
        let positive = |key: &str, n: i64| -> Result<usize> {
            usize::try_from(n)
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| PdfError::DecodeError(format!("/{key} must be positive, got {n}")))
        };
        if let Some(p) = int("Predictor")? {
            params.predictor = p;
        }
        if let Some(n) = int("Colors")? {
            params.colors = positive("Colors", n)?;
        }
        if let Some(n) = int("BitsPerComponent")? {
            params.bits_per_component = positive("BitsPerComponent", n)?;
        }
        if let Some(n) = int("Columns")? {
            params.columns = positive("Columns", n)?;
        }
        if !matches!(params.bits_per_component, 1 | 2 | 4 | 8 | 16) {
            return Err(PdfError::DecodeError(format!(
                "unsupported /BitsPerComponent {}",
                params.bits_per_component
            )));
        }
        params.checked_row_len()?;
        Ok(params)
    }

    /// Bytes per row, without the PNG tag byte. Samples are packed across
    /// pixel boundaries, so a row is `ceil(columns * colors * bpc / 8)`.
    ///
    /// Saturates on overflow; decoding goes through
    /// [`Self::checked_row_len`].
    pub const fn row_len(&self) -> usize {
        match self.checked_bits_per_row() {
            Some(bits) => bits.div_ceil(8),
            None => usize::MAX,
        }
    }

    /// [`Self::row_len`], or `DecodeError` when the row size overflows.
    pub fn checked_row_len(&self) -> Result<usize> {
        self.checked_bits_per_row()
            .map(|bits| bits.div_ceil(8))
            .ok_or_else(|| {
                PdfError::DecodeError(format!(
                    "predictor row of {} columns x {} colors x {} bits overflows",
                    self.columns, self.colors, self.bits_per_component
                ))
            })
    }

    const fn checked_bits_per_row(&self) -> Option<usize> {
        match self.colors.checked_mul(self.bits_per_component) {
            Some(bits) => bits.checked_mul(self.columns),
            None => None,
        }
    }

    /// Distance to the corresponding byte of the previous pixel.
    pub const fn bytes_per_pixel(&self) -> usize {
        let bpp = self.colors.saturating_mul(self.bits_per_component).div_ceil(8);
        if bpp == 0 { 1 } else { bpp }
    }

    pub const fn is_png(&self) -> bool {
        self.predictor >= 10
    }
}

/// Undo the predictor named in `params`.
pub fn decode(data: &[u8], params: &PredictorParams) -> Result<Vec<u8>> {
    match params.predictor {
        1 => Ok(data.to_vec()),
        2 => Err(PdfError::NotImplemented("TIFF predictor 2".into())),
        10..=15 => remove_png_filter(data, params),
        other => Err(PdfError::DecodeError(format!("unknown predictor {other}"))),
    }
}

/// Paeth predictor function used in PNG filtering. Ties go to `left`, then
/// `above`.
pub const fn paeth_predictor(left: u8, above: u8, upper_left: u8) -> u8 {
    let a = left as i32;
    let b = above as i32;
    let c = upper_left as i32;
    let p = a + b - c;
    let pa = (p - a).abs();
    let pb = (p - b).abs();
    let pc = (p - c).abs();

    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        above
    } else {
        upper_left
    }
}

#[inline]
fn predict(filter: PngFilter, row: &[u8], prev_row: &[u8], i: usize, bpp: usize) -> u8 {
    let left = if i >= bpp { row[i - bpp] } else { 0 };
    let above = prev_row[i];
    match filter {
        PngFilter::None => 0,
        PngFilter::Sub => left,
        PngFilter::Up => above,
        PngFilter::Average => ((u16::from(left) + u16::from(above)) / 2) as u8,
        PngFilter::Paeth => {
            let upper_left = if i >= bpp { prev_row[i - bpp] } else { 0 };
            paeth_predictor(left, above, upper_left)
        }
    }
}

/// Reverse PNG prediction. An incomplete trailing row is dropped.
///
/// Non-empty data shorter than one tagged row is a `DecodeError`; row
/// buffers are sized only after that check.
pub fn remove_png_filter(data: &[u8], params: &PredictorParams) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let row_len = params.checked_row_len()?;
    let bpp = params.bytes_per_pixel();
    let stride = row_len
        .checked_add(1)
        .filter(|&stride| stride <= data.len())
        .ok_or_else(|| {
            PdfError::DecodeError(format!(
                "predictor row of {row_len} bytes is longer than the {} bytes of data",
                data.len()
            ))
        })?;

    let mut result = Vec::with_capacity(data.len() / stride * row_len);
    let mut prev_row = vec![0u8; row_len];
    let mut current_row = vec![0u8; row_len];

    for (row_index, chunk) in data.chunks_exact(stride).enumerate() {
        let filter = PngFilter::from_tag(chunk[0]).ok_or_else(|| {
            PdfError::DecodeError(format!(
                "invalid PNG filter tag {} in row {row_index}",
                chunk[0]
            ))
        })?;
        let filtered = &chunk[1..];
        for i in 0..row_len {
            let predicted = predict(filter, &current_row, &prev_row, i, bpp);
            current_row[i] = filtered[i].wrapping_add(predicted);
        }
        result.extend_from_slice(&current_row);
        std::mem::swap(&mut prev_row, &mut current_row);
    }
    if data.len() % stride != 0 {
        tracing::debug!(
            trailing = data.len() % stride,
            "dropping incomplete predictor row"
        );
    }
    Ok(result)
}

/// Apply PNG prediction with the same filter on every row. A short final
/// row is zero-padded.
pub fn apply_png_filter(data: &[u8], filter: PngFilter, params: &PredictorParams) -> Vec<u8> {
    let row_len = params.row_len();
    let bpp = params.bytes_per_pixel();
    let rows = data.len().div_ceil(row_len.max(1));

    let mut out = Vec::with_capacity(rows * (row_len + 1));
    let mut prev_row = vec![0u8; row_len];
    let mut row = vec![0u8; row_len];
    for r in 0..rows {
        let start = r * row_len;
        let end = (start + row_len).min(data.len());
        row.fill(0);
        row[..end - start].copy_from_slice(&data[start..end]);
        out.push(filter as u8);
        for i in 0..row_len {
            out.push(row[i].wrapping_sub(predict(filter, &row, &prev_row, i, bpp)));
        }
        std::mem::swap(&mut prev_row, &mut row);
    }
    out
}
