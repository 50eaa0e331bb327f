//! Deterministic cache keys for rendered derivatives
//!
//! A receipt is `hex(image_id) + "_" + codes + "_" + values`. Fields are
//! always visited in the fixed grammar order below, never in request order.
//! Each present field appends its one-letter code to `codes` and its
//! fixed-width lowercase hex value to `values`:
//!
//! | field    | code | width | value                               |
//! |----------|------|-------|-------------------------------------|
//! | fit      | `m`  | 2     | none=00, cover=01, contain=02       |
//! | type     | `t`  | 2     | jpg=00, png=01, webp=02             |
//! | quality  | `q`  | 2     | 0-100                               |
//! | width    | `w`  | 4     | 1-65535                             |
//! | height   | `h`  | 4     | 1-65535                             |
//! | ratio    | `r`  | 8     | IEEE-754 f32 bits, big-endian       |
//! | focusx   | `x`  | 4     | basis points 0-10000                |
//! | focusy   | `y`  | 4     | basis points 0-10000                |
//! | lossless | `l`  | 2     | 00 or 01                            |
//!
//! Because codes and widths are fixed, two parameter sets that differ in any
//! present field can never produce the same receipt.

use std::fmt;
use std::fmt::Write as _;
use thiserror::Error;

use super::params::{AspectRatio, FitMode, OutputType, RenderParameterSet};

/// Grammar order: (code, hex width).
const FIELDS: [(char, usize); 9] = [
    ('m', 2),
    ('t', 2),
    ('q', 2),
    ('w', 4),
    ('h', 4),
    ('r', 8),
    ('x', 4),
    ('y', 4),
    ('l', 2),
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReceiptError {
    #[error("receipt '{0}' does not have three '_' separated parts")]
    Malformed(String),
    #[error("receipt image id '{0}' is not hex")]
    InvalidImageId(String),
    #[error("unknown or out-of-order field code '{0}'")]
    UnexpectedCode(char),
    #[error("value section has length {actual}, expected {expected}")]
    ValueLength { expected: usize, actual: usize },
    #[error("field '{code}' has invalid value '{value}'")]
    InvalidValue { code: char, value: String },
}

/// A cache key for one (image, parameter set) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Receipt(String);

impl Receipt {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// File name of the derivative with this receipt.
    pub fn file_name(&self, output: OutputType) -> String {
        format!("{}.{}", self.0, output.extension())
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Receipt {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Prefix shared by every receipt of `image_id`, used to select its cache
/// files on disk.
pub fn receipt_prefix(image_id: i64) -> String {
    format!("{image_id:x}_")
}

pub fn encode_f32_hex(value: f32) -> String {
    format!("{:08x}", value.to_bits())
}

pub fn decode_f32_hex(hex: &str) -> Option<f32> {
    if hex.len() != 8 {
        return None;
    }
    u32::from_str_radix(hex, 16).ok().map(f32::from_bits)
}

pub fn encode(image_id: i64, params: &RenderParameterSet) -> Receipt {
    let mut codes = String::with_capacity(FIELDS.len());
    let mut values = String::with_capacity(32);

    let mut push = |code: char, value: String| {
        codes.push(code);
        values.push_str(&value);
    };

    if let Some(fit) = params.fit {
        push('m', format!("{:02x}", fit.code()));
    }
    if let Some(output) = params.output_type {
        push('t', format!("{:02x}", output.code()));
    }
    if let Some(quality) = params.quality {
        push('q', format!("{quality:02x}"));
    }
    if let Some(width) = params.width {
        push('w', format!("{width:04x}"));
    }
    if let Some(height) = params.height {
        push('h', format!("{height:04x}"));
    }
    if let Some(ratio) = params.ratio {
        push('r', encode_f32_hex(ratio.value()));
    }
    if let Some(x) = params.focus_x {
        push('x', format!("{x:04x}"));
    }
    if let Some(y) = params.focus_y {
        push('y', format!("{y:04x}"));
    }
    if let Some(lossless) = params.lossless {
        push('l', format!("{:02x}", u8::from(lossless)));
    }

    let mut receipt = String::with_capacity(codes.len() + values.len() + 18);
    // Writing into a String cannot fail.
    let _ = write!(receipt, "{}{codes}_{values}", receipt_prefix(image_id));
    Receipt(receipt)
}

/// Parse a receipt back into its image id and parameter set.
pub fn decode(receipt: &str) -> Result<(i64, RenderParameterSet), ReceiptError> {
    let mut parts = receipt.splitn(3, '_');
    let (Some(id), Some(codes), Some(values)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ReceiptError::Malformed(receipt.to_string()));
    };

    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ReceiptError::InvalidImageId(id.to_string()));
    }
    let image_id = u64::from_str_radix(id, 16)
        .map_err(|_| ReceiptError::InvalidImageId(id.to_string()))? as i64;

    let mut widths = Vec::with_capacity(codes.len());
    let mut next_field = 0;
    for code in codes.chars() {
        let position = FIELDS[next_field..]
            .iter()
            .position(|(c, _)| *c == code)
            .ok_or(ReceiptError::UnexpectedCode(code))?;
        let (_, width) = FIELDS[next_field + position];
        widths.push((code, width));
        next_field += position + 1;
    }

    let expected: usize = widths.iter().map(|(_, w)| w).sum();
    if values.len() != expected || !values.is_ascii() {
        return Err(ReceiptError::ValueLength {
            expected,
            actual: values.len(),
        });
    }

    let mut params = RenderParameterSet::default();
    let mut offset = 0;
    for (code, width) in widths {
        let raw = &values[offset..offset + width];
        offset += width;

        let invalid = || ReceiptError::InvalidValue {
            code,
            value: raw.to_string(),
        };
        if !raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(invalid());
        }
        let number = u32::from_str_radix(raw, 16).map_err(|_| invalid())?;

        match code {
            'm' => params.fit = Some(FitMode::from_code(number as u8).ok_or_else(invalid)?),
            't' => params.output_type = Some(OutputType::from_code(number as u8).ok_or_else(invalid)?),
            'q' if number <= 100 => params.quality = Some(number as u8),
            'w' if number > 0 => params.width = Some(number as u16),
            'h' if number > 0 => params.height = Some(number as u16),
            'r' => {
                let ratio = decode_f32_hex(raw).and_then(AspectRatio::new);
                params.ratio = Some(ratio.ok_or_else(invalid)?);
            }
            'x' if number <= 10_000 => params.focus_x = Some(number as u16),
            'y' if number <= 10_000 => params.focus_y = Some(number as u16),
            'l' if number <= 1 => params.lossless = Some(number == 1),
            _ => return Err(invalid()),
        }
    }

    Ok((image_id, params))
}
