//! Render parameters and their typed query parsers.
//!
//! Every query field has its own parser returning `Option<T>`: `None` means
//! the caller did not send the field, which is not the same as sending the
//! default value. Receipts encode only the fields that are present.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{RenderConfig, MAX_ENCODABLE_DIMENSION};
use crate::errors::ParameterError;

/// Focus overrides are quantized to basis points.
pub const FOCUS_SCALE: f64 = 10_000.0;

/// How source and target aspect ratios are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Focus-centred crop, downscale only
    #[default]
    None,
    /// Focus-centred crop filling the requested box exactly
    Cover,
    /// No crop, fit entirely inside the requested box
    Contain,
}

impl FitMode {
    pub fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Cover => 1,
            Self::Contain => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Cover),
            2 => Some(Self::Contain),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Cover => "cover",
            Self::Contain => "contain",
        }
    }
}

impl fmt::Display for FitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoded format of a derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    Jpg,
    Png,
    Webp,
}

impl OutputType {
    pub fn code(self) -> u8 {
        match self {
            Self::Jpg => 0,
            Self::Png => 1,
            Self::Webp => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Jpg),
            1 => Some(Self::Png),
            2 => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
        }
    }

    /// Output type matching a source MIME type; anything we cannot
    /// re-encode natively becomes PNG.
    pub fn from_mime(mime_type: &str) -> Self {
        match mime_type.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Self::Jpg,
            "image/webp" => Self::Webp,
            _ => Self::Png,
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }
}

/// A positive, finite width:height ratio held as the single-precision
/// value that is encoded into receipts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectRatio(f32);

impl AspectRatio {
    pub fn new(value: f32) -> Option<Self> {
        (value.is_finite() && value > 0.0).then_some(Self(value))
    }

    /// Parse `"w:h"` (e.g. `"3:2"`) or a plain decimal (`"1.5"`).
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let value = match raw.split_once(':') {
            Some((w, h)) => {
                let w: f32 = w
                    .trim()
                    .parse()
                    .map_err(|_| format!("'{w}' is not a number"))?;
                let h: f32 = h
                    .trim()
                    .parse()
                    .map_err(|_| format!("'{h}' is not a number"))?;
                if !(w.is_finite() && w > 0.0) || !(h.is_finite() && h > 0.0) {
                    return Err(format!("both sides of '{raw}' must be positive"));
                }
                w / h
            }
            None => raw
                .parse::<f32>()
                .map_err(|_| format!("'{raw}' is not a ratio"))?,
        };
        Self::new(value).ok_or_else(|| format!("'{raw}' does not resolve to a positive ratio"))
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

/// The explicitly requested transform for one render.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderParameterSet {
    pub fit: Option<FitMode>,
    pub output_type: Option<OutputType>,
    pub quality: Option<u8>,
    pub width: Option<u16>,
    pub height: Option<u16>,
    pub ratio: Option<AspectRatio>,
    /// Focus override in basis points (0..=10000)
    pub focus_x: Option<u16>,
    pub focus_y: Option<u16>,
    pub lossless: Option<bool>,
}

impl RenderParameterSet {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn focus_x_normalized(&self) -> Option<f64> {
        self.focus_x.map(|v| f64::from(v) / FOCUS_SCALE)
    }

    pub fn focus_y_normalized(&self) -> Option<f64> {
        self.focus_y.map(|v| f64::from(v) / FOCUS_SCALE)
    }

    /// Run every field parser over a raw query.
    pub fn from_query(query: &RenderQuery, limits: &ParameterLimits) -> Result<Self, ParameterError> {
        Ok(Self {
            fit: parse_fit(query.fit.as_deref())?,
            output_type: parse_output_type(query.output_type.as_deref())?,
            quality: parse_quality(query.quality.as_deref())?,
            width: parse_dimension("width", query.width.as_deref(), limits)?,
            height: parse_dimension("height", query.height.as_deref(), limits)?,
            ratio: parse_ratio(query.ratio.as_deref())?,
            focus_x: parse_focus("focusx", query.focusx.as_deref())?,
            focus_y: parse_focus("focusy", query.focusy.as_deref())?,
            lossless: parse_flag("lossless", query.lossless.as_deref())?,
        })
    }
}

/// Bounds applied while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterLimits {
    pub max_dimension: u32,
}

impl Default for ParameterLimits {
    fn default() -> Self {
        Self {
            max_dimension: 4096,
        }
    }
}

impl From<&RenderConfig> for ParameterLimits {
    fn from(config: &RenderConfig) -> Self {
        Self {
            max_dimension: config.max_dimension.min(MAX_ENCODABLE_DIMENSION),
        }
    }
}

/// Raw render query; long names and one-letter codes are both accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenderQuery {
    #[serde(alias = "m", alias = "mode")]
    pub fit: Option<String>,
    #[serde(rename = "type", alias = "t")]
    pub output_type: Option<String>,
    #[serde(alias = "q")]
    pub quality: Option<String>,
    #[serde(alias = "w")]
    pub width: Option<String>,
    #[serde(alias = "h")]
    pub height: Option<String>,
    #[serde(alias = "r")]
    pub ratio: Option<String>,
    #[serde(alias = "x")]
    pub focusx: Option<String>,
    #[serde(alias = "y")]
    pub focusy: Option<String>,
    #[serde(alias = "l")]
    pub lossless: Option<String>,
}

// Blank values count as absent.
fn present(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|v| !v.is_empty())
}

pub fn parse_fit(raw: Option<&str>) -> Result<Option<FitMode>, ParameterError> {
    let Some(raw) = present(raw) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "none" => Ok(Some(FitMode::None)),
        "cover" => Ok(Some(FitMode::Cover)),
        "contain" => Ok(Some(FitMode::Contain)),
        other => Err(ParameterError::new(
            "fit",
            format!("'{other}' is not one of none, cover, contain"),
        )),
    }
}

pub fn parse_output_type(raw: Option<&str>) -> Result<Option<OutputType>, ParameterError> {
    let Some(raw) = present(raw) else {
        return Ok(None);
    };
    OutputType::from_extension(raw).map(Some).ok_or_else(|| {
        ParameterError::new("type", format!("'{raw}' is not one of jpg, png, webp"))
    })
}

pub fn parse_quality(raw: Option<&str>) -> Result<Option<u8>, ParameterError> {
    let Some(raw) = present(raw) else {
        return Ok(None);
    };
    match raw.parse::<u32>() {
        Ok(q) if q <= 100 => Ok(Some(q as u8)),
        _ => Err(ParameterError::new(
            "quality",
            format!("'{raw}' is not an integer between 0 and 100"),
        )),
    }
}

pub fn parse_dimension(
    field: &'static str,
    raw: Option<&str>,
    limits: &ParameterLimits,
) -> Result<Option<u16>, ParameterError> {
    let Some(raw) = present(raw) else {
        return Ok(None);
    };
    let max = limits.max_dimension.min(MAX_ENCODABLE_DIMENSION);
    match raw.parse::<u32>() {
        Ok(v) if (1..=max).contains(&v) => Ok(Some(v as u16)),
        _ => Err(ParameterError::new(
            field,
            format!("'{raw}' is not an integer between 1 and {max}"),
        )),
    }
}

pub fn parse_ratio(raw: Option<&str>) -> Result<Option<AspectRatio>, ParameterError> {
    let Some(raw) = present(raw) else {
        return Ok(None);
    };
    AspectRatio::parse(raw)
        .map(Some)
        .map_err(|message| ParameterError::new("ratio", message))
}

/// Parse a normalized focus coordinate, clamped to [0,1] and quantized to
/// basis points.
pub fn parse_focus(field: &'static str, raw: Option<&str>) -> Result<Option<u16>, ParameterError> {
    let Some(raw) = present(raw) else {
        return Ok(None);
    };
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some((v.clamp(0.0, 1.0) * FOCUS_SCALE).round() as u16)),
        _ => Err(ParameterError::new(
            field,
            format!("'{raw}' is not a number between 0 and 1"),
        )),
    }
}

/// A flag sent without a value (`?lossless`) is true.
pub fn parse_flag(field: &'static str, raw: Option<&str>) -> Result<Option<bool>, ParameterError> {
    let Some(raw) = raw.map(str::trim) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ParameterError::new(field, format!("'{raw}' is not a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn query(pairs: &[(&str, &str)]) -> RenderQuery {
        serde_json::from_value(serde_json::Value::Object(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
                .collect(),
        ))
        .unwrap()
    }

    #[rstest]
    #[case("3:2", 1.5)]
    #[case("16:9", 16.0 / 9.0)]
    #[case("1:1", 1.0)]
    #[case(" 4 : 3 ", 4.0 / 3.0)]
    #[case("0.75", 0.75)]
    fn test_ratio_parsing(#[case] raw: &str, #[case] expected: f32) {
        let ratio = parse_ratio(Some(raw)).unwrap().unwrap();
        assert_eq!(ratio.value(), expected);
    }

    #[rstest]
    #[case("0:5")]
    #[case("5:0")]
    #[case("-3:2")]
    #[case("abc")]
    #[case("3:x")]
    #[case("0")]
    #[case("inf:1")]
    fn test_ratio_rejections(#[case] raw: &str) {
        let err = parse_ratio(Some(raw)).unwrap_err();
        assert_eq!(err.field, "ratio");
    }

    #[test]
    fn test_absent_is_not_default() {
        assert_eq!(parse_quality(None).unwrap(), None);
        assert_eq!(parse_quality(Some("85")).unwrap(), Some(85));
        assert_eq!(parse_fit(Some("")).unwrap(), None);
        assert_eq!(parse_fit(Some("none")).unwrap(), Some(FitMode::None));
    }

    #[rstest]
    #[case("0", Some(0))]
    #[case("100", Some(100))]
    #[case("101", None)]
    #[case("-1", None)]
    #[case("high", None)]
    fn test_quality_bounds(#[case] raw: &str, #[case] expected: Option<u8>) {
        assert_eq!(parse_quality(Some(raw)).ok().flatten(), expected);
    }

    #[test]
    fn test_dimension_bounds() {
        let limits = ParameterLimits { max_dimension: 4096 };
        assert_eq!(parse_dimension("width", Some("1"), &limits).unwrap(), Some(1));
        assert_eq!(
            parse_dimension("width", Some("4096"), &limits).unwrap(),
            Some(4096)
        );
        assert!(parse_dimension("width", Some("0"), &limits).is_err());
        assert!(parse_dimension("height", Some("4097"), &limits).is_err());
        assert!(parse_dimension("height", Some("12.5"), &limits).is_err());
    }

    #[test]
    fn test_focus_is_clamped_and_quantized() {
        assert_eq!(parse_focus("focusx", Some("0.5")).unwrap(), Some(5000));
        assert_eq!(parse_focus("focusx", Some("0.33333")).unwrap(), Some(3333));
        assert_eq!(parse_focus("focusx", Some("1.7")).unwrap(), Some(10000));
        assert_eq!(parse_focus("focusy", Some("-2")).unwrap(), Some(0));
        assert!(parse_focus("focusy", Some("NaN")).is_err());
    }

    #[test]
    fn test_flag_without_value_is_true() {
        assert_eq!(parse_flag("lossless", Some("")).unwrap(), Some(true));
        assert_eq!(parse_flag("lossless", Some("false")).unwrap(), Some(false));
        assert_eq!(parse_flag("lossless", None).unwrap(), None);
        assert!(parse_flag("lossless", Some("maybe")).is_err());
    }

    #[test]
    fn test_output_type_parsing() {
        assert_eq!(parse_output_type(Some("JPEG")).unwrap(), Some(OutputType::Jpg));
        assert_eq!(parse_output_type(Some("webp")).unwrap(), Some(OutputType::Webp));
        let err = parse_output_type(Some("gif")).unwrap_err();
        assert_eq!(err.field, "type");
    }

    #[test]
    fn test_from_query_accepts_short_codes() {
        let params = RenderParameterSet::from_query(
            &query(&[("m", "cover"), ("w", "400"), ("h", "300"), ("t", "png")]),
            &ParameterLimits::default(),
        )
        .unwrap();

        assert_eq!(params.fit, Some(FitMode::Cover));
        assert_eq!(params.width, Some(400));
        assert_eq!(params.height, Some(300));
        assert_eq!(params.output_type, Some(OutputType::Png));
        assert_eq!(params.quality, None);
    }

    #[test]
    fn test_from_query_reports_first_bad_field() {
        let err = RenderParameterSet::from_query(
            &query(&[("width", "300"), ("ratio", "0:5")]),
            &ParameterLimits::default(),
        )
        .unwrap_err();
        assert_eq!(err.field, "ratio");
    }

    #[test]
    fn test_output_type_from_mime() {
        assert_eq!(OutputType::from_mime("image/jpeg"), OutputType::Jpg);
        assert_eq!(OutputType::from_mime("image/webp"), OutputType::Webp);
        assert_eq!(OutputType::from_mime("image/gif"), OutputType::Png);
    }

    #[test]
    fn test_enum_codes_round_trip() {
        for fit in [FitMode::None, FitMode::Cover, FitMode::Contain] {
            assert_eq!(FitMode::from_code(fit.code()), Some(fit));
        }
        for ty in [OutputType::Jpg, OutputType::Png, OutputType::Webp] {
            assert_eq!(OutputType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(FitMode::from_code(3), None);
    }
}
