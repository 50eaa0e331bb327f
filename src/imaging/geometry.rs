//! Pure crop/fit calculations.
//!
//! Maps source dimensions, a focus point and the requested target
//! constraints to a crop rectangle in source pixels plus the final output
//! size. Nothing here touches pixels or I/O.

use serde::Serialize;

use super::params::FitMode;
use crate::errors::GeometryError;
use crate::models::DEFAULT_FOCUS;

/// Inputs to [`compute_crop`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRequest {
    pub source_width: u32,
    pub source_height: u32,
    pub focus_x: Option<f64>,
    pub focus_y: Option<f64>,
    pub fit: FitMode,
    /// Explicit width/height ratio, ignored when both target dimensions are set.
    pub ratio: Option<f64>,
    pub target_width: Option<u32>,
    pub target_height: Option<u32>,
}

impl CropRequest {
    pub fn new(source_width: u32, source_height: u32) -> Self {
        Self {
            source_width,
            source_height,
            focus_x: None,
            focus_y: None,
            fit: FitMode::None,
            ratio: None,
            target_width: None,
            target_height: None,
        }
    }
}

/// A rectangle in source pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Result of [`compute_crop`]: cut `crop` out of the source, then resize it
/// to `width` x `height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropPlan {
    pub crop: CropRect,
    pub width: u32,
    pub height: u32,
}

impl CropPlan {
    pub fn is_identity(&self, source_width: u32, source_height: u32) -> bool {
        self.crop.x == 0
            && self.crop.y == 0
            && self.crop.width == source_width
            && self.crop.height == source_height
            && !self.needs_resize()
    }

    pub fn needs_resize(&self) -> bool {
        self.crop.width != self.width || self.crop.height != self.height
    }

    /// Output is larger than the cropped source region.
    pub fn is_upscale(&self) -> bool {
        self.width > self.crop.width || self.height > self.crop.height
    }
}

/// Clamp a focus coordinate to [0,1], defaulting to the centre.
pub fn clamp_focus(focus: Option<f64>) -> f64 {
    match focus {
        Some(f) if f.is_finite() => f.clamp(0.0, 1.0),
        _ => DEFAULT_FOCUS,
    }
}

/// Resolve the width/height ratio the crop must have.
///
/// Both target dimensions win over an explicit ratio, which wins over the
/// source ratio.
pub fn resolve_target_ratio(req: &CropRequest) -> f64 {
    match (req.target_width, req.target_height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => f64::from(w) / f64::from(h),
        _ => req
            .ratio
            .unwrap_or(f64::from(req.source_width) / f64::from(req.source_height)),
    }
}

/// Largest rectangle of `ratio` that fits inside the source.
pub fn crop_dimensions(source: (u32, u32), ratio: f64) -> (u32, u32) {
    let (src_w, src_h) = source;
    let src_ratio = f64::from(src_w) / f64::from(src_h);

    if src_ratio > ratio {
        // Source is relatively wider: keep full height
        let w = (f64::from(src_h) * ratio).round() as u32;
        (w.min(src_w), src_h)
    } else {
        // Source is relatively taller: keep full width
        let h = (f64::from(src_w) / ratio).round() as u32;
        (src_w, h.min(src_h))
    }
}

/// Centre a `crop` sized window on the focus point, clamped inside `source`.
pub fn place_crop(source: (u32, u32), crop: (u32, u32), focus: (f64, f64)) -> CropRect {
    let axis = |src: u32, len: u32, focus: f64| -> u32 {
        let max = f64::from(src - len);
        (focus * f64::from(src) - f64::from(len) / 2.0)
            .round()
            .clamp(0.0, max) as u32
    };

    CropRect {
        x: axis(source.0, crop.0, focus.0),
        y: axis(source.1, crop.1, focus.1),
        width: crop.0,
        height: crop.1,
    }
}

pub fn compute_crop(req: &CropRequest) -> Result<CropPlan, GeometryError> {
    let (src_w, src_h) = (req.source_width, req.source_height);
    if src_w == 0 || src_h == 0 {
        return Err(GeometryError::EmptySource {
            width: src_w,
            height: src_h,
        });
    }
    if let Some(ratio) = req.ratio {
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(GeometryError::InvalidRatio { ratio });
        }
    }

    if req.fit == FitMode::Contain {
        return contain(req);
    }

    let ratio = resolve_target_ratio(req);
    let (crop_w, crop_h) = crop_dimensions((src_w, src_h), ratio);
    if crop_w == 0 || crop_h == 0 {
        return Err(GeometryError::EmptyOutput {
            width: crop_w,
            height: crop_h,
        });
    }

    let focus = (clamp_focus(req.focus_x), clamp_focus(req.focus_y));
    let crop = place_crop((src_w, src_h), (crop_w, crop_h), focus);

    // Downscale only: the crop's native resolution is the ceiling.
    let (width, height) = match (req.target_width, req.target_height) {
        (Some(w), Some(h)) => {
            let scale = (f64::from(w) / f64::from(crop_w))
                .min(f64::from(h) / f64::from(crop_h))
                .min(1.0);
            scaled((crop_w, crop_h), scale)
        }
        (Some(w), None) if w < crop_w => {
            scaled((crop_w, crop_h), f64::from(w) / f64::from(crop_w))
        }
        (None, Some(h)) if h < crop_h => {
            scaled((crop_w, crop_h), f64::from(h) / f64::from(crop_h))
        }
        _ => (crop_w, crop_h),
    };

    finish(crop, width, height)
}

/// No crop; fit the whole source inside the target box, downscale only.
fn contain(req: &CropRequest) -> Result<CropPlan, GeometryError> {
    let (src_w, src_h) = (req.source_width, req.source_height);
    let scale_w = req.target_width.map(|w| f64::from(w) / f64::from(src_w));
    let scale_h = req.target_height.map(|h| f64::from(h) / f64::from(src_h));

    let scale = match (scale_w, scale_h) {
        (Some(a), Some(b)) => a.min(b),
        (Some(s), None) | (None, Some(s)) => s,
        (None, None) => 1.0,
    }
    .min(1.0);

    let crop = CropRect {
        x: 0,
        y: 0,
        width: src_w,
        height: src_h,
    };
    let (width, height) = scaled((src_w, src_h), scale);
    finish(crop, width, height)
}

fn scaled(size: (u32, u32), scale: f64) -> (u32, u32) {
    (
        (f64::from(size.0) * scale).round() as u32,
        (f64::from(size.1) * scale).round() as u32,
    )
}

fn finish(crop: CropRect, width: u32, height: u32) -> Result<CropPlan, GeometryError> {
    if width == 0 || height == 0 {
        return Err(GeometryError::EmptyOutput { width, height });
    }
    Ok(CropPlan {
        crop,
        width,
        height,
    })
}
