//! Pixel codec capability.
//!
//! The [`ImageCodec`] trait is the seam between the pipeline and actual
//! pixel work: probing uploads and turning a source plus a [`CropPlan`] into
//! encoded derivative bytes. [`RasterCodec`] is the production
//! implementation built on the `image` crate, with lossy WebP handed to
//! libwebp through the `webp` crate.

use image::{
    codecs::{jpeg::JpegEncoder, png::PngEncoder, webp::WebPEncoder},
    imageops::FilterType,
    DynamicImage, ImageFormat, ImageReader,
};
use std::collections::BTreeMap;
use std::io::Cursor;
use tracing::debug;

use super::geometry::CropPlan;
use super::params::OutputType;
use crate::errors::{CodecError, CodecResult};

/// What an upload turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbedImage {
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    /// Canonical extension for the detected format
    pub extension: String,
    pub exif: Option<BTreeMap<String, String>>,
}

/// Encoder settings for one derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub output_type: OutputType,
    pub quality: u8,
    pub lossless: bool,
}

/// Pixel codec used by the upload and render paths.
///
/// Implementations are called from blocking worker threads.
pub trait ImageCodec: Send + Sync {
    /// Detect format, dimensions and EXIF of uploaded bytes.
    fn probe(&self, bytes: &[u8]) -> CodecResult<ProbedImage>;

    /// Decode `source`, apply `plan` and encode with `options`.
    fn render(&self, source: &[u8], plan: &CropPlan, options: &EncodeOptions) -> CodecResult<Vec<u8>>;
}

/// [`ImageCodec`] backed by the `image` crate, with EXIF read by `rexif`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterCodec;

impl RasterCodec {
    pub fn new() -> Self {
        Self
    }

    fn detect_format(bytes: &[u8]) -> CodecResult<ImageFormat> {
        image::guess_format(bytes).map_err(|e| CodecError::UnsupportedFormat {
            format: e.to_string(),
        })
    }

    fn extract_exif(bytes: &[u8]) -> Option<BTreeMap<String, String>> {
        let data = rexif::parse_buffer(bytes).ok()?;
        let entries: BTreeMap<String, String> = data
            .entries
            .iter()
            .map(|entry| (entry.tag.to_string(), entry.value_more_readable.to_string()))
            .filter(|(tag, value)| !tag.starts_with("Unknown") && !value.is_empty())
            .collect();
        (!entries.is_empty()).then_some(entries)
    }

    fn encode(image: &DynamicImage, options: &EncodeOptions) -> CodecResult<Vec<u8>> {
        let mut out = Vec::new();
        let result = match options.output_type {
            OutputType::Jpg => {
                // JPEG has no alpha channel
                let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
                rgb.write_with_encoder(JpegEncoder::new_with_quality(
                    &mut out,
                    options.quality.clamp(1, 100),
                ))
            }
            OutputType::Png => image.write_with_encoder(PngEncoder::new(&mut out)),
            OutputType::Webp => {
                let pixels = if image.color().has_alpha() {
                    DynamicImage::ImageRgba8(image.to_rgba8())
                } else {
                    DynamicImage::ImageRgb8(image.to_rgb8())
                };
                if options.lossless {
                    pixels.write_with_encoder(WebPEncoder::new_lossless(&mut out))
                } else {
                    let encoder = webp::Encoder::from_image(&pixels)
                        .map_err(|e| CodecError::encode(format!("webp: {e}")))?;
                    out = encoder.encode(f32::from(options.quality.min(100))).to_vec();
                    Ok(())
                }
            }
        };
        result.map_err(|e| CodecError::encode(e.to_string()))?;
        Ok(out)
    }
}

impl ImageCodec for RasterCodec {
    fn probe(&self, bytes: &[u8]) -> CodecResult<ProbedImage> {
        let format = Self::detect_format(bytes)?;
        let (width, height) = ImageReader::with_format(Cursor::new(bytes), format)
            .into_dimensions()
            .map_err(|e| CodecError::decode(e.to_string()))?;

        let extension = format
            .extensions_str()
            .first()
            .copied()
            .unwrap_or("bin")
            .to_string();

        Ok(ProbedImage {
            width,
            height,
            mime_type: format.to_mime_type().to_string(),
            extension,
            exif: Self::extract_exif(bytes),
        })
    }

    fn render(&self, source: &[u8], plan: &CropPlan, options: &EncodeOptions) -> CodecResult<Vec<u8>> {
        let decoded =
            image::load_from_memory(source).map_err(|e| CodecError::decode(e.to_string()))?;

        let crop = plan.crop;
        if crop.x + crop.width > decoded.width() || crop.y + crop.height > decoded.height() {
            return Err(CodecError::CropOutOfBounds {
                x: crop.x,
                y: crop.y,
                width: crop.width,
                height: crop.height,
                image_width: decoded.width(),
                image_height: decoded.height(),
            });
        }

        let mut image = if crop.x == 0
            && crop.y == 0
            && crop.width == decoded.width()
            && crop.height == decoded.height()
        {
            decoded
        } else {
            decoded.crop_imm(crop.x, crop.y, crop.width, crop.height)
        };

        if plan.needs_resize() {
            debug!(
                "Resizing {}x{} crop to {}x{}",
                crop.width, crop.height, plan.width, plan.height
            );
            image = image.resize_exact(plan.width, plan.height, FilterType::Lanczos3);
        }

        Self::encode(&image, options)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::imaging::geometry::{compute_crop, CropRequest};
    use crate::imaging::params::FitMode;
    use image::{ImageBuffer, Rgb, Rgba};

    /// Encode a solid-colour test image in the given format.
    pub fn sample_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128u8])
        });
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, format)
            .unwrap();
        cursor.into_inner()
    }

    fn options(output_type: OutputType) -> EncodeOptions {
        EncodeOptions {
            output_type,
            quality: 85,
            lossless: false,
        }
    }

    #[test]
    fn test_probe_png() {
        let probed = RasterCodec.probe(&sample_image(64, 32, ImageFormat::Png)).unwrap();
        assert_eq!((probed.width, probed.height), (64, 32));
        assert_eq!(probed.mime_type, "image/png");
        assert_eq!(probed.extension, "png");
        assert_eq!(probed.exif, None);
    }

    #[test]
    fn test_probe_jpeg() {
        let probed = RasterCodec.probe(&sample_image(20, 10, ImageFormat::Jpeg)).unwrap();
        assert_eq!(probed.mime_type, "image/jpeg");
        assert_eq!(probed.extension, "jpg");
    }

    #[test]
    fn test_probe_rejects_garbage() {
        assert!(RasterCodec.probe(b"definitely not an image").is_err());
    }

    #[test]
    fn test_render_crops_and_resizes() {
        let source = sample_image(80, 60, ImageFormat::Png);
        let plan = compute_crop(&CropRequest {
            fit: FitMode::Cover,
            target_width: Some(40),
            target_height: Some(40),
            ..CropRequest::new(80, 60)
        })
        .unwrap();

        for output_type in [OutputType::Jpg, OutputType::Png, OutputType::Webp] {
            let bytes = RasterCodec
                .render(&source, &plan, &options(output_type))
                .unwrap();
            let decoded = image::load_from_memory(&bytes).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (40, 40));
        }
    }

    #[test]
    fn test_render_keeps_alpha_for_webp() {
        let img = ImageBuffer::from_pixel(8, 8, Rgba([10u8, 20, 30, 40]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut cursor, ImageFormat::Png)
            .unwrap();

        let plan = compute_crop(&CropRequest::new(8, 8)).unwrap();
        for lossless in [false, true] {
            let bytes = RasterCodec
                .render(
                    cursor.get_ref(),
                    &plan,
                    &EncodeOptions {
                        lossless,
                        ..options(OutputType::Webp)
                    },
                )
                .unwrap();
            assert!(image::load_from_memory(&bytes).unwrap().color().has_alpha());
        }
    }

    #[test]
    fn test_webp_honours_quality_and_lossless() {
        let source = sample_image(96, 96, ImageFormat::Png);
        let plan = compute_crop(&CropRequest::new(96, 96)).unwrap();
        let encode = |quality: u8, lossless: bool| {
            RasterCodec
                .render(
                    &source,
                    &plan,
                    &EncodeOptions {
                        output_type: OutputType::Webp,
                        quality,
                        lossless,
                    },
                )
                .unwrap()
        };

        let lossless = encode(85, true);
        let lossy = encode(85, false);
        let rough = encode(5, false);
        assert_ne!(lossless, lossy);
        assert_ne!(lossy, rough);
        assert!(rough.len() < lossy.len());

        // Only the lossless encoding reproduces the source pixels exactly
        let original = image::load_from_memory(&source).unwrap().to_rgb8();
        let exact = image::load_from_memory(&lossless).unwrap().to_rgb8();
        let approximate = image::load_from_memory(&lossy).unwrap().to_rgb8();
        assert_eq!(exact, original);
        assert_ne!(approximate, original);
        for bytes in [&lossless, &lossy, &rough] {
            assert_eq!(image::guess_format(bytes).unwrap(), ImageFormat::WebP);
        }
    }

    #[test]
    fn test_render_rejects_plan_outside_image() {
        let source = sample_image(10, 10, ImageFormat::Png);
        let plan = compute_crop(&CropRequest::new(20, 20)).unwrap();
        assert!(matches!(
            RasterCodec.render(&source, &plan, &options(OutputType::Png)),
            Err(CodecError::CropOutOfBounds { .. })
        ));
    }
}
