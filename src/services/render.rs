//! Render pipeline
//!
//! Receipt → cache probe → (on miss) original lookup, crop planning, pixel
//! work on a blocking thread, cache store. A derivative that renders but
//! cannot be cached is still served, including one whose source image was
//! updated while it rendered.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use super::asset_store::AssetStore;
use super::derivative_cache::{CacheLookup, CacheValidator, CachedDerivative, DerivativeCache};
use super::render_locks::RenderLocks;
use crate::config::RenderConfig;
use crate::errors::{AppError, AppResult, CacheError};
use crate::imaging::{
    compute_crop, receipt, CropPlan, CropRequest, EncodeOptions, ImageCodec, OutputType, Receipt,
    RenderParameterSet,
};
use crate::models::ImageAsset;

/// Encoded derivative ready to send.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub receipt: Receipt,
    pub output_type: OutputType,
    pub bytes: Vec<u8>,
    /// Absent when the derivative could not be cached
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub from_cache: bool,
}

impl RenderedImage {
    pub fn file_name(&self) -> String {
        self.receipt.file_name(self.output_type)
    }

    fn from_cache(receipt: Receipt, derivative: &CachedDerivative, bytes: Vec<u8>) -> Self {
        Self {
            output_type: output_type_of(derivative),
            receipt,
            bytes,
            etag: Some(derivative.etag.clone()),
            last_modified: Some(derivative.modified),
            from_cache: true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RenderResponse {
    NotModified {
        receipt: Receipt,
        etag: String,
        last_modified: DateTime<Utc>,
    },
    Image(RenderedImage),
}

fn output_type_of(derivative: &CachedDerivative) -> OutputType {
    derivative
        .file_name
        .rsplit_once('.')
        .and_then(|(_, ext)| OutputType::from_extension(ext))
        .unwrap_or_else(|| OutputType::from_mime(&derivative.mime_type))
}

#[derive(Clone)]
pub struct RenderPipeline {
    assets: AssetStore,
    cache: DerivativeCache,
    codec: Arc<dyn ImageCodec>,
    locks: Option<RenderLocks>,
    default_quality: u8,
    max_dimension: u32,
}

impl RenderPipeline {
    pub fn new(
        assets: AssetStore,
        cache: DerivativeCache,
        codec: Arc<dyn ImageCodec>,
        config: &RenderConfig,
    ) -> Self {
        Self {
            assets,
            cache,
            codec,
            locks: config.serialize_renders.then(RenderLocks::new),
            default_quality: config.default_quality,
            max_dimension: config.max_dimension,
        }
    }

    /// Crop plan for `image` under `params`, with focus overrides taking
    /// precedence over the stored focus point.
    pub fn plan(&self, image: &ImageAsset, params: &RenderParameterSet) -> AppResult<CropPlan> {
        let (stored_x, stored_y) = image.focus();
        let request = CropRequest {
            source_width: image.width,
            source_height: image.height,
            focus_x: Some(params.focus_x_normalized().unwrap_or(stored_x)),
            focus_y: Some(params.focus_y_normalized().unwrap_or(stored_y)),
            fit: params.fit.unwrap_or_default(),
            ratio: params.ratio.map(|r| f64::from(r.value())),
            target_width: params.width.map(u32::from),
            target_height: params.height.map(u32::from),
        };

        let plan = compute_crop(&request)?;
        if plan.width > self.max_dimension || plan.height > self.max_dimension {
            return Err(AppError::validation(format!(
                "derived output {}x{} exceeds the {} pixel limit",
                plan.width, plan.height, self.max_dimension
            )));
        }
        Ok(plan)
    }

    pub fn encode_options(&self, image: &ImageAsset, params: &RenderParameterSet) -> EncodeOptions {
        EncodeOptions {
            output_type: params
                .output_type
                .unwrap_or_else(|| OutputType::from_mime(&image.mime_type)),
            quality: params.quality.unwrap_or(self.default_quality),
            lossless: params.lossless.unwrap_or(false),
        }
    }

    pub async fn render(
        &self,
        image_id: i64,
        params: &RenderParameterSet,
        validator: &CacheValidator,
    ) -> AppResult<RenderResponse> {
        let receipt = receipt::encode(image_id, params);

        let _guard = match &self.locks {
            Some(locks) => Some(locks.acquire(receipt.as_str()).await),
            None => None,
        };

        match self.cache.lookup_conditional(&receipt, validator).await? {
            CacheLookup::NotModified(derivative) => {
                debug!("Derivative {} not modified", receipt);
                return Ok(RenderResponse::NotModified {
                    receipt,
                    etag: derivative.etag,
                    last_modified: derivative.modified,
                });
            }
            CacheLookup::Hit(derivative, bytes) => {
                debug!("Derivative {} served from cache", receipt);
                return Ok(RenderResponse::Image(RenderedImage::from_cache(
                    receipt,
                    &derivative,
                    bytes,
                )));
            }
            CacheLookup::Miss => {}
        }

        let image = self
            .assets
            .find_image(image_id)
            .await?
            .ok_or_else(|| AppError::not_found("image", image_id.to_string()))?;

        let plan = self.plan(&image, params)?;
        let options = self.encode_options(&image, params);
        let source = self.assets.read_original(&image).await?;

        let codec = Arc::clone(&self.codec);
        let bytes = tokio::task::spawn_blocking(move || codec.render(&source, &plan, &options))
            .await
            .map_err(|e| AppError::internal(format!("render task failed: {e}")))??;
        debug!(
            "Rendered {} for image {} ({}x{}, {} bytes)",
            receipt,
            image_id,
            plan.width,
            plan.height,
            bytes.len()
        );

        let (etag, last_modified) = match self
            .cache
            .store(&receipt, &image, options.output_type, &bytes)
            .await
        {
            Ok(stored) => (Some(stored.etag), Some(stored.modified)),
            Err(e @ CacheError::Superseded { .. }) => {
                debug!("Serving uncached derivative {}: {}", receipt, e);
                (None, None)
            }
            Err(e) => {
                warn!("Serving uncached derivative {}: {}", receipt, e);
                (None, None)
            }
        };

        Ok(RenderResponse::Image(RenderedImage {
            receipt,
            output_type: options.output_type,
            bytes,
            etag,
            last_modified,
            from_cache: false,
        }))
    }
}
