//! Derivative rendering endpoint

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::services::RenderResponse;
use crate::utils::{disposition_file_name, format_http_date};
use crate::web::{
    extractors::{ConditionalHeaders, RenderParams},
    responses::handle_error,
    AppState,
};

/// Reports whether the body came from the derivative cache.
pub const DERIVATIVE_CACHE_HEADER: &str = "x-derivative-cache";

fn set(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

fn validation_headers(
    headers: &mut HeaderMap,
    etag: Option<&str>,
    last_modified: Option<DateTime<Utc>>,
    cache_control: &str,
) {
    if let Some(etag) = etag {
        set(headers, header::ETAG, etag);
    }
    if let Some(modified) = last_modified {
        set(headers, header::LAST_MODIFIED, &format_http_date(modified));
    }
    set(headers, header::CACHE_CONTROL, cache_control);
}

/// GET /api/v1/render/:image_id
pub async fn render_image(
    State(state): State<AppState>,
    Path(image_id): Path<i64>,
    RenderParams(params): RenderParams,
    ConditionalHeaders(validator): ConditionalHeaders,
) -> Response {
    let cache_control = state.config.web.cache_control.as_str();

    match state.services.render.render(image_id, &params, &validator).await {
        Ok(RenderResponse::NotModified {
            receipt,
            etag,
            last_modified,
        }) => {
            debug!("304 for {}", receipt);
            let mut headers = HeaderMap::new();
            validation_headers(&mut headers, Some(&etag), Some(last_modified), cache_control);
            (StatusCode::NOT_MODIFIED, headers).into_response()
        }
        Ok(RenderResponse::Image(rendered)) => {
            let mut headers = HeaderMap::new();
            set(&mut headers, header::CONTENT_TYPE, rendered.output_type.mime_type());
            set(
                &mut headers,
                header::CONTENT_DISPOSITION,
                &format!(
                    "inline; filename=\"{}\"",
                    disposition_file_name(&rendered.file_name())
                ),
            );
            validation_headers(
                &mut headers,
                rendered.etag.as_deref(),
                rendered.last_modified,
                cache_control,
            );
            set(
                &mut headers,
                HeaderName::from_static(DERIVATIVE_CACHE_HEADER),
                if rendered.from_cache { "hit" } else { "miss" },
            );

            (StatusCode::OK, headers, Body::from(rendered.bytes)).into_response()
        }
        Err(e) => handle_error(e),
    }
}
