//! Derivative cache inspection, invalidation and direct file serving

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::errors::{AppError, CacheError};
use crate::utils::format_http_date;
use crate::web::{responses::handle_error, responses::handle_result, AppState};

/// GET /api/v1/cache/:image_id
pub async fn list_cache_entries(
    State(state): State<AppState>,
    Path(image_id): Path<i64>,
) -> Response {
    let result = state
        .services
        .cache
        .entries_for_image(image_id)
        .await
        .map_err(AppError::from);
    handle_result(result)
}

/// DELETE /api/v1/cache/:image_id
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Path(image_id): Path<i64>,
) -> Response {
    let result = state
        .services
        .cache
        .invalidate_all(image_id)
        .await
        .map_err(AppError::from);
    handle_result(result)
}

/// GET /api/v1/files/:file
pub async fn serve_cached_file(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Response {
    match state.services.cache.open_file(&file).await {
        Ok(Some((derivative, bytes))) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, derivative.mime_type),
                (header::ETAG, derivative.etag),
                (header::LAST_MODIFIED, format_http_date(derivative.modified)),
                (
                    header::CACHE_CONTROL,
                    state.config.web.cache_control.clone(),
                ),
            ],
            Body::from(bytes),
        )
            .into_response(),
        Ok(None) => handle_error(AppError::not_found("cache file", file)),
        Err(CacheError::InvalidFileName { name }) => {
            handle_error(AppError::validation(format!("invalid cache file name '{name}'")))
        }
        Err(e) => handle_error(e.into()),
    }
}
