//! Image upsert, delete and metadata handlers

use axum::{
    extract::{Multipart, Path, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::debug;

use crate::database::UnitOfWork;
use crate::errors::{AppError, AppResult};
use crate::models::{ImageMetadata, LinkKey, UploadedFile, UpsertRequest};
use crate::web::{
    responses::{created, handle_error, handle_result, ok},
    AppState,
};

/// JSON `payload` part of an upsert.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpsertPayload {
    /// Replaces every descriptive field when present
    pub metadata: Option<ImageMetadata>,
    pub file_name_prefix: Option<String>,
    pub user_id: Option<String>,
}

type KeyPath = Path<(String, String, String)>;

fn link_key(Path((context, context_id, identifier)): KeyPath) -> LinkKey {
    LinkKey::new(context, context_id, identifier)
}

async fn read_upsert(key: LinkKey, mut multipart: Multipart) -> AppResult<UpsertRequest> {
    let mut request = UpsertRequest::new(key);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::validation(format!("failed to read file: {e}")))?;
                request.file = Some(UploadedFile {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            Some("payload") => {
                let raw = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::validation(format!("failed to read payload: {e}")))?;
                let payload: UpsertPayload = serde_json::from_slice(&raw)
                    .map_err(|e| AppError::validation(format!("invalid payload JSON: {e}")))?;
                request.metadata = payload.metadata;
                request.file_name_prefix = payload.file_name_prefix;
                request.user_id = payload.user_id;
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    Ok(request)
}

/// POST /api/v1/images/:context/:context_id/:identifier
pub async fn upsert_image(
    State(state): State<AppState>,
    path: KeyPath,
    multipart: Multipart,
) -> Response {
    let request = match read_upsert(link_key(path), multipart).await {
        Ok(request) => request,
        Err(e) => return handle_error(e),
    };

    let cancel = state.shutdown.child_token();
    match state
        .services
        .assets
        .upsert(request, &UnitOfWork::new(), &cancel)
        .await
    {
        Ok(outcome) if outcome.inserted => created(outcome).into_response(),
        Ok(outcome) => ok(outcome).into_response(),
        Err(e) => handle_error(e),
    }
}

/// DELETE /api/v1/images/:context/:context_id/:identifier
pub async fn delete_image(State(state): State<AppState>, path: KeyPath) -> Response {
    let cancel = state.shutdown.child_token();
    let result = state
        .services
        .assets
        .delete(link_key(path), &UnitOfWork::new(), &cancel)
        .await;
    handle_result(result)
}

/// GET /api/v1/images/:context/:context_id/:identifier/meta
pub async fn get_image_metadata(State(state): State<AppState>, path: KeyPath) -> Response {
    handle_result(state.services.assets.metadata(&link_key(path)).await)
}
