//! Request extractors
//!
//! Render parameters are parsed and validated at the boundary so handlers
//! only ever see a typed [`RenderParameterSet`].

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{header, request::Parts, HeaderMap},
    response::{IntoResponse, Response},
};

use super::AppState;
use crate::errors::AppError;
use crate::imaging::{RenderParameterSet, RenderQuery};
use crate::services::CacheValidator;
use crate::utils::parse_http_date;

/// Typed render parameters from the query string.
#[derive(Debug, Clone, Copy)]
pub struct RenderParams(pub RenderParameterSet);

#[async_trait]
impl FromRequestParts<AppState> for RenderParams {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Query(query): Query<RenderQuery> = Query::from_request_parts(parts, state)
            .await
            .map_err(|e| {
                AppError::validation(format!("invalid render query: {e}")).into_response()
            })?;

        RenderParameterSet::from_query(&query, &state.limits)
            .map(RenderParams)
            .map_err(|e| AppError::from(e).into_response())
    }
}

/// `If-None-Match` / `If-Modified-Since` of the request.
#[derive(Debug, Clone, Default)]
pub struct ConditionalHeaders(pub CacheValidator);

impl ConditionalHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };

        Self(CacheValidator {
            if_none_match: text(header::IF_NONE_MATCH),
            if_modified_since: text(header::IF_MODIFIED_SINCE)
                .as_deref()
                .and_then(parse_http_date),
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ConditionalHeaders
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}
