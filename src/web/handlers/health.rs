//! Health check HTTP handlers

use axum::{extract::State, response::IntoResponse};
use tracing::warn;

use crate::web::{responses::{ok, HealthResponse}, AppState};

/// Liveness plus database connectivity
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database_ok = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.database.pool())
        .await
    {
        Ok(_) => true,
        Err(e) => {
            warn!("Health check database probe failed: {}", e);
            false
        }
    };

    ok(HealthResponse::new(database_ok))
}
