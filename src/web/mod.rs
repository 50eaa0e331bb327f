//! Web layer module
//!
//! Thin axum handlers over the service layer. Handlers parse and validate at
//! the boundary, call one service operation and map the result through
//! [`responses`].

use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    config::Config,
    database::Database,
    imaging::ParameterLimits,
    services::Services,
};

pub mod extractors;
pub mod handlers;
pub mod responses;

pub use extractors::{ConditionalHeaders, RenderParams};
pub use responses::{handle_error, handle_result, ApiResponse};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub database: Database,
    pub services: Services,
    pub limits: ParameterLimits,
    /// Cancelled on shutdown; mutations run under a child token
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, database: Database, services: Services) -> Self {
        Self {
            limits: ParameterLimits::from(&config.render),
            config: Arc::new(config),
            database,
            services,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(state: AppState) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", state.config.web.host, state.config.web.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

        Ok(Self {
            app: Self::create_router(state),
            addr,
        })
    }

    /// Create the router with all routes and middleware
    pub fn create_router(state: AppState) -> Router {
        let max_upload = state.config.web.max_upload_bytes;

        Router::new()
            .route("/health", get(handlers::health::health_check))
            .nest("/api/v1", Self::api_v1_routes())
            // Middleware (applied in reverse order)
            .layer(DefaultBodyLimit::max(max_upload))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    fn api_v1_routes() -> Router<AppState> {
        Router::new()
            .route("/render/:image_id", get(handlers::render::render_image))
            .route(
                "/images/:context/:context_id/:identifier",
                axum::routing::post(handlers::images::upsert_image)
                    .delete(handlers::images::delete_image),
            )
            .route(
                "/images/:context/:context_id/:identifier/meta",
                get(handlers::images::get_image_metadata),
            )
            .route(
                "/cache/:image_id",
                get(handlers::cache::list_cache_entries).delete(handlers::cache::invalidate_cache),
            )
            .route("/files/:file", get(handlers::cache::serve_cached_file))
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.addr, e))?;
        info!("Web server listening on http://{}", self.addr);

        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Web server received cancellation signal, shutting down gracefully");
            })
            .await?;
        Ok(())
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}
