//! breathe-ai library interface for testing
//!
//! Exposes the ingestion pipeline and HTTP router for integration tests

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::services::IngestOrchestrator;

/// Allowance for multipart boundaries and part headers on top of the upload limit
pub const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Store → classify → parse → record pipeline
    pub orchestrator: Arc<IngestOrchestrator>,
    /// Cancelled on graceful shutdown; each upload runs under a child token
    pub shutdown: CancellationToken,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Request body limit for uploads
    pub body_limit_bytes: usize,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        orchestrator: IngestOrchestrator,
        shutdown: CancellationToken,
        max_upload_bytes: u64,
    ) -> Self {
        let max_upload_bytes = usize::try_from(max_upload_bytes).unwrap_or(usize::MAX);
        Self {
            db,
            orchestrator: Arc::new(orchestrator),
            shutdown,
            startup_time: Utc::now(),
            body_limit_bytes: max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.body_limit_bytes;

    Router::new()
        .merge(api::upload_routes())
        .merge(api::history_routes())
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
