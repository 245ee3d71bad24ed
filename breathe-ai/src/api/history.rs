//! Prediction history API handlers
//!
//! GET /api/prediction-history, GET /api/prediction-history/:id

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::PredictionHistoryRecord;
use crate::services::prediction_recorder::DEFAULT_HISTORY_LIMIT;
use crate::AppState;

/// Largest page a caller may request
const MAX_HISTORY_LIMIT: u32 = 1000;

/// GET /api/prediction-history query
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub user_id: Option<String>,
    pub limit: Option<u32>,
}

/// GET /api/prediction-history response
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub records: Vec<PredictionHistoryRecord>,
    pub count: usize,
}

/// GET /api/prediction-history
///
/// Records newest first, optionally for a single user.
pub async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let user_id = query.user_id.as_deref().filter(|id| !id.trim().is_empty());

    let records = state.orchestrator.recorder().list(user_id, limit).await?;

    Ok(Json(HistoryResponse {
        count: records.len(),
        records,
    }))
}

/// GET /api/prediction-history/:id
pub async fn get_history_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PredictionHistoryRecord>> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::BadRequest(format!("Invalid record id: {}", id)))?;

    state
        .orchestrator
        .recorder()
        .find_by_id(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Prediction record {}", id)))
}

/// Build prediction history routes
pub fn history_routes() -> Router<AppState> {
    Router::new()
        .route("/api/prediction-history", get(list_history))
        .route("/api/prediction-history/:id", get(get_history_record))
}
