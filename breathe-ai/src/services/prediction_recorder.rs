//! Prediction recorder
//!
//! Maps a validated prediction plus upload metadata into a history record
//! and writes it with a single INSERT. A failed insert leaves no row behind.

use crate::db::prediction_history;
use crate::models::{PredictionHistoryRecord, PredictionResult, RequestMetadata, UploadedAudio};
use chrono::{SubsecRound, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

/// Default page size for history listings
pub const DEFAULT_HISTORY_LIMIT: u32 = 100;

/// Recorder errors
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Failed to persist prediction: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl RecorderError {
    /// Stable error kind reported to clients
    pub fn kind(&self) -> &'static str {
        match self {
            RecorderError::Persistence(_) => "PersistenceError",
        }
    }
}

/// Writes and reads prediction history
#[derive(Debug, Clone)]
pub struct PredictionRecorder {
    pool: SqlitePool,
}

impl PredictionRecorder {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist one prediction and return the stored record
    pub async fn persist(
        &self,
        result: &PredictionResult,
        upload: &UploadedAudio,
        metadata: &RequestMetadata,
    ) -> Result<PredictionHistoryRecord, RecorderError> {
        let record = PredictionHistoryRecord {
            id: Uuid::new_v4(),
            user_id: metadata.user_id.clone(),
            original_filename: upload.original_filename.clone(),
            stored_path: upload.stored.path().display().to_string(),
            content_sha256: upload.sha256.clone(),
            // Microsecond precision
            created_at: Utc::now().trunc_subsecs(6),
            result: result.clone(),
            classifier_duration_ms: metadata.classifier_duration_ms,
        };

        prediction_history::insert_record(&self.pool, &record).await?;

        tracing::info!(
            request_id = %metadata.request_id,
            record_id = %record.id,
            risk_level = %record.result.risk_level,
            "Prediction recorded"
        );

        Ok(record)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<PredictionHistoryRecord>, RecorderError> {
        Ok(prediction_history::load_record(&self.pool, id).await?)
    }

    /// Records newest first, optionally for one user
    pub async fn list(
        &self,
        user_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<PredictionHistoryRecord>, RecorderError> {
        Ok(prediction_history::list_records(&self.pool, user_id, limit).await?)
    }
}
