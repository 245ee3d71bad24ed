//! Prediction history persistence
//!
//! One row per completed prediction. Optional result fields map to NULL
//! columns; recommendations are stored as a JSON array.

use crate::models::{PredictionHistoryRecord, PredictionResult};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const SELECT_COLUMNS: &str = r#"
    SELECT guid, user_id, original_filename, stored_path, content_sha256, created_at,
           risk_level, health_score, breathing_rate, oxygen_saturation, breathing_pattern,
           wheezing_detected, crackling_detected, irregularity_type, stress_level,
           recommendations, audio_duration_seconds, classifier_duration_ms
    FROM prediction_history
"#;

/// Fixed-width timestamp text so lexical order equals time order
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Insert one record (single statement, atomic)
pub async fn insert_record(pool: &SqlitePool, record: &PredictionHistoryRecord) -> sqlx::Result<()> {
    let result = &record.result;
    let recommendations = serde_json::to_string(&result.recommendations)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        r#"
        INSERT INTO prediction_history (
            guid, user_id, original_filename, stored_path, content_sha256, created_at,
            risk_level, health_score, breathing_rate, oxygen_saturation, breathing_pattern,
            wheezing_detected, crackling_detected, irregularity_type, stress_level,
            recommendations, audio_duration_seconds, classifier_duration_ms
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id.to_string())
    .bind(&record.user_id)
    .bind(&record.original_filename)
    .bind(&record.stored_path)
    .bind(&record.content_sha256)
    .bind(format_timestamp(&record.created_at))
    .bind(result.risk_level.as_str())
    .bind(result.health_score)
    .bind(result.breathing_rate)
    .bind(result.oxygen_saturation)
    .bind(result.breathing_pattern.map(|p| p.as_str()))
    .bind(result.wheezing_detected)
    .bind(result.crackling_detected)
    .bind(result.irregularity_type.map(|t| t.as_str()))
    .bind(result.stress_level.map(|s| s.as_str()))
    .bind(recommendations)
    .bind(result.audio_duration_seconds)
    .bind(record.classifier_duration_ms as i64)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load record by id
pub async fn load_record(pool: &SqlitePool, id: Uuid) -> sqlx::Result<Option<PredictionHistoryRecord>> {
    let row = sqlx::query(&format!("{} WHERE guid = ?", SELECT_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(record_from_row).transpose()
}

/// List records newest first, optionally for one user
pub async fn list_records(
    pool: &SqlitePool,
    user_id: Option<&str>,
    limit: u32,
) -> sqlx::Result<Vec<PredictionHistoryRecord>> {
    let rows = match user_id {
        Some(user_id) => {
            sqlx::query(&format!(
                "{} WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
                SELECT_COLUMNS
            ))
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "{} ORDER BY created_at DESC, rowid DESC LIMIT ?",
                SELECT_COLUMNS
            ))
            .bind(limit as i64)
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(record_from_row).collect()
}

/// Count stored records (used by tests and diagnostics)
pub async fn count_records(pool: &SqlitePool) -> sqlx::Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM prediction_history")
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}

fn decode_err<E>(e: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::Decode(Box::new(e))
}

fn optional_variant<T: std::str::FromStr<Err = crate::models::prediction::UnknownVariant>>(
    row: &SqliteRow,
    column: &str,
) -> sqlx::Result<Option<T>> {
    let text: Option<String> = row.try_get(column)?;
    text.map(|s| s.parse::<T>().map_err(decode_err)).transpose()
}

fn record_from_row(row: &SqliteRow) -> sqlx::Result<PredictionHistoryRecord> {
    let guid: String = row.try_get("guid")?;
    let id = Uuid::parse_str(&guid).map_err(decode_err)?;

    let created_at: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(decode_err)?
        .with_timezone(&Utc);

    let risk_level: String = row.try_get("risk_level")?;
    let recommendations: String = row.try_get("recommendations")?;
    let classifier_duration_ms: i64 = row.try_get("classifier_duration_ms")?;

    Ok(PredictionHistoryRecord {
        id,
        user_id: row.try_get("user_id")?,
        original_filename: row.try_get("original_filename")?,
        stored_path: row.try_get("stored_path")?,
        content_sha256: row.try_get("content_sha256")?,
        created_at,
        result: PredictionResult {
            risk_level: risk_level.parse().map_err(decode_err)?,
            health_score: row.try_get("health_score")?,
            breathing_rate: row.try_get("breathing_rate")?,
            oxygen_saturation: row.try_get("oxygen_saturation")?,
            breathing_pattern: optional_variant(row, "breathing_pattern")?,
            wheezing_detected: row.try_get("wheezing_detected")?,
            crackling_detected: row.try_get("crackling_detected")?,
            irregularity_type: optional_variant(row, "irregularity_type")?,
            stress_level: optional_variant(row, "stress_level")?,
            recommendations: serde_json::from_str(&recommendations).map_err(decode_err)?,
            audio_duration_seconds: row.try_get("audio_duration_seconds")?,
        },
        classifier_duration_ms: classifier_duration_ms.max(0) as u64,
    })
}
