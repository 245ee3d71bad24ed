//! Database initialization
//!
//! Opens (or creates) the SQLite database, applies connection pragmas and
//! creates every table the services depend on. All statements are idempotent,
//! so this is safe to run on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    // WAL allows concurrent readers with one writer
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_prediction_history_table(pool).await?;
    Ok(())
}

/// Prediction history: one row per successful analysis
///
/// Nullable columns represent fields the classifier did not report.
pub async fn create_prediction_history_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prediction_history (
            guid TEXT PRIMARY KEY,
            user_id TEXT,
            original_filename TEXT NOT NULL,
            stored_path TEXT NOT NULL,
            content_sha256 TEXT NOT NULL,
            created_at TEXT NOT NULL,
            risk_level TEXT NOT NULL CHECK (risk_level IN ('low', 'moderate', 'high')),
            health_score REAL NOT NULL CHECK (health_score BETWEEN 0 AND 100),
            breathing_rate REAL NOT NULL,
            oxygen_saturation REAL NOT NULL CHECK (oxygen_saturation BETWEEN 0 AND 100),
            breathing_pattern TEXT,
            wheezing_detected INTEGER NOT NULL,
            crackling_detected INTEGER NOT NULL,
            irregularity_type TEXT,
            stress_level TEXT,
            recommendations TEXT NOT NULL DEFAULT '[]',
            audio_duration_seconds REAL,
            classifier_duration_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_prediction_history_created_at ON prediction_history(created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_prediction_history_user_id ON prediction_history(user_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
