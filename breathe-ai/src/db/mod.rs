//! Database access for breathe-ai

pub mod prediction_history;

use breathe_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Opens (creating if needed) breathemate.db and ensures the
/// prediction_history table exists.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::debug!("Opening database: {}", db_path.display());
    breathe_common::db::init_database(db_path).await
}
