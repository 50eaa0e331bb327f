use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata row for one rendered derivative on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CacheEntry {
    pub id: i64,
    pub receipt: String,
    pub image_id: i64,
    pub file_name: String,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}

/// What an invalidation pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationReport {
    pub image_id: i64,
    pub rows_removed: u64,
    pub files_removed: usize,
    pub errors: Vec<String>,
}
