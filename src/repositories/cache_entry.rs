//! Derivative cache metadata rows

use sqlx::SqliteConnection;

use chrono::Utc;

use crate::database::Tables;
use crate::errors::{RepositoryError, RepositoryResult};
use crate::models::{CacheEntry, ImageAsset, DEFAULT_FOCUS};

/// Result of recording a freshly rendered derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheInsert {
    Inserted,
    /// Another writer already recorded the receipt
    Existing,
    /// The source image was replaced, refocused or deleted after it was read
    Superseded,
}

#[derive(Debug, Clone)]
pub struct CacheEntryRepository {
    tables: Tables,
}

fn query_failed(query: &'static str) -> impl FnOnce(sqlx::Error) -> RepositoryError {
    move |e| RepositoryError::query_failed(query, e.to_string())
}

impl CacheEntryRepository {
    pub fn new(tables: Tables) -> Self {
        Self { tables }
    }

    fn select(&self) -> String {
        format!(
            "SELECT id, receipt, image_id, file_name, mime_type, created_at FROM {}",
            self.tables.cache
        )
    }

    pub async fn find_by_receipt(
        &self,
        conn: &mut SqliteConnection,
        receipt: &str,
    ) -> RepositoryResult<Option<CacheEntry>> {
        sqlx::query_as::<_, CacheEntry>(&format!("{} WHERE receipt = ?", self.select()))
            .bind(receipt)
            .fetch_optional(&mut *conn)
            .await
            .map_err(query_failed("find cache entry by receipt"))
    }

    pub async fn find_by_file_name(
        &self,
        conn: &mut SqliteConnection,
        file_name: &str,
    ) -> RepositoryResult<Option<CacheEntry>> {
        sqlx::query_as::<_, CacheEntry>(&format!("{} WHERE file_name = ?", self.select()))
            .bind(file_name)
            .fetch_optional(&mut *conn)
            .await
            .map_err(query_failed("find cache entry by file name"))
    }

    pub async fn list_for_image(
        &self,
        conn: &mut SqliteConnection,
        image_id: i64,
    ) -> RepositoryResult<Vec<CacheEntry>> {
        sqlx::query_as::<_, CacheEntry>(&format!(
            "{} WHERE image_id = ? ORDER BY created_at, id",
            self.select()
        ))
        .bind(image_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(query_failed("list cache entries"))
    }

    /// Record a derivative rendered from `source`, but only while the image
    /// row still carries the same original and effective focus point. The
    /// check and the insert are one statement, so an invalidating upsert
    /// either deletes this row or turns the insert into a no-op.
    pub async fn insert_if_current(
        &self,
        conn: &mut SqliteConnection,
        receipt: &str,
        source: &ImageAsset,
        file_name: &str,
        mime_type: &str,
    ) -> Result<CacheInsert, sqlx::Error> {
        const CURRENT: &str = "id = ? AND stored_file_name = ?
               AND COALESCE(focus_x, ?) = ? AND COALESCE(focus_y, ?) = ?";
        let (focus_x, focus_y) = source.focus();

        let result = sqlx::query(&format!(
            "INSERT INTO {cache} (receipt, image_id, file_name, mime_type, created_at)
             SELECT ?, id, ?, ?, ? FROM {image} WHERE {CURRENT}
             ON CONFLICT (receipt) DO NOTHING",
            cache = self.tables.cache,
            image = self.tables.image,
        ))
        .bind(receipt)
        .bind(file_name)
        .bind(mime_type)
        .bind(Utc::now())
        .bind(source.id)
        .bind(&source.stored_file_name)
        .bind(DEFAULT_FOCUS)
        .bind(focus_x)
        .bind(DEFAULT_FOCUS)
        .bind(focus_y)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(CacheInsert::Inserted);
        }

        let current: i64 = sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE {CURRENT})",
            self.tables.image
        ))
        .bind(source.id)
        .bind(&source.stored_file_name)
        .bind(DEFAULT_FOCUS)
        .bind(focus_x)
        .bind(DEFAULT_FOCUS)
        .bind(focus_y)
        .fetch_one(&mut *conn)
        .await?;

        Ok(if current > 0 {
            CacheInsert::Existing
        } else {
            CacheInsert::Superseded
        })
    }

    pub async fn delete_by_receipt(
        &self,
        conn: &mut SqliteConnection,
        receipt: &str,
    ) -> RepositoryResult<u64> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE receipt = ?", self.tables.cache))
            .bind(receipt)
            .execute(&mut *conn)
            .await
            .map_err(query_failed("delete cache entry"))?;
        Ok(result.rows_affected())
    }

    pub async fn delete_for_image(
        &self,
        conn: &mut SqliteConnection,
        image_id: i64,
    ) -> RepositoryResult<u64> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE image_id = ?", self.tables.cache))
            .bind(image_id)
            .execute(&mut *conn)
            .await
            .map_err(query_failed("delete cache entries for image"))?;
        Ok(result.rows_affected())
    }
}
