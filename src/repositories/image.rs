//! Image and link persistence
//!
//! Every method takes the connection to run on so the asset store can
//! compose several of them inside one transaction.

use chrono::Utc;
use sqlx::{Row, SqliteConnection};
use std::collections::BTreeMap;

use crate::database::Tables;
use crate::errors::{RepositoryError, RepositoryResult};
use crate::models::{ImageAsset, ImageMetadata, LinkKey};

/// File-derived columns written when an original is stored or replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct NewImageFile {
    pub original_file_name: Option<String>,
    pub stored_file_name: String,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    pub exif: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone)]
pub struct ImageRepository {
    tables: Tables,
}

fn query_failed(query: &'static str) -> impl FnOnce(sqlx::Error) -> RepositoryError {
    move |e| RepositoryError::query_failed(query, e.to_string())
}

impl ImageRepository {
    pub fn new(tables: Tables) -> Self {
        Self { tables }
    }

    /// Image id bound to `key`, if any.
    pub async fn find_link(
        &self,
        conn: &mut SqliteConnection,
        key: &LinkKey,
    ) -> RepositoryResult<Option<i64>> {
        sqlx::query_scalar::<_, i64>(&format!(
            "SELECT image_id FROM {} WHERE context = ? AND context_id = ? AND identifier = ?",
            self.tables.link
        ))
        .bind(&key.context)
        .bind(&key.context_id)
        .bind(&key.identifier)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_failed("find link"))
    }

    pub async fn find_by_id(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
    ) -> RepositoryResult<Option<ImageAsset>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM {} i WHERE i.id = ?",
            ImageAsset::columns("i"),
            self.tables.image
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_failed("find image by id"))?;

        row.map(|r| ImageAsset::from_row(&r))
            .transpose()
            .map_err(query_failed("decode image row"))
    }

    pub async fn find_by_link(
        &self,
        conn: &mut SqliteConnection,
        key: &LinkKey,
    ) -> RepositoryResult<Option<ImageAsset>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM {} l JOIN {} i ON i.id = l.image_id
             WHERE l.context = ? AND l.context_id = ? AND l.identifier = ?",
            ImageAsset::columns("i"),
            self.tables.link,
            self.tables.image
        ))
        .bind(&key.context)
        .bind(&key.context_id)
        .bind(&key.identifier)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_failed("find image by link"))?;

        row.map(|r| ImageAsset::from_row(&r))
            .transpose()
            .map_err(query_failed("decode image row"))
    }

    pub async fn insert_image(
        &self,
        conn: &mut SqliteConnection,
        file: &NewImageFile,
        user_id: Option<&str>,
    ) -> RepositoryResult<i64> {
        let exif = file.exif.as_ref().map(serde_json::to_string).transpose()?;
        let now = Utc::now();

        let row = sqlx::query(&format!(
            "INSERT INTO {} (original_file_name, stored_file_name, width, height, mime_type, exif,
                             user_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
            self.tables.image
        ))
        .bind(&file.original_file_name)
        .bind(&file.stored_file_name)
        .bind(i64::from(file.width))
        .bind(i64::from(file.height))
        .bind(&file.mime_type)
        .bind(exif)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(query_failed("insert image"))?;

        Ok(row.get::<i64, _>("id"))
    }

    /// Point an existing image at a new original. Returns the stored file
    /// name it replaced.
    pub async fn replace_file(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        file: &NewImageFile,
    ) -> RepositoryResult<String> {
        let previous = sqlx::query_scalar::<_, String>(&format!(
            "SELECT stored_file_name FROM {} WHERE id = ?",
            self.tables.image
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_failed("select stored file name"))?
        .ok_or_else(|| RepositoryError::record_not_found("pluto_image", "id", id.to_string()))?;

        let exif = file.exif.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query(&format!(
            "UPDATE {} SET original_file_name = ?, stored_file_name = ?, width = ?, height = ?,
                           mime_type = ?, exif = ?, updated_at = ?
             WHERE id = ?",
            self.tables.image
        ))
        .bind(&file.original_file_name)
        .bind(&file.stored_file_name)
        .bind(i64::from(file.width))
        .bind(i64::from(file.height))
        .bind(&file.mime_type)
        .bind(exif)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(query_failed("replace image file"))?;

        Ok(previous)
    }

    /// Overwrite every descriptive field with `metadata`.
    pub async fn update_metadata(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        metadata: &ImageMetadata,
    ) -> RepositoryResult<()> {
        sqlx::query(&format!(
            "UPDATE {} SET alt_text = ?, description = ?, creator = ?, copyright = ?,
                           license_ref = ?, expiration_date = ?, focus_x = ?, focus_y = ?,
                           margin_left = ?, margin_right = ?, margin_top = ?, margin_bottom = ?,
                           updated_at = ?
             WHERE id = ?",
            self.tables.image
        ))
        .bind(&metadata.alt_text)
        .bind(&metadata.description)
        .bind(&metadata.creator)
        .bind(&metadata.copyright)
        .bind(&metadata.license_ref)
        .bind(metadata.expiration_date)
        .bind(metadata.focus_x)
        .bind(metadata.focus_y)
        .bind(metadata.margin_left)
        .bind(metadata.margin_right)
        .bind(metadata.margin_top)
        .bind(metadata.margin_bottom)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(query_failed("update image metadata"))?;
        Ok(())
    }

    /// Bind `key` to `image_id`, replacing any existing binding.
    pub async fn upsert_link(
        &self,
        conn: &mut SqliteConnection,
        key: &LinkKey,
        image_id: i64,
    ) -> RepositoryResult<()> {
        let now = Utc::now();
        sqlx::query(&format!(
            "INSERT INTO {} (context, context_id, identifier, image_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (context, context_id, identifier)
             DO UPDATE SET image_id = excluded.image_id, updated_at = excluded.updated_at",
            self.tables.link
        ))
        .bind(&key.context)
        .bind(&key.context_id)
        .bind(&key.identifier)
        .bind(image_id)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(query_failed("upsert link"))?;
        Ok(())
    }

    pub async fn delete_link(
        &self,
        conn: &mut SqliteConnection,
        key: &LinkKey,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE context = ? AND context_id = ? AND identifier = ?",
            self.tables.link
        ))
        .bind(&key.context)
        .bind(&key.context_id)
        .bind(&key.identifier)
        .execute(&mut *conn)
        .await
        .map_err(query_failed("delete link"))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_links(
        &self,
        conn: &mut SqliteConnection,
        image_id: i64,
    ) -> RepositoryResult<i64> {
        sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM {} WHERE image_id = ?",
            self.tables.link
        ))
        .bind(image_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(query_failed("count links"))
    }

    /// Delete the image row, returning its stored file name.
    pub async fn delete_image(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
    ) -> RepositoryResult<Option<String>> {
        sqlx::query_scalar::<_, String>(&format!(
            "DELETE FROM {} WHERE id = ? RETURNING stored_file_name",
            self.tables.image
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_failed("delete image"))
    }
}
