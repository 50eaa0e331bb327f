//! Derivative cache
//!
//! Rendered derivatives live as `<receipt>.<ext>` files under the cache
//! directory, with one metadata row per receipt. A row whose file has
//! vanished is treated as a miss and removed on the spot. Files are written
//! to a temporary name and renamed so readers never see a partial file.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::database::Tables;
use crate::errors::{CacheError, CacheResult};
use crate::imaging::receipt::{self, receipt_prefix, Receipt};
use crate::imaging::OutputType;
use crate::models::{CacheEntry, ImageAsset, InvalidationReport};
use crate::repositories::{CacheEntryRepository, CacheInsert};

/// A derivative present on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedDerivative {
    pub receipt: String,
    pub image_id: i64,
    pub file_name: String,
    pub mime_type: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub etag: String,
}

impl CachedDerivative {
    fn from_parts(
        receipt: String,
        image_id: i64,
        file_name: String,
        mime_type: String,
        path: PathBuf,
        meta: &std::fs::Metadata,
        fallback_modified: DateTime<Utc>,
    ) -> Self {
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or(fallback_modified);
        let size = meta.len();
        Self {
            etag: entity_tag(modified, size),
            receipt,
            image_id,
            file_name,
            mime_type,
            path,
            size,
            modified,
        }
    }

    fn from_entry(entry: CacheEntry, path: PathBuf, meta: &std::fs::Metadata) -> Self {
        let created_at = entry.created_at;
        Self::from_parts(
            entry.receipt,
            entry.image_id,
            entry.file_name,
            entry.mime_type,
            path,
            meta,
            created_at,
        )
    }
}

/// Strong validator derived from modification time and size.
pub fn entity_tag(modified: DateTime<Utc>, size: u64) -> String {
    format!("\"{:x}-{:x}\"", modified.timestamp(), size)
}

/// Conditional request headers, already parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheValidator {
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<DateTime<Utc>>,
}

impl CacheValidator {
    /// If-None-Match wins over If-Modified-Since when both are sent.
    pub fn is_not_modified(&self, derivative: &CachedDerivative) -> bool {
        if let Some(tags) = &self.if_none_match {
            return tags.split(',').map(str::trim).any(|tag| {
                tag == "*" || tag.strip_prefix("W/").unwrap_or(tag) == derivative.etag
            });
        }

        self.if_modified_since
            .map(|since| derivative.modified.timestamp() <= since.timestamp())
            .unwrap_or(false)
    }
}

#[derive(Debug)]
pub enum CacheLookup {
    Miss,
    NotModified(CachedDerivative),
    Hit(CachedDerivative, Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct DerivativeCache {
    pool: SqlitePool,
    entries: CacheEntryRepository,
    cache_dir: PathBuf,
}

impl DerivativeCache {
    pub fn new(pool: SqlitePool, tables: Tables, cache_dir: PathBuf) -> Self {
        Self {
            pool,
            entries: CacheEntryRepository::new(tables),
            cache_dir,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub async fn ensure_cache_dir(&self) -> io::Result<()> {
        if !self.cache_dir.exists() {
            fs::create_dir_all(&self.cache_dir).await?;
        }
        Ok(())
    }

    pub async fn lookup(&self, receipt: &Receipt) -> CacheResult<Option<CachedDerivative>> {
        let mut conn = self.pool.acquire().await?;
        let Some(entry) = self
            .entries
            .find_by_receipt(&mut conn, receipt.as_str())
            .await?
        else {
            return Ok(None);
        };
        self.resolve(&mut conn, entry).await
    }

    /// Stat the file behind `entry`, dropping the row if the file is gone.
    async fn resolve(
        &self,
        conn: &mut SqliteConnection,
        entry: CacheEntry,
    ) -> CacheResult<Option<CachedDerivative>> {
        let path = self.cache_dir.join(&entry.file_name);
        match fs::metadata(&path).await {
            Ok(meta) => Ok(Some(CachedDerivative::from_entry(entry, path, &meta))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(
                    "Cache file {} missing for receipt {}, dropping stale entry",
                    path.display(),
                    entry.receipt
                );
                self.entries.delete_by_receipt(conn, &entry.receipt).await?;
                Ok(None)
            }
            Err(e) => Err(CacheError::file(&path, e)),
        }
    }

    /// Lookup honouring conditional request headers. The file is only read
    /// when a body has to be sent.
    pub async fn lookup_conditional(
        &self,
        receipt: &Receipt,
        validator: &CacheValidator,
    ) -> CacheResult<CacheLookup> {
        let Some(derivative) = self.lookup(receipt).await? else {
            return Ok(CacheLookup::Miss);
        };

        if validator.is_not_modified(&derivative) {
            return Ok(CacheLookup::NotModified(derivative));
        }

        match fs::read(&derivative.path).await {
            Ok(bytes) => Ok(CacheLookup::Hit(derivative, bytes)),
            // Invalidated between stat and read
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(CacheLookup::Miss),
            Err(e) => Err(CacheError::file(&derivative.path, e)),
        }
    }

    /// Write a derivative rendered from `source` and record it. When another
    /// writer already recorded the same receipt its row is kept. When
    /// `source` was replaced or refocused in the meantime the file is
    /// removed again and [`CacheError::Superseded`] is returned.
    pub async fn store(
        &self,
        receipt: &Receipt,
        source: &ImageAsset,
        output_type: OutputType,
        bytes: &[u8],
    ) -> CacheResult<CachedDerivative> {
        self.ensure_cache_dir()
            .await
            .map_err(|e| CacheError::file(&self.cache_dir, e))?;

        let file_name = receipt.file_name(output_type);
        let path = self.cache_dir.join(&file_name);
        let tmp = self
            .cache_dir
            .join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        fs::write(&tmp, bytes)
            .await
            .map_err(|e| CacheError::file(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(CacheError::file(&path, e));
        }

        let mut conn = self.pool.acquire().await?;
        let recorded = match self
            .entries
            .insert_if_current(
                &mut conn,
                receipt.as_str(),
                source,
                &file_name,
                output_type.mime_type(),
            )
            .await
        {
            Ok(recorded) => recorded,
            Err(e) => {
                warn!(
                    "Cache file {} written but its metadata row failed, leaving an orphan: {}",
                    path.display(),
                    e
                );
                return Err(CacheError::Metadata(e));
            }
        };
        drop(conn);

        if recorded == CacheInsert::Superseded {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove superseded cache file {}: {}", path.display(), e),
            }
            return Err(CacheError::Superseded {
                image_id: source.id,
            });
        }
        debug!(
            "Cached derivative {} ({} bytes, {:?})",
            file_name,
            bytes.len(),
            recorded
        );

        let meta = fs::metadata(&path)
            .await
            .map_err(|e| CacheError::file(&path, e))?;
        Ok(CachedDerivative::from_parts(
            receipt.as_str().to_string(),
            source.id,
            file_name,
            output_type.mime_type().to_string(),
            path,
            &meta,
            Utc::now(),
        ))
    }

    /// Delete the metadata rows of `image_id` on `conn`, which may be inside
    /// a caller's transaction.
    pub async fn delete_rows(&self, conn: &mut SqliteConnection, image_id: i64) -> CacheResult<u64> {
        Ok(self.entries.delete_for_image(conn, image_id).await?)
    }

    /// Remove every cache file of `image_id` from disk. Failures are
    /// collected, not returned.
    pub async fn remove_files(&self, image_id: i64) -> (usize, Vec<String>) {
        let prefix = receipt_prefix(image_id);
        let mut removed = 0;
        let mut errors = Vec::new();

        let mut dir = match fs::read_dir(&self.cache_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return (0, errors),
            Err(e) => {
                errors.push(CacheError::file(&self.cache_dir, e).to_string());
                return (0, errors);
            }
        };

        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    errors.push(CacheError::file(&self.cache_dir, e).to_string());
                    break;
                }
            };

            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(&prefix) {
                continue;
            }

            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => errors.push(CacheError::file(entry.path(), e).to_string()),
            }
        }

        debug!("Removed {} cache files for image {}", removed, image_id);
        (removed, errors)
    }

    /// Drop every row and file of `image_id`.
    pub async fn invalidate_all(&self, image_id: i64) -> CacheResult<InvalidationReport> {
        let mut conn = self.pool.acquire().await?;
        let rows_removed = self.delete_rows(&mut conn, image_id).await?;
        drop(conn);

        let (files_removed, errors) = self.remove_files(image_id).await;
        for error in &errors {
            warn!("Cache invalidation for image {}: {}", image_id, error);
        }

        Ok(InvalidationReport {
            image_id,
            rows_removed,
            files_removed,
            errors,
        })
    }

    pub async fn entries_for_image(&self, image_id: i64) -> CacheResult<Vec<CacheEntry>> {
        let mut conn = self.pool.acquire().await?;
        Ok(self.entries.list_for_image(&mut conn, image_id).await?)
    }

    /// Open a cached file by name for direct download.
    pub async fn open_file(
        &self,
        file_name: &str,
    ) -> CacheResult<Option<(CachedDerivative, Vec<u8>)>> {
        validate_file_name(file_name)?;

        let mut conn = self.pool.acquire().await?;
        let Some(entry) = self.entries.find_by_file_name(&mut conn, file_name).await? else {
            return Ok(None);
        };
        let Some(derivative) = self.resolve(&mut conn, entry).await? else {
            return Ok(None);
        };
        drop(conn);

        match fs::read(&derivative.path).await {
            Ok(bytes) => Ok(Some((derivative, bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::file(&derivative.path, e)),
        }
    }
}

/// Only `<receipt>.<ext>` names are served; anything that could leave the
/// cache directory is rejected.
pub fn validate_file_name(file_name: &str) -> CacheResult<()> {
    let invalid = || CacheError::InvalidFileName {
        name: file_name.to_string(),
    };

    if file_name.contains(['/', '\\']) || file_name.contains("..") {
        return Err(invalid());
    }
    let (stem, extension) = file_name.rsplit_once('.').ok_or_else(invalid)?;
    if OutputType::from_extension(extension).is_none() {
        return Err(invalid());
    }
    receipt::decode(stem).map_err(|_| invalid())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn derivative(modified: DateTime<Utc>) -> CachedDerivative {
        CachedDerivative {
            receipt: "1__".into(),
            image_id: 1,
            file_name: "1__.png".into(),
            mime_type: "image/png".into(),
            path: PathBuf::from("1__.png"),
            size: 10,
            modified,
            etag: entity_tag(modified, 10),
        }
    }

    #[test]
    fn test_validator_prefers_entity_tag() {
        let modified = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let d = derivative(modified);

        let matching = CacheValidator {
            if_none_match: Some(format!("\"other\", W/{}", d.etag)),
            if_modified_since: None,
        };
        assert!(matching.is_not_modified(&d));

        // A mismatched tag is not rescued by a later date
        let mismatched = CacheValidator {
            if_none_match: Some("\"other\"".into()),
            if_modified_since: Some(modified + chrono::Duration::days(1)),
        };
        assert!(!mismatched.is_not_modified(&d));

        let wildcard = CacheValidator {
            if_none_match: Some("*".into()),
            if_modified_since: None,
        };
        assert!(wildcard.is_not_modified(&d));
    }

    #[test]
    fn test_validator_modified_since() {
        let modified = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let d = derivative(modified);

        let same = CacheValidator {
            if_none_match: None,
            if_modified_since: Some(modified),
        };
        assert!(same.is_not_modified(&d));

        let older = CacheValidator {
            if_none_match: None,
            if_modified_since: Some(modified - chrono::Duration::seconds(1)),
        };
        assert!(!older.is_not_modified(&d));
        assert!(!CacheValidator::default().is_not_modified(&d));
    }

    #[test]
    fn test_file_name_validation() {
        assert!(validate_file_name("2a__.png").is_ok());
        assert!(validate_file_name("2a_w_0190.jpg").is_ok());
        assert!(validate_file_name("../2a__.png").is_err());
        assert!(validate_file_name("2a__.exe").is_err());
        assert!(validate_file_name("nothex__.png").is_err());
        assert!(validate_file_name("2a__").is_err());
    }
}
