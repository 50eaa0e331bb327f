//! Asset store gateway
//!
//! Owns every mutation of originals and their links. Each upsert, delete or
//! bind runs in exactly one transaction together with the caller's
//! [`UnitOfWork`]; the transaction is abandoned when the caller's
//! cancellation token fires or the configured deadline passes. Files are
//! only removed after a successful commit, and failures at that stage are
//! reported in the outcome instead of failing the call.

use sqlx::{Sqlite, SqlitePool, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::derivative_cache::DerivativeCache;
use super::storage::OriginalStorage;
use crate::database::{Tables, UnitOfWork};
use crate::errors::{AppError, AppResult};
use crate::imaging::ImageCodec;
use crate::models::{
    BindOutcome, DeleteOutcome, ImageAsset, ImageMetadata, LinkKey, UploadedFile, UpsertOutcome,
    UpsertRequest, DEFAULT_FOCUS,
};
use crate::repositories::{ImageRepository, NewImageFile};

/// What a committed upsert left for post-commit cleanup.
struct UpsertCommit {
    image_id: i64,
    inserted: bool,
    previous_file: Option<String>,
    invalidated: bool,
}

struct DeleteCommit {
    image_id: i64,
    removed_file: Option<String>,
}

struct BindCommit {
    previous_image_id: Option<i64>,
    orphan: Option<(i64, String)>,
}

/// Why a gateway transaction did not commit.
enum TransactionAbort {
    /// COMMIT was never issued; nothing became visible.
    RolledBack(AppError),
    /// COMMIT itself failed. Files the transaction referenced are kept.
    Commit(AppError),
}

impl From<TransactionAbort> for AppError {
    fn from(abort: TransactionAbort) -> Self {
        match abort {
            TransactionAbort::RolledBack(e) | TransactionAbort::Commit(e) => e,
        }
    }
}

#[derive(Clone)]
pub struct AssetStore {
    pool: SqlitePool,
    tables: Tables,
    images: ImageRepository,
    cache: DerivativeCache,
    storage: OriginalStorage,
    codec: Arc<dyn ImageCodec>,
    transaction_timeout: Option<Duration>,
}

impl AssetStore {
    pub fn new(
        pool: SqlitePool,
        tables: Tables,
        cache: DerivativeCache,
        storage: OriginalStorage,
        codec: Arc<dyn ImageCodec>,
        transaction_timeout: Option<Duration>,
    ) -> Self {
        Self {
            images: ImageRepository::new(tables.clone()),
            pool,
            tables,
            cache,
            storage,
            codec,
            transaction_timeout,
        }
    }

    pub fn storage(&self) -> &OriginalStorage {
        &self.storage
    }

    /// Run `body` unless `cancel` fires or the deadline passes first, then
    /// commit the transaction it hands back. Only the body is raced; once
    /// COMMIT is issued it runs to completion.
    async fn run_transaction<T, F>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        body: F,
    ) -> Result<T, TransactionAbort>
    where
        F: std::future::Future<Output = AppResult<(Transaction<'static, Sqlite>, T)>>,
    {
        if cancel.is_cancelled() {
            return Err(TransactionAbort::RolledBack(AppError::cancelled(operation)));
        }

        let bounded = async {
            match self.transaction_timeout {
                Some(limit) => tokio::time::timeout(limit, body).await.map_err(|_| {
                    AppError::transaction(format!(
                        "{operation} did not finish within {}s",
                        limit.as_secs()
                    ))
                })?,
                None => body.await,
            }
        };

        // A dropped body drops its uncommitted transaction, which rolls it back.
        let (tx, value) = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::cancelled(operation)),
            result = bounded => result,
        }
        .map_err(TransactionAbort::RolledBack)?;

        if cancel.is_cancelled() {
            if let Err(e) = tx.rollback().await {
                warn!("Rollback of cancelled {} failed: {}", operation, e);
            }
            return Err(TransactionAbort::RolledBack(AppError::cancelled(operation)));
        }

        tx.commit()
            .await
            .map_err(|e| TransactionAbort::Commit(e.into()))?;
        Ok(value)
    }

    /// Probe and persist an upload ahead of the transaction.
    async fn stage_file(
        &self,
        file: UploadedFile,
        prefix: Option<&str>,
    ) -> AppResult<NewImageFile> {
        if file.bytes.is_empty() {
            return Err(AppError::validation("uploaded file is empty"));
        }

        let codec = Arc::clone(&self.codec);
        let UploadedFile { file_name, bytes } = file;
        let (probed, bytes) = tokio::task::spawn_blocking(move || {
            let probed = codec.probe(&bytes);
            (probed, bytes)
        })
        .await
        .map_err(|e| AppError::internal(format!("probe task failed: {e}")))?;
        let probed = probed
            .map_err(|e| AppError::validation(format!("uploaded file is not a supported image: {e}")))?;

        let stored_file_name =
            OriginalStorage::generate_file_name(prefix, file_name.as_deref(), &probed.extension);
        self.storage.write(&stored_file_name, &bytes).await?;

        Ok(NewImageFile {
            original_file_name: file_name,
            stored_file_name,
            width: probed.width,
            height: probed.height,
            mime_type: probed.mime_type,
            exif: probed.exif,
        })
    }

    /// Create or update the image bound to `request.key`.
    pub async fn upsert(
        &self,
        request: UpsertRequest,
        work: &UnitOfWork,
        cancel: &CancellationToken,
    ) -> AppResult<UpsertOutcome> {
        request.key.validate()?;
        if let Some(metadata) = &request.metadata {
            metadata.validate()?;
        }
        if cancel.is_cancelled() {
            return Err(AppError::cancelled("image upsert"));
        }

        let UpsertRequest {
            key,
            file,
            metadata,
            file_name_prefix,
            user_id,
        } = request;

        let staged = match file {
            Some(file) => Some(self.stage_file(file, file_name_prefix.as_deref()).await?),
            None => None,
        };

        let body = self.upsert_tx(
            &key,
            staged.as_ref(),
            metadata.as_ref(),
            user_id.as_deref(),
            work,
        );
        let commit = match self.run_transaction("image upsert", cancel, body).await {
            Ok(commit) => commit,
            Err(TransactionAbort::RolledBack(e)) => {
                // Nothing references the new original; anything left behind is an orphan.
                if let Some(staged) = &staged {
                    if let Err(cleanup) = self.storage.delete(&staged.stored_file_name).await {
                        warn!(
                            "Failed to remove uploaded file {} after aborted upsert: {}",
                            staged.stored_file_name, cleanup
                        );
                    }
                }
                return Err(e);
            }
            Err(TransactionAbort::Commit(e)) => {
                if let Some(staged) = &staged {
                    warn!(
                        "Commit of upsert for {} failed, keeping uploaded file {}: {}",
                        key, staged.stored_file_name, e
                    );
                }
                return Err(e);
            }
        };

        let mut cleanup_errors = Vec::new();
        let mut cache_files_removed = 0;
        if commit.invalidated {
            let (removed, errors) = self.cache.remove_files(commit.image_id).await;
            cache_files_removed = removed;
            cleanup_errors.extend(errors);
        }

        let mut file_removed = false;
        if let Some(previous) = &commit.previous_file {
            match self.storage.delete(previous).await {
                Ok(removed) => file_removed = removed,
                Err(e) => cleanup_errors.push(format!("failed to remove original {previous}: {e}")),
            }
        }
        for error in &cleanup_errors {
            warn!("Post-commit cleanup for image {}: {}", commit.image_id, error);
        }

        let image = self
            .find_image(commit.image_id)
            .await?
            .ok_or_else(|| AppError::not_found("image", commit.image_id.to_string()))?;

        let message = if commit.inserted {
            format!("Image {} created for {}", commit.image_id, key)
        } else {
            format!("Image {} updated for {}", commit.image_id, key)
        };
        info!("{}", message);

        Ok(UpsertOutcome {
            image_id: commit.image_id,
            inserted: commit.inserted,
            message,
            cache_files_removed,
            file_removed,
            cleanup_errors,
            image,
        })
    }

    async fn upsert_tx(
        &self,
        key: &LinkKey,
        staged: Option<&NewImageFile>,
        metadata: Option<&ImageMetadata>,
        user_id: Option<&str>,
        work: &UnitOfWork,
    ) -> AppResult<(Transaction<'static, Sqlite>, UpsertCommit)> {
        let mut tx = self.pool.begin().await?;

        let existing = match self.images.find_link(&mut tx, key).await? {
            Some(id) => self.images.find_by_id(&mut tx, id).await?,
            None => None,
        };

        let (image_id, inserted, previous_file) = match (staged, &existing) {
            (Some(file), Some(image)) => {
                let previous = self.images.replace_file(&mut tx, image.id, file).await?;
                (image.id, false, Some(previous))
            }
            (Some(file), None) => {
                let id = self.images.insert_image(&mut tx, file, user_id).await?;
                (id, true, None)
            }
            (None, Some(image)) => (image.id, false, None),
            (None, None) => {
                tx.rollback().await?;
                return Err(AppError::validation(format!(
                    "no image is linked to {key}; an upload is required"
                )));
            }
        };

        let mut focus_changed = false;
        if let Some(metadata) = metadata {
            if let Some(image) = &existing {
                let (x, y) = metadata.focus();
                let next = (x.unwrap_or(DEFAULT_FOCUS), y.unwrap_or(DEFAULT_FOCUS));
                focus_changed = image.focus() != next;
            }
            self.images.update_metadata(&mut tx, image_id, metadata).await?;
        }

        self.images.upsert_link(&mut tx, key, image_id).await?;
        work.apply(&mut tx, &self.tables, image_id).await?;

        let invalidated = !inserted && (previous_file.is_some() || focus_changed);
        if invalidated {
            let rows = self.cache.delete_rows(&mut tx, image_id).await?;
            debug!("Dropped {} cache rows for image {}", rows, image_id);
        }

        Ok((
            tx,
            UpsertCommit {
                image_id,
                inserted,
                previous_file,
                invalidated,
            },
        ))
    }

    /// Remove the link for `key`. Unknown keys are a successful no-op.
    pub async fn delete(
        &self,
        key: LinkKey,
        work: &UnitOfWork,
        cancel: &CancellationToken,
    ) -> AppResult<DeleteOutcome> {
        key.validate()?;

        let body = self.delete_tx(&key, work);
        let Some(commit) = self.run_transaction("image delete", cancel, body).await? else {
            debug!("No image linked to {}, nothing to delete", key);
            return Ok(DeleteOutcome {
                found: false,
                message: format!("No image linked to {key}"),
                ..DeleteOutcome::default()
            });
        };

        let (cache_files_removed, mut cleanup_errors) = self.cache.remove_files(commit.image_id).await;

        let mut file_removed = false;
        if let Some(file) = &commit.removed_file {
            match self.storage.delete(file).await {
                Ok(removed) => file_removed = removed,
                Err(e) => cleanup_errors.push(format!("failed to remove original {file}: {e}")),
            }
        }
        for error in &cleanup_errors {
            warn!("Post-commit cleanup for image {}: {}", commit.image_id, error);
        }

        let image_removed = commit.removed_file.is_some();
        let message = if image_removed {
            format!("Image {} deleted with its link {}", commit.image_id, key)
        } else {
            format!("Link {} removed; image {} is still referenced", key, commit.image_id)
        };
        info!("{}", message);

        Ok(DeleteOutcome {
            found: true,
            image_id: Some(commit.image_id),
            message,
            image_removed,
            file_removed,
            cache_files_removed,
            cleanup_errors,
        })
    }

    async fn delete_tx(
        &self,
        key: &LinkKey,
        work: &UnitOfWork,
    ) -> AppResult<(Transaction<'static, Sqlite>, Option<DeleteCommit>)> {
        let mut tx = self.pool.begin().await?;

        let Some(image_id) = self.images.find_link(&mut tx, key).await? else {
            return Ok((tx, None));
        };

        self.images.delete_link(&mut tx, key).await?;
        let removed_file = if self.images.count_links(&mut tx, image_id).await? == 0 {
            self.images.delete_image(&mut tx, image_id).await?
        } else {
            None
        };
        self.cache.delete_rows(&mut tx, image_id).await?;
        work.apply(&mut tx, &self.tables, image_id).await?;

        Ok((
            tx,
            Some(DeleteCommit {
                image_id,
                removed_file,
            }),
        ))
    }

    /// Point `key` at an existing image. An image left without links by the
    /// rebind is deleted in the same transaction.
    pub async fn bind(
        &self,
        key: LinkKey,
        image_id: i64,
        cancel: &CancellationToken,
    ) -> AppResult<BindOutcome> {
        key.validate()?;

        let body = self.bind_tx(&key, image_id);
        let commit = self.run_transaction("image bind", cancel, body).await?;

        let mut outcome = BindOutcome {
            image_id,
            previous_image_id: commit.previous_image_id,
            orphan_removed: false,
            file_removed: false,
            cache_files_removed: 0,
            cleanup_errors: Vec::new(),
        };

        if let Some((orphan_id, file)) = commit.orphan {
            outcome.orphan_removed = true;
            let (removed, errors) = self.cache.remove_files(orphan_id).await;
            outcome.cache_files_removed = removed;
            outcome.cleanup_errors.extend(errors);
            match self.storage.delete(&file).await {
                Ok(removed) => outcome.file_removed = removed,
                Err(e) => outcome
                    .cleanup_errors
                    .push(format!("failed to remove original {file}: {e}")),
            }
            info!("Reaped orphaned image {} after rebinding {}", orphan_id, key);
        }
        for error in &outcome.cleanup_errors {
            warn!("Post-commit cleanup after binding {}: {}", key, error);
        }

        Ok(outcome)
    }

    async fn bind_tx(
        &self,
        key: &LinkKey,
        image_id: i64,
    ) -> AppResult<(Transaction<'static, Sqlite>, BindCommit)> {
        let mut tx = self.pool.begin().await?;

        if self.images.find_by_id(&mut tx, image_id).await?.is_none() {
            tx.rollback().await?;
            return Err(AppError::not_found("image", image_id.to_string()));
        }

        let previous_image_id = self.images.find_link(&mut tx, key).await?;
        self.images.upsert_link(&mut tx, key, image_id).await?;

        let mut orphan = None;
        if let Some(previous) = previous_image_id.filter(|id| *id != image_id) {
            if self.images.count_links(&mut tx, previous).await? == 0 {
                self.cache.delete_rows(&mut tx, previous).await?;
                if let Some(file) = self.images.delete_image(&mut tx, previous).await? {
                    orphan = Some((previous, file));
                }
            }
        }

        Ok((
            tx,
            BindCommit {
                previous_image_id,
                orphan,
            },
        ))
    }

    pub async fn metadata(&self, key: &LinkKey) -> AppResult<ImageAsset> {
        key.validate()?;
        let mut conn = self.pool.acquire().await?;
        self.images
            .find_by_link(&mut conn, key)
            .await?
            .ok_or_else(|| AppError::not_found("image link", key.to_string()))
    }

    pub async fn find_image(&self, id: i64) -> AppResult<Option<ImageAsset>> {
        let mut conn = self.pool.acquire().await?;
        Ok(self.images.find_by_id(&mut conn, id).await?)
    }

    /// Bytes of the stored original for `image`.
    pub async fn read_original(&self, image: &ImageAsset) -> AppResult<Vec<u8>> {
        self.storage
            .read(&image.stored_file_name)
            .await
            .map_err(|e| {
                AppError::internal(format!(
                    "original {} of image {} is unreadable: {e}",
                    image.stored_file_name, image.id
                ))
            })
    }
}
