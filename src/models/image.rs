use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{AppError, AppResult};

/// Focus coordinate used when an image has none stored.
pub const DEFAULT_FOCUS: f64 = 0.5;

/// The owning entity a link binds an image to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkKey {
    pub context: String,
    pub context_id: String,
    pub identifier: String,
}

impl LinkKey {
    pub fn new<C, I, D>(context: C, context_id: I, identifier: D) -> Self
    where
        C: Into<String>,
        I: Into<String>,
        D: Into<String>,
    {
        Self {
            context: context.into(),
            context_id: context_id.into(),
            identifier: identifier.into(),
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        for (name, value) in [
            ("context", &self.context),
            ("context_id", &self.context_id),
            ("identifier", &self.identifier),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::validation(format!("{name} must not be empty")));
            }
        }
        Ok(())
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.context, self.context_id, self.identifier)
    }
}

/// A stored original image and its descriptive metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub id: i64,
    pub original_file_name: Option<String>,
    pub stored_file_name: String,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    pub exif: Option<BTreeMap<String, String>>,
    pub alt_text: Option<String>,
    pub description: Option<String>,
    pub creator: Option<String>,
    pub copyright: Option<String>,
    pub license_ref: Option<String>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub focus_x: Option<f64>,
    pub focus_y: Option<f64>,
    pub margin_left: Option<i64>,
    pub margin_right: Option<i64>,
    pub margin_top: Option<i64>,
    pub margin_bottom: Option<i64>,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageAsset {
    /// Map a row selected with [`ImageAsset::COLUMNS`].
    pub fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let exif: Option<String> = row.try_get("exif")?;
        let exif = exif
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "exif".to_string(),
                source: Box::new(e),
            })?;

        Ok(Self {
            id: row.try_get("id")?,
            original_file_name: row.try_get("original_file_name")?,
            stored_file_name: row.try_get("stored_file_name")?,
            width: row.try_get::<i64, _>("width")?.max(0) as u32,
            height: row.try_get::<i64, _>("height")?.max(0) as u32,
            mime_type: row.try_get("mime_type")?,
            exif,
            alt_text: row.try_get("alt_text")?,
            description: row.try_get("description")?,
            creator: row.try_get("creator")?,
            copyright: row.try_get("copyright")?,
            license_ref: row.try_get("license_ref")?,
            expiration_date: row.try_get("expiration_date")?,
            focus_x: row.try_get("focus_x")?,
            focus_y: row.try_get("focus_y")?,
            margin_left: row.try_get("margin_left")?,
            margin_right: row.try_get("margin_right")?,
            margin_top: row.try_get("margin_top")?,
            margin_bottom: row.try_get("margin_bottom")?,
            user_id: row.try_get("user_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Column list matching [`ImageAsset::from_row`], qualified by `alias`.
    pub fn columns(alias: &str) -> String {
        Self::COLUMNS
            .iter()
            .map(|c| format!("{alias}.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub const COLUMNS: &'static [&'static str] = &[
        "id",
        "original_file_name",
        "stored_file_name",
        "width",
        "height",
        "mime_type",
        "exif",
        "alt_text",
        "description",
        "creator",
        "copyright",
        "license_ref",
        "expiration_date",
        "focus_x",
        "focus_y",
        "margin_left",
        "margin_right",
        "margin_top",
        "margin_bottom",
        "user_id",
        "created_at",
        "updated_at",
    ];

    /// Stored focus point, falling back to the image centre.
    pub fn focus(&self) -> (f64, f64) {
        (
            self.focus_x.unwrap_or(DEFAULT_FOCUS),
            self.focus_y.unwrap_or(DEFAULT_FOCUS),
        )
    }
}

/// Descriptive metadata supplied with an upsert.
///
/// When present on an upsert the whole set replaces what is stored; fields
/// left out are cleared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageMetadata {
    pub alt_text: Option<String>,
    pub description: Option<String>,
    pub creator: Option<String>,
    pub copyright: Option<String>,
    pub license_ref: Option<String>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub focus_x: Option<f64>,
    pub focus_y: Option<f64>,
    pub margin_left: Option<i64>,
    pub margin_right: Option<i64>,
    pub margin_top: Option<i64>,
    pub margin_bottom: Option<i64>,
}

impl ImageMetadata {
    pub fn validate(&self) -> AppResult<()> {
        for (name, value) in [("focus_x", self.focus_x), ("focus_y", self.focus_y)] {
            if let Some(v) = value {
                if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                    return Err(AppError::validation(format!(
                        "{name} must be between 0 and 1, got {v}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn focus(&self) -> (Option<f64>, Option<f64>) {
        (self.focus_x, self.focus_y)
    }
}

/// Raw bytes of an uploaded original.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct UpsertRequest {
    pub key: LinkKey,
    pub file: Option<UploadedFile>,
    /// `None` leaves stored metadata untouched.
    pub metadata: Option<ImageMetadata>,
    pub file_name_prefix: Option<String>,
    pub user_id: Option<String>,
}

impl UpsertRequest {
    pub fn new(key: LinkKey) -> Self {
        Self {
            key,
            file: None,
            metadata: None,
            file_name_prefix: None,
            user_id: None,
        }
    }

    pub fn with_file<N: Into<String>>(mut self, file_name: N, bytes: Vec<u8>) -> Self {
        self.file = Some(UploadedFile {
            file_name: Some(file_name.into()),
            bytes,
        });
        self
    }

    pub fn with_metadata(mut self, metadata: ImageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpsertOutcome {
    pub image_id: i64,
    pub inserted: bool,
    pub message: String,
    pub cache_files_removed: usize,
    /// The previous original file was replaced and removed from disk.
    pub file_removed: bool,
    /// Post-commit cleanup failures; the mutation itself succeeded.
    pub cleanup_errors: Vec<String>,
    pub image: ImageAsset,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteOutcome {
    /// False when no link existed for the triple.
    pub found: bool,
    pub image_id: Option<i64>,
    pub message: String,
    pub image_removed: bool,
    pub file_removed: bool,
    pub cache_files_removed: usize,
    pub cleanup_errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BindOutcome {
    pub image_id: i64,
    pub previous_image_id: Option<i64>,
    /// The previously bound image lost its last link and was deleted.
    pub orphan_removed: bool,
    pub file_removed: bool,
    pub cache_files_removed: usize,
    pub cleanup_errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_key_validation() {
        assert!(LinkKey::new("article", "12", "hero").validate().is_ok());
        assert!(LinkKey::new("", "12", "hero").validate().is_err());
        assert!(LinkKey::new("article", " ", "hero").validate().is_err());
        assert_eq!(LinkKey::new("a", "b", "c").to_string(), "a/b/c");
    }

    #[test]
    fn test_metadata_focus_validation() {
        let mut meta = ImageMetadata {
            focus_x: Some(0.25),
            focus_y: Some(1.0),
            ..Default::default()
        };
        assert!(meta.validate().is_ok());

        meta.focus_x = Some(1.5);
        assert!(meta.validate().is_err());

        meta.focus_x = Some(f64::NAN);
        assert!(meta.validate().is_err());
    }

    #[test]
    fn test_metadata_payload_defaults() {
        let meta: ImageMetadata = serde_json::from_str(r#"{"alt_text":"A dog"}"#).unwrap();
        assert_eq!(meta.alt_text.as_deref(), Some("A dog"));
        assert_eq!(meta.focus(), (None, None));
    }

    #[test]
    fn test_columns_are_qualified() {
        let cols = ImageAsset::columns("i");
        assert!(cols.starts_with("i.id, i.original_file_name"));
        assert!(cols.ends_with("i.updated_at"));
    }
}
