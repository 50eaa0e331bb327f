//! Error type definitions for the image service
//!
//! This module defines all error types used throughout the application,
//! providing a hierarchical error system that keeps the HTTP mapping in
//! one place.

use thiserror::Error;

/// Top-level application error type
///
/// This enum represents all possible errors that can occur in the application.
/// It uses `thiserror` to provide automatic error trait implementations and
/// proper error chaining.
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Repository layer errors
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Pixel codec errors
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Crop/fit computation errors
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// Derivative cache errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Filesystem errors outside the derivative cache
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Resource not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Atomic metadata mutation failed and was rolled back
    #[error("Transaction failed: {message}")]
    Transaction { message: String },

    /// Operation aborted by cancellation or deadline before commit
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Repository layer specific errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// SQL query execution failures
    #[error("Query failed: {query} - {message}")]
    QueryFailed { query: String, message: String },

    /// Data serialization/deserialization failures
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Record not found
    #[error("Record not found: {table} with {field} = {value}")]
    RecordNotFound {
        table: String,
        field: String,
        value: String,
    },
}

/// Errors raised by an [`ImageCodec`](crate::imaging::codec::ImageCodec)
#[derive(Error, Debug)]
pub enum CodecError {
    /// The source bytes could not be decoded
    #[error("Decode failed: {message}")]
    Decode { message: String },

    /// The derivative could not be encoded
    #[error("Encode failed: {message}")]
    Encode { message: String },

    /// The bytes are not in a format the codec understands
    #[error("Unsupported image format: {format}")]
    UnsupportedFormat { format: String },

    /// The crop plan does not fit the decoded image
    #[error("Crop {width}x{height}+{x}+{y} exceeds decoded image {image_width}x{image_height}")]
    CropOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },
}

/// Crop/fit requests that cannot produce a non-empty image
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Invalid geometry: source dimensions {width}x{height} are empty")]
    EmptySource { width: u32, height: u32 },

    #[error("Invalid geometry: aspect ratio {ratio} is not a positive finite number")]
    InvalidRatio { ratio: f64 },

    #[error("Invalid geometry: resolved dimensions {width}x{height} are empty")]
    EmptyOutput { width: u32, height: u32 },
}

/// Derivative cache errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// A cache file could not be written, read or removed
    #[error("Cache file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The cache metadata row could not be read or written
    #[error("Cache metadata: {0}")]
    Metadata(#[from] sqlx::Error),

    /// A cache metadata query failed
    #[error("Cache metadata: {0}")]
    Repository(#[from] RepositoryError),

    /// A requested cache file name is not a receipt-derived name
    #[error("Invalid cache file name: {name}")]
    InvalidFileName { name: String },

    /// The source image changed while the derivative was being rendered
    #[error("Image {image_id} changed during rendering, derivative not cached")]
    Superseded { image_id: i64 },
}

/// A single render parameter failed its typed parser
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid '{field}' parameter: {message}")]
pub struct ParameterError {
    pub field: &'static str,
    pub message: String,
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a validation error with a custom message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error for a specific resource
    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction<S: Into<String>>(message: S) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create a cancellation error for the named operation
    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error is the caller's fault (4xx) rather than ours
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::NotFound { .. } | Self::Geometry(_)
        )
    }
}

impl RepositoryError {
    /// Create a query failed error
    pub fn query_failed<Q: Into<String>, M: Into<String>>(query: Q, message: M) -> Self {
        Self::QueryFailed {
            query: query.into(),
            message: message.into(),
        }
    }

    /// Create a record not found error
    pub fn record_not_found<T: Into<String>, F: Into<String>, V: Into<String>>(
        table: T,
        field: F,
        value: V,
    ) -> Self {
        Self::RecordNotFound {
            table: table.into(),
            field: field.into(),
            value: value.into(),
        }
    }
}

impl CodecError {
    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn encode<S: Into<String>>(message: S) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }
}

impl CacheError {
    /// Wrap an IO failure on a cache path
    pub fn file<P: AsRef<std::path::Path>>(path: P, source: std::io::Error) -> Self {
        Self::File {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

impl ParameterError {
    pub fn new<S: Into<String>>(field: &'static str, message: S) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl From<ParameterError> for AppError {
    fn from(err: ParameterError) -> Self {
        Self::validation(err.to_string())
    }
}
