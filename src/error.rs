//! Error types for Radar
//!
//! All modules use `RadarResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Radar operations
pub type RadarResult<T> = Result<T, RadarError>;

/// All errors that can occur in Radar
#[derive(Error, Debug)]
pub enum RadarError {
    // Lookup errors
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource type not found: {0}")]
    ResourceTypeNotFound(String),

    #[error("Pipeline not found: {0}")]
    PipelineNotFound(i64),

    #[error("Resource cache not found: {0}")]
    ResourceCacheNotFound(i64),

    // Identity errors
    #[error("Cyclic resource type: {chain}")]
    CyclicResourceType { chain: String },

    #[error("Resource type has no version yet: {0}")]
    ResourceTypeUnversioned(String),

    #[error("Invalid resource source: {0}")]
    InvalidSource(String),

    // Store constraint races
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    #[error("Gave up after repeated concurrent modification of {0}")]
    ConcurrentModification(String),

    // Store errors
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    // Scanner errors
    #[error("Check failed: {0}")]
    CheckFailed(String),

    #[error("Lock {lock} still held by another process after {attempts} attempts")]
    LockContention { lock: String, attempts: u32 },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl From<sqlx::Error> for RadarError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.kind() {
                sqlx::error::ErrorKind::UniqueViolation => {
                    return Self::UniqueViolation(db_err.message().to_string())
                }
                sqlx::error::ErrorKind::ForeignKeyViolation => {
                    return Self::ForeignKeyViolation(db_err.message().to_string())
                }
                _ => {}
            }
        }
        Self::Database(err)
    }
}

impl RadarError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether a create lost a race against an identical concurrent create
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }

    /// Whether a write lost a race against a delete (or a delete against a new reference)
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self, Self::ForeignKeyViolation(_))
    }

    /// Check if error is retryable on the caller's next tick
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::ConcurrentModification(_)
                | Self::LockContention { .. }
                | Self::UniqueViolation(_)
                | Self::ForeignKeyViolation(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::CyclicResourceType { .. } => {
                Some("Break the cycle in the pipeline's resource_types")
            }
            Self::ConfigInvalid { .. } => Some("Run: radar config init --force"),
            Self::Database(_) => Some("Check that the store database path is writable"),
            _ => None,
        }
    }
}
