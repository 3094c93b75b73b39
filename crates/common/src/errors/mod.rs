//! Error types for CAIG services
//!
//! Provides a single error enum for the query engine with:
//! - Distinct variants for each failure class
//! - Machine-readable error codes
//! - A recoverability split used by fallback handling

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    LowConfidence,
    UnknownStrategy,
    UnknownQueryType,

    // Catalog and schema errors (4xxx)
    CatalogError,
    SchemaError,

    // External service errors (8xxx)
    BackendError,
    BackendTimeout,
    PlannerError,
    EmbeddingError,
    UpstreamError,

    // Internal errors (9xxx)
    InvalidState,
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::LowConfidence => 1002,
            ErrorCode::UnknownStrategy => 1003,
            ErrorCode::UnknownQueryType => 1004,

            ErrorCode::CatalogError => 4001,
            ErrorCode::SchemaError => 4002,

            ErrorCode::BackendError => 8001,
            ErrorCode::BackendTimeout => 8002,
            ErrorCode::PlannerError => 8003,
            ErrorCode::EmbeddingError => 8004,
            ErrorCode::UpstreamError => 8005,

            ErrorCode::InvalidState => 9001,
            ErrorCode::InternalError => 9002,
            ErrorCode::ConfigurationError => 9003,
            ErrorCode::SerializationError => 9004,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Plan validation
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Plan confidence {confidence:.2} is below the minimum of {minimum:.2}")]
    LowConfidence { confidence: f64, minimum: f64 },

    #[error("Unknown strategy: {value}")]
    UnknownStrategy { value: String },

    #[error("Unknown query type: {value}")]
    UnknownQueryType { value: String },

    // Catalogs and schema context
    #[error("Catalog error: {message}")]
    Catalog { message: String },

    #[error("Schema context error: {message}")]
    Schema { message: String },

    // External collaborators
    #[error("{backend} backend error: {message}")]
    Backend { backend: String, message: String },

    #[error("{backend} backend timed out after {timeout_ms}ms")]
    BackendTimeout { backend: String, timeout_ms: u64 },

    #[error("Query planner error: {message}")]
    Planner { message: String },

    #[error("Embedding service error: {message}")]
    Embedding { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::LowConfidence { .. } => ErrorCode::LowConfidence,
            AppError::UnknownStrategy { .. } => ErrorCode::UnknownStrategy,
            AppError::UnknownQueryType { .. } => ErrorCode::UnknownQueryType,
            AppError::Catalog { .. } => ErrorCode::CatalogError,
            AppError::Schema { .. } => ErrorCode::SchemaError,
            AppError::Backend { .. } => ErrorCode::BackendError,
            AppError::BackendTimeout { .. } => ErrorCode::BackendTimeout,
            AppError::Planner { .. } => ErrorCode::PlannerError,
            AppError::Embedding { .. } => ErrorCode::EmbeddingError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::InvalidState { .. } => ErrorCode::InvalidState,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the caller can recover by retrying with another plan.
    ///
    /// Validation failures, unknown strategies and backend failures all
    /// feed the fallback chain; configuration and state errors are defects.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. }
                | AppError::LowConfidence { .. }
                | AppError::UnknownStrategy { .. }
                | AppError::UnknownQueryType { .. }
                | AppError::Backend { .. }
                | AppError::BackendTimeout { .. }
                | AppError::Planner { .. }
                | AppError::Embedding { .. }
                | AppError::HttpClient(_)
        )
    }

    /// Whether this error came from the plan itself rather than a backend
    pub fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. }
                | AppError::LowConfidence { .. }
                | AppError::UnknownStrategy { .. }
                | AppError::UnknownQueryType { .. }
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
