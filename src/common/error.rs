//! Common Error Types for the Custodia Backend
//!
//! Provides unified error handling across all modules.
//!
//! Retryability is the load-bearing distinction: chain/API failures must
//! never poison a deposit, they are abandoned for the cycle and retried on
//! the next scheduler tick or webhook delivery.

use thiserror::Error;

/// Root error type for the custodia backend
#[derive(Debug, Error)]
pub enum CustodiaError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),

    /// Referenced user/asset/deposit does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Requested operation is not implemented for this network
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    /// Request failed validation
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or mismatched API credentials
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Upstream chain API failure; retryable
    #[error("chain error: {0}")]
    Chain(#[from] crate::chain::ChainError),

    /// Storage errors
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    /// Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CustodiaError {
    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an unauthorized error
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            CustodiaError::Chain(_) | CustodiaError::Io(_) => true,
            CustodiaError::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            CustodiaError::Config(_) => "CONFIG_ERROR",
            CustodiaError::Logging(_) => "LOGGING_ERROR",
            CustodiaError::NotFound(_) => "NOT_FOUND",
            CustodiaError::UnsupportedNetwork(_) => "UNSUPPORTED_NETWORK",
            CustodiaError::Validation(_) => "VALIDATION_ERROR",
            CustodiaError::Unauthorized(_) => "UNAUTHORIZED",
            CustodiaError::Chain(_) => "CHAIN_ERROR",
            CustodiaError::Storage(_) => "STORAGE_ERROR",
            CustodiaError::Internal(_) => "INTERNAL_ERROR",
            CustodiaError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias using CustodiaError
pub type Result<T> = std::result::Result<T, CustodiaError>;
