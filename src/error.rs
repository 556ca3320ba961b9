// src/error.rs

//! Unified error handling for ingestion, ranking and persistence.

use std::fmt;

use thiserror::Error;

/// Result type alias for auction operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A raw record is missing or has an invalid required field
    #[error("Normalization error on '{field}': {message}")]
    Normalization { field: String, message: String },

    /// External geocoding lookup failed or timed out
    #[error("Geocode unavailable for '{query}': {message}")]
    GeocodeUnavailable { query: String, message: String },

    /// Database operation failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// A source adapter could not produce records
    #[error("Source adapter error for {source_key}: {message}")]
    SourceAdapter { source_key: String, message: String },

    /// A bounded operation exceeded its time budget
    #[error("Timed out after {secs}s: {context}")]
    Timeout { context: String, secs: u64 },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a normalization error naming the offending field.
    pub fn normalization(field: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Normalization {
            field: field.into(),
            message: message.to_string(),
        }
    }

    /// Create a geocoding error for a query.
    pub fn geocode(query: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::GeocodeUnavailable {
            query: query.into(),
            message: message.to_string(),
        }
    }

    /// Create a source adapter error.
    pub fn adapter(source_key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::SourceAdapter {
            source_key: source_key.into(),
            message: message.to_string(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(context: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            context: context.into(),
            secs,
        }
    }

    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True when the error means the database could not be reached at all,
    /// as opposed to a rejected statement.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Persistence(
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_error_names_field() {
        let err = AppError::normalization("end_date", "could not parse 'soon'");
        assert_eq!(
            err.to_string(),
            "Normalization error on 'end_date': could not parse 'soon'"
        );
    }

    #[test]
    fn connectivity_classification() {
        assert!(AppError::Persistence(sqlx::Error::PoolTimedOut).is_connectivity());
        assert!(!AppError::Persistence(sqlx::Error::RowNotFound).is_connectivity());
        assert!(!AppError::validation("x").is_connectivity());
    }
}
