//! Defines the crate's primary error type `AppError` and a convenience `Result` alias.
//!
//! Uses the `thiserror` crate for ergonomic error definition and provides `From`
//! implementations to convert common external errors into `AppError` variants.
//! Errors that do not implement `Clone` are wrapped in `Arc` so `AppError` stays cloneable,
//! which lets a cached failure be handed to several callers.

use std::sync::Arc;
use thiserror::Error;

/// The primary error enumeration for all pipeline errors.
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// Error originating from an upstream HTTP client (`reqwest`).
    #[error("API Error: {0}")]
    Api(Arc<reqwest::Error>),

    /// Error during JSON parsing (`serde_json`).
    #[error("JSON Parsing Error: {0}")]
    JsonParse(Arc<serde_json::Error>),

    /// Error while reading a CSV seed dataset.
    #[error("CSV Error: {0}")]
    Csv(Arc<csv::Error>),

    /// Error related to standard I/O operations.
    #[error("I/O Error: {0}")]
    Io(Arc<std::io::Error>),

    /// Invalid or unparseable configuration value.
    #[error("Configuration Error: {0}")]
    Config(String),

    /// A source in the fetch chain failed or returned nothing usable.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// An upstream call exceeded its time budget.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Cache entry is older than the TTL and could not be refreshed.
    #[error("Data for {city} is stale ({age_minutes} min old)")]
    StaleData { city: String, age_minutes: i64 },

    /// No model artifact is loaded for the requested city.
    #[error("Forecast service unavailable for {city}: no model loaded")]
    ModelUnavailable { city: String },

    /// Not enough AQI history to seed the forecaster.
    #[error("Insufficient AQI history for {city}")]
    InsufficientData { city: String },

    /// A fetched row is missing required fields.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// A single forecast step could not be computed (shape mismatch, bad tree, ...).
    #[error("Prediction Error: {0}")]
    Prediction(String),

    /// Error specific to CLI logic or argument handling.
    #[error("CLI Error: {0}")]
    Cli(String),

    /// Error originating from user interaction prompts (`dialoguer`).
    #[error("Dialoguer Error: {0}")]
    Dialoguer(Arc<dialoguer::Error>),

    /// Error related to progress bar style templating (`indicatif`).
    #[error("Progress Style Template Error: {0}")]
    Template(Arc<indicatif::style::TemplateError>),
}

/// A specialized `Result` type using the crate's `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

// --- From implementations ---
// These allow easy conversion from external error types into AppError
// using the `?` operator. Arc is used for non-Clone error types.

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return AppError::Timeout(err.to_string());
        }
        AppError::Api(Arc::new(err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::JsonParse(Arc::new(err))
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::Csv(Arc::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(Arc::new(err))
    }
}

impl From<dialoguer::Error> for AppError {
    fn from(err: dialoguer::Error) -> Self {
        AppError::Dialoguer(Arc::new(err))
    }
}

impl From<indicatif::style::TemplateError> for AppError {
    fn from(err: indicatif::style::TemplateError) -> Self {
        AppError::Template(Arc::new(err))
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        AppError::Timeout(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_unavailable_message_names_city() {
        let err = AppError::ModelUnavailable {
            city: "Pune".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Forecast service unavailable for Pune: no model loaded"
        );
    }

    #[test]
    fn test_io_error_converts_and_clones() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: AppError = io.into();
        let cloned = err.clone();
        assert!(matches!(cloned, AppError::Io(_)));
        assert!(cloned.to_string().contains("missing"));
    }
}
