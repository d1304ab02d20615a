//! Image API error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during image operations
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Image API key not configured: {0}")]
    MissingApiKey(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The model answered but produced no usable image
    #[error("{0}")]
    Generation(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ImageError {
    /// Check if the failure means the credential is missing or unusable
    ///
    /// The API answers 404 "Requested entity was not found" for keys whose
    /// project was deleted or never had the model enabled.
    pub fn is_credential_error(&self) -> bool {
        match self {
            ImageError::MissingApiKey(_) => true,
            ImageError::ApiError { status: 401 | 403, .. } => true,
            ImageError::ApiError { status: 404, message } => message.contains("Requested entity was not found"),
            _ => false,
        }
    }
}
