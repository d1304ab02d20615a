//! Remote image operations
//!
//! The orchestration core only sees the [`ImageClient`] trait; the Gemini
//! implementation is selected from configuration.

use std::sync::Arc;

use tracing::debug;

pub mod client;
mod error;
mod gemini;
mod types;

pub use client::ImageClient;
pub use error::ImageError;
pub use gemini::GeminiClient;
pub use types::{GenerateRequest, UpscaleRequest};

use crate::config::ImageConfig;
use crate::credentials::ApiKey;

/// Create an image client based on the provider specified in config
pub fn create_client(config: &ImageConfig, api_key: ApiKey) -> Result<Arc<dyn ImageClient>, ImageError> {
    debug!(provider = %config.provider, model = %config.model, "create_client: called");
    match config.provider.as_str() {
        "gemini" => {
            debug!("create_client: creating Gemini client");
            Ok(Arc::new(GeminiClient::from_config(config, api_key)?))
        }
        other => {
            debug!(provider = %other, "create_client: unknown provider");
            Err(ImageError::InvalidResponse(format!(
                "Unknown image provider: '{}'. Supported: gemini",
                other
            )))
        }
    }
}
