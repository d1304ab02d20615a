//! Gemini image API client implementation
//!
//! Implements the ImageClient trait against the `generateContent` endpoint
//! of Gemini image models. Images travel as base64 `inlineData` parts.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{GenerateRequest, ImageClient, ImageError, UpscaleRequest};
use crate::config::ImageConfig;
use crate::credentials::ApiKey;
use crate::domain::ImageData;

/// Gemini image API client
pub struct GeminiClient {
    model: String,
    upscale_model: String,
    upscale_size: String,
    base_url: String,
    api_key: ApiKey,
    http: Client,
}

impl GeminiClient {
    /// Create a new client from configuration
    ///
    /// The key is read from `api_key` on every request, so it may be set or
    /// replaced after construction.
    pub fn from_config(config: &ImageConfig, api_key: ApiKey) -> Result<Self, ImageError> {
        debug!(?config, "from_config: called");
        let timeout = Duration::from_millis(config.timeout_ms);

        let http = Client::builder().timeout(timeout).build().map_err(ImageError::Network)?;

        Ok(Self {
            model: config.model.clone(),
            upscale_model: config.upscale_model.clone(),
            upscale_size: config.upscale_size.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }

    /// Build the request body for a scene generation
    fn build_generate_body(&self, request: &GenerateRequest) -> serde_json::Value {
        debug!(has_reference = request.reference.is_some(), aspect_ratio = %request.aspect_ratio, "build_generate_body: called");
        let mut parts = Vec::new();

        let text = match &request.reference {
            Some(reference) => {
                parts.push(inline_part(reference));
                format!(
                    "The attached image is the previous scene of a sequence. Generate the next scene, \
                     keeping characters, setting, lighting and style consistent with it.\n\nNext scene: {}",
                    request.prompt
                )
            }
            None => request.prompt.clone(),
        };
        parts.push(serde_json::json!({ "text": text }));

        serde_json::json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": { "aspectRatio": request.aspect_ratio.as_ratio() },
            },
        })
    }

    /// Build the request body for an upscale
    fn build_upscale_body(&self, request: &UpscaleRequest) -> serde_json::Value {
        debug!(aspect_ratio = %request.aspect_ratio, size = %self.upscale_size, "build_upscale_body: called");
        let text = format!(
            "Upscale the attached image to high resolution. Preserve its composition, content and style \
             exactly; only add detail and sharpness.\n\nScene: {}",
            request.prompt
        );

        serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [inline_part(&request.image), { "text": text }],
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": {
                    "aspectRatio": request.aspect_ratio.as_ratio(),
                    "imageSize": self.upscale_size,
                },
            },
        })
    }

    /// POST a generateContent request and pull the image out of the answer
    async fn generate_content(&self, model: &str, body: serde_json::Value) -> Result<ImageData, ImageError> {
        debug!(%model, "generate_content: called");
        let api_key = self
            .api_key
            .get()
            .ok_or_else(|| ImageError::MissingApiKey("no key selected".to_string()))?;

        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();

        if status == 429 {
            debug!("generate_content: rate limited (429)");
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);

            return Err(ImageError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !response.status().is_success() {
            debug!(%status, "generate_content: API error");
            let text = response.text().await.unwrap_or_default();
            return Err(ImageError::ApiError {
                status,
                message: extract_error_message(&text),
            });
        }

        debug!("generate_content: success");
        let api_response: GeminiResponse = response.json().await?;
        extract_image(api_response)
    }
}

#[async_trait]
impl ImageClient for GeminiClient {
    async fn generate(&self, request: GenerateRequest) -> Result<ImageData, ImageError> {
        debug!(model = %self.model, prompt_len = request.prompt.len(), "generate: called");
        let body = self.build_generate_body(&request);
        self.generate_content(&self.model, body).await
    }

    async fn upscale(&self, request: UpscaleRequest) -> Result<ImageData, ImageError> {
        debug!(model = %self.upscale_model, image_len = request.image.len(), "upscale: called");
        let body = self.build_upscale_body(&request);
        self.generate_content(&self.upscale_model, body).await
    }
}

fn inline_part(image: &ImageData) -> serde_json::Value {
    serde_json::json!({
        "inlineData": {
            "mimeType": image.mime_type(),
            "data": image.to_base64(),
        }
    })
}

/// Pull `error.message` out of an error body, falling back to the raw text
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<GeminiErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.trim().to_string())
}

/// First inline image of the first candidate
fn extract_image(response: GeminiResponse) -> Result<ImageData, ImageError> {
    let mut texts = Vec::new();
    let mut finish_reason = None;

    for candidate in response.candidates {
        finish_reason = finish_reason.or(candidate.finish_reason);
        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
        for part in parts {
            if let Some(inline) = part.inline_data {
                debug!(mime_type = %inline.mime_type, "extract_image: found inline image");
                return ImageData::from_base64(inline.mime_type, &inline.data)
                    .map_err(|e| ImageError::InvalidResponse(format!("Bad image payload: {}", e)));
            }
            if let Some(text) = part.text {
                texts.push(text);
            }
        }
    }

    let reason = response
        .prompt_feedback
        .and_then(|f| f.block_reason)
        .map(|r| format!("prompt blocked ({})", r))
        .or_else(|| {
            let joined = texts.join(" ");
            (!joined.trim().is_empty()).then(|| joined.trim().to_string())
        })
        .or(finish_reason.map(|r| format!("finish reason {}", r)))
        .unwrap_or_else(|| "empty response".to_string());

    debug!(%reason, "extract_image: no image in response");
    Err(ImageError::Generation(format!("No image returned: {}", reason)))
}

// Gemini API response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: Option<String>,
}
