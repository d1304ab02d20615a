//! Request types for the image operations

use crate::domain::{AspectRatio, ImageData};

/// Generate one scene, optionally continuing from a reference image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub prompt: String,
    pub reference: Option<ImageData>,
    pub aspect_ratio: AspectRatio,
}

/// Upscale an existing scene image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpscaleRequest {
    pub prompt: String,
    pub image: ImageData,
    pub aspect_ratio: AspectRatio,
}
