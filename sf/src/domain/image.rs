//! Image payloads

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Binary image with its MIME type
///
/// Bytes are shared, so cloning a step snapshot never copies pixel data.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    mime_type: String,
    bytes: Arc<[u8]>,
}

impl ImageData {
    pub fn new(mime_type: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Decode a base64 payload as returned by the image API
    pub fn from_base64(mime_type: impl Into<String>, data: &str) -> Result<Self, base64::DecodeError> {
        let bytes = BASE64.decode(data.trim())?;
        Ok(Self::new(mime_type, bytes))
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// File extension matching the MIME type
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

impl std::fmt::Debug for ImageData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageData")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}
