//! ImageClient trait definition

use async_trait::async_trait;

use super::{GenerateRequest, ImageError, UpscaleRequest};
use crate::domain::ImageData;

/// Remote image operations
///
/// Both calls are independent from the caller's point of view: all the
/// continuity a generation needs travels in the request's reference image.
/// Timeouts are the implementation's concern.
#[async_trait]
pub trait ImageClient: Send + Sync {
    /// Generate a scene image from a prompt and optional reference
    async fn generate(&self, request: GenerateRequest) -> Result<ImageData, ImageError>;

    /// Produce a high-resolution version of an existing image
    async fn upscale(&self, request: UpscaleRequest) -> Result<ImageData, ImageError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::Mutex;
    use tokio::sync::{Notify, Semaphore};
    use tracing::debug;

    /// Scripted image client for unit tests
    ///
    /// Results are handed out in order; requests are recorded for inspection.
    /// With a gate installed, every call blocks until the test adds a permit.
    #[derive(Default)]
    pub struct MockImageClient {
        generate_results: Mutex<VecDeque<Result<ImageData, ImageError>>>,
        upscale_results: Mutex<VecDeque<Result<ImageData, ImageError>>>,
        generate_requests: Mutex<Vec<GenerateRequest>>,
        upscale_requests: Mutex<Vec<UpscaleRequest>>,
        gate: Option<Arc<Semaphore>>,
        entered: Arc<Notify>,
    }

    impl MockImageClient {
        pub fn new() -> Self {
            debug!("MockImageClient::new: called");
            Self::default()
        }

        /// Calls block until `gate` has a permit
        pub fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::default()
            }
        }

        pub fn push_generate(&self, result: Result<ImageData, ImageError>) -> &Self {
            self.generate_results.lock().unwrap().push_back(result);
            self
        }

        pub fn push_upscale(&self, result: Result<ImageData, ImageError>) -> &Self {
            self.upscale_results.lock().unwrap().push_back(result);
            self
        }

        pub fn generate_requests(&self) -> Vec<GenerateRequest> {
            self.generate_requests.lock().unwrap().clone()
        }

        pub fn upscale_requests(&self) -> Vec<UpscaleRequest> {
            self.upscale_requests.lock().unwrap().clone()
        }

        /// Resolves once a call has started
        pub fn entered(&self) -> Arc<Notify> {
            self.entered.clone()
        }

        async fn wait_gate(&self) {
            self.entered.notify_one();
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
        }
    }

    #[async_trait]
    impl ImageClient for MockImageClient {
        async fn generate(&self, request: GenerateRequest) -> Result<ImageData, ImageError> {
            debug!(prompt = %request.prompt, "MockImageClient::generate: called");
            self.generate_requests.lock().unwrap().push(request);
            self.wait_gate().await;
            let next = self.generate_results.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(ImageError::InvalidResponse("No more mock responses".to_string())))
        }

        async fn upscale(&self, request: UpscaleRequest) -> Result<ImageData, ImageError> {
            debug!(prompt = %request.prompt, "MockImageClient::upscale: called");
            self.upscale_requests.lock().unwrap().push(request);
            self.wait_gate().await;
            let next = self.upscale_results.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(ImageError::InvalidResponse("No more mock responses".to_string())))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::domain::AspectRatio;

        fn request(prompt: &str) -> GenerateRequest {
            GenerateRequest {
                prompt: prompt.to_string(),
                reference: None,
                aspect_ratio: AspectRatio::Wide,
            }
        }

        #[tokio::test]
        async fn test_mock_client_returns_results_in_order() {
            let client = MockImageClient::new();
            client
                .push_generate(Ok(ImageData::new("image/png", vec![1])))
                .push_generate(Err(ImageError::Generation("rate limited".to_string())));

            let first = client.generate(request("one")).await.unwrap();
            assert_eq!(first.bytes(), &[1]);

            let second = client.generate(request("two")).await;
            assert_eq!(second.unwrap_err().to_string(), "rate limited");

            let prompts: Vec<String> = client.generate_requests().into_iter().map(|r| r.prompt).collect();
            assert_eq!(prompts, vec!["one", "two"]);
        }

        #[tokio::test]
        async fn test_mock_client_errors_when_exhausted() {
            let client = MockImageClient::new();
            assert!(client.generate(request("one")).await.is_err());
        }
    }
}
