//! Upscaler - single-step upscale with credential recovery

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::credentials::CredentialPrompt;
use crate::domain::{Precondition, StepId, StepPatch};
use crate::images::{ImageClient, UpscaleRequest};
use crate::state::StepStore;

use super::{FlowError, publish};

/// Shown on a step whose upscale failed for a non-credential reason
pub const UPSCALE_FAILED_MESSAGE: &str = "Failed to upscale image. Please try again.";

/// Result of an upscale request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpscaleOutcome {
    /// Step missing, not Completed, without an image, or already upscaling;
    /// also a step removed while its upscale was in flight
    Ignored,
    Upscaled,
    /// Credentials were rejected; the user was asked to pick new ones
    CredentialRequested,
    /// Upscale failed; the step keeps its image and shows a generic message
    Failed,
}

#[derive(Clone)]
pub struct Upscaler {
    store: StepStore,
    client: Arc<dyn ImageClient>,
    credentials: Arc<dyn CredentialPrompt>,
}

impl Upscaler {
    pub fn new(store: StepStore, client: Arc<dyn ImageClient>, credentials: Arc<dyn CredentialPrompt>) -> Self {
        Self {
            store,
            client,
            credentials,
        }
    }

    /// Upscale one completed step
    ///
    /// Invalid requests are ignored rather than reported. The step always
    /// ends back in Completed with a usable image.
    pub async fn upscale(&self, id: StepId) -> Result<UpscaleOutcome, FlowError> {
        debug!(%id, "upscale: called");

        let Some(step) = self
            .store
            .update_step_if(id, Precondition::upscalable(), StepPatch::upscaling())
            .await?
        else {
            debug!(%id, "upscale: precondition not met, ignoring");
            return Ok(UpscaleOutcome::Ignored);
        };
        let Some(image) = step.image else {
            // Precondition guarantees an image
            return Ok(UpscaleOutcome::Ignored);
        };

        let aspect_ratio = self.store.aspect_ratio().await?;
        let request = UpscaleRequest {
            prompt: step.prompt,
            image,
            aspect_ratio,
        };

        match self.client.upscale(request).await {
            Ok(upscaled) => {
                let bytes = upscaled.len();
                if publish(&self.store, id, StepPatch::upscaled(upscaled)).await?.is_none() {
                    return Ok(UpscaleOutcome::Ignored);
                }
                info!(%id, bytes, "upscale: step upscaled");
                Ok(UpscaleOutcome::Upscaled)
            }
            Err(e) if e.is_credential_error() => {
                warn!(%id, error = %e, "upscale: credentials rejected");
                self.credentials.request_credential_selection();
                publish(&self.store, id, StepPatch::upscale_reverted()).await?;
                Ok(UpscaleOutcome::CredentialRequested)
            }
            Err(e) => {
                warn!(%id, error = %e, "upscale: failed");
                publish(&self.store, id, StepPatch::upscale_failed(UPSCALE_FAILED_MESSAGE)).await?;
                Ok(UpscaleOutcome::Failed)
            }
        }
    }

    /// Upscale every completed step not yet upscaled, one at a time
    ///
    /// Stops early once credentials are rejected, since every remaining call
    /// would be rejected the same way.
    pub async fn upscale_all(&self) -> Result<Vec<(StepId, UpscaleOutcome)>, FlowError> {
        debug!("upscale_all: called");
        let pending: Vec<StepId> = self
            .store
            .list_steps()
            .await?
            .into_iter()
            .filter(|s| s.is_satisfied() && !s.is_upscaled)
            .map(|s| s.id)
            .collect();
        info!(count = pending.len(), "upscale_all: starting");

        let mut results = Vec::with_capacity(pending.len());
        for id in pending {
            let outcome = self.upscale(id).await?;
            results.push((id, outcome));
            if outcome == UpscaleOutcome::CredentialRequested {
                break;
            }
        }
        Ok(results)
    }
}
