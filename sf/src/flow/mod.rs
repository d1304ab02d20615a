//! Flow orchestration
//!
//! [`FlowRunner`] walks the steps in order, generating each scene from the
//! previous one. [`Upscaler`] upscales a single completed step.

mod runner;
mod upscale;

pub use runner::{FlowOutcome, FlowReport, FlowRunner};
pub use upscale::{UPSCALE_FAILED_MESSAGE, UpscaleOutcome, Upscaler};

use thiserror::Error;
use tracing::warn;

use crate::domain::{Step, StepId, StepPatch};
use crate::state::{StepStore, StoreError};

/// Errors that stop orchestration itself (as opposed to failed steps)
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Write a patch to the store
///
/// A step deleted by the user while its remote call was in flight is not an
/// error: the result simply has nowhere to go.
async fn publish(store: &StepStore, id: StepId, patch: StepPatch) -> Result<Option<Step>, FlowError> {
    match store.update_step(id, patch).await {
        Ok(step) => Ok(Some(step)),
        Err(StoreError::NotFound(_)) => {
            warn!(%id, "publish: step was removed while in flight");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
