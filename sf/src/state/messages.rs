//! Step store messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{AspectRatio, Precondition, Step, StepId, StepPatch, StepStatus};

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Step not found: {0}")]
    NotFound(StepId),

    #[error("Invalid transition for step {id}: {from} -> {to}")]
    InvalidTransition { id: StepId, from: StepStatus, to: StepStatus },

    #[error("Step {0} is busy")]
    Busy(StepId),

    #[error("Channel error")]
    ChannelError,
}

/// Response from store operations
pub type StoreResponse<T> = Result<T, StoreError>;

/// Commands sent to the step store actor
#[derive(Debug)]
pub enum StoreCommand {
    AddStep {
        prompt: String,
        reply: oneshot::Sender<StoreResponse<StepId>>,
    },
    RemoveStep {
        id: StepId,
        reply: oneshot::Sender<StoreResponse<bool>>,
    },
    UpdatePrompt {
        id: StepId,
        prompt: String,
        reply: oneshot::Sender<StoreResponse<()>>,
    },
    UpdateStep {
        id: StepId,
        patch: StepPatch,
        reply: oneshot::Sender<StoreResponse<Step>>,
    },
    UpdateStepIf {
        id: StepId,
        precondition: Precondition,
        patch: StepPatch,
        reply: oneshot::Sender<StoreResponse<Option<Step>>>,
    },
    ResetStep {
        id: StepId,
        reply: oneshot::Sender<StoreResponse<Step>>,
    },
    GetStep {
        id: StepId,
        reply: oneshot::Sender<StoreResponse<Option<Step>>>,
    },
    ListSteps {
        reply: oneshot::Sender<StoreResponse<Vec<Step>>>,
    },

    // Flow-wide settings
    GetAspectRatio {
        reply: oneshot::Sender<StoreResponse<AspectRatio>>,
    },
    SetAspectRatio {
        aspect_ratio: AspectRatio,
        reply: oneshot::Sender<StoreResponse<()>>,
    },

    // Shutdown
    Shutdown,
}
