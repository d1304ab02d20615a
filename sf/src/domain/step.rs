//! Step domain type
//!
//! A step is one scene of the flow: a prompt plus the image produced for it.

use tracing::debug;

use super::{ImageData, StepId};

/// Where a step sits in the generation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StepStatus {
    /// Nothing generated yet
    #[default]
    Idle,
    /// Generation call in flight
    Generating,
    /// Upscale call in flight
    Upscaling,
    /// Holds a generated (possibly upscaled) image
    Completed,
    /// Last generation attempt failed
    Error,
}

impl StepStatus {
    /// True while a remote call owns the step
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Generating | Self::Upscaling)
    }

    /// Whether `self -> next` is an edge of the lifecycle
    ///
    /// Staying in the same status is always allowed. `Idle` is only
    /// reachable through an explicit reset, never through a patch.
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        use StepStatus::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Generating)
                | (Error, Generating)
                | (Completed, Generating)
                | (Generating, Completed)
                | (Generating, Error)
                | (Completed, Upscaling)
                | (Upscaling, Completed)
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Generating => write!(f, "generating"),
            Self::Upscaling => write!(f, "upscaling"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One scene of the flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Unique identifier, assigned at creation
    pub id: StepId,

    /// User-editable prompt; blank means "no-op step"
    pub prompt: String,

    /// Lifecycle status
    pub status: StepStatus,

    /// Generated or upscaled image
    pub image: Option<ImageData>,

    /// True only after a successful upscale of the current image
    pub is_upscaled: bool,

    /// Human-readable description of the last failure
    pub error: Option<String>,
}

impl Step {
    /// Create an empty, idle step
    pub fn new() -> Self {
        Self::with_prompt("")
    }

    /// Create an idle step with a prompt
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        let step = Self {
            id: StepId::new(),
            prompt: prompt.into(),
            status: StepStatus::Idle,
            image: None,
            is_upscaled: false,
            error: None,
        };
        debug!(id = %step.id, "Step::with_prompt: created");
        step
    }

    /// False for empty or whitespace-only prompts
    pub fn has_prompt(&self) -> bool {
        !self.prompt.trim().is_empty()
    }

    /// Completed with an image: a run never regenerates it
    pub fn is_satisfied(&self) -> bool {
        self.status == StepStatus::Completed && self.image.is_some()
    }

    /// Return to a fresh idle state, keeping id and prompt
    pub fn reset(&mut self) {
        self.status = StepStatus::Idle;
        self.image = None;
        self.is_upscaled = false;
        self.error = None;
    }
}

impl Default for Step {
    fn default() -> Self {
        Self::new()
    }
}

/// Partial update merged into a step
///
/// `None` fields are left alone. `error: Some(None)` clears the error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepPatch {
    pub status: Option<StepStatus>,
    pub image: Option<ImageData>,
    pub error: Option<Option<String>>,
    pub is_upscaled: Option<bool>,
}

impl StepPatch {
    /// Generation attempt started
    pub fn generating() -> Self {
        Self {
            status: Some(StepStatus::Generating),
            error: Some(None),
            ..Default::default()
        }
    }

    /// Generation succeeded
    pub fn generated(image: ImageData) -> Self {
        Self {
            status: Some(StepStatus::Completed),
            image: Some(image),
            is_upscaled: Some(false),
            ..Default::default()
        }
    }

    /// Generation failed
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(StepStatus::Error),
            error: Some(Some(message.into())),
            ..Default::default()
        }
    }

    /// Upscale started
    pub fn upscaling() -> Self {
        Self {
            status: Some(StepStatus::Upscaling),
            ..Default::default()
        }
    }

    /// Upscale succeeded
    pub fn upscaled(image: ImageData) -> Self {
        Self {
            status: Some(StepStatus::Completed),
            image: Some(image),
            is_upscaled: Some(true),
            error: Some(None),
        }
    }

    /// Upscale abandoned: back to completed, nothing else touched
    pub fn upscale_reverted() -> Self {
        Self {
            status: Some(StepStatus::Completed),
            ..Default::default()
        }
    }

    /// Upscale failed with a user-visible message
    pub fn upscale_failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(StepStatus::Completed),
            error: Some(Some(message.into())),
            ..Default::default()
        }
    }

    /// Merge into a step
    pub fn apply_to(self, step: &mut Step) {
        if let Some(status) = self.status {
            step.status = status;
        }
        if let Some(image) = self.image {
            step.image = Some(image);
        }
        if let Some(error) = self.error {
            step.error = error;
        }
        if let Some(is_upscaled) = self.is_upscaled {
            step.is_upscaled = is_upscaled;
        }
    }
}

/// Guard for compare-and-merge updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    /// Status must be one of these
    pub statuses: Vec<StepStatus>,
    /// Step must hold an image
    pub requires_image: bool,
}

impl Precondition {
    /// Completed and holding an image
    pub fn upscalable() -> Self {
        Self {
            statuses: vec![StepStatus::Completed],
            requires_image: true,
        }
    }

    pub fn holds(&self, step: &Step) -> bool {
        self.statuses.contains(&step.status) && (!self.requires_image || step.image.is_some())
    }
}
