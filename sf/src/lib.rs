//! StoryFlow - sequential image-generation flows
//!
//! A flow is an ordered list of steps, each holding a scene description.
//! Running the flow generates the steps one at a time, feeding every newly
//! generated image into the next generation as a visual continuity
//! reference. Completed steps are reused rather than regenerated, and any
//! completed step can be upscaled on its own.
//!
//! # Modules
//!
//! - [`state`] - Step store actor; the single owner of the flow
//! - [`flow`] - Generation walk and single-step upscale
//! - [`images`] - Image client trait and Gemini implementation
//! - [`domain`] - Steps, statuses, images and aspect ratios
//! - [`config`] - Configuration types and loading
//! - [`cli`] / [`repl`] - Command-line and interactive front ends

pub mod cli;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod export;
pub mod flow;
pub mod images;
pub mod repl;
pub mod state;

// Re-export commonly used types
pub use config::{Config, FlowConfig, ImageConfig};
pub use credentials::{ApiKey, ConsolePrompt, CredentialPrompt};
pub use domain::{AspectRatio, ImageData, Precondition, Step, StepId, StepPatch, StepStatus};
pub use flow::{FlowError, FlowOutcome, FlowReport, FlowRunner, UPSCALE_FAILED_MESSAGE, UpscaleOutcome, Upscaler};
pub use images::{GenerateRequest, ImageClient, ImageError, UpscaleRequest, create_client};
pub use state::{StepStore, StoreChange, StoreError, StoreEvent};
