//! Domain types for StoryFlow
//!
//! A flow is an ordered list of [`Step`]s. Each step carries a prompt, the
//! image generated for it, and where it sits in the generation lifecycle.

mod aspect_ratio;
mod id;
mod image;
mod step;

pub use aspect_ratio::AspectRatio;
pub use id::StepId;
pub use image::ImageData;
pub use step::{Precondition, Step, StepPatch, StepStatus};
