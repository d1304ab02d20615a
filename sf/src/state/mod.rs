//! Step store with actor pattern
//!
//! StepStore owns the ordered flow and processes messages via channels,
//! giving every caller the same atomic view of the steps.

mod manager;
mod messages;

pub use manager::{StepStore, StoreChange, StoreEvent};
pub use messages::{StoreCommand, StoreError, StoreResponse};
