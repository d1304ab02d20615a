//! Step identifiers
//!
//! Ids are UUIDv7 values: time-ordered, unique per process, never reused.

use uuid::Uuid;

/// Opaque, immutable identifier of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepId(Uuid);

impl StepId {
    /// Allocate a fresh id
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Short form for display (first 8 hex chars)
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for StepId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}
