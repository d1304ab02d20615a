//! Flow-wide aspect ratio

use serde::{Deserialize, Serialize};

/// Aspect ratio applied to every generation and upscale call in a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectRatio {
    /// 16:9
    #[default]
    #[serde(alias = "16:9", alias = "landscape")]
    Wide,
    /// 9:16
    #[serde(alias = "9:16", alias = "portrait")]
    Tall,
}

impl AspectRatio {
    /// Ratio string as the image API expects it
    pub fn as_ratio(&self) -> &'static str {
        match self {
            Self::Wide => "16:9",
            Self::Tall => "9:16",
        }
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wide => write!(f, "wide"),
            Self::Tall => write!(f, "tall"),
        }
    }
}

impl std::str::FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wide" | "16:9" | "landscape" => Ok(Self::Wide),
            "tall" | "9:16" | "portrait" => Ok(Self::Tall),
            other => Err(format!("Unknown aspect ratio '{}'. Supported: wide (16:9), tall (9:16)", other)),
        }
    }
}
