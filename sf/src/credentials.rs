//! API credentials and the credential-selection collaborator

use std::sync::{Arc, RwLock};

use colored::Colorize;
use tracing::{debug, info, warn};

use crate::config::ImageConfig;

/// Shared, replaceable API key slot
///
/// Handed to the image client at construction; front ends may swap the key
/// later (e.g. after the user picks a new one) without rebuilding the client.
#[derive(Clone, Default)]
pub struct ApiKey(Arc<RwLock<Option<String>>>);

impl ApiKey {
    pub fn new(key: Option<String>) -> Self {
        Self(Arc::new(RwLock::new(key)))
    }

    /// Resolve from configuration; a missing key is not an error here
    pub fn from_config(config: &ImageConfig) -> Self {
        match config.get_api_key() {
            Ok(key) => {
                debug!("ApiKey::from_config: key resolved");
                Self::new(Some(key))
            }
            Err(e) => {
                warn!(error = %e, "ApiKey::from_config: no key available");
                Self::new(None)
            }
        }
    }

    pub fn get(&self) -> Option<String> {
        self.0.read().ok().and_then(|guard| guard.clone())
    }

    pub fn set(&self, key: impl Into<String>) {
        if let Ok(mut guard) = self.0.write() {
            *guard = Some(key.into());
            info!("API key updated");
        }
    }

    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.is_set() { "<set>" } else { "<unset>" };
        f.debug_tuple("ApiKey").field(&state).finish()
    }
}

/// Asks the user to pick or supply a credential
///
/// Fire-and-forget: the caller never waits for, or retries after, the
/// selection.
pub trait CredentialPrompt: Send + Sync {
    fn request_credential_selection(&self);
}

/// Prints key-selection instructions to stderr
pub struct ConsolePrompt {
    api_key_env: String,
    interactive: bool,
}

impl ConsolePrompt {
    pub fn new(config: &ImageConfig, interactive: bool) -> Self {
        Self {
            api_key_env: config.api_key_env.clone(),
            interactive,
        }
    }
}

impl CredentialPrompt for ConsolePrompt {
    fn request_credential_selection(&self) {
        debug!(interactive = self.interactive, "ConsolePrompt::request_credential_selection: called");
        eprintln!(
            "{} The image API rejected the current key (or none is set).",
            "!".bright_yellow()
        );
        if self.interactive {
            eprintln!(
                "  Use {} to select a key, then retry the upscale.",
                "/key <API_KEY>".yellow()
            );
        } else {
            eprintln!(
                "  Set {} to a key with access to the upscale model and run again.",
                self.api_key_env.yellow()
            );
        }
    }
}
