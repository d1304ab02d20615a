//! Interactive REPL for StoryFlow
//!
//! Builds a flow step by step, runs generation in the background and prints
//! progress as the store changes.

mod command;
mod session;

pub use command::ReplCommand;
pub use session::ReplSession;

use std::sync::Arc;

use eyre::{Context, Result};

use crate::config::Config;
use crate::credentials::{ApiKey, ConsolePrompt};
use crate::images::create_client;
use crate::state::StepStore;

/// Run the interactive REPL
///
/// This is the main entry point for `sf repl`. A missing API key is not
/// fatal here: the user can supply one with `/key`.
pub async fn run_interactive(config: &Config) -> Result<()> {
    let api_key = ApiKey::from_config(&config.image);
    let client = create_client(&config.image, api_key.clone()).context("Failed to create image client")?;
    let credentials = Arc::new(ConsolePrompt::new(&config.image, true));
    let store = StepStore::spawn(config.flow.aspect_ratio);

    let mut session = ReplSession::new(store.clone(), client, credentials, api_key, config.flow.output_dir.clone());
    let result = session.run().await;
    let _ = store.shutdown().await;
    result
}
