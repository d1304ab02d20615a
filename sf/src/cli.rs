//! CLI command definitions and subcommands

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use eyre::{Context, Result};
use tracing::debug;

use crate::domain::AspectRatio;

/// A prompt-file line holding only this marks an intentionally empty step
pub const EMPTY_STEP_MARKER: &str = "-";

/// StoryFlow - sequential image-generation flows
#[derive(Parser)]
#[command(
    name = "sf",
    about = "Generate a sequence of images, each continuing from the last",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a flow to completion (batch mode)
    Run {
        /// Step prompts, in order
        #[arg(value_name = "PROMPT")]
        prompts: Vec<String>,

        /// Read prompts from a file, one per line ("-" for an empty step)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Aspect ratio (wide or tall)
        #[arg(short, long)]
        aspect_ratio: Option<AspectRatio>,

        /// Directory for the generated images
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Upscale every generated image after the run
        #[arg(short, long)]
        upscale: bool,
    },

    /// Build and run a flow interactively
    Repl,

    /// Print the effective configuration
    Config,
}

/// Split prompt-file text into step prompts
///
/// Blank lines are ignored; a line holding only `-` becomes an empty step.
pub fn parse_prompt_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            if line == EMPTY_STEP_MARKER {
                String::new()
            } else {
                line.to_string()
            }
        })
        .collect()
}

/// Read step prompts from a file
pub fn load_prompts(path: &Path) -> Result<Vec<String>> {
    debug!(path = %path.display(), "load_prompts: called");
    let text = fs::read_to_string(path).context(format!("Failed to read prompt file {}", path.display()))?;
    Ok(parse_prompt_lines(&text))
}

pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("storyflow")
        .join("logs")
        .join("storyflow.log")
}

/// Generate the after_help text with the log location
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    format!("Logs are written to: {}\n", get_log_path().display())
}
