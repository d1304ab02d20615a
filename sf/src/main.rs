//! StoryFlow - sequential image-generation flows
//!
//! CLI entry point for batch runs and the interactive REPL.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info};

use storyflow::cli::{Cli, Command, generate_after_help, load_prompts};
use storyflow::config::Config;
use storyflow::credentials::{ApiKey, ConsolePrompt};
use storyflow::domain::{AspectRatio, Step, StepStatus};
use storyflow::export::export_images;
use storyflow::flow::{FlowOutcome, FlowRunner, UpscaleOutcome, Upscaler};
use storyflow::images::create_client;
use storyflow::repl;
use storyflow::state::StepStore;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Logging isn't initialized yet, so nothing is logged until the end
    let log_path = storyflow::cli::get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(provider = %config.image.provider, model = %config.image.model, "StoryFlow loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Run {
            prompts,
            file,
            aspect_ratio,
            out,
            upscale,
        }) => {
            let mut prompts = prompts;
            if let Some(path) = file {
                prompts.extend(load_prompts(&path)?);
            }
            let aspect_ratio = aspect_ratio.unwrap_or(config.flow.aspect_ratio);
            let out = out.unwrap_or_else(|| config.flow.output_dir.clone());
            cmd_run(&config, prompts, aspect_ratio, out, upscale).await
        }
        Some(Command::Repl) | None => repl::run_interactive(&config).await,
        Some(Command::Config) => cmd_config(&config),
    }
}

/// Run a flow to completion, optionally upscale, and export the images
async fn cmd_run(
    config: &Config,
    prompts: Vec<String>,
    aspect_ratio: AspectRatio,
    out: PathBuf,
    upscale: bool,
) -> Result<()> {
    debug!(step_count = prompts.len(), %aspect_ratio, out = %out.display(), upscale, "cmd_run: called");
    if prompts.is_empty() {
        return Err(eyre::eyre!("No prompts given. Pass them as arguments or with --file."));
    }

    let api_key = ApiKey::new(Some(config.image.get_api_key()?));
    let client = create_client(&config.image, api_key).context("Failed to create image client")?;
    let steps: Vec<Step> = prompts.into_iter().map(Step::with_prompt).collect();
    let store = StepStore::spawn_with_steps(steps, aspect_ratio);

    println!("{} {} steps ({})", "Running".bright_cyan(), store.list_steps().await?.len(), aspect_ratio);
    let runner = FlowRunner::new(store.clone(), client.clone());
    let outcome = runner.run_flow().await?;

    let halted = match &outcome {
        FlowOutcome::Halted { step_id, error, .. } => Some((*step_id, error.clone())),
        _ => None,
    };

    if upscale && halted.is_none() {
        let upscaler = Upscaler::new(store.clone(), client, Arc::new(ConsolePrompt::new(&config.image, false)));
        for (id, result) in upscaler.upscale_all().await? {
            debug!(%id, ?result, "cmd_run: upscale result");
            if result == UpscaleOutcome::CredentialRequested {
                println!("{} Upscaling stopped.", "!".yellow());
            }
        }
    }

    let steps = store.list_steps().await?;
    print_summary(&steps);

    let written = export_images(&steps, &out)?;
    if !written.is_empty() {
        println!();
        println!("{} {}", "Images written to".bright_cyan(), out.display());
        for path in &written {
            println!("  {}", path.display());
        }
    }
    let _ = store.shutdown().await;

    match halted {
        Some((step_id, error)) => {
            let position = steps.iter().position(|s| s.id == step_id).map_or(0, |i| i + 1);
            Err(eyre::eyre!("Run halted at step {}: {}", position, error))
        }
        None => Ok(()),
    }
}

fn print_summary(steps: &[Step]) {
    println!();
    for (index, step) in steps.iter().enumerate() {
        let status = match step.status {
            StepStatus::Completed if step.is_upscaled => "upscaled".bright_magenta(),
            StepStatus::Completed => "done".bright_green(),
            StepStatus::Error => "error".red(),
            StepStatus::Idle if !step.has_prompt() => "empty".dimmed(),
            other => other.to_string().dimmed(),
        };
        println!("{:>3}. {:10} {}", index + 1, status, step.prompt);
        if let Some(error) = &step.error {
            println!("     {}", error.red());
        }
    }
}

/// Print the effective configuration
fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    print!("{}", yaml);
    Ok(())
}
