//! REPL session management

use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use eyre::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::credentials::{ApiKey, CredentialPrompt};
use crate::domain::{Step, StepId, StepStatus};
use crate::export::export_images;
use crate::flow::{FlowOutcome, FlowRunner, UpscaleOutcome, Upscaler};
use crate::images::ImageClient;
use crate::state::{StepStore, StoreChange, StoreEvent};

use super::command::ReplCommand;

/// Interactive REPL session
pub struct ReplSession {
    store: StepStore,
    runner: FlowRunner,
    upscaler: Upscaler,
    api_key: ApiKey,
    output_dir: PathBuf,
    /// Runs and upscales started from the prompt
    background: Vec<JoinHandle<()>>,
}

impl ReplSession {
    /// Create a new REPL session
    pub fn new(
        store: StepStore,
        client: Arc<dyn ImageClient>,
        credentials: Arc<dyn CredentialPrompt>,
        api_key: ApiKey,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            runner: FlowRunner::new(store.clone(), client.clone()),
            upscaler: Upscaler::new(store.clone(), client, credentials),
            store,
            api_key,
            output_dir,
            background: Vec::new(),
        }
    }

    fn track(&mut self, handle: JoinHandle<()>) {
        self.background.retain(|h| !h.is_finished());
        self.background.push(handle);
    }

    /// Run the REPL main loop
    pub async fn run(&mut self) -> Result<()> {
        self.print_welcome();
        let printer = spawn_event_printer(self.store.subscribe());

        // Create readline editor for proper line editing
        let mut rl = DefaultEditor::new().map_err(|e| eyre::eyre!("Failed to initialize readline: {}", e))?;

        loop {
            let readline = rl.readline(&format!("{} ", ">".bright_green()));

            match readline {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(input);

                    let command = match ReplCommand::parse(input) {
                        Ok(command) => command,
                        Err(usage) => {
                            println!("{} {}", "?".yellow(), usage);
                            continue;
                        }
                    };
                    match self.execute(command).await? {
                        SlashResult::Continue => continue,
                        SlashResult::Quit => break,
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    // Ctrl+C - just show new prompt
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(err) => {
                    return Err(eyre::eyre!("Readline error: {}", err));
                }
            }
        }

        printer.abort();
        for handle in self.background.drain(..) {
            handle.abort();
        }
        println!("Goodbye!");
        Ok(())
    }

    fn print_welcome(&self) {
        println!();
        println!("{}", "StoryFlow Interactive REPL".bright_cyan().bold());
        println!("Type a scene description to add a step, {} to generate.", "/run".yellow());
        println!("Type {} for help, {} to quit", "/help".yellow(), "/quit".yellow());
        if !self.api_key.is_set() {
            println!("{} No API key set; use {} before running.", "!".bright_yellow(), "/key".yellow());
        }
        println!();
    }

    /// Execute one parsed command
    async fn execute(&mut self, command: ReplCommand) -> Result<SlashResult> {
        debug!(?command, "execute: called");
        match command {
            ReplCommand::Prompt(text) => {
                let number = self.set_or_append_prompt(text).await?;
                println!("{}", format!("Step {} set.", number).dimmed());
            }
            ReplCommand::List => self.print_steps().await?,
            ReplCommand::Add(prompt) => {
                self.store.add_step_with_prompt(prompt.unwrap_or_default()).await?;
                let count = self.store.list_steps().await?.len();
                println!("{}", format!("Step {} added.", count).dimmed());
            }
            ReplCommand::Edit { number, text } => {
                if let Some(id) = self.resolve(number).await? {
                    self.store.update_prompt(id, text).await?;
                    println!("{}", format!("Step {} updated.", number).dimmed());
                }
            }
            ReplCommand::Remove(number) => {
                if let Some(id) = self.resolve(number).await? {
                    if self.store.remove_step(id).await? {
                        println!("{}", format!("Step {} removed.", number).dimmed());
                    } else {
                        println!("{} The last remaining step cannot be removed.", "!".yellow());
                    }
                }
            }
            ReplCommand::Reset(number) => {
                if let Some(id) = self.resolve(number).await? {
                    match self.store.reset_step(id).await {
                        Ok(_) => println!("{}", format!("Step {} will regenerate on the next run.", number).dimmed()),
                        Err(e) => println!("{} {}", "!".yellow(), e),
                    }
                }
            }
            ReplCommand::Run => {
                if self.runner.is_running() {
                    println!("{} A run is already in progress.", "!".yellow());
                } else {
                    let handle = spawn_run(self.runner.clone());
                    self.track(handle);
                }
            }
            ReplCommand::Upscale(number) => {
                if let Some(id) = self.resolve(number).await? {
                    let handle = spawn_upscale(self.upscaler.clone(), id, number);
                    self.track(handle);
                }
            }
            ReplCommand::Aspect(None) => {
                println!("Aspect ratio: {}", self.store.aspect_ratio().await?.to_string().bright_white());
            }
            ReplCommand::Aspect(Some(ratio)) => {
                self.store.set_aspect_ratio(ratio).await?;
                println!("{}", format!("Aspect ratio set to {}.", ratio).dimmed());
            }
            ReplCommand::Save(dir) => {
                let dir = dir.unwrap_or_else(|| self.output_dir.clone());
                let steps = self.store.list_steps().await?;
                match export_images(&steps, &dir) {
                    Ok(paths) if paths.is_empty() => println!("{}", "No images to save yet.".dimmed()),
                    Ok(paths) => {
                        for path in paths {
                            println!("  {}", path.display());
                        }
                    }
                    Err(e) => println!("{} {:#}", "Error:".red(), e),
                }
            }
            ReplCommand::Key(key) => {
                self.api_key.set(key);
                println!("{}", "API key updated.".dimmed());
            }
            ReplCommand::Help => self.print_help(),
            ReplCommand::Quit => return Ok(SlashResult::Quit),
        }
        Ok(SlashResult::Continue)
    }

    /// Fill the trailing step if its prompt is empty, else append one
    ///
    /// Returns the 1-based number of the step that received the text.
    async fn set_or_append_prompt(&self, text: String) -> Result<usize> {
        let steps = self.store.list_steps().await?;
        match steps.last() {
            Some(last) if !last.has_prompt() => {
                self.store.update_prompt(last.id, text).await?;
                Ok(steps.len())
            }
            _ => {
                self.store.add_step_with_prompt(text).await?;
                Ok(steps.len() + 1)
            }
        }
    }

    /// Map a 1-based step number to its id, telling the user if it is out of range
    async fn resolve(&self, number: usize) -> Result<Option<StepId>> {
        let steps = self.store.list_steps().await?;
        match steps.get(number.wrapping_sub(1)) {
            Some(step) => Ok(Some(step.id)),
            None => {
                println!("{} No step {} (the flow has {}).", "?".yellow(), number, steps.len());
                Ok(None)
            }
        }
    }

    async fn print_steps(&self) -> Result<()> {
        let steps = self.store.list_steps().await?;
        let aspect_ratio = self.store.aspect_ratio().await?;
        println!();
        println!("{} ({})", "Flow:".bright_cyan(), aspect_ratio);
        for (index, step) in steps.iter().enumerate() {
            println!("  {}", describe_step(index + 1, step));
        }
        println!();
        Ok(())
    }

    fn print_help(&self) {
        println!();
        println!("{}", "Available Commands:".bright_cyan());
        println!("  {:22} Show the flow", "/list".yellow());
        println!("  {:22} Append a step", "/add [prompt]".yellow());
        println!("  {:22} Replace a step's prompt", "/edit N text".yellow());
        println!("  {:22} Remove a step", "/rm N".yellow());
        println!("  {:22} Force a step to regenerate", "/reset N".yellow());
        println!("  {:22} Generate missing images in order", "/run".yellow());
        println!("  {:22} Upscale a completed step", "/upscale N".yellow());
        println!("  {:22} Show or set the aspect ratio", "/aspect [wide|tall]".yellow());
        println!("  {:22} Write images to disk", "/save [DIR]".yellow());
        println!("  {:22} Set the API key", "/key VALUE".yellow());
        println!("  {:22} Show this help", "/help".yellow());
        println!("  {:22} Exit the REPL", "/quit".yellow());
        println!();
        println!("Any other text sets the last step's prompt if it is empty, otherwise adds a step.");
        println!();
    }
}

/// Result of handling a command
enum SlashResult {
    Continue,
    Quit,
}

/// One-line summary of a step for listings
fn describe_step(number: usize, step: &Step) -> String {
    let status = match step.status {
        StepStatus::Idle => "idle".dimmed(),
        StepStatus::Generating => "generating".bright_blue(),
        StepStatus::Upscaling => "upscaling".bright_blue(),
        StepStatus::Completed => "completed".bright_green(),
        StepStatus::Error => "error".red(),
    };
    let prompt = if step.has_prompt() {
        step.prompt.clone()
    } else {
        "(empty)".dimmed().to_string()
    };

    let mut line = format!("{:>2}. [{}] {}", number, status, prompt);
    if step.is_upscaled {
        line.push_str(&format!(" {}", "[2K]".bright_magenta()));
    }
    if let Some(error) = &step.error {
        line.push_str(&format!(" {} {}", "-".dimmed(), error.red()));
    }
    line
}

fn spawn_run(runner: FlowRunner) -> JoinHandle<()> {
    tokio::spawn(async move {
        match runner.run_flow().await {
            Ok(FlowOutcome::AlreadyRunning) => println!("{} A run is already in progress.", "!".yellow()),
            Ok(FlowOutcome::Finished(report)) => println!(
                "{} {} generated, {} reused, {} skipped",
                "Run finished:".bright_green(),
                report.generated,
                report.reused,
                report.skipped
            ),
            Ok(FlowOutcome::Halted { error, .. }) => println!("{} {}", "Run halted:".red(), error),
            Err(e) => {
                warn!(error = %e, "spawn_run: run aborted");
                println!("{} {}", "Error:".red(), e);
            }
        }
    })
}

fn spawn_upscale(upscaler: Upscaler, id: StepId, number: usize) -> JoinHandle<()> {
    tokio::spawn(async move {
        match upscaler.upscale(id).await {
            Ok(UpscaleOutcome::Ignored) => {
                println!("{} Step {} has no finished image to upscale.", "?".yellow(), number)
            }
            Ok(UpscaleOutcome::Upscaled) => println!("{} step {}", "Upscaled".bright_green(), number),
            Ok(UpscaleOutcome::CredentialRequested | UpscaleOutcome::Failed) => {}
            Err(e) => {
                warn!(error = %e, "spawn_upscale: upscale aborted");
                println!("{} {}", "Error:".red(), e);
            }
        }
    })
}

/// Print status changes as they are committed to the store
fn spawn_event_printer(mut rx: broadcast::Receiver<StoreEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let StoreChange::StepUpdated { id } = event.change
                        && let Some((index, step)) = event.steps.iter().enumerate().find(|(_, s)| s.id == id)
                    {
                        println!("{}", describe_step(index + 1, step));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "spawn_event_printer: lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
