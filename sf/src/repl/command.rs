//! REPL command parsing

use std::path::PathBuf;

use crate::domain::AspectRatio;

/// A parsed line of REPL input
///
/// Step numbers are 1-based, as shown by `/list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    List,
    Add(Option<String>),
    Edit { number: usize, text: String },
    Remove(usize),
    Reset(usize),
    Run,
    Upscale(usize),
    Aspect(Option<AspectRatio>),
    Save(Option<PathBuf>),
    Key(String),
    Help,
    Quit,
    /// Bare text: fills the trailing empty step or appends a new one
    Prompt(String),
}

impl ReplCommand {
    /// Parse one trimmed, non-empty input line
    ///
    /// The error is a usage message to show the user.
    pub fn parse(input: &str) -> Result<Self, String> {
        let input = input.trim();
        if !input.starts_with('/') {
            return Ok(Self::Prompt(input.to_string()));
        }

        let (cmd, rest) = match input.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd, rest.trim()),
            None => (input, ""),
        };

        match cmd {
            "/list" | "/ls" | "/l" => Ok(Self::List),
            "/add" | "/a" => Ok(Self::Add(non_empty(rest))),
            "/edit" | "/e" => {
                let (number, text) = match rest.split_once(char::is_whitespace) {
                    Some((n, text)) => (n, text.trim()),
                    None => (rest, ""),
                };
                Ok(Self::Edit {
                    number: step_number(number, "/edit N text")?,
                    text: text.to_string(),
                })
            }
            "/rm" | "/remove" => Ok(Self::Remove(step_number(rest, "/rm N")?)),
            "/reset" => Ok(Self::Reset(step_number(rest, "/reset N")?)),
            "/run" | "/r" => Ok(Self::Run),
            "/upscale" | "/u" => Ok(Self::Upscale(step_number(rest, "/upscale N")?)),
            "/aspect" => match non_empty(rest) {
                None => Ok(Self::Aspect(None)),
                Some(value) => value
                    .parse()
                    .map(|ratio| Self::Aspect(Some(ratio)))
                    .map_err(|_| "Usage: /aspect [wide|tall]".to_string()),
            },
            "/save" | "/s" => Ok(Self::Save(non_empty(rest).map(PathBuf::from))),
            "/key" => non_empty(rest)
                .map(Self::Key)
                .ok_or_else(|| "Usage: /key <API_KEY>".to_string()),
            "/help" | "/h" => Ok(Self::Help),
            "/quit" | "/q" | "/exit" => Ok(Self::Quit),
            _ => Err(format!("Unknown command: {}", cmd)),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

fn step_number(s: &str, usage: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("Usage: {}", usage)),
    }
}
