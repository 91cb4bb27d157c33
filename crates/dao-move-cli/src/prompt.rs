//! Interactive selection for choices missing from the command line.

use std::io::IsTerminal;

use dialoguer::Select;
use dao_move::{DatabaseConfig, MigratableStorage};

/// Result type for prompt operations.
pub type PromptResult<T> = Result<T, PromptError>;

/// Errors that can occur while prompting.
#[derive(Debug)]
pub enum PromptError {
    /// User cancelled the selection.
    Cancelled,
    /// A choice is missing and there is no terminal to ask on.
    NotInteractive(String),
    /// Nothing to choose from.
    NoChoices(String),
    /// Terminal IO error.
    Io(std::io::Error),
}

impl std::fmt::Display for PromptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "selection cancelled"),
            Self::NotInteractive(flag) => {
                write!(f, "{} is required when stdin is not a terminal", flag)
            }
            Self::NoChoices(what) => write!(f, "no {} to choose from", what),
            Self::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for PromptError {}

impl From<dialoguer::Error> for PromptError {
    fn from(e: dialoguer::Error) -> Self {
        Self::Io(std::io::Error::other(e.to_string()))
    }
}

fn choose(prompt: &str, flag: &str, labels: &[String]) -> PromptResult<usize> {
    if labels.is_empty() {
        return Err(PromptError::NoChoices(prompt.to_lowercase()));
    }
    if !std::io::stdin().is_terminal() {
        return Err(PromptError::NotInteractive(flag.to_string()));
    }

    Select::new()
        .with_prompt(prompt)
        .items(labels)
        .default(0)
        .interact_opt()?
        .ok_or(PromptError::Cancelled)
}

/// Pick a (service, storage) pair, narrowing by whatever was given on the command line.
///
/// A single remaining candidate is taken without asking.
pub fn select_storage(
    candidates: &[MigratableStorage],
    service: Option<&str>,
    storage: Option<&str>,
) -> PromptResult<MigratableStorage> {
    let filtered: Vec<&MigratableStorage> = candidates
        .iter()
        .filter(|c| service.map_or(true, |s| c.service == s))
        .filter(|c| storage.map_or(true, |s| c.storage == s))
        .collect();

    // An explicit pair that matches nothing is reported by the orchestrator.
    if let (Some(service), Some(storage)) = (service, storage) {
        return Ok(MigratableStorage {
            service: service.to_string(),
            storage: storage.to_string(),
        });
    }

    if let [only] = filtered.as_slice() {
        return Ok((*only).clone());
    }

    let labels: Vec<String> = filtered.iter().map(|c| c.to_string()).collect();
    let index = choose("Select service to migrate", "--service", &labels)?;
    Ok(filtered[index].clone())
}

/// Pick a configured database.
pub fn select_database<'a>(
    prompt: &str,
    flag: &str,
    databases: &'a [DatabaseConfig],
    exclude: Option<&str>,
) -> PromptResult<&'a DatabaseConfig> {
    let choices: Vec<&DatabaseConfig> = databases
        .iter()
        .filter(|db| exclude != Some(db.name.as_str()))
        .collect();
    let labels: Vec<String> = choices
        .iter()
        .map(|db| format!("{}: {}", db.name, db))
        .collect();

    let index = choose(prompt, flag, &labels)?;
    Ok(choices[index])
}
