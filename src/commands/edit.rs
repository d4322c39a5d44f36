//! `config`: open the stack record in the operator's editor.

use std::process::{Command, Stdio};

use camino::Utf8Path;
use tracing::info;

use crate::command::CommandError;
use crate::config_store::{StackConfig, StackConfigStore};

use super::OpsError;

/// Editor used when `EDITOR` is unset.
pub const DEFAULT_EDITOR: &str = "nano";

/// Opens a file for interactive editing and returns once the editor exits.
pub trait Editor {
    /// Edits `path` in place.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the editor cannot start or exits
    /// non-zero.
    fn edit(&self, path: &Utf8Path) -> Result<(), CommandError>;
}

/// Runs an editor program attached to the terminal.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessEditor {
    program: String,
}

impl ProcessEditor {
    /// Editor running `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Editor named by `EDITOR`, or [`DEFAULT_EDITOR`].
    #[must_use]
    pub fn from_env() -> Self {
        let program = std::env::var("EDITOR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| String::from(DEFAULT_EDITOR));
        Self::new(program)
    }

    /// Program this editor runs.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Editor for ProcessEditor {
    fn edit(&self, path: &Utf8Path) -> Result<(), CommandError> {
        let status = Command::new(&self.program)
            .arg(path.as_str())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|err| CommandError::Spawn {
                program: self.program.clone(),
                message: err.to_string(),
            })?;
        if status.success() {
            return Ok(());
        }
        Err(CommandError::Failed {
            program: self.program.clone(),
            status: status.code(),
            status_text: status.to_string(),
            stderr: String::new(),
        })
    }
}

/// Seeds the record with the blank template when missing, opens it in
/// `editor`, then reads it back so syntax errors surface immediately.
///
/// # Errors
///
/// Returns [`OpsError::Editor`] when the editor fails and
/// [`OpsError::Store`] when the file cannot be seeded or no longer parses.
pub fn edit_config<E>(
    store: &StackConfigStore,
    editor: &impl Editor,
) -> Result<StackConfig, OpsError<E>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    if store.ensure_exists()? {
        info!(path = %store.path(), "seeded stack configuration from template");
    }
    editor.edit(store.path()).map_err(OpsError::Editor)?;
    Ok(store.load()?)
}
