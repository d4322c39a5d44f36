//! Errors surfaced by the operator commands.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::cloudformation::CloudFormationError;
use crate::command::CommandError;
use crate::config_store::{ConfigStoreError, SourceError};
use crate::pipeline::PipelineError;
use crate::stack::StackError;

/// Errors raised while preparing or running an operator command.
#[derive(Debug, Error)]
pub enum OpsError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Raised when a stack call fails.
    #[error(transparent)]
    Stack(#[from] StackError<E>),
    /// Raised when a create or destroy workflow fails.
    #[error(transparent)]
    Pipeline(#[from] PipelineError<E>),
    /// Raised when an account lookup feeding creation fails.
    #[error("lookup failed: {0}")]
    Lookup(#[from] CloudFormationError),
    /// Raised when the shared config or install template cannot be resolved.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// Raised when the stack record cannot be read or completed.
    #[error(transparent)]
    Store(#[from] ConfigStoreError),
    /// Raised when `rebuild` targets a stack that is not there.
    #[error("stack {name} doesn't exist; try 'create' instead")]
    Missing {
        /// Requested stack name.
        name: String,
    },
    /// Raised when `get` names an output the stack does not publish.
    #[error("stack {name} has no output named {field}")]
    UnknownOutput {
        /// Stack name.
        name: String,
        /// Requested output, as typed.
        field: String,
    },
    /// Raised when a local file cannot be read or written.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path involved.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the editor cannot be started or exits non-zero.
    #[error("editor failed: {0}")]
    Editor(#[source] CommandError),
}

impl<E> OpsError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub(super) fn io(path: impl Into<Utf8PathBuf>, err: &impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
