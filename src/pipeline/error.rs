//! Errors surfaced by the provisioning and destruction pipelines.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::probe::ProbeError;
use crate::remote::RemoteError;
use crate::retry::RetryError;
use crate::stack::{StackError, StackStatus};

/// Errors surfaced while creating or destroying a stack.
#[derive(Debug, Error)]
pub enum PipelineError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Raised when a stack with the requested name is already visible.
    #[error("stack {name} already exists")]
    AlreadyExists {
        /// Requested stack name.
        name: String,
    },
    /// Raised when a stack call fails outside a polling loop.
    #[error(transparent)]
    Stack(#[from] StackError<E>),
    /// Raised when creation ends in a terminal failure status.
    #[error("stack {name} failed to create: {status}")]
    CreateFailed {
        /// Stack name.
        name: String,
        /// Terminal status observed.
        status: StackStatus,
    },
    /// Raised when the provider rolled back the creation.
    #[error("stack {name} rolled back during creation{}", rollback_suffix(*deleted))]
    RolledBack {
        /// Stack name.
        name: String,
        /// Whether the rolled-back stack was deleted and observed gone.
        deleted: bool,
    },
    /// Raised when a polled phase never succeeded in its budget.
    #[error("{phase} did not complete: {source}")]
    Timeout {
        /// Phase that was being polled.
        phase: String,
        /// Retry failure with the elapsed time.
        #[source]
        source: RetryError,
    },
    /// Raised when a required output is missing from the stack.
    #[error("stack output {key} is missing")]
    MissingOutput {
        /// Output key.
        key: String,
    },
    /// Raised when a remote step fails.
    #[error("{phase} failed: {source}")]
    Remote {
        /// Step that failed.
        phase: String,
        /// Underlying remote error.
        #[source]
        source: RemoteError,
    },
    /// Raised when the CA certificate cannot be downloaded.
    #[error("failed to fetch CA certificate: {0}")]
    Probe(#[source] ProbeError),
    /// Raised when a local file cannot be written.
    #[error("failed to write {path}: {message}")]
    Io {
        /// Path that could not be written.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

const fn rollback_suffix(deleted: bool) -> &'static str {
    if deleted {
        "; the stack was deleted"
    } else {
        "; the stack was left in place"
    }
}

impl<E> PipelineError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub(super) fn timeout(phase: &str, source: RetryError) -> Self {
        Self::Timeout {
            phase: phase.to_owned(),
            source,
        }
    }

    pub(super) fn remote(phase: &str, source: RemoteError) -> Self {
        Self::Remote {
            phase: phase.to_owned(),
            source,
        }
    }
}
