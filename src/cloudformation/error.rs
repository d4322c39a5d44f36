//! Error type for the AWS CLI backend.

use thiserror::Error;

use crate::command::CommandError;

/// Errors raised while driving the `aws` CLI.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CloudFormationError {
    /// The CLI could not be started or exited non-zero.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// CLI output was not the expected JSON document.
    #[error("failed to parse {resource} output: {message}")]
    Parse {
        /// Resource type being parsed (for example `stacks`).
        resource: String,
        /// Parser error message.
        message: String,
    },
    /// A lookup matched nothing.
    #[error("no {resource} found matching {query}")]
    NotFound {
        /// Kind of resource searched for.
        resource: String,
        /// Search criteria, as shown to the operator.
        query: String,
    },
    /// A request could not be encoded for the CLI.
    #[error("failed to encode {what}: {message}")]
    Encode {
        /// What was being encoded.
        what: String,
        /// Encoder error message.
        message: String,
    },
}
