//! Backend abstraction over the CloudFormation stack API.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Capability acknowledged on every create request.
pub const CAPABILITY_NAMED_IAM: &str = "CAPABILITY_NAMED_IAM";

/// A single `key = value` pair passed to or returned from the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StackParameter {
    /// Parameter name as declared in the template.
    pub key: String,
    /// Parameter value.
    pub value: String,
}

impl StackParameter {
    /// Builds a parameter from any string-like key and value.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One record returned by a describe call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StackRecord {
    /// Provider identifier of the stack.
    pub id: String,
    /// Stack name.
    pub name: String,
    /// Raw provider status string such as `CREATE_COMPLETE`.
    pub status: String,
    /// Template description copied onto the stack.
    pub description: Option<String>,
    /// Template outputs keyed by output name.
    pub outputs: BTreeMap<String, String>,
    /// Parameters the stack was created with.
    pub parameters: BTreeMap<String, String>,
    /// Time the provider accepted the create request.
    pub creation_time: Option<DateTime<Utc>>,
}

/// Request issued to create a new stack.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateStackRequest {
    /// Name of the stack to create.
    pub name: String,
    /// URL of the template the provider should instantiate.
    pub template_url: String,
    /// Capability acknowledgements.
    pub capabilities: Vec<String>,
    /// Template parameters.
    pub parameters: Vec<StackParameter>,
}

impl CreateStackRequest {
    /// Validates that the request names a stack and a template.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when a required field is empty.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.name.trim().is_empty() {
            return Err(BackendError::Validation(String::from("name")));
        }
        if self.template_url.trim().is_empty() {
            return Err(BackendError::Validation(String::from("template_url")));
        }
        Ok(())
    }
}

/// Errors raised by request validation before a backend is called.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface implemented by stack providers.
pub trait StackBackend {
    /// Provider specific error type returned by the backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns every record matching `name`. Providers normally return an
    /// error for unknown names.
    fn describe<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Vec<StackRecord>, Self::Error>;

    /// Issues a create request and returns the new stack identifier.
    fn create<'a>(
        &'a self,
        request: &'a CreateStackRequest,
    ) -> BackendFuture<'a, String, Self::Error>;

    /// Issues a delete request without waiting for completion.
    fn delete<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), Self::Error>;

    /// Returns every stack visible to the current credentials.
    fn list(&self) -> BackendFuture<'_, Vec<StackRecord>, Self::Error>;
}
