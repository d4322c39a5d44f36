//! Per-invocation handle on a single named stack.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::backend::{
    BackendError, CAPABILITY_NAMED_IAM, CreateStackRequest, StackBackend, StackParameter,
    StackRecord,
};

/// Provider status values the pipelines branch on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StackStatus {
    /// Creation has been accepted and is running.
    CreateInProgress,
    /// Creation finished successfully.
    CreateComplete,
    /// Creation failed without a rollback.
    CreateFailed,
    /// Creation failed and the provider rolled it back.
    RollbackComplete,
    /// The provider could not roll back a failed creation.
    RollbackFailed,
    /// Deletion has been accepted and is running.
    DeleteInProgress,
    /// Deletion finished; describe calls stop succeeding shortly after.
    DeleteComplete,
    /// Any other provider status, kept verbatim.
    Other(String),
}

impl StackStatus {
    /// Parses a raw provider status string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "CREATE_IN_PROGRESS" => Self::CreateInProgress,
            "CREATE_COMPLETE" => Self::CreateComplete,
            "CREATE_FAILED" => Self::CreateFailed,
            "ROLLBACK_COMPLETE" => Self::RollbackComplete,
            "ROLLBACK_FAILED" => Self::RollbackFailed,
            "DELETE_IN_PROGRESS" => Self::DeleteInProgress,
            "DELETE_COMPLETE" => Self::DeleteComplete,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Returns the provider's spelling of the status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::CreateInProgress => "CREATE_IN_PROGRESS",
            Self::CreateComplete => "CREATE_COMPLETE",
            Self::CreateFailed => "CREATE_FAILED",
            Self::RollbackComplete => "ROLLBACK_COMPLETE",
            Self::RollbackFailed => "ROLLBACK_FAILED",
            Self::DeleteInProgress => "DELETE_IN_PROGRESS",
            Self::DeleteComplete => "DELETE_COMPLETE",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name and description of a stack returned by [`StackHandle::list_stacks`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StackSummary {
    /// Stack name.
    pub name: String,
    /// Raw provider status.
    pub status: String,
    /// Creation time, when reported.
    pub creation_time: Option<DateTime<Utc>>,
}

/// Errors surfaced by [`StackHandle`].
#[derive(Debug, Error)]
pub enum StackError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The provider call failed.
    #[error("stack provider error: {0}")]
    Backend(#[source] E),
    /// A describe call for one name matched zero or several records.
    #[error("expected exactly one stack named {name}, found {count}")]
    Uniqueness {
        /// Name that was described.
        name: String,
        /// Number of records returned.
        count: usize,
    },
    /// The provider did not report a creation time.
    #[error("stack {name} has no creation time")]
    MissingCreationTime {
        /// Name that was described.
        name: String,
    },
    /// The create request was rejected before reaching the provider.
    #[error("invalid create request: {0}")]
    Request(#[from] BackendError),
}

/// Reference to one named stack plus what is needed to create it.
///
/// The handle holds no provider state: every query is a fresh describe call.
#[derive(Clone, Debug)]
pub struct StackHandle<B> {
    backend: B,
    name: String,
    template_url: String,
    parameters: Vec<StackParameter>,
    auto_rollback: bool,
}

impl<B: StackBackend> StackHandle<B> {
    /// Creates a handle for `name` with no creation parameters.
    pub fn new(backend: B, name: impl Into<String>, template_url: impl Into<String>) -> Self {
        Self {
            backend,
            name: name.into(),
            template_url: template_url.into(),
            parameters: Vec::new(),
            auto_rollback: true,
        }
    }

    /// Sets the parameters sent with [`StackHandle::create`].
    #[must_use]
    pub fn with_parameters(mut self, parameters: Vec<StackParameter>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Controls whether a rolled-back creation is torn down automatically.
    #[must_use]
    pub const fn with_auto_rollback(mut self, enabled: bool) -> Self {
        self.auto_rollback = enabled;
        self
    }

    /// Stack name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Template URL used for creation.
    #[must_use]
    pub fn template_url(&self) -> &str {
        &self.template_url
    }

    /// Creation parameters.
    #[must_use]
    pub fn parameters(&self) -> &[StackParameter] {
        &self.parameters
    }

    /// Whether rolled-back creations are deleted automatically.
    #[must_use]
    pub const fn auto_rollback(&self) -> bool {
        self.auto_rollback
    }

    /// Underlying backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns `true` when a describe call for the name succeeds.
    ///
    /// Every describe failure reads as "absent", including transient API
    /// errors.
    pub async fn exists(&self) -> bool {
        match self.backend.describe(&self.name).await {
            Ok(_) => true,
            Err(err) => {
                debug!(stack = %self.name, error = %err, "describe failed; treating as absent");
                false
            }
        }
    }

    /// Issues the create request and returns the provider's stack id.
    ///
    /// Does not check for an existing stack; call [`StackHandle::exists`]
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::Request`] for an incomplete request and
    /// [`StackError::Backend`] when the provider rejects it.
    pub async fn create(&self) -> Result<String, StackError<B::Error>> {
        let request = CreateStackRequest {
            name: self.name.clone(),
            template_url: self.template_url.clone(),
            capabilities: vec![String::from(CAPABILITY_NAMED_IAM)],
            parameters: self.parameters.clone(),
        };
        request.validate()?;
        self.backend
            .create(&request)
            .await
            .map_err(StackError::Backend)
    }

    /// Current provider status.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::Backend`] when the describe call fails and
    /// [`StackError::Uniqueness`] unless exactly one record matched.
    pub async fn status(&self) -> Result<StackStatus, StackError<B::Error>> {
        let record = self.describe_one().await?;
        Ok(StackStatus::parse(&record.status))
    }

    /// Template outputs keyed by output name.
    ///
    /// # Errors
    ///
    /// Same as [`StackHandle::status`].
    pub async fn outputs(&self) -> Result<BTreeMap<String, String>, StackError<B::Error>> {
        Ok(self.describe_one().await?.outputs)
    }

    /// Parameters the stack was created with.
    ///
    /// # Errors
    ///
    /// Same as [`StackHandle::status`].
    pub async fn params(&self) -> Result<BTreeMap<String, String>, StackError<B::Error>> {
        Ok(self.describe_one().await?.parameters)
    }

    /// Time the stack was created.
    ///
    /// # Errors
    ///
    /// Same as [`StackHandle::status`], plus
    /// [`StackError::MissingCreationTime`].
    pub async fn created_at(&self) -> Result<DateTime<Utc>, StackError<B::Error>> {
        self.describe_one()
            .await?
            .creation_time
            .ok_or_else(|| StackError::MissingCreationTime {
                name: self.name.clone(),
            })
    }

    /// Issues a delete request; completion is observed through
    /// [`StackHandle::status`].
    ///
    /// # Errors
    ///
    /// Returns [`StackError::Backend`] when the provider rejects the request.
    pub async fn delete(&self) -> Result<(), StackError<B::Error>> {
        self.backend
            .delete(&self.name)
            .await
            .map_err(StackError::Backend)
    }

    /// All visible stacks whose description equals `description`.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::Backend`] when listing fails.
    pub async fn list_stacks(
        &self,
        description: &str,
    ) -> Result<Vec<StackSummary>, StackError<B::Error>> {
        let records = self.backend.list().await.map_err(StackError::Backend)?;
        Ok(records
            .into_iter()
            .filter(|record| record.description.as_deref() == Some(description))
            .map(|record| StackSummary {
                name: record.name,
                status: record.status,
                creation_time: record.creation_time,
            })
            .collect())
    }

    async fn describe_one(&self) -> Result<StackRecord, StackError<B::Error>> {
        let mut records = self
            .backend
            .describe(&self.name)
            .await
            .map_err(StackError::Backend)?;
        if records.len() != 1 {
            return Err(StackError::Uniqueness {
                name: self.name.clone(),
                count: records.len(),
            });
        }
        records.pop().ok_or_else(|| StackError::Uniqueness {
            name: self.name.clone(),
            count: 0,
        })
    }
}
