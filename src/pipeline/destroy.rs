//! The destroy workflow: delete, wait for disappearance, revoke trust.

use std::time::Duration;

use tracing::{info, warn};

use crate::backend::StackBackend;
use crate::retry::{RetryError, retry_until};
use crate::stack::StackHandle;
use crate::workstation::Workstation;

use super::{OUTPUT_CA, PipelineError, PipelineTimings};

/// Polls until a status read fails. Any failure counts as "gone", not only
/// a not-found answer.
pub(super) async fn wait_until_gone<B>(
    stack: &StackHandle<B>,
    timings: &PipelineTimings,
) -> Result<Duration, RetryError>
where
    B: StackBackend,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let outcome = retry_until(
        || async move {
            match stack.status().await {
                Ok(status) => Err(status.to_string()),
                Err(_) => Ok(()),
            }
        },
        timings.status_budget,
        timings.status_interval,
    )
    .await?;
    Ok(outcome.elapsed)
}

/// Deletes a stack and removes the local trust for its CA.
#[derive(Debug)]
pub struct DestructionPipeline<B, W> {
    stack: StackHandle<B>,
    workstation: W,
    timings: PipelineTimings,
}

impl<B, W> DestructionPipeline<B, W>
where
    B: StackBackend + Sync,
    B::Error: std::error::Error + Send + Sync + 'static,
    W: Workstation + Sync,
{
    /// Creates a pipeline with default timings.
    pub fn new(stack: StackHandle<B>, workstation: W) -> Self {
        Self {
            stack,
            workstation,
            timings: PipelineTimings::default(),
        }
    }

    /// Overrides poll budgets and intervals.
    #[must_use]
    pub const fn with_timings(mut self, timings: PipelineTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Deletes the stack and waits until it can no longer be described.
    /// Returns the time spent waiting.
    ///
    /// # Errors
    ///
    /// Returns the stack error when the outputs cannot be read or the delete
    /// is rejected, and [`PipelineError::Timeout`] when the stack is still
    /// visible at the end of the budget. Trust revocation is best-effort.
    pub async fn destroy(&self) -> Result<Duration, PipelineError<B::Error>> {
        let name = self.stack.name();
        let outputs = self.stack.outputs().await?;
        let ca_host = outputs.get(OUTPUT_CA).cloned().unwrap_or_default();

        info!(stack = name, "deleting stack");
        self.stack.delete().await?;
        let elapsed = wait_until_gone(&self.stack, &self.timings)
            .await
            .map_err(|err| PipelineError::timeout("stack deletion", err))?;
        info!(stack = name, elapsed_secs = elapsed.as_secs(), "stack deleted");

        if ca_host.is_empty() {
            warn!(stack = name, "stack published no CA host; nothing to untrust");
        } else {
            match self.workstation.revoke_certificate(&ca_host).await {
                Ok(()) => info!(ca = %ca_host, "trust removed"),
                Err(err) => warn!(
                    ca = %ca_host,
                    error = %err,
                    "failed to remove trust; remove it manually"
                ),
            }
        }
        Ok(elapsed)
    }
}
