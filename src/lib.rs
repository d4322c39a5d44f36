//! Core library for the Orion PTT System operations tool.
//!
//! The crate drives AWS CloudFormation through the `aws` CLI to create and
//! destroy Orion stacks, installs the application on the new host over SSH,
//! and serves a small management API over the stacks of several accounts
//! (create → wait for `CREATE_COMPLETE` → stage and install → poll the
//! endpoints).

pub mod backend;
pub mod cloudformation;
pub mod command;
pub mod commands;
pub mod config;
pub mod config_store;
pub mod pipeline;
pub mod probe;
pub mod remote;
pub mod retry;
pub mod server;
pub mod stack;
pub mod test_support;
pub mod workstation;

pub use backend::{CreateStackRequest, StackBackend, StackParameter, StackRecord};
pub use cloudformation::{AwsSettings, CloudFormationBackend, CloudFormationError};
pub use command::{CommandError, CommandRunner, ProcessCommandRunner};
pub use config::{ConfigError, OpsConfig};
pub use config_store::{ConfigStoreError, StackConfig, StackConfigStore};
pub use pipeline::{
    DestructionPipeline, PipelineError, PipelineOptions, ProvisioningPipeline, ProvisioningReport,
};
pub use probe::{EndpointProbe, HttpProbe};
pub use remote::{RemoteError, RemoteExecClient, RemoteTarget, SshSettings};
pub use retry::{RetryError, RetryOutcome, retry_until};
pub use stack::{StackError, StackHandle, StackStatus};
