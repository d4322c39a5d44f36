//! [`StackBackend`] implementation that shells out to the `aws` CLI.
//!
//! Every call runs `aws <service> <operation> ... --output json` and parses
//! the response with serde. Account credentials, when supplied explicitly,
//! travel in the child's environment so they never appear in argv.

use std::ffi::OsString;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::backend::{BackendFuture, CreateStackRequest, StackBackend, StackRecord};
use crate::command::{CommandOptions, CommandRunner, ProcessCommandRunner};

mod error;
mod lookups;
mod types;

pub use error::CloudFormationError;
pub use lookups::{ImageSelection, NetworkSelection};

use types::{AwsParameter, CreateStackResponse, DescribeStacksResponse};

/// Default AWS CLI binary name.
pub const DEFAULT_AWS_BIN: &str = "aws";

/// Static credentials for one AWS account.
#[derive(Clone, Eq, PartialEq)]
pub struct AwsCredentials {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// How to invoke the AWS CLI.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AwsSettings {
    /// Path to the `aws` executable.
    pub aws_bin: String,
    /// Region override (`--region`).
    pub region: Option<String>,
    /// Named profile (`--profile`).
    pub profile: Option<String>,
    /// Explicit credentials; the CLI's default chain is used when absent.
    pub credentials: Option<AwsCredentials>,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            aws_bin: String::from(DEFAULT_AWS_BIN),
            region: None,
            profile: None,
            credentials: None,
        }
    }
}

/// CloudFormation stacks plus the EC2, Route53, STS and S3 lookups that
/// feed stack creation.
#[derive(Clone, Debug)]
pub struct CloudFormationBackend<R: CommandRunner> {
    settings: AwsSettings,
    runner: R,
}

impl CloudFormationBackend<ProcessCommandRunner> {
    /// Creates a backend wired to the real process runner.
    #[must_use]
    pub const fn with_process_runner(settings: AwsSettings) -> Self {
        Self::new(settings, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> CloudFormationBackend<R> {
    /// Creates a backend using the provided settings and runner.
    #[must_use]
    pub const fn new(settings: AwsSettings, runner: R) -> Self {
        Self { settings, runner }
    }

    /// Returns the CLI settings.
    #[must_use]
    pub const fn settings(&self) -> &AwsSettings {
        &self.settings
    }

    async fn describe_stacks(&self, name: Option<&str>) -> Result<Vec<StackRecord>, CloudFormationError> {
        let mut args = vec!["describe-stacks".to_owned()];
        if let Some(stack_name) = name {
            args.push(String::from("--stack-name"));
            args.push(stack_name.to_owned());
        }
        let response: DescribeStacksResponse = self.run_json("cloudformation", &args, "stacks").await?;
        Ok(response.stacks.into_iter().map(StackRecord::from).collect())
    }

    async fn create_stack(&self, request: &CreateStackRequest) -> Result<String, CloudFormationError> {
        let parameters: Vec<AwsParameter> =
            request.parameters.iter().map(AwsParameter::from).collect();
        let encoded =
            serde_json::to_string(&parameters).map_err(|err| CloudFormationError::Encode {
                what: String::from("stack parameters"),
                message: err.to_string(),
            })?;

        let mut args = vec![
            String::from("create-stack"),
            String::from("--stack-name"),
            request.name.clone(),
            String::from("--template-url"),
            request.template_url.clone(),
            String::from("--parameters"),
            encoded,
        ];
        if !request.capabilities.is_empty() {
            args.push(String::from("--capabilities"));
            args.extend(request.capabilities.iter().cloned());
        }

        let response: CreateStackResponse = self.run_json("cloudformation", &args, "create-stack").await?;
        Ok(response.stack_id)
    }

    async fn delete_stack(&self, name: &str) -> Result<(), CloudFormationError> {
        let args = [
            String::from("delete-stack"),
            String::from("--stack-name"),
            name.to_owned(),
        ];
        self.run_raw("cloudformation", &args, true).await?;
        Ok(())
    }

    /// Runs an `aws` subcommand with JSON output and parses stdout.
    async fn run_json<T: DeserializeOwned>(
        &self,
        service: &str,
        args: &[String],
        resource: &str,
    ) -> Result<T, CloudFormationError> {
        let stdout = self.run_raw(service, args, true).await?;
        serde_json::from_str(&stdout).map_err(|err| CloudFormationError::Parse {
            resource: resource.to_owned(),
            message: err.to_string(),
        })
    }

    /// Runs an `aws` subcommand and returns stdout.
    async fn run_raw(
        &self,
        service: &str,
        args: &[String],
        json_output: bool,
    ) -> Result<String, CloudFormationError> {
        let argv = self.build_args(service, args, json_output);
        debug!(service, args = ?args, "invoking aws cli");
        let options = self.command_options();
        let output = self
            .runner
            .run_with(&self.settings.aws_bin, &argv, &options)
            .await?
            .check(&self.settings.aws_bin)?;
        Ok(output.stdout)
    }

    fn build_args(&self, service: &str, args: &[String], json_output: bool) -> Vec<OsString> {
        let mut argv = Vec::with_capacity(args.len() + 7);
        argv.push(OsString::from(service));
        argv.extend(args.iter().map(OsString::from));

        if json_output {
            argv.push(OsString::from("--output"));
            argv.push(OsString::from("json"));
        }
        if let Some(region) = &self.settings.region {
            argv.push(OsString::from("--region"));
            argv.push(OsString::from(region));
        }
        if let Some(profile) = &self.settings.profile {
            argv.push(OsString::from("--profile"));
            argv.push(OsString::from(profile));
        }
        argv
    }

    fn command_options(&self) -> CommandOptions {
        let envs = self
            .settings
            .credentials
            .as_ref()
            .map(|creds| {
                vec![
                    (
                        String::from("AWS_ACCESS_KEY_ID"),
                        creds.access_key_id.clone(),
                    ),
                    (
                        String::from("AWS_SECRET_ACCESS_KEY"),
                        creds.secret_access_key.clone(),
                    ),
                ]
            })
            .unwrap_or_default();
        CommandOptions::with_envs(envs)
    }
}

impl<R: CommandRunner> StackBackend for CloudFormationBackend<R> {
    type Error = CloudFormationError;

    fn describe<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Vec<StackRecord>, Self::Error> {
        Box::pin(self.describe_stacks(Some(name)))
    }

    fn create<'a>(
        &'a self,
        request: &'a CreateStackRequest,
    ) -> BackendFuture<'a, String, Self::Error> {
        Box::pin(self.create_stack(request))
    }

    fn delete<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(self.delete_stack(name))
    }

    fn list(&self) -> BackendFuture<'_, Vec<StackRecord>, Self::Error> {
        Box::pin(self.describe_stacks(None))
    }
}
