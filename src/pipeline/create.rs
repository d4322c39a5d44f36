//! The create workflow: stack, staging, install, readiness, trust.

use std::io::{self, Write};
use std::time::Duration;

use camino::Utf8PathBuf;
use shell_escape::unix::escape;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::backend::StackBackend;
use crate::command::CommandRunner;
use crate::probe::EndpointProbe;
use crate::remote::{DEFAULT_SSH_PORT, RemoteExecClient, RemoteTarget, SshSettings};
use crate::retry::retry_until;
use crate::stack::{StackHandle, StackStatus};
use crate::workstation::Workstation;

use super::destroy::wait_until_gone;
use super::{
    OUTPUT_ADDRESS, PipelineError, PipelineOptions, ProvisioningReport, StackEndpoints,
    fetch_ca_certificate, write_outputs,
};

const LICENSE_FILE: &str = "license.yaml";
const CONFIG_FILE: &str = "config.yaml";
const KOTS_PROBE_COMMAND: &str = "kubectl kots --help";
const APP_SLUG: &str = "orion-ptt-system";

/// What gets staged on the host and how the application is installed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstallSettings {
    /// Remote user whose home directory receives the files.
    pub user_name: String,
    /// Shared password for the admin console.
    pub shared_password: String,
    /// Licence file contents.
    pub license: Vec<u8>,
    /// Rendered install config contents.
    pub config: Vec<u8>,
}

impl InstallSettings {
    /// Remote install command referencing the staged files. Paths and the
    /// password are shell-quoted for the remote login shell.
    #[must_use]
    pub fn install_command(&self) -> String {
        let home = format!("/home/{}", self.user_name);
        let license = format!("{home}/{LICENSE_FILE}");
        let config = format!("{home}/{CONFIG_FILE}");
        format!(
            "sudo -i kubectl kots install {APP_SLUG} --license-file {} \
             --shared-password {} --namespace default --config-values {}",
            escape(license.into()),
            escape(self.shared_password.as_str().into()),
            escape(config.into()),
        )
    }
}

enum Settled {
    Complete,
    RolledBack,
    Failed(StackStatus),
}

/// Creates a stack and brings the application on it to a usable state.
#[derive(Debug)]
pub struct ProvisioningPipeline<B, R, P, W> {
    stack: StackHandle<B>,
    ssh: SshSettings,
    ssh_port: u16,
    runner: R,
    probe: P,
    workstation: W,
    install: InstallSettings,
    options: PipelineOptions,
}

impl<B, R, P, W> ProvisioningPipeline<B, R, P, W>
where
    B: StackBackend + Sync,
    B::Error: std::error::Error + Send + Sync + 'static,
    R: CommandRunner + Clone,
    P: EndpointProbe + Sync,
    W: Workstation,
{
    /// Creates a pipeline with default SSH settings and options.
    pub fn new(
        stack: StackHandle<B>,
        runner: R,
        probe: P,
        workstation: W,
        install: InstallSettings,
    ) -> Self {
        Self {
            stack,
            ssh: SshSettings::default(),
            ssh_port: DEFAULT_SSH_PORT,
            runner,
            probe,
            workstation,
            install,
            options: PipelineOptions::default(),
        }
    }

    /// Overrides how the host is reached.
    #[must_use]
    pub fn with_ssh(mut self, settings: SshSettings, port: u16) -> Self {
        self.ssh = settings;
        self.ssh_port = port;
        self
    }

    /// Overrides the run options.
    #[must_use]
    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// The stack this pipeline creates.
    #[must_use]
    pub const fn stack(&self) -> &StackHandle<B> {
        &self.stack
    }

    /// Runs the workflow. The outputs table and remote install output are
    /// written to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::AlreadyExists`] when the name is taken,
    /// [`PipelineError::RolledBack`] when the provider rolled the creation
    /// back, [`PipelineError::Timeout`] when a polled phase runs out of
    /// time, and the underlying stack or remote error for any other fatal
    /// step. CA trust and the browser are best-effort.
    pub async fn create(
        &self,
        out: &mut (impl Write + Send),
    ) -> Result<ProvisioningReport, PipelineError<B::Error>> {
        let name = self.stack.name().to_owned();
        if self.stack.exists().await {
            return Err(PipelineError::AlreadyExists { name });
        }

        let total = Instant::now();
        info!(stack = %name, "creating stack");
        let stack_id = self.stack.create().await?;
        let mut report = ProvisioningReport {
            stack_name: name.clone(),
            stack_id,
            ..ProvisioningReport::default()
        };

        let started = Instant::now();
        match self.watch_creation().await? {
            Settled::Complete => {}
            Settled::RolledBack => return Err(self.roll_back().await),
            Settled::Failed(status) => {
                return Err(PipelineError::CreateFailed { name, status });
            }
        }
        report.record("stack creation", started.elapsed());
        info!(stack = %name, elapsed_secs = started.elapsed().as_secs(), "stack created");

        report.outputs = self.stack.outputs().await?;
        report.endpoints = StackEndpoints::from_outputs(&report.outputs);
        if report.endpoints.address.is_empty() {
            return Err(PipelineError::MissingOutput {
                key: String::from(OUTPUT_ADDRESS),
            });
        }
        let client = self.client_for(&report.endpoints.address);

        let started = Instant::now();
        self.stage_files(&client).await?;
        report.record("staging", started.elapsed());
        if self.options.stage_only {
            info!(stack = %name, "stage-only run; stopping after staging");
            report.staged_only = true;
            return Ok(report);
        }

        let started = Instant::now();
        let console = report.endpoints.console_url();
        self.poll_endpoint("kotsadm console", &console, self.options.timings.console_budget)
            .await?;
        report.record("kubernetes install", started.elapsed());

        self.wait_for_kots(&client).await?;

        let started = Instant::now();
        let command = self.install.install_command();
        info!(command = %command, "installing application");
        client
            .run_command(&command, out, &mut io::stderr())
            .await
            .map_err(|err| PipelineError::remote("application install", err))?;
        report.record("application install", started.elapsed());

        let started = Instant::now();
        for (label, url) in report.endpoints.readiness_urls() {
            self.poll_endpoint(label, &url, self.options.timings.endpoint_budget)
                .await?;
        }
        report.record("service initialisation", started.elapsed());

        report.ca_file = self.trust_ca(&report.endpoints.ca).await;

        write_outputs(out, &report.outputs).map_err(|err| PipelineError::Io {
            path: Utf8PathBuf::from("<stdout>"),
            message: err.to_string(),
        })?;
        report.record("total", total.elapsed());
        info!(
            stack = %name,
            elapsed_secs = total.elapsed().as_secs(),
            "end to end creation finished"
        );

        let login = report.endpoints.login_url();
        if self.options.interactive
            && let Err(err) = self.workstation.open_browser(&login).await
        {
            warn!(error = %err, "failed to open login page");
        }
        Ok(report)
    }

    async fn watch_creation(&self) -> Result<Settled, PipelineError<B::Error>> {
        let stack = &self.stack;
        let timings = &self.options.timings;
        let outcome = retry_until(
            || async move {
                match stack.status().await {
                    Ok(StackStatus::CreateComplete) => Ok(Settled::Complete),
                    Ok(StackStatus::RollbackComplete) => Ok(Settled::RolledBack),
                    Ok(status @ (StackStatus::CreateFailed | StackStatus::RollbackFailed)) => {
                        Ok(Settled::Failed(status))
                    }
                    Ok(status) => Err(status.to_string()),
                    Err(err) => Err(err.to_string()),
                }
            },
            timings.status_budget,
            timings.status_interval,
        )
        .await
        .map_err(|err| PipelineError::timeout("stack creation", err))?;
        Ok(outcome.value)
    }

    async fn roll_back(&self) -> PipelineError<B::Error> {
        let name = self.stack.name().to_owned();
        if !self.stack.auto_rollback() {
            warn!(stack = %name, "creation rolled back; leaving the stack for inspection");
            return PipelineError::RolledBack {
                name,
                deleted: false,
            };
        }
        warn!(stack = %name, "creation rolled back; deleting the stack");
        if let Err(err) = self.stack.delete().await {
            return err.into();
        }
        let deleted = match wait_until_gone(&self.stack, &self.options.timings).await {
            Ok(elapsed) => {
                info!(stack = %name, elapsed_secs = elapsed.as_secs(), "rolled-back stack deleted");
                true
            }
            Err(err) => {
                warn!(stack = %name, error = %err, "rolled-back stack still visible");
                false
            }
        };
        PipelineError::RolledBack { name, deleted }
    }

    fn client_for(&self, address: &str) -> RemoteExecClient<R> {
        let target = RemoteTarget {
            host: address.to_owned(),
            port: self.ssh_port,
            user: self.install.user_name.clone(),
        };
        RemoteExecClient::new(target, self.ssh.clone(), self.runner.clone())
    }

    async fn stage_files(&self, client: &RemoteExecClient<R>) -> Result<(), PipelineError<B::Error>> {
        let license = self.install.license.as_slice();
        retry_until(
            || client.copy_file(license, LICENSE_FILE),
            self.options.timings.staging_budget,
            self.options.timings.readiness_interval,
        )
        .await
        .map_err(|err| PipelineError::timeout("licence staging", err))?;
        info!(user = %self.install.user_name, "licence staged to ~/{LICENSE_FILE}");

        // Single attempt; only the licence copy is retried.
        client
            .copy_file(&self.install.config, CONFIG_FILE)
            .await
            .map_err(|err| PipelineError::remote("config staging", err))?;
        info!(user = %self.install.user_name, "config staged to ~/{CONFIG_FILE}");
        Ok(())
    }

    async fn wait_for_kots(&self, client: &RemoteExecClient<R>) -> Result<(), PipelineError<B::Error>> {
        info!(host = %client.target().host, "waiting for the kots plugin");
        retry_until(
            || async move {
                client
                    .run_command(KOTS_PROBE_COMMAND, &mut io::sink(), &mut io::sink())
                    .await
            },
            self.options.timings.kots_budget,
            self.options.timings.readiness_interval,
        )
        .await
        .map_err(|err| PipelineError::timeout("kots plugin", err))?;
        Ok(())
    }

    async fn poll_endpoint(
        &self,
        label: &str,
        url: &str,
        budget: Duration,
    ) -> Result<(), PipelineError<B::Error>> {
        info!(endpoint = label, url, "polling endpoint");
        let probe = &self.probe;
        let outcome = retry_until(
            || probe.check(url),
            budget,
            self.options.timings.readiness_interval,
        )
        .await
        .map_err(|err| PipelineError::timeout(&format!("{label} endpoint"), err))?;
        info!(endpoint = label, elapsed_secs = outcome.elapsed.as_secs(), "endpoint ready");
        Ok(())
    }

    async fn trust_ca(&self, ca_host: &str) -> Option<Utf8PathBuf> {
        let path = match fetch_ca_certificate::<P, B::Error>(&self.probe, ca_host, &self.options.ca_dir)
            .await
        {
            Ok(path) => path,
            Err(err) => {
                warn!(error = %err, "CA certificate not fetched; trust it manually");
                return None;
            }
        };
        if self.options.interactive {
            match self.workstation.trust_certificate(&path).await {
                Ok(()) => info!(path = %path, "CA trusted"),
                Err(err) => warn!(error = %err, "failed to trust CA certificate"),
            }
        }
        Some(path)
    }
}
