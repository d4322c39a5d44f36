//! Remote command execution and file staging over the system `ssh` client.
//!
//! Each operation spawns its own `ssh` process, so every call is one
//! transport session that ends with the call. Authentication is whatever the
//! local ssh client resolves: agent identities via `SSH_AUTH_SOCK`, or an
//! explicit identity file.

use std::ffi::OsString;
use std::io::Write;

use thiserror::Error;
use tracing::{debug, info};

use crate::command::{CommandError, CommandOptions, CommandRunner};

mod scp;

pub use scp::{SCP_FILE_MODE, SCP_SINK_COMMAND, scp_frame};

/// Default SSH port for provisioned hosts.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Exit code `ssh` reserves for its own connection failures.
const SSH_TRANSPORT_EXIT: i32 = 255;

/// SSH client options shared by every remote operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Forces non-interactive authentication.
    pub batch_mode: bool,
    /// Enforces host key checking.
    pub strict_host_key_checking: bool,
    /// Known hosts file override.
    pub known_hosts_file: String,
    /// Explicit private key; the agent is used when absent.
    pub identity_file: Option<String>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            batch_mode: true,
            strict_host_key_checking: false,
            known_hosts_file: String::from("/dev/null"),
            identity_file: None,
        }
    }
}

/// Host and account a [`RemoteExecClient`] connects to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteTarget {
    /// Hostname or address.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Remote login user.
    pub user: String,
}

impl RemoteTarget {
    /// Target on the default SSH port.
    #[must_use]
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            user: user.into(),
        }
    }
}

/// Errors surfaced by remote operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// The ssh session could not be established or broke down.
    #[error("ssh transport to {host} failed: {message}")]
    Transport {
        /// Target host.
        host: String,
        /// Client or OS error text.
        message: String,
    },
    /// The remote command ran and exited non-zero.
    #[error("remote command `{command}` exited with status {status_text}: {stderr}")]
    RemoteCommand {
        /// Command that was run.
        command: String,
        /// Remote exit code.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Remote stderr.
        stderr: String,
    },
    /// The remote copy sink refused the file.
    #[error("copy of {file_name} to {host} failed: {message}")]
    Copy {
        /// Target host.
        host: String,
        /// Remote file name.
        file_name: String,
        /// Message reported by the sink.
        message: String,
    },
    /// The remote file name cannot be expressed in the copy protocol.
    #[error("invalid remote file name {0:?}: must be a bare file name")]
    InvalidFileName(String),
    /// Captured output could not be forwarded to the caller.
    #[error("failed to forward remote output: {0}")]
    Output(String),
}

/// Runs commands and stages files on one remote host.
#[derive(Clone, Debug)]
pub struct RemoteExecClient<R: CommandRunner> {
    target: RemoteTarget,
    settings: SshSettings,
    runner: R,
}

impl<R: CommandRunner> RemoteExecClient<R> {
    /// Creates a client for `target`.
    #[must_use]
    pub const fn new(target: RemoteTarget, settings: SshSettings, runner: R) -> Self {
        Self {
            target,
            settings,
            runner,
        }
    }

    /// Host this client talks to.
    #[must_use]
    pub const fn target(&self) -> &RemoteTarget {
        &self.target
    }

    /// Runs `command` through the remote login shell, forwarding its output
    /// to `stdout` and `stderr` as it arrives.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transport`] when ssh cannot connect and
    /// [`RemoteError::RemoteCommand`] when the command exits non-zero.
    ///
    /// # Security
    ///
    /// `command` is passed verbatim to the remote shell; quote any untrusted
    /// arguments before calling.
    pub async fn run_command(
        &self,
        command: &str,
        stdout: &mut (impl Write + Send),
        stderr: &mut (impl Write + Send),
    ) -> Result<(), RemoteError> {
        debug!(host = %self.target.host, command, "running remote command");
        let args = self.build_ssh_args(command);
        let output = self
            .runner
            .run_streaming(&self.settings.ssh_bin, &args, stdout, stderr)
            .await
            .map_err(|err| match err {
                CommandError::Output { message, .. } => RemoteError::Output(message),
                other => self.transport(&other),
            })?;

        match output.code {
            Some(0) => Ok(()),
            Some(SSH_TRANSPORT_EXIT) => Err(RemoteError::Transport {
                host: self.target.host.clone(),
                message: output.stderr.trim().to_owned(),
            }),
            code => Err(RemoteError::RemoteCommand {
                command: command.to_owned(),
                status: code,
                status_text: code.map_or_else(|| String::from("unknown"), |c| c.to_string()),
                stderr: output.stderr.trim().to_owned(),
            }),
        }
    }

    /// Writes `content` to `file_name` in the remote user's home directory
    /// using the scp sink protocol.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidFileName`] for names containing path
    /// separators or control characters, [`RemoteError::Transport`] when
    /// ssh cannot connect, and [`RemoteError::Copy`] when the sink rejects
    /// the file.
    pub async fn copy_file(&self, content: &[u8], file_name: &str) -> Result<(), RemoteError> {
        validate_file_name(file_name)?;
        info!(
            host = %self.target.host,
            file_name,
            bytes = content.len(),
            "staging file over ssh"
        );

        let args = self.build_ssh_args(SCP_SINK_COMMAND);
        let options = CommandOptions::with_stdin(scp_frame(content, file_name));
        let output = self
            .runner
            .run_with(&self.settings.ssh_bin, &args, &options)
            .await
            .map_err(|err| self.transport(&err))?;

        match output.code {
            Some(0) => Ok(()),
            Some(SSH_TRANSPORT_EXIT) => Err(RemoteError::Transport {
                host: self.target.host.clone(),
                message: output.stderr.trim().to_owned(),
            }),
            _ => Err(RemoteError::Copy {
                host: self.target.host.clone(),
                file_name: file_name.to_owned(),
                message: scp::sink_message(&output.stdout, &output.stderr),
            }),
        }
    }

    fn transport(&self, err: &CommandError) -> RemoteError {
        RemoteError::Transport {
            host: self.target.host.clone(),
            message: err.to_string(),
        }
    }

    fn build_ssh_args(&self, remote_command: &str) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(self.target.port.to_string()),
        ];

        if let Some(ref identity_file) = self.settings.identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }

        if self.settings.batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.settings.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.settings.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.settings.known_hosts_file
            )));
        }

        args.push(OsString::from(format!(
            "{}@{}",
            self.target.user, self.target.host
        )));
        args.push(OsString::from(remote_command));
        args
    }
}

fn validate_file_name(file_name: &str) -> Result<(), RemoteError> {
    let invalid = file_name.is_empty()
        || file_name == "."
        || file_name == ".."
        || file_name.contains('/')
        || file_name.chars().any(char::is_control);
    if invalid {
        return Err(RemoteError::InvalidFileName(file_name.to_owned()));
    }
    Ok(())
}

/// Expands a leading `~/` prefix to the user's home directory.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}
