//! Process execution abstraction shared by the AWS CLI and SSH adapters.
//!
//! Every non-interactive tool the crate drives (`aws`, `ssh`, `security`,
//! `open`) goes through [`CommandRunner`] so tests can script outcomes
//! without spawning processes.

use std::ffi::OsString;
use std::future::Future;
use std::io::{self, Write};
use std::pin::Pin;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tracing::debug;

const READ_CHUNK: usize = 8192;

/// Captured result of one `aws`, `ssh` or helper invocation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code, absent when the process was killed by a signal.
    pub code: Option<i32>,
    /// Everything the process printed to stdout.
    pub stdout: String,
    /// Everything the process printed to stderr.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the process exited cleanly.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Converts a non-zero exit into [`CommandError::Failed`].
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Failed`] when the process did not exit with
    /// status zero.
    pub fn check(self, program: &str) -> Result<Self, CommandError> {
        if self.is_success() {
            return Ok(self);
        }

        let status_text = self
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        Err(CommandError::Failed {
            program: program.to_owned(),
            status: self.code,
            status_text,
            stderr: self.stderr.trim().to_owned(),
        })
    }
}

/// Extra process settings for a single invocation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOptions {
    /// Bytes written to the child's standard input before waiting on it.
    /// Standard input is closed immediately when this is `None`.
    pub stdin: Option<Vec<u8>>,
    /// Environment variables added to the inherited environment.
    pub envs: Vec<(String, String)>,
}

impl CommandOptions {
    /// Options that feed `bytes` to standard input.
    #[must_use]
    pub const fn with_stdin(bytes: Vec<u8>) -> Self {
        Self {
            stdin: Some(bytes),
            envs: Vec::new(),
        }
    }

    /// Options that add `envs` to the child's environment.
    #[must_use]
    pub const fn with_envs(envs: Vec<(String, String)>) -> Self {
        Self { stdin: None, envs }
    }
}

/// Errors raised while running an external command.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// The process could not be started or awaited.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program name.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Feeding the child's stdin failed.
    #[error("failed to write to {program} stdin: {message}")]
    Stdin {
        /// Program name.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Reading the child's output or forwarding it to a sink failed.
    #[error("failed to forward {program} output: {message}")]
    Output {
        /// Program name.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// The process ran but exited non-zero.
    #[error("{program} exited with status {status_text}: {stderr}")]
    Failed {
        /// Program name.
        program: String,
        /// Raw exit code, if any.
        status: Option<i32>,
        /// Exit code rendered for messages, or `unknown`.
        status_text: String,
        /// Trimmed stderr of the failed run.
        stderr: String,
    },
}

/// Future returned by [`CommandRunner`] calls.
pub type CommandFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CommandOutput, CommandError>> + Send + 'a>>;

/// Destination for output forwarded while a command runs.
pub type OutputSink<'a> = &'a mut (dyn Write + Send);

/// Seam between the adapters and process spawning.
///
/// Calls are asynchronous so a caller racing one against a deadline can
/// drop it; real processes are killed when their future is dropped.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args` and the given `options`, capturing stdout
    /// and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] if the command cannot be started and
    /// [`CommandError::Stdin`] if its input cannot be written.
    fn run_with<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
        options: &'a CommandOptions,
    ) -> CommandFuture<'a>;

    /// Runs `program`, copying its output into `stdout` and `stderr` as it
    /// arrives. The returned output still carries everything captured.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] if the command cannot be started and
    /// [`CommandError::Output`] if a sink rejects a write.
    fn run_streaming<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
        stdout: OutputSink<'a>,
        stderr: OutputSink<'a>,
    ) -> CommandFuture<'a>;

    /// Runs `program` with `args` and no extra options.
    ///
    /// # Errors
    ///
    /// See [`CommandRunner::run_with`].
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> CommandFuture<'a> {
        Box::pin(async move {
            let options = CommandOptions::default();
            self.run_with(program, args, &options).await
        })
    }
}

/// Spawns real processes through `tokio::process`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run_with<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
        options: &'a CommandOptions,
    ) -> CommandFuture<'a> {
        Box::pin(execute(program, args, Some(options), None, None))
    }

    fn run_streaming<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
        stdout: OutputSink<'a>,
        stderr: OutputSink<'a>,
    ) -> CommandFuture<'a> {
        Box::pin(execute(program, args, None, Some(stdout), Some(stderr)))
    }
}

async fn execute(
    program: &str,
    args: &[OsString],
    options: Option<&CommandOptions>,
    stdout_sink: Option<OutputSink<'_>>,
    stderr_sink: Option<OutputSink<'_>>,
) -> Result<CommandOutput, CommandError> {
    debug!(program, args = ?args, "spawning command");
    let input = options.and_then(|opts| opts.stdin.as_deref());
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(opts) = options {
        command.envs(opts.envs.iter().map(|(key, value)| (key, value)));
    }
    let mut child = command
        .spawn()
        .map_err(|err| spawn_error(program, &err))?;

    let stdin_pipe = child.stdin.take();
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    // Output is drained while waiting so a chatty child never blocks on a
    // full pipe.
    let (fed, status, stdout, stderr) = tokio::join!(
        feed(stdin_pipe, input),
        child.wait(),
        pump(stdout_pipe, stdout_sink),
        pump(stderr_pipe, stderr_sink),
    );

    let status = status.map_err(|err| spawn_error(program, &err))?;
    let stdout = stdout.map_err(|err| output_error(program, &err))?;
    let stderr = stderr.map_err(|err| output_error(program, &err))?;
    // A child that exits without reading its input reports through its
    // exit status instead.
    if let Err(err) = fed
        && err.kind() != io::ErrorKind::BrokenPipe
    {
        return Err(CommandError::Stdin {
            program: program.to_owned(),
            message: err.to_string(),
        });
    }

    Ok(CommandOutput {
        code: status.code(),
        stdout,
        stderr,
    })
}

async fn feed(pipe: Option<ChildStdin>, input: Option<&[u8]>) -> io::Result<()> {
    if let (Some(mut pipe), Some(bytes)) = (pipe, input) {
        pipe.write_all(bytes).await?;
        pipe.flush().await?;
    }
    Ok(())
}

async fn pump<S>(source: Option<S>, mut sink: Option<OutputSink<'_>>) -> io::Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    let Some(mut source) = source else {
        return Ok(String::new());
    };
    let mut chunk = [0_u8; READ_CHUNK];
    loop {
        let read = source.read(&mut chunk).await?;
        let bytes = chunk.get(..read).unwrap_or_default();
        if bytes.is_empty() {
            break;
        }
        if let Some(out) = sink.as_deref_mut() {
            out.write_all(bytes)?;
            out.flush()?;
        }
        captured.extend_from_slice(bytes);
    }
    Ok(String::from_utf8_lossy(&captured).into_owned())
}

fn spawn_error(program: &str, err: &io::Error) -> CommandError {
    CommandError::Spawn {
        program: program.to_owned(),
        message: err.to_string(),
    }
}

fn output_error(program: &str, err: &io::Error) -> CommandError {
    CommandError::Output {
        program: program.to_owned(),
        message: err.to_string(),
    }
}
