//! Scripted doubles for the runner, backend, probe and workstation seams.

use std::collections::{BTreeMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::future::ready;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::Utf8Path;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::backend::{BackendFuture, CreateStackRequest, StackBackend, StackRecord};
use crate::command::{
    CommandError, CommandFuture, CommandOptions, CommandOutput, CommandRunner, OutputSink,
};
use crate::probe::{EndpointProbe, ProbeError, ProbeFuture};
use crate::workstation::{Workstation, WorkstationError, WorkstationFuture};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`CommandRunner`] that replays queued outputs and records every call.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<Reply>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// One call seen by [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// `aws`, `ssh` and so on.
    pub program: String,
    /// Argument vector.
    pub args: Vec<OsString>,
    /// Bytes written to standard input, if any.
    pub stdin: Option<Vec<u8>>,
    /// Extra environment variables.
    pub envs: Vec<(String, String)>,
}

impl CommandInvocation {
    /// Program and arguments joined by spaces.
    #[must_use]
    pub fn command_string(&self) -> String {
        self.args.iter().fold(self.program.clone(), |mut line, arg| {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
            line
        })
    }

    /// Returns the last argument, which for ssh calls is the remote command.
    #[must_use]
    pub fn last_arg(&self) -> Option<String> {
        self.args
            .last()
            .map(|arg| arg.to_string_lossy().into_owned())
    }
}

#[derive(Clone, Debug)]
enum Reply {
    Done(Result<CommandOutput, CommandError>),
    Hang,
}

impl ScriptedRunner {
    /// Runner with an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls recorded so far, oldest first.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status with empty output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a successful exit status with `stdout`.
    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Queues a non-zero exit with canned stderr.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a spawn error, as if the program were missing.
    pub fn push_spawn_error(&self, program: &str) {
        lock(&self.responses).push_back(Reply::Done(Err(CommandError::Spawn {
            program: program.to_owned(),
            message: String::from("No such file or directory"),
        })));
    }

    /// Queues a call that never completes, like an ssh session stuck on a
    /// dead host.
    pub fn push_hang(&self) {
        lock(&self.responses).push_back(Reply::Hang);
    }

    /// Queues an arbitrary output.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(Reply::Done(Ok(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        })));
    }

    fn next_reply(&self, invocation: CommandInvocation) -> Reply {
        let program = invocation.program.clone();
        lock(&self.invocations).push(invocation);
        lock(&self.responses).pop_front().unwrap_or_else(|| {
            Reply::Done(Err(CommandError::Spawn {
                program,
                message: String::from("no scripted response available"),
            }))
        })
    }
}

async fn settle(reply: Reply) -> Result<CommandOutput, CommandError> {
    match reply {
        Reply::Done(result) => result,
        Reply::Hang => std::future::pending().await,
    }
}

impl CommandRunner for ScriptedRunner {
    fn run_with<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
        options: &'a CommandOptions,
    ) -> CommandFuture<'a> {
        let reply = self.next_reply(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            stdin: options.stdin.clone(),
            envs: options.envs.clone(),
        });
        Box::pin(settle(reply))
    }

    fn run_streaming<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
        stdout: OutputSink<'a>,
        stderr: OutputSink<'a>,
    ) -> CommandFuture<'a> {
        let reply = self.next_reply(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            stdin: None,
            envs: Vec::new(),
        });
        Box::pin(async move {
            let output = settle(reply).await?;
            stdout
                .write_all(output.stdout.as_bytes())
                .and_then(|()| stderr.write_all(output.stderr.as_bytes()))
                .map_err(|err| CommandError::Output {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;
            Ok(output)
        })
    }
}

/// Cloneable in-memory sink; every clone sees the same bytes.
#[derive(Clone, Debug, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Bytes written so far, decoded lossily.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.0)).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Error returned by [`ScriptedStackBackend`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScriptedBackendError {
    /// The stack is not known to the fake provider.
    #[error("Stack with id {0} does not exist")]
    NotFound(String),
    /// A failure injected by the test.
    #[error("injected failure: {0}")]
    Injected(String),
}

#[derive(Debug, Default)]
struct BackendState {
    describe_script: VecDeque<Result<Vec<StackRecord>, ScriptedBackendError>>,
    stacks: BTreeMap<String, StackRecord>,
    listed: Vec<StackRecord>,
    outputs: BTreeMap<String, String>,
    create_requests: Vec<CreateStackRequest>,
    delete_calls: Vec<String>,
    describe_calls: usize,
    fail_create: bool,
    fail_delete: bool,
}

/// In-memory stack provider with scripted describe responses.
///
/// Scripted describe responses are consumed first, in FIFO order. Once the
/// script is empty, describe answers from the set of created stacks, which
/// [`StackBackend::delete`] removes from.
#[derive(Clone, Debug, Default)]
pub struct ScriptedStackBackend {
    state: Arc<Mutex<BackendState>>,
}

impl ScriptedStackBackend {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the outputs attached to scripted and created records.
    pub fn set_outputs(&self, outputs: &[(&str, &str)]) {
        lock(&self.state).outputs = outputs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
    }

    /// Queues one describe response holding a single record with `status`.
    pub fn push_status(&self, name: &str, status: &str) {
        let mut state = lock(&self.state);
        let record = StackRecord {
            id: format!("arn:aws:cloudformation:stack/{name}"),
            name: name.to_owned(),
            status: status.to_owned(),
            outputs: state.outputs.clone(),
            ..StackRecord::default()
        };
        state.describe_script.push_back(Ok(vec![record]));
    }

    /// Queues one describe response with an explicit record list.
    pub fn push_records(&self, records: Vec<StackRecord>) {
        lock(&self.state).describe_script.push_back(Ok(records));
    }

    /// Queues one failing describe response.
    pub fn push_describe_error(&self, message: &str) {
        lock(&self.state)
            .describe_script
            .push_back(Err(ScriptedBackendError::Injected(message.to_owned())));
    }

    /// Registers an existing stack answered by describe once the script is
    /// exhausted.
    pub fn insert_stack(&self, record: StackRecord) {
        lock(&self.state).stacks.insert(record.name.clone(), record);
    }

    /// Sets the records returned by [`StackBackend::list`].
    pub fn set_listed(&self, records: Vec<StackRecord>) {
        lock(&self.state).listed = records;
    }

    /// Makes subsequent create calls fail.
    pub fn fail_create(&self) {
        lock(&self.state).fail_create = true;
    }

    /// Makes subsequent delete calls fail.
    pub fn fail_delete(&self) {
        lock(&self.state).fail_delete = true;
    }

    /// Create requests received so far.
    #[must_use]
    pub fn create_requests(&self) -> Vec<CreateStackRequest> {
        lock(&self.state).create_requests.clone()
    }

    /// Names passed to delete so far.
    #[must_use]
    pub fn delete_calls(&self) -> Vec<String> {
        lock(&self.state).delete_calls.clone()
    }

    /// Number of describe calls received.
    #[must_use]
    pub fn describe_calls(&self) -> usize {
        lock(&self.state).describe_calls
    }

    /// Number of scripted describe responses not yet consumed.
    #[must_use]
    pub fn pending_describes(&self) -> usize {
        lock(&self.state).describe_script.len()
    }
}

impl StackBackend for ScriptedStackBackend {
    type Error = ScriptedBackendError;

    fn describe<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Vec<StackRecord>, Self::Error> {
        let result = {
            let mut state = lock(&self.state);
            state.describe_calls += 1;
            state.describe_script.pop_front().unwrap_or_else(|| {
                state
                    .stacks
                    .get(name)
                    .cloned()
                    .map(|record| vec![record])
                    .ok_or_else(|| ScriptedBackendError::NotFound(name.to_owned()))
            })
        };
        Box::pin(async move { result })
    }

    fn create<'a>(
        &'a self,
        request: &'a CreateStackRequest,
    ) -> BackendFuture<'a, String, Self::Error> {
        let result = {
            let mut state = lock(&self.state);
            state.create_requests.push(request.clone());
            if state.fail_create {
                Err(ScriptedBackendError::Injected(String::from("create rejected")))
            } else {
                let id = format!("arn:aws:cloudformation:stack/{}", request.name);
                let record = StackRecord {
                    id: id.clone(),
                    name: request.name.clone(),
                    status: String::from("CREATE_COMPLETE"),
                    outputs: state.outputs.clone(),
                    parameters: request
                        .parameters
                        .iter()
                        .map(|param| (param.key.clone(), param.value.clone()))
                        .collect(),
                    ..StackRecord::default()
                };
                state.stacks.insert(request.name.clone(), record);
                Ok(id)
            }
        };
        Box::pin(async move { result })
    }

    fn delete<'a>(&'a self, name: &'a str) -> BackendFuture<'a, (), Self::Error> {
        let result = {
            let mut state = lock(&self.state);
            state.delete_calls.push(name.to_owned());
            if state.fail_delete {
                Err(ScriptedBackendError::Injected(String::from("delete rejected")))
            } else {
                state.stacks.remove(name);
                Ok(())
            }
        };
        Box::pin(async move { result })
    }

    fn list(&self) -> BackendFuture<'_, Vec<StackRecord>, Self::Error> {
        let records = lock(&self.state).listed.clone();
        Box::pin(async move { Ok(records) })
    }
}

/// Probe double that records URLs and answers from a per-URL script.
///
/// URLs without a scripted failure count succeed; [`EndpointProbe::fetch`]
/// returns the body registered with [`ScriptedProbe::set_body`].
#[derive(Clone, Debug, Default)]
pub struct ScriptedProbe {
    state: Arc<Mutex<ProbeState>>,
}

#[derive(Debug, Default)]
struct ProbeState {
    failures_before_ready: BTreeMap<String, usize>,
    bodies: BTreeMap<String, Vec<u8>>,
    checks: Vec<String>,
    fetches: Vec<String>,
}

impl ScriptedProbe {
    /// Creates a probe where every endpoint is immediately reachable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `url` fail `count` times before succeeding.
    pub fn fail_times(&self, url: &str, count: usize) {
        lock(&self.state)
            .failures_before_ready
            .insert(url.to_owned(), count);
    }

    /// Registers the body returned when fetching `url`.
    pub fn set_body(&self, url: &str, body: &[u8]) {
        lock(&self.state)
            .bodies
            .insert(url.to_owned(), body.to_vec());
    }

    /// URLs checked so far, in order, including retries.
    #[must_use]
    pub fn checks(&self) -> Vec<String> {
        lock(&self.state).checks.clone()
    }

    /// URLs fetched so far.
    #[must_use]
    pub fn fetches(&self) -> Vec<String> {
        lock(&self.state).fetches.clone()
    }
}

impl EndpointProbe for ScriptedProbe {
    fn check<'a>(&'a self, url: &'a str) -> ProbeFuture<'a, ()> {
        let result = {
            let mut state = lock(&self.state);
            state.checks.push(url.to_owned());
            match state.failures_before_ready.get_mut(url) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    Err(ProbeError::Request {
                        url: url.to_owned(),
                        message: String::from("connection refused"),
                    })
                }
                _ => Ok(()),
            }
        };
        Box::pin(async move { result })
    }

    fn fetch<'a>(&'a self, url: &'a str) -> ProbeFuture<'a, Vec<u8>> {
        let result = {
            let mut state = lock(&self.state);
            state.fetches.push(url.to_owned());
            state.bodies.get(url).cloned().ok_or_else(|| ProbeError::Status {
                url: url.to_owned(),
                status: 404,
            })
        };
        Box::pin(async move { result })
    }
}

/// Workstation events captured by [`RecordingWorkstation`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WorkstationEvent {
    /// A certificate file was trusted.
    Trusted(String),
    /// Trust for a CA host was removed.
    Revoked(String),
    /// A browser was opened.
    Opened(String),
}

/// Workstation double that records calls and optionally fails them.
#[derive(Clone, Debug, Default)]
pub struct RecordingWorkstation {
    events: Arc<Mutex<Vec<WorkstationEvent>>>,
    fail: bool,
}

impl RecordingWorkstation {
    /// Workstation whose operations succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Workstation whose operations all fail.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            events: Arc::default(),
            fail: true,
        }
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<WorkstationEvent> {
        lock(&self.events).clone()
    }

    fn record(&self, event: WorkstationEvent) -> Result<(), WorkstationError> {
        lock(&self.events).push(event);
        if self.fail {
            return Err(WorkstationError::Command(CommandError::Failed {
                program: String::from("security"),
                status: Some(1),
                status_text: String::from("1"),
                stderr: String::from("simulated failure"),
            }));
        }
        Ok(())
    }
}

impl Workstation for RecordingWorkstation {
    fn trust_certificate<'a>(&'a self, pem_path: &'a Utf8Path) -> WorkstationFuture<'a> {
        Box::pin(ready(
            self.record(WorkstationEvent::Trusted(pem_path.to_string())),
        ))
    }

    fn revoke_certificate<'a>(&'a self, ca_host: &'a str) -> WorkstationFuture<'a> {
        Box::pin(ready(
            self.record(WorkstationEvent::Revoked(ca_host.to_owned())),
        ))
    }

    fn open_browser<'a>(&'a self, url: &'a str) -> WorkstationFuture<'a> {
        Box::pin(ready(self.record(WorkstationEvent::Opened(url.to_owned()))))
    }
}

/// Serialises tests that touch `ORION_*` variables.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Holds [`ENV_LOCK`] and restores the touched variables when dropped.
pub struct EnvGuard {
    saved: BTreeMap<String, Option<OsString>>,
    _lock: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets each `(key, value)` pair for the lifetime of the guard.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        let lock = ENV_LOCK.lock().await;
        let mut saved = BTreeMap::new();
        for &(key, value) in pairs {
            saved
                .entry(key.to_owned())
                .or_insert_with(|| env::var_os(key));
            // SAFETY: every writer holds `ENV_LOCK`.
            unsafe { env::set_var(key, value) };
        }
        Self { saved, _lock: lock }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, before) in &self.saved {
            // SAFETY: `_lock` is still held here.
            unsafe {
                if let Some(value) = before {
                    env::set_var(key, value);
                } else {
                    env::remove_var(key);
                }
            }
        }
    }
}

/// Produces a `describe-stacks` JSON payload for one stack.
#[must_use]
pub fn json_describe_stacks(name: &str, status: &str, outputs: &[(&str, &str)]) -> String {
    let outputs_json = outputs
        .iter()
        .map(|(key, value)| format!("{{\"OutputKey\":\"{key}\",\"OutputValue\":\"{value}\"}}"))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        concat!(
            "{{\"Stacks\":[{{\"StackId\":\"arn:aws:cloudformation:us-east-1:123:stack/{name}/1\",",
            "\"StackName\":\"{name}\",\"Description\":\"Orion PTT System\",",
            "\"CreationTime\":\"2021-06-01T12:00:00.123000+00:00\",",
            "\"StackStatus\":\"{status}\",\"Outputs\":[{outputs}]}}]}}"
        ),
        name = name,
        status = status,
        outputs = outputs_json
    )
}
