//! Binary entry point for the `orion-ops` CLI.

use std::env;
use std::io::{self, IsTerminal, Write};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use orion_ops::cloudformation::{CloudFormationBackend, CloudFormationError};
use orion_ops::command::ProcessCommandRunner;
use orion_ops::commands::{
    OpsError, ProcessEditor, ProvisionPlan, edit_config, existing_key_name, fetch_ca, get_output,
    list_stacks, plan_provision, plan_then_teardown, show_status, write_dry_run, write_template,
};
use orion_ops::config::{ConfigError, OpsConfig};
use orion_ops::config_store::{ConfigStoreError, LinePrompter, StackConfig, StackConfigStore};
use orion_ops::pipeline::{
    DestructionPipeline, PipelineOptions, PipelineTimings, ProvisioningPipeline,
};
use orion_ops::probe::{HttpProbe, ProbeError};
use orion_ops::server::{
    ACCOUNT_ENV_VAR, AppState, CliBackendFactory, ServerError, resolve_accounts, router, serve,
};
use orion_ops::stack::StackHandle;
use orion_ops::workstation::LocalWorkstation;

mod cli;

use cli::{Cli, Command, GetCommand, GlobalArgs, ServerCommand};

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "orion_ops=info,tower_http=info";

/// Timeout for the server's endpoint pings and CA downloads.
const SERVER_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

type Backend = CloudFormationBackend<ProcessCommandRunner>;
type CommandFailure = OpsError<CloudFormationError>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] ConfigStoreError),
    #[error(transparent)]
    Ops(#[from] CommandFailure),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error("failed to write output: {0}")]
    Output(String),
    #[error("working directory is not usable: {0}")]
    WorkingDir(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let Cli { global, command } = cli;
    match command {
        Command::Template => {
            write_template(&mut io::stdout().lock()).map_err(|err| output_err(&err))
        }
        Command::Config => edit_command(&global),
        Command::Server(args) => server_command(args).await,
        Command::List => list_command().await,
        Command::Create(arg) => create_command(&global, arg.name.as_deref()).await,
        Command::Destroy(arg) => destroy_command(&global, arg.name.as_deref()).await,
        Command::Rebuild(arg) => rebuild_command(&global, arg.name.as_deref()).await,
        Command::Status(arg) => {
            let session = Session::for_existing(&global, arg.name.as_deref())?;
            show_status(&session.handle(), &mut io::stdout().lock()).await?;
            Ok(())
        }
        Command::Get(args) => get_command(&global, args).await,
        Command::Cacert(arg) => {
            let session = Session::for_existing(&global, arg.name.as_deref())?;
            let probe = HttpProbe::insecure()?;
            fetch_ca(
                &session.handle(),
                &probe,
                &working_dir()?,
                &mut io::stdout().lock(),
            )
            .await?;
            Ok(())
        }
    }
}

/// Operational settings plus the stack record one command acts on.
struct Session {
    ops: OpsConfig,
    stack: StackConfig,
}

impl Session {
    fn load(global: &GlobalArgs, name: Option<&str>) -> Result<Self, CliError> {
        let ops = OpsConfig::load_without_cli_args()?;
        ops.validate()?;
        let mut stack = config_store(global).load()?;
        stack.apply_overrides(name.or(global.name.as_deref()), global.key_name.as_deref());
        Ok(Self { ops, stack })
    }

    fn for_existing(global: &GlobalArgs, name: Option<&str>) -> Result<Self, CliError> {
        let mut session = Self::load(global, name)?;
        session.stack.fill_name(&mut LinePrompter::terminal())?;
        Ok(session)
    }

    fn backend(&self) -> Backend {
        Backend::with_process_runner(self.ops.aws_settings())
    }

    fn template_url(&self) -> &str {
        self.ops.template_for(self.stack.beta)
    }

    fn handle(&self) -> StackHandle<Backend> {
        StackHandle::new(self.backend(), &self.stack.stack_name, self.template_url())
    }
}

fn config_store(global: &GlobalArgs) -> StackConfigStore {
    global
        .config
        .as_deref()
        .map_or_else(StackConfigStore::at_default_path, StackConfigStore::new)
}

fn edit_command(global: &GlobalArgs) -> Result<(), CliError> {
    let store = config_store(global);
    edit_config::<CloudFormationError>(&store, &ProcessEditor::from_env())?;
    info!(path = %store.path(), "stack configuration saved");
    Ok(())
}

async fn create_command(global: &GlobalArgs, name: Option<&str>) -> Result<(), CliError> {
    let mut session = Session::load(global, name)?;
    session
        .stack
        .fill_missing(&mut LinePrompter::terminal(), true)?;
    if global.dryrun {
        return dry_run(&session.stack);
    }
    session.ops.validate_for_create()?;
    let plan = plan_provision::<CloudFormationError>(
        &session.backend(),
        &session.ops.ami_owner,
        &session.stack,
    )
    .await?;
    provision(&session, global, plan).await
}

async fn rebuild_command(global: &GlobalArgs, name: Option<&str>) -> Result<(), CliError> {
    let mut session = Session::for_existing(global, name)?;
    session.stack.key_name = existing_key_name(&session.handle()).await?;
    session
        .stack
        .fill_missing(&mut LinePrompter::terminal(), true)?;
    if global.dryrun {
        return dry_run(&session.stack);
    }
    session.ops.validate_for_create()?;
    let plan = plan_then_teardown::<CloudFormationError, CliError, _, _>(
        &session.backend(),
        &session.ops.ami_owner,
        &session.stack,
        || destroy(&session),
    )
    .await?;
    provision(&session, global, plan).await
}

async fn destroy_command(global: &GlobalArgs, name: Option<&str>) -> Result<(), CliError> {
    let session = Session::for_existing(global, name)?;
    if global.dryrun {
        return dry_run(&session.stack);
    }
    destroy(&session).await
}

async fn destroy(session: &Session) -> Result<(), CliError> {
    let elapsed = DestructionPipeline::new(session.handle(), LocalWorkstation::detect())
        .destroy()
        .await
        .map_err(CommandFailure::from)?;
    writeln!(
        io::stdout(),
        "Stack {} destroyed after {}s",
        session.stack.stack_name,
        elapsed.as_secs()
    )
    .map_err(|err| output_err(&err))
}

async fn provision(
    session: &Session,
    global: &GlobalArgs,
    plan: ProvisionPlan,
) -> Result<(), CliError> {
    let ProvisionPlan {
        parameters,
        install,
    } = plan;
    let stack = StackHandle::new(
        session.backend(),
        &session.stack.stack_name,
        session.template_url(),
    )
    .with_parameters(parameters)
    .with_auto_rollback(global.rollback);

    let pipeline = ProvisioningPipeline::new(
        stack,
        ProcessCommandRunner,
        HttpProbe::insecure()?,
        LocalWorkstation::detect(),
        install,
    )
    .with_ssh(session.ops.ssh_settings(), session.ops.ssh_port)
    .with_options(pipeline_options(
        global,
        io::stdin().is_terminal(),
        working_dir()?,
    ));

    let report = pipeline
        .create(&mut io::stdout())
        .await
        .map_err(CommandFailure::from)?;
    info!(
        stack = %report.stack_name,
        staged_only = report.staged_only,
        "provisioning finished"
    );
    Ok(())
}

fn pipeline_options(
    global: &GlobalArgs,
    interactive: bool,
    ca_dir: Utf8PathBuf,
) -> PipelineOptions {
    PipelineOptions {
        stage_only: global.stage_only,
        interactive,
        ca_dir,
        timings: PipelineTimings::default(),
    }
}

async fn list_command() -> Result<(), CliError> {
    let ops = OpsConfig::load_without_cli_args()?;
    ops.validate()?;
    let backend = Backend::with_process_runner(ops.aws_settings());
    let template_url = ops.template_for(false);
    let description = backend
        .template_description(template_url)
        .await
        .map_err(CommandFailure::Lookup)?;
    let lister = StackHandle::new(backend, "", template_url);
    list_stacks(&lister, &description, &mut io::stdout().lock()).await?;
    Ok(())
}

async fn get_command(global: &GlobalArgs, args: GetCommand) -> Result<(), CliError> {
    let session = Session::for_existing(global, args.name.as_deref())?;
    get_output(
        &session.handle(),
        &args.field,
        !args.no_newline,
        &mut io::stdout().lock(),
    )
    .await?;
    Ok(())
}

async fn server_command(args: ServerCommand) -> Result<(), CliError> {
    let ops = OpsConfig::load_without_cli_args()?;
    ops.validate()?;
    let base = Backend::with_process_runner(ops.aws_settings());
    let encoded = env::var(ACCOUNT_ENV_VAR).ok();
    let accounts = resolve_accounts(encoded.as_deref(), || base.caller_account()).await?;
    let template_url = ops.template_for(false).to_owned();
    let template_description = base
        .template_description(&template_url)
        .await
        .map_err(ServerError::from)?;
    info!(accounts = accounts.len(), "managing accounts");

    let state = Arc::new(AppState {
        accounts,
        factory: CliBackendFactory::new(ops.aws_settings()),
        probe: HttpProbe::insecure_with_timeout(SERVER_PROBE_TIMEOUT)?,
        template_url,
        template_description,
    });
    let app = router(state, args.ui_dir.map(Utf8PathBuf::from));
    serve(&args.address, args.port, app).await?;
    Ok(())
}

fn dry_run(config: &StackConfig) -> Result<(), CliError> {
    write_dry_run::<CloudFormationError>(config, &mut io::stdout().lock())?;
    Ok(())
}

fn working_dir() -> Result<Utf8PathBuf, CliError> {
    let cwd = env::current_dir().map_err(|err| CliError::WorkingDir(err.to_string()))?;
    Utf8PathBuf::from_path_buf(cwd)
        .map_err(|path| CliError::WorkingDir(path.display().to_string()))
}

fn output_err(err: &io::Error) -> CliError {
    CliError::Output(err.to_string())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "Error: {err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
