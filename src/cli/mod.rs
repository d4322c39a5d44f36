//! Command-line interface definitions for the `orion-ops` binary.
//!
//! The clap structures live here on their own so the build script can reuse
//! them when generating the manual page.

use clap::{ArgAction, Args, Parser, Subcommand};

/// Top-level CLI for the `orion-ops` binary.
#[derive(Debug, Parser)]
#[command(
    name = "orion-ops",
    version,
    about = "Provision and manage Orion PTT System stacks on AWS CloudFormation",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) global: GlobalArgs,
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Flags accepted by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct GlobalArgs {
    /// Stack name, overriding the configuration file.
    #[arg(short = 'n', long, global = true, value_name = "NAME")]
    pub(crate) name: Option<String>,
    /// EC2 key pair used for SSH, overriding the configuration file.
    #[arg(short = 'k', long = "keyname", global = true, value_name = "KEY")]
    pub(crate) key_name: Option<String>,
    /// Stack configuration file (default `~/.orion-ptt-system.json`).
    #[arg(short = 'c', long, global = true, value_name = "PATH")]
    pub(crate) config: Option<String>,
    /// Delete the stack automatically when its creation rolls back.
    #[arg(
        short = 'r',
        long,
        global = true,
        default_value_t = true,
        action = ArgAction::Set,
        value_name = "BOOL"
    )]
    pub(crate) rollback: bool,
    /// Print the resolved configuration and exit without changing anything.
    #[arg(short = 'd', long, global = true)]
    pub(crate) dryrun: bool,
    /// Stop after copying the licence and config to the new host.
    #[arg(short = 's', long = "stageonly", global = true)]
    pub(crate) stage_only: bool,
}

/// Operator commands.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Create a stack and install the application on it.
    Create(NameArg),
    /// Delete a stack and wait until it is gone.
    Destroy(NameArg),
    /// Destroy a stack and create it again with the same key pair.
    Rebuild(NameArg),
    /// List the Orion stacks in the account.
    List,
    /// Show a stack's status and outputs.
    Status(NameArg),
    /// Print a single stack output.
    Get(GetCommand),
    /// Download a stack's CA certificate into the working directory.
    Cacert(NameArg),
    /// Edit the stack configuration file.
    Config,
    /// Print a blank stack configuration file.
    Template,
    /// Serve the management API and UI.
    Server(ServerCommand),
}

/// Optional positional stack name.
#[derive(Debug, Args)]
pub(crate) struct NameArg {
    /// Stack name; takes precedence over `--name`.
    #[arg(value_name = "NAME")]
    pub(crate) name: Option<String>,
}

/// Arguments for `orion-ops get`.
#[derive(Debug, Args)]
pub(crate) struct GetCommand {
    /// Output key to print, matched without regard to case.
    #[arg(value_name = "FIELD")]
    pub(crate) field: String,
    /// Stack name; takes precedence over `--name`.
    #[arg(value_name = "NAME")]
    pub(crate) name: Option<String>,
    /// Omit the trailing newline.
    #[arg(long)]
    pub(crate) no_newline: bool,
}

/// Arguments for `orion-ops server`.
#[derive(Debug, Args)]
pub(crate) struct ServerCommand {
    /// Address to listen on.
    #[arg(short = 'a', long, default_value = "0.0.0.0")]
    pub(crate) address: String,
    /// Port to listen on.
    #[arg(short = 'p', long, default_value_t = 3000)]
    pub(crate) port: u16,
    /// Directory of static UI files served at `/`.
    #[arg(long, value_name = "DIR")]
    pub(crate) ui_dir: Option<String>,
}
