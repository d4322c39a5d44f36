//! Read-only commands: `status`, `get`, `list`, `cacert` and dry runs.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};

use crate::backend::StackBackend;
use crate::config_store::StackConfig;
use crate::pipeline::{OUTPUT_CA, ca_url, fetch_ca_certificate, write_outputs};
use crate::probe::EndpointProbe;
use crate::stack::{StackHandle, StackSummary};

use super::OpsError;

fn stdout_err<E>(err: &std::io::Error) -> OpsError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    OpsError::io("<stdout>", err)
}

/// Prints the stack status followed by its outputs table.
///
/// # Errors
///
/// Returns the stack error when status or outputs cannot be read.
pub async fn show_status<B>(
    stack: &StackHandle<B>,
    out: &mut impl Write,
) -> Result<(), OpsError<B::Error>>
where
    B: StackBackend,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let status = stack.status().await?;
    let outputs = stack.outputs().await?;
    writeln!(out, "Status for stack {:?}: {status}", stack.name())
        .and_then(|()| write_outputs(out, &outputs))
        .map_err(|err| stdout_err(&err))
}

/// Prints the output whose key matches `field` ignoring case, with or
/// without a trailing newline.
///
/// # Errors
///
/// Returns [`OpsError::UnknownOutput`] when no key matches.
pub async fn get_output<B>(
    stack: &StackHandle<B>,
    field: &str,
    newline: bool,
    out: &mut impl Write,
) -> Result<(), OpsError<B::Error>>
where
    B: StackBackend,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let outputs = stack.outputs().await?;
    let value = outputs
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(field))
        .map(|(_, value)| value)
        .ok_or_else(|| OpsError::UnknownOutput {
            name: stack.name().to_owned(),
            field: field.to_owned(),
        })?;
    let written = if newline {
        writeln!(out, "{value}")
    } else {
        write!(out, "{value}")
    };
    written.map_err(|err| stdout_err(&err))
}

/// Lists stacks created from the template whose description is
/// `description`.
///
/// # Errors
///
/// Returns the stack error when the listing fails.
pub async fn list_stacks<B>(
    stack: &StackHandle<B>,
    description: &str,
    out: &mut impl Write,
) -> Result<Vec<StackSummary>, OpsError<B::Error>>
where
    B: StackBackend,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let stacks = stack.list_stacks(description).await?;
    writeln!(out, "Stacks currently registered in CloudFormation:")
        .map_err(|err| stdout_err(&err))?;
    for summary in &stacks {
        writeln!(out, "  {}", summary.name).map_err(|err| stdout_err(&err))?;
    }
    Ok(stacks)
}

/// Downloads the stack's CA certificate into `dir` without trusting it.
///
/// # Errors
///
/// Returns the stack error when outputs cannot be read and the pipeline
/// error when the download or write fails.
pub async fn fetch_ca<B, P>(
    stack: &StackHandle<B>,
    probe: &P,
    dir: &Utf8Path,
    out: &mut impl Write,
) -> Result<Utf8PathBuf, OpsError<B::Error>>
where
    B: StackBackend,
    B::Error: std::error::Error + Send + Sync + 'static,
    P: EndpointProbe + Sync,
{
    let outputs = stack.outputs().await?;
    let ca_host = outputs.get(OUTPUT_CA).cloned().unwrap_or_default();
    writeln!(out, "CA Certificate URL: {}", ca_url(&ca_host)).map_err(|err| stdout_err(&err))?;
    let path = fetch_ca_certificate::<P, B::Error>(probe, &ca_host, dir).await?;
    writeln!(out, "CA certificate written to: {path}").map_err(|err| stdout_err(&err))?;
    Ok(path)
}

/// Reads the key pair a running stack was created with, for `rebuild`.
///
/// # Errors
///
/// Returns [`OpsError::Missing`] when the stack is not visible.
pub async fn existing_key_name<B>(stack: &StackHandle<B>) -> Result<String, OpsError<B::Error>>
where
    B: StackBackend,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    if !stack.exists().await {
        return Err(OpsError::Missing {
            name: stack.name().to_owned(),
        });
    }
    let params = stack.params().await?;
    Ok(params.get("KeyName").cloned().unwrap_or_default())
}

/// Prints the resolved record for `--dryrun`.
///
/// # Errors
///
/// Returns [`OpsError::Store`] if the record cannot be rendered.
pub fn write_dry_run<E>(config: &StackConfig, out: &mut impl Write) -> Result<(), OpsError<E>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let rendered = config.to_pretty_json()?;
    writeln!(out, "Config:\n{rendered}").map_err(|err| stdout_err(&err))
}
