//! Building blocks for the operator commands.
//!
//! The binary resolves configuration and wires real adapters; everything
//! that decides what a command prints or sends lives here so it can run
//! against scripted backends.

use std::io::Write;

use crate::config_store::CONFIG_FILE_TEMPLATE;

mod edit;
mod error;
mod inspect;
mod prepare;

pub use edit::{DEFAULT_EDITOR, Editor, ProcessEditor, edit_config};
pub use error::OpsError;
pub use inspect::{
    existing_key_name, fetch_ca, get_output, list_stacks, show_status, write_dry_run,
};
pub use prepare::{
    AccountLookups, INSTANCE_NAME, ProvisionPlan, VOLUME_SIZE_GIB, creation_parameters,
    install_settings, plan_provision, plan_then_teardown,
};

/// Prints the blank stack record.
///
/// # Errors
///
/// Returns any error from `out`.
pub fn write_template(out: &mut impl Write) -> std::io::Result<()> {
    out.write_all(CONFIG_FILE_TEMPLATE.as_bytes())
}

#[cfg(test)]
mod tests;
