//! Operational configuration loading via `ortho-config`.
//!
//! These settings describe how the tool reaches AWS and the provisioned
//! host. The per-stack record an operator edits lives in
//! [`crate::config_store`].

use ortho_config::OrthoConfig;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::cloudformation::{AwsSettings, DEFAULT_AWS_BIN};
use crate::remote::{DEFAULT_SSH_PORT, SshSettings};

/// Template instantiated by `create` unless the beta flag is set.
pub const DEFAULT_TEMPLATE_URL: &str =
    "https://orion-ptt-system.s3.amazonaws.com/orion-ptt-system.yaml";

/// Template instantiated when the stack configuration sets `beta`.
pub const BETA_TEMPLATE_URL: &str =
    "https://orion-ptt-system-beta.s3.amazonaws.com/orion-ptt-system.yaml";

/// AWS, SSH and template settings merged from defaults, `orion-ops.toml`
/// and `ORION_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "ORION",
    discovery(
        app_name = "orion-ops",
        env_var = "ORION_CONFIG_PATH",
        config_file_name = "orion-ops.toml",
        dotfile_name = ".orion-ops.toml",
        project_file_name = "orion-ops.toml"
    )
)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "ssh toggles are naturally expressed as booleans"
)]
pub struct OpsConfig {
    /// Path to the `aws` executable.
    #[ortho_config(default = DEFAULT_AWS_BIN.to_owned())]
    pub aws_bin: String,
    /// Region passed to every AWS call; the CLI default applies when unset.
    pub aws_region: Option<String>,
    /// Named AWS profile.
    pub aws_profile: Option<String>,
    /// Account that publishes the base AMIs.
    #[ortho_config(default = String::new())]
    #[serde(deserialize_with = "account_id")]
    pub ami_owner: String,
    /// Stable template URL.
    #[ortho_config(default = DEFAULT_TEMPLATE_URL.to_owned())]
    pub template_url: String,
    /// Beta template URL.
    #[ortho_config(default = BETA_TEMPLATE_URL.to_owned())]
    pub beta_template_url: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// SSH port on provisioned hosts.
    #[ortho_config(default = DEFAULT_SSH_PORT)]
    pub ssh_port: u16,
    /// Whether to force batch mode for SSH to avoid password prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking; off for freshly built hosts.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Private key for SSH; the agent is used when unset.
    pub ssh_identity_file: Option<String>,
}

/// Where an operator can set a required field.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl OpsConfig {
    /// Merges defaults, `orion-ops.toml` and `ORION_*` variables. Command-line
    /// flags are handled separately by the binary.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("orion-ops")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks the fields every command needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the variable to set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.aws_bin,
            &FieldMetadata::new("AWS CLI path", "ORION_AWS_BIN", "aws_bin"),
        )?;
        Self::require_field(
            &self.ssh_bin,
            &FieldMetadata::new("ssh path", "ORION_SSH_BIN", "ssh_bin"),
        )?;
        Self::require_field(
            &self.template_url,
            &FieldMetadata::new("template URL", "ORION_TEMPLATE_URL", "template_url"),
        )?;
        Self::require_field(
            &self.beta_template_url,
            &FieldMetadata::new(
                "beta template URL",
                "ORION_BETA_TEMPLATE_URL",
                "beta_template_url",
            ),
        )?;
        if let Some(identity) = &self.ssh_identity_file {
            Self::require_field(
                identity,
                &FieldMetadata::new(
                    "ssh identity file",
                    "ORION_SSH_IDENTITY_FILE",
                    "ssh_identity_file",
                ),
            )?;
        }
        Ok(())
    }

    /// Checks the fields only stack creation needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when no AMI owner is configured.
    pub fn validate_for_create(&self) -> Result<(), ConfigError> {
        self.validate()?;
        Self::require_field(
            &self.ami_owner,
            &FieldMetadata::new("AMI owner account", "ORION_AMI_OWNER", "ami_owner"),
        )
    }

    /// Template URL for the stable or beta channel.
    #[must_use]
    pub fn template_for(&self, beta: bool) -> &str {
        if beta {
            &self.beta_template_url
        } else {
            &self.template_url
        }
    }

    /// AWS CLI settings using the default credential chain.
    #[must_use]
    pub fn aws_settings(&self) -> AwsSettings {
        AwsSettings {
            aws_bin: self.aws_bin.clone(),
            region: self.aws_region.clone(),
            profile: self.aws_profile.clone(),
            credentials: None,
        }
    }

    /// SSH client settings.
    #[must_use]
    pub fn ssh_settings(&self) -> SshSettings {
        SshSettings {
            ssh_bin: self.ssh_bin.clone(),
            batch_mode: self.ssh_batch_mode,
            strict_host_key_checking: self.ssh_strict_host_key_checking,
            known_hosts_file: self.ssh_known_hosts_file.clone(),
            identity_file: self.ssh_identity_file.clone(),
        }
    }

    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to orion-ops.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }
}

/// Failures while loading or checking [`OpsConfig`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A required field is blank.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// The layered merge failed.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

/// Environment layers hand digit-only values over as integers.
#[derive(Deserialize)]
#[serde(untagged)]
enum AccountId {
    Text(String),
    Number(u64),
}

/// Accepts an AWS account id written as a string or a bare number, restoring
/// the leading zeros a numeric parse drops.
fn account_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match AccountId::deserialize(deserializer)? {
        AccountId::Text(text) => text,
        AccountId::Number(number) => format!("{number:012}"),
    })
}
