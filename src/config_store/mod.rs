//! The per-stack JSON record an operator edits with `orion-ops config`.
//!
//! The file is read and written through `cap-std` so every access is scoped
//! to the directory that holds it. A missing file yields an empty record;
//! blank fields are filled interactively by [`StackConfig::fill_missing`].

use std::io::{self, BufRead, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod render;
mod source;

pub use render::{KEYSTORE_SIZE, TemplateData, generate_keystore, render_template};
pub use source::{ConfigSource, ObjectStore, SharedConfig, SourceError, resolve_source};

/// File name of the stack configuration in the operator's home directory.
pub const DEFAULT_CONFIG_FILE: &str = ".orion-ptt-system.json";

/// Instance type used when the record leaves it blank.
pub const DEFAULT_INSTANCE_TYPE: &str = "m5.2xlarge";

/// Shared password for the admin console when the record leaves it blank.
pub const DEFAULT_KOTSADM_PASSWORD: &str = "letmein";

/// Blank record written by `orion-ops template` and used to seed a new file.
pub const CONFIG_FILE_TEMPLATE: &str = r#"{
  "stack_name": "",
  "key_name": "",
  "user_name": "",
  "dns_domain": "",
  "kotsadm_password": "",
  "license_file": "",
  "instance_type": "m5.2xlarge",
  "ami_name": "orion-base*",
  "config_template": "https://orion-ptt-system-templates.s3.us-east-1.amazonaws.com/orion-ptt-system.tmpl",
  "shared_config": "https://orion-ptt-system-templates.s3.us-east-1.amazonaws.com/orion-ptt-system-shared-config.json"
}
"#;

/// Errors raised while reading, writing or completing the stack record.
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the record is not valid JSON.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the configured path has no file name component.
    #[error("configuration file path {path} is missing a filename")]
    MissingFileName {
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// Raised when an interactive prompt cannot read or write.
    #[error("prompt failed: {0}")]
    Prompt(String),
    /// Raised when a prompt is answered with a blank value.
    #[error("{field} is required")]
    Required {
        /// Label of the unanswered field.
        field: String,
    },
}

/// Stack record as stored on disk.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct StackConfig {
    /// CloudFormation stack name.
    pub stack_name: String,
    /// EC2 key pair installed on the instance.
    pub key_name: String,
    /// Route53 domain the stack's records are created in.
    pub dns_domain: String,
    /// EC2 instance type.
    pub instance_type: String,
    /// Remote user that receives the staged files.
    pub user_name: String,
    /// Local path of the product licence.
    pub license_file: String,
    /// Reference to the install config template.
    pub config_template: String,
    /// Shared password for the admin console.
    pub kotsadm_password: String,
    /// AMI name glob.
    pub ami_name: String,
    /// Reference to the shared network config.
    pub shared_config: String,
    /// Selects the beta template.
    #[serde(rename = "Beta")]
    pub beta: bool,
    /// JWK set rendered into the install config; generated when blank.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub keystore: String,
}

/// Reads a line of input for a labelled field.
pub trait Prompter {
    /// Asks for `label` and returns the trimmed answer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError::Prompt`] when input or output fails.
    fn ask(&mut self, label: &str) -> Result<String, ConfigStoreError>;
}

/// [`Prompter`] over any line reader and writer, normally the terminal.
#[derive(Debug)]
pub struct LinePrompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LinePrompter<R, W> {
    /// Creates a prompter reading answers from `input`.
    pub const fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl LinePrompter<io::StdinLock<'static>, io::Stderr> {
    /// Prompter bound to the process terminal.
    #[must_use]
    pub fn terminal() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> Prompter for LinePrompter<R, W> {
    fn ask(&mut self, label: &str) -> Result<String, ConfigStoreError> {
        let prompt_err = |err: io::Error| ConfigStoreError::Prompt(err.to_string());
        write!(self.output, "{label}: ").map_err(prompt_err)?;
        self.output.flush().map_err(prompt_err)?;
        let mut line = String::new();
        self.input.read_line(&mut line).map_err(prompt_err)?;
        Ok(line.trim().to_owned())
    }
}

impl StackConfig {
    /// Applies command-line overrides for name and key pair.
    pub fn apply_overrides(&mut self, name: Option<&str>, key_name: Option<&str>) {
        if let Some(value) = name.filter(|value| !value.trim().is_empty()) {
            value.trim().clone_into(&mut self.stack_name);
        }
        if let Some(value) = key_name.filter(|value| !value.trim().is_empty()) {
            value.trim().clone_into(&mut self.key_name);
        }
    }

    /// Prompts for every blank field a run needs. The key pair is only asked
    /// for when `key_needed` is set; the instance type falls back to
    /// [`DEFAULT_INSTANCE_TYPE`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError::Required`] when a prompt is answered with
    /// a blank line, or [`ConfigStoreError::Prompt`] on I/O failure.
    pub fn fill_missing(
        &mut self,
        prompter: &mut impl Prompter,
        key_needed: bool,
    ) -> Result<(), ConfigStoreError> {
        self.fill_name(prompter)?;
        if key_needed {
            fill_field(&mut self.key_name, "SSH Key Name", prompter)?;
        }
        fill_field(&mut self.dns_domain, "DNS Domain", prompter)?;
        fill_field(&mut self.ami_name, "AMI Name (orion-base*)", prompter)?;
        if self.instance_type.trim().is_empty() {
            DEFAULT_INSTANCE_TYPE.clone_into(&mut self.instance_type);
        }
        Ok(())
    }

    /// Prompts for the stack name alone, for commands that only address an
    /// existing stack.
    ///
    /// # Errors
    ///
    /// Same as [`StackConfig::fill_missing`].
    pub fn fill_name(&mut self, prompter: &mut impl Prompter) -> Result<(), ConfigStoreError> {
        fill_field(&mut self.stack_name, "Stack Name", prompter)
    }

    /// Password passed to `kubectl kots install`.
    #[must_use]
    pub fn shared_password(&self) -> &str {
        if self.kotsadm_password.trim().is_empty() {
            DEFAULT_KOTSADM_PASSWORD
        } else {
            &self.kotsadm_password
        }
    }

    /// Renders the record as indented JSON for `--dryrun`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError::Parse`] if serialisation fails.
    pub fn to_pretty_json(&self) -> Result<String, ConfigStoreError> {
        serde_json::to_string_pretty(self).map_err(|err| ConfigStoreError::Parse {
            path: Utf8PathBuf::from("<memory>"),
            message: err.to_string(),
        })
    }
}

fn fill_field(
    value: &mut String,
    label: &str,
    prompter: &mut impl Prompter,
) -> Result<(), ConfigStoreError> {
    if !value.trim().is_empty() {
        return Ok(());
    }
    let answer = prompter.ask(label)?;
    if answer.is_empty() {
        return Err(ConfigStoreError::Required {
            field: label.to_owned(),
        });
    }
    *value = answer;
    Ok(())
}

/// `~/.orion-ptt-system.json`, or the file in the working directory when no
/// home directory is known.
#[must_use]
pub fn default_config_path() -> Utf8PathBuf {
    std::env::var("HOME")
        .ok()
        .filter(|home| !home.is_empty())
        .map_or_else(
            || Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
            |home| Utf8PathBuf::from(home).join(DEFAULT_CONFIG_FILE),
        )
}

/// Loads and saves a [`StackConfig`] at a fixed path.
#[derive(Clone, Debug)]
pub struct StackConfigStore {
    path: Utf8PathBuf,
}

impl StackConfigStore {
    /// Store for the record at `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for the record at [`default_config_path`].
    #[must_use]
    pub fn at_default_path() -> Self {
        Self::new(default_config_path())
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Reads the record; a missing file yields an empty one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError::Io`] or [`ConfigStoreError::Parse`] when
    /// an existing file cannot be read or decoded.
    pub fn load(&self) -> Result<StackConfig, ConfigStoreError> {
        let Some(contents) = self.read()? else {
            return Ok(StackConfig::default());
        };
        if contents.trim().is_empty() {
            return Ok(StackConfig::default());
        }
        serde_json::from_str(&contents).map_err(|err| ConfigStoreError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }

    /// Writes the record as indented JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError::Io`] when the file cannot be written.
    pub fn save(&self, config: &StackConfig) -> Result<(), ConfigStoreError> {
        let rendered = serde_json::to_string_pretty(config).map_err(|err| {
            ConfigStoreError::Parse {
                path: self.path.clone(),
                message: err.to_string(),
            }
        })?;
        self.write(&format!("{rendered}\n"))
    }

    /// Seeds the file with [`CONFIG_FILE_TEMPLATE`] unless it already exists.
    /// Returns whether a new file was written.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError::Io`] when the file cannot be checked or
    /// written.
    pub fn ensure_exists(&self) -> Result<bool, ConfigStoreError> {
        if self.read()?.is_some() {
            return Ok(false);
        }
        self.write(CONFIG_FILE_TEMPLATE)?;
        Ok(true)
    }

    fn split(&self) -> Result<(&Utf8Path, &str), ConfigStoreError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| ConfigStoreError::MissingFileName {
                path: self.path.clone(),
            })?;
        Ok((parent, file_name))
    }

    fn read(&self) -> Result<Option<String>, ConfigStoreError> {
        let (parent, file_name) = self.split()?;
        let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(ConfigStoreError::Io {
                    path: parent.to_path_buf(),
                    message: err.to_string(),
                });
            }
        };
        match dir.read_to_string(file_name) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ConfigStoreError::Io {
                path: self.path.clone(),
                message: err.to_string(),
            }),
        }
    }

    fn write(&self, contents: &str) -> Result<(), ConfigStoreError> {
        let (parent, file_name) = self.split()?;
        Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| {
            ConfigStoreError::Io {
                path: parent.to_path_buf(),
                message: err.to_string(),
            }
        })?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| {
            ConfigStoreError::Io {
                path: parent.to_path_buf(),
                message: err.to_string(),
            }
        })?;
        dir.write(file_name, contents)
            .map_err(|err| ConfigStoreError::Io {
                path: self.path.clone(),
                message: err.to_string(),
            })
    }
}

#[cfg(test)]
mod tests;
