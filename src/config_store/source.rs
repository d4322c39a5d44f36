//! Resolution of `config_template` and `shared_config` references.
//!
//! A reference may carry the document itself (JSON, or JSON encoded as
//! base64), name an existing local file, point at an S3 object, or name a
//! git repository. The first interpretation that fits wins, in that order.
//! Anything else is read as a file path so a typo surfaces as a read error.

use std::io;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

use crate::backend::BackendFuture;
use crate::cloudformation::CloudFormationBackend;
use crate::command::CommandRunner;
use crate::remote::expand_tilde;

const S3_HOST_MARKER: &str = ".s3.";
const S3_HOST_SUFFIX: &str = "amazonaws.com";

/// Errors raised while resolving a configuration reference.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SourceError {
    /// Raised for an empty reference.
    #[error("no {what} configured")]
    Empty {
        /// Which reference was empty.
        what: String,
    },
    /// Raised for git references, which are recognised but not fetched.
    #[error("git sources are not supported: {repo} {path}")]
    Unsupported {
        /// Repository portion of the reference.
        repo: String,
        /// Path inside the repository.
        path: String,
    },
    /// Raised when an S3 object cannot be fetched.
    #[error("failed to fetch s3://{bucket}/{key}: {message}")]
    Fetch {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying failure.
        message: String,
    },
    /// Raised when a local file cannot be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a resolved document is not the JSON shape expected.
    #[error("invalid {what}: {message}")]
    Invalid {
        /// Document kind.
        what: String,
        /// Decoder message.
        message: String,
    },
    /// Raised when a template cannot be rendered.
    #[error("template error: {0}")]
    Template(String),
}

/// Where a reference points.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigSource {
    /// The document itself.
    Inline(String),
    /// An object in S3.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Region named in the URL, if any.
        region: Option<String>,
        /// Object key.
        key: String,
    },
    /// A file in a git repository.
    Git {
        /// `owner/repository`.
        repo: String,
        /// Path inside the repository.
        path: String,
    },
    /// A local file.
    File(Utf8PathBuf),
}

impl ConfigSource {
    /// Classifies `reference`. An existing local file wins over the URL and
    /// git forms.
    #[must_use]
    pub fn parse(reference: &str) -> Self {
        let trimmed = reference.trim();
        if is_json(trimmed) {
            return Self::Inline(trimmed.to_owned());
        }
        if let Some(decoded) = decode_base64_json(trimmed) {
            return Self::Inline(decoded);
        }
        let path = Utf8PathBuf::from(expand_tilde(trimmed));
        if is_local_file(&path) {
            return Self::File(path);
        }
        if let Some(s3) = parse_s3_url(trimmed) {
            return s3;
        }
        if trimmed.contains("git") {
            let (repo, repo_path) = split_repo_path(trimmed);
            return Self::Git {
                repo,
                path: repo_path,
            };
        }
        Self::File(path)
    }
}

/// Fetches objects from S3.
pub trait ObjectStore: Send + Sync {
    /// Returns the text of `s3://bucket/key`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Fetch`] when the object cannot be read.
    fn fetch_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> BackendFuture<'a, String, SourceError>;
}

impl<R: CommandRunner> ObjectStore for CloudFormationBackend<R> {
    fn fetch_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> BackendFuture<'a, String, SourceError> {
        Box::pin(async move {
            self.fetch_s3_object(bucket, key)
                .await
                .map_err(|err| SourceError::Fetch {
                    bucket: bucket.to_owned(),
                    key: key.to_owned(),
                    message: err.to_string(),
                })
        })
    }
}

/// Resolves `reference` to the document text. `what` names the reference in
/// errors.
///
/// # Errors
///
/// Returns [`SourceError`] when the reference is empty, names a git source,
/// or cannot be fetched or read.
pub async fn resolve_source(
    reference: &str,
    what: &str,
    store: &impl ObjectStore,
) -> Result<String, SourceError> {
    if reference.trim().is_empty() {
        return Err(SourceError::Empty {
            what: what.to_owned(),
        });
    }
    match ConfigSource::parse(reference) {
        ConfigSource::Inline(text) => Ok(text),
        ConfigSource::S3 { bucket, key, .. } => store.fetch_object(&bucket, &key).await,
        ConfigSource::Git { repo, path } => Err(SourceError::Unsupported { repo, path }),
        ConfigSource::File(path) => read_file(&path),
    }
}

/// Network settings shared by every stack in an account.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct SharedConfig {
    /// Candidate public subnets, in order of preference.
    #[serde(default)]
    pub subnet_ids: Vec<String>,
}

impl SharedConfig {
    /// Decodes the shared config document.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Invalid`] when the text is not the expected
    /// JSON object.
    pub fn parse(text: &str) -> Result<Self, SourceError> {
        serde_json::from_str(text).map_err(|err| SourceError::Invalid {
            what: String::from("shared config"),
            message: err.to_string(),
        })
    }
}

fn is_json(text: &str) -> bool {
    (text.starts_with('{') || text.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(text).is_ok()
}

fn is_local_file(path: &Utf8Path) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    Dir::open_ambient_dir(parent, ambient_authority()).is_ok_and(|dir| dir.is_file(name))
}

fn decode_base64_json(text: &str) -> Option<String> {
    let bytes = STANDARD.decode(text).ok()?;
    let decoded = String::from_utf8(bytes).ok()?;
    let candidate = decoded.trim();
    is_json(candidate).then(|| candidate.to_owned())
}

fn parse_s3_url(text: &str) -> Option<ConfigSource> {
    let url = Url::parse(text).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?;
    let (bucket, rest) = host.split_once(S3_HOST_MARKER)?;
    let region = rest
        .strip_suffix(S3_HOST_SUFFIX)?
        .trim_end_matches('.')
        .to_owned();
    Some(ConfigSource::S3 {
        bucket: bucket.to_owned(),
        region: (!region.is_empty()).then_some(region),
        key: url.path().trim_start_matches('/').to_owned(),
    })
}

fn split_repo_path(reference: &str) -> (String, String) {
    let mut segments = reference.trim_matches('/').splitn(3, '/');
    let owner = segments.next().unwrap_or_default();
    let repo = segments.next().unwrap_or_default();
    let path = segments.next().unwrap_or_default();
    let repo_name = if repo.is_empty() {
        owner.to_owned()
    } else {
        format!("{owner}/{repo}")
    };
    (repo_name, path.to_owned())
}

fn read_file(path: &Utf8Path) -> Result<String, SourceError> {
    let io_err = |target: &Utf8Path, err: &io::Error| SourceError::Io {
        path: target.to_path_buf(),
        message: err.to_string(),
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| SourceError::Io {
        path: path.to_path_buf(),
        message: String::from("path is missing a filename"),
    })?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| io_err(parent, &err))?;
    dir.read_to_string(file_name)
        .map_err(|err| io_err(path, &err))
}
