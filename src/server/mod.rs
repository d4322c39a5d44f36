//! HTTP management server for the stacks in one or more AWS accounts.
//!
//! Every request builds its own backend for the account in the path, so the
//! only shared state is the immutable [`AppState`].

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use camino::Utf8PathBuf;
use serde::Deserialize;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::backend::StackBackend;
use crate::cloudformation::{
    AwsCredentials, AwsSettings, CloudFormationBackend, CloudFormationError,
};
use crate::command::ProcessCommandRunner;
use crate::probe::EndpointProbe;

mod error;
mod handlers;

pub use error::{ApiError, ApiResult, ServerError};
pub use handlers::{StackDetails, StackEntry, format_uptime};

/// Variable holding base64-encoded JSON account credentials.
pub const ACCOUNT_ENV_VAR: &str = "AWS_ACCOUNT_CREDENTIALS";

/// Default listen address.
pub const DEFAULT_ADDRESS: &str = "0.0.0.0";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3000;

/// Placeholder reported for endpoints that do not answer yet.
pub const NOT_READY: &str = "Not Ready";

/// One AWS account the server manages.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct Account {
    /// Account number used in request paths.
    #[serde(rename = "account_number")]
    pub number: String,
    /// Static access key id; blank to use the default credential chain.
    #[serde(rename = "aws_access_key_id", default)]
    pub access_key_id: String,
    /// Static secret key.
    #[serde(rename = "aws_secret_access_key", default)]
    pub secret_access_key: String,
    /// Region for calls made with these credentials.
    #[serde(rename = "aws_region", default)]
    pub region: String,
}

impl Account {
    /// Account reached through the default credential chain.
    #[must_use]
    pub fn ambient(number: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            ..Self::default()
        }
    }

    fn has_static_credentials(&self) -> bool {
        !(self.access_key_id.is_empty() && self.secret_access_key.is_empty())
    }
}

/// Decodes the accounts listed in `encoded` (base64 of a JSON array).
///
/// # Errors
///
/// Returns [`ServerError::Accounts`] when the value is not base64 or not
/// the expected JSON.
pub fn decode_accounts(encoded: &str) -> Result<Vec<Account>, ServerError> {
    let invalid = |message: String| ServerError::Accounts {
        var: ACCOUNT_ENV_VAR,
        message,
    };
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|err| invalid(err.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|err| invalid(err.to_string()))
}

/// Accounts from [`ACCOUNT_ENV_VAR`] when set, otherwise the single account
/// of the server's own credentials as reported by `caller_account`.
///
/// # Errors
///
/// Returns [`ServerError::Accounts`] for an undecodable variable and
/// [`ServerError::Lookup`] when the caller identity cannot be read.
pub async fn resolve_accounts<F, Fut>(
    encoded: Option<&str>,
    caller_account: F,
) -> Result<Vec<Account>, ServerError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<String, CloudFormationError>>,
{
    if let Some(value) = encoded.filter(|value| !value.trim().is_empty()) {
        debug!(var = ACCOUNT_ENV_VAR, "using account credentials from environment");
        return decode_accounts(value);
    }
    debug!("using default credentials");
    Ok(vec![Account::ambient(caller_account().await?)])
}

/// Builds the stack backend for an account.
pub trait BackendFactory: Send + Sync + 'static {
    /// Backend type produced.
    type Backend: StackBackend + Send + Sync + 'static;

    /// Backend authenticated as `account`.
    fn backend_for(&self, account: &Account) -> Self::Backend;
}

/// Produces AWS CLI backends, layering static account credentials over the
/// base settings.
#[derive(Clone, Debug)]
pub struct CliBackendFactory {
    base: AwsSettings,
}

impl CliBackendFactory {
    /// Factory starting from `base`.
    #[must_use]
    pub const fn new(base: AwsSettings) -> Self {
        Self { base }
    }

    /// Settings used for `account`.
    #[must_use]
    pub fn settings_for(&self, account: &Account) -> AwsSettings {
        let mut settings = self.base.clone();
        if account.has_static_credentials() {
            settings.credentials = Some(AwsCredentials {
                access_key_id: account.access_key_id.clone(),
                secret_access_key: account.secret_access_key.clone(),
            });
            settings.profile = None;
        }
        if !account.region.is_empty() {
            settings.region = Some(account.region.clone());
        }
        settings
    }
}

impl BackendFactory for CliBackendFactory {
    type Backend = CloudFormationBackend<ProcessCommandRunner>;

    fn backend_for(&self, account: &Account) -> Self::Backend {
        CloudFormationBackend::with_process_runner(self.settings_for(account))
    }
}

/// State shared by every handler.
#[derive(Debug)]
pub struct AppState<F, P> {
    /// Managed accounts.
    pub accounts: Vec<Account>,
    /// Backend builder.
    pub factory: F,
    /// Probe for endpoint pings and CA downloads.
    pub probe: P,
    /// Template URL recorded on handles; listing filters on its description.
    pub template_url: String,
    /// Description that marks a stack as ours.
    pub template_description: String,
}

impl<F, P> AppState<F, P> {
    pub(crate) fn account(&self, number: &str) -> ApiResult<&Account> {
        self.accounts
            .iter()
            .find(|account| account.number == number)
            .ok_or_else(|| ApiError::NotFound(format!("unknown account {number}")))
    }
}

/// Builds the router: the JSON API under `/api` and, when given, the static
/// UI at `/`.
pub fn router<F, P>(state: Arc<AppState<F, P>>, ui_dir: Option<Utf8PathBuf>) -> Router
where
    F: BackendFactory,
    P: EndpointProbe + Send + Sync + 'static,
{
    let api = Router::new()
        .route("/api/", get(handlers::pong))
        .route("/api/stacks", get(handlers::list_stacks::<F, P>))
        .route(
            "/api/stacks/{account}/{stack}",
            get(handlers::stack_details::<F, P>).delete(handlers::delete_stack::<F, P>),
        )
        .route(
            "/api/stacks/{account}/{stack}/ca",
            get(handlers::stack_ca::<F, P>),
        )
        .with_state(state);

    let app = match ui_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir.into_std_path_buf())),
        None => api,
    };
    app.layer(TraceLayer::new_for_http())
}

/// Binds `address:port` and serves `app` until the process stops.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] when the listener cannot bind and
/// [`ServerError::Serve`] when serving fails.
pub async fn serve(address: &str, port: u16, app: Router) -> Result<(), ServerError> {
    let addr = format!("{address}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|err| ServerError::Bind {
            addr: addr.clone(),
            message: err.to_string(),
        })?;
    info!(addr = %addr, "server starting");
    axum::serve(listener, app)
        .await
        .map_err(|err| ServerError::Serve(err.to_string()))
}

#[cfg(test)]
mod tests;
