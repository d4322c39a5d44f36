//! HTTP reachability probes against freshly provisioned endpoints.
//!
//! A new stack serves certificates issued by its own bootstrap authority, so
//! the probe client skips TLS verification. That relaxation is confined to
//! the [`HttpProbe`] client and never touches any other HTTP client.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

/// Per-request ceiling for [`HttpProbe::insecure`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Future returned by probe operations.
pub type ProbeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProbeError>> + Send + 'a>>;

/// Errors raised by endpoint probes.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProbeError {
    /// The HTTP client could not be built.
    #[error("failed to build probe client: {0}")]
    Client(String),
    /// The request failed at the transport level.
    #[error("request to {url} failed: {message}")]
    Request {
        /// Probed URL.
        url: String,
        /// Transport error message.
        message: String,
    },
    /// The endpoint answered with a non-success status.
    #[error("{url} answered with HTTP {status}")]
    Status {
        /// Probed URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
}

/// Reachability checks and downloads used by the pipelines and the server.
pub trait EndpointProbe {
    /// Succeeds once `url` answers with any HTTP response.
    fn check<'a>(&'a self, url: &'a str) -> ProbeFuture<'a, ()>;

    /// Downloads `url`, requiring a success status.
    fn fetch<'a>(&'a self, url: &'a str) -> ProbeFuture<'a, Vec<u8>>;
}

/// `reqwest` client that accepts self-signed certificates.
#[derive(Clone, Debug)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Builds a probe whose requests give up after
    /// [`DEFAULT_REQUEST_TIMEOUT`], so a stalled endpoint cannot outlast the
    /// caller's retry budget.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Client`] when the TLS backend fails to start.
    pub fn insecure() -> Result<Self, ProbeError> {
        Self::insecure_with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Builds a probe whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Client`] when the TLS backend fails to start.
    pub fn insecure_with_timeout(timeout: Duration) -> Result<Self, ProbeError> {
        Self::build(reqwest::Client::builder().timeout(timeout))
    }

    fn build(builder: reqwest::ClientBuilder) -> Result<Self, ProbeError> {
        let client = builder
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| ProbeError::Client(err.to_string()))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, ProbeError> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|err| ProbeError::Request {
                url: url.to_owned(),
                message: err.to_string(),
            })
    }
}

impl EndpointProbe for HttpProbe {
    fn check<'a>(&'a self, url: &'a str) -> ProbeFuture<'a, ()> {
        Box::pin(async move {
            self.get(url).await?;
            Ok(())
        })
    }

    fn fetch<'a>(&'a self, url: &'a str) -> ProbeFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let response = self.get(url).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ProbeError::Status {
                    url: url.to_owned(),
                    status: status.as_u16(),
                });
            }
            let body = response.bytes().await.map_err(|err| ProbeError::Request {
                url: url.to_owned(),
                message: err.to_string(),
            })?;
            Ok(body.to_vec())
        })
    }
}
