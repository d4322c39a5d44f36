//! Side effects on the operator's own machine: certificate trust and the
//! post-install browser launch.

use std::ffi::OsString;
use std::future::{Future, ready};
use std::pin::Pin;

use camino::Utf8Path;
use thiserror::Error;
use tracing::info;

use crate::command::{CommandError, CommandRunner, ProcessCommandRunner};

const SYSTEM_KEYCHAIN: &str = "/Library/Keychains/System.keychain";
const LOGIN_KEYCHAIN: &str = "Library/Keychains/login.keychain";

/// Errors raised by workstation integrations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum WorkstationError {
    /// The helper command could not run or exited non-zero.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Future returned by [`Workstation`] operations.
pub type WorkstationFuture<'a> = Pin<Box<dyn Future<Output = Result<(), WorkstationError>> + Send + 'a>>;

/// Local machine integration used by the pipelines.
pub trait Workstation {
    /// Adds the certificate stored at `pem_path` to the local trust store.
    ///
    /// # Errors
    ///
    /// Returns [`WorkstationError`] when the platform tool fails.
    fn trust_certificate<'a>(&'a self, pem_path: &'a Utf8Path) -> WorkstationFuture<'a>;

    /// Removes trust for the certificate whose common name is `ca_host`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkstationError`] when the platform tool fails.
    fn revoke_certificate<'a>(&'a self, ca_host: &'a str) -> WorkstationFuture<'a>;

    /// Opens `url` in the default browser.
    ///
    /// # Errors
    ///
    /// Returns [`WorkstationError`] when the platform tool fails.
    fn open_browser<'a>(&'a self, url: &'a str) -> WorkstationFuture<'a>;
}

/// Operating system family, which decides the helper tools used.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Platform {
    /// macOS: keychain via `security`, browser via `open`.
    MacOs,
    /// Anything else: trust and browser steps are logged only.
    Other,
}

impl Platform {
    /// Platform of the running binary.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Other
        }
    }
}

/// [`Workstation`] backed by the platform's command-line tools.
#[derive(Clone, Debug)]
pub struct LocalWorkstation<R: CommandRunner> {
    runner: R,
    platform: Platform,
}

impl LocalWorkstation<ProcessCommandRunner> {
    /// Workstation for the current platform using real processes.
    #[must_use]
    pub const fn detect() -> Self {
        Self::new(ProcessCommandRunner, Platform::current())
    }
}

impl<R: CommandRunner> LocalWorkstation<R> {
    /// Creates a workstation for an explicit platform.
    #[must_use]
    pub const fn new(runner: R, platform: Platform) -> Self {
        Self { runner, platform }
    }

    async fn sudo_security(&self, args: &[&str]) -> Result<(), WorkstationError> {
        let mut argv = vec![OsString::from("security")];
        argv.extend(args.iter().map(OsString::from));
        self.runner.run("sudo", &argv).await?.check("security")?;
        Ok(())
    }
}

impl<R: CommandRunner> Workstation for LocalWorkstation<R> {
    fn trust_certificate<'a>(&'a self, pem_path: &'a Utf8Path) -> WorkstationFuture<'a> {
        match self.platform {
            Platform::MacOs => Box::pin(async move {
                info!(path = %pem_path, "importing certificate into the system keychain");
                self.sudo_security(&[
                    "add-trusted-cert",
                    "-d",
                    "-r",
                    "trustRoot",
                    "-k",
                    SYSTEM_KEYCHAIN,
                    pem_path.as_str(),
                ])
                .await
            }),
            Platform::Other => {
                info!(path = %pem_path, "add this certificate to your trust store to avoid browser warnings");
                Box::pin(ready(Ok(())))
            }
        }
    }

    fn revoke_certificate<'a>(&'a self, ca_host: &'a str) -> WorkstationFuture<'a> {
        match self.platform {
            Platform::MacOs => Box::pin(async move {
                let home = std::env::var("HOME").unwrap_or_default();
                let keychain = format!("{home}/{LOGIN_KEYCHAIN}");
                info!(ca_host, "removing certificate from the login keychain");
                self.sudo_security(&["delete-certificate", "-c", ca_host, &keychain])
                    .await
            }),
            Platform::Other => {
                info!(ca_host, "remove this certificate authority from your trust store");
                Box::pin(ready(Ok(())))
            }
        }
    }

    fn open_browser<'a>(&'a self, url: &'a str) -> WorkstationFuture<'a> {
        match self.platform {
            Platform::MacOs => Box::pin(async move {
                let args = [OsString::from(url)];
                self.runner.run("open", &args).await?.check("open")?;
                Ok(())
            }),
            Platform::Other => {
                info!(url, "open the login page in your browser");
                Box::pin(ready(Ok(())))
            }
        }
    }
}
