//! Stack provisioning and destruction workflows.
//!
//! [`ProvisioningPipeline`] builds a stack, stages the licence and install
//! config on the new host, installs the application and waits for its
//! endpoints. [`DestructionPipeline`] deletes a stack and revokes the local
//! trust granted to its certificate authority.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::time::Duration;

use camino::Utf8PathBuf;

use crate::retry::{READINESS_POLL_INTERVAL, STATUS_POLL_INTERVAL};

mod ca;
mod create;
mod destroy;
mod error;

pub use ca::{ca_file_name, ca_url, fetch_ca_certificate};
pub use create::{InstallSettings, ProvisioningPipeline};
pub use destroy::DestructionPipeline;
pub use error::PipelineError;

/// Port of the admin console on a provisioned host.
pub const KOTSADM_PORT: u16 = 8800;

/// Output holding the host address.
pub const OUTPUT_ADDRESS: &str = "Address";
/// Output holding the certificate authority host.
pub const OUTPUT_CA: &str = "CA";

/// Budgets and intervals for every polled phase.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PipelineTimings {
    /// Interval between stack status reads.
    pub status_interval: Duration,
    /// Budget for a create or delete watch.
    pub status_budget: Duration,
    /// Interval between readiness probes.
    pub readiness_interval: Duration,
    /// Budget for staging the licence.
    pub staging_budget: Duration,
    /// Budget for the admin console to answer.
    pub console_budget: Duration,
    /// Budget for the kots plugin to appear.
    pub kots_budget: Duration,
    /// Budget for each application endpoint.
    pub endpoint_budget: Duration,
}

impl Default for PipelineTimings {
    fn default() -> Self {
        Self {
            status_interval: STATUS_POLL_INTERVAL,
            status_budget: Duration::from_secs(10 * 60),
            readiness_interval: READINESS_POLL_INTERVAL,
            staging_budget: Duration::from_secs(15 * 60),
            console_budget: Duration::from_secs(15 * 60),
            kots_budget: Duration::from_secs(5 * 60),
            endpoint_budget: Duration::from_secs(15 * 60),
        }
    }
}

impl PipelineTimings {
    /// Same interval and budget for every phase.
    #[must_use]
    pub const fn uniform(interval: Duration, budget: Duration) -> Self {
        Self {
            status_interval: interval,
            status_budget: budget,
            readiness_interval: interval,
            staging_budget: budget,
            console_budget: budget,
            kots_budget: budget,
            endpoint_budget: budget,
        }
    }
}

/// Switches that shape a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PipelineOptions {
    /// Stop successfully once the licence and config are staged.
    pub stage_only: bool,
    /// Open a browser at the login page and install local trust.
    pub interactive: bool,
    /// Directory the CA certificate is written to.
    pub ca_dir: Utf8PathBuf,
    /// Poll budgets and intervals.
    pub timings: PipelineTimings,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            stage_only: false,
            interactive: true,
            ca_dir: Utf8PathBuf::from("."),
            timings: PipelineTimings::default(),
        }
    }
}

/// Named endpoints published as stack outputs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StackEndpoints {
    /// Public address of the host.
    pub address: String,
    /// API host.
    pub api: String,
    /// Login host.
    pub login: String,
    /// Media host.
    pub media: String,
    /// Datastore host.
    pub datastore: String,
    /// Event stream host.
    pub event_stream: String,
    /// CDN host.
    pub cdn: String,
    /// Certificate authority host.
    pub ca: String,
}

impl StackEndpoints {
    /// Picks the known keys out of a stack's outputs. Missing keys stay
    /// empty.
    #[must_use]
    pub fn from_outputs(outputs: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| outputs.get(key).cloned().unwrap_or_default();
        Self {
            address: get(OUTPUT_ADDRESS),
            api: get("Api"),
            login: get("Login"),
            media: get("Media"),
            datastore: get("Datastore"),
            event_stream: get("EventStream"),
            cdn: get("CDN"),
            ca: get(OUTPUT_CA),
        }
    }

    /// Admin console URL on the host.
    #[must_use]
    pub fn console_url(&self) -> String {
        format!("http://{}:{KOTSADM_PORT}", self.address)
    }

    /// Login page URL.
    #[must_use]
    pub fn login_url(&self) -> String {
        format!("https://{}", self.login)
    }

    /// Endpoints polled after install, in polling order.
    #[must_use]
    pub fn readiness_urls(&self) -> Vec<(&'static str, String)> {
        vec![
            ("CA", ca_url(&self.ca)),
            ("api", format!("https://{}", self.api)),
            ("login", self.login_url()),
            ("media", format!("https://{}", self.media)),
            ("datastore", format!("https://{}", self.datastore)),
            ("eventstream", format!("https://{}", self.event_stream)),
            ("cdn", format!("https://{}", self.cdn)),
        ]
    }
}

/// Time spent in one phase of a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PhaseTiming {
    /// Phase label.
    pub phase: &'static str,
    /// Wall-clock time spent.
    pub elapsed: Duration,
}

/// Summary of a successful provisioning run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProvisioningReport {
    /// Stack name.
    pub stack_name: String,
    /// Provider stack id.
    pub stack_id: String,
    /// Endpoints read from the outputs.
    pub endpoints: StackEndpoints,
    /// Every stack output.
    pub outputs: BTreeMap<String, String>,
    /// Phase timings in execution order.
    pub phases: Vec<PhaseTiming>,
    /// Whether the run stopped after staging.
    pub staged_only: bool,
    /// CA certificate written locally, when the fetch succeeded.
    pub ca_file: Option<Utf8PathBuf>,
}

impl ProvisioningReport {
    /// Elapsed time recorded for `phase`.
    #[must_use]
    pub fn elapsed(&self, phase: &str) -> Option<Duration> {
        self.phases
            .iter()
            .find(|timing| timing.phase == phase)
            .map(|timing| timing.elapsed)
    }

    fn record(&mut self, phase: &'static str, elapsed: Duration) {
        self.phases.push(PhaseTiming { phase, elapsed });
    }
}

/// Writes `Stack Outputs:` followed by one right-aligned `key: value` row
/// per output.
///
/// # Errors
///
/// Returns any error from `out`.
pub fn write_outputs(out: &mut impl Write, outputs: &BTreeMap<String, String>) -> io::Result<()> {
    writeln!(out, "Stack Outputs:")?;
    let width = outputs
        .keys()
        .map(|key| key.chars().count() + 1)
        .max()
        .unwrap_or_default();
    for (key, value) in outputs {
        let label = format!("{key}:");
        writeln!(out, "  {label:>width$}  {value}")?;
    }
    Ok(())
}
