//! Download of a stack's CA certificate.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::info;

use crate::probe::EndpointProbe;

use super::PipelineError;

/// PEM endpoint of the certificate authority at `ca_host`.
#[must_use]
pub fn ca_url(ca_host: &str) -> String {
    format!("https://{ca_host}/v1/pki/ca/pem")
}

/// Local file name for the certificate of `ca_host`.
#[must_use]
pub fn ca_file_name(ca_host: &str) -> String {
    format!("{ca_host}-ca.pem")
}

/// Fetches the CA certificate and writes it to `<ca_host>-ca.pem` in `dir`.
///
/// # Errors
///
/// Returns [`PipelineError::Probe`] when the download fails or answers
/// with a non-success status, and [`PipelineError::Io`] when the file
/// cannot be written.
pub async fn fetch_ca_certificate<P, E>(
    probe: &P,
    ca_host: &str,
    dir: &Utf8Path,
) -> Result<Utf8PathBuf, PipelineError<E>>
where
    P: EndpointProbe + Sync,
    E: std::error::Error + Send + Sync + 'static,
{
    if ca_host.trim().is_empty() {
        return Err(PipelineError::MissingOutput {
            key: String::from(super::OUTPUT_CA),
        });
    }
    let url = ca_url(ca_host);
    info!(url = %url, "fetching CA certificate");
    let pem = probe.fetch(&url).await.map_err(PipelineError::Probe)?;

    let file_name = ca_file_name(ca_host);
    let path = dir.join(&file_name);
    write_file(dir, &file_name, &pem).map_err(|message| PipelineError::Io {
        path: path.clone(),
        message,
    })?;
    info!(path = %path, "CA certificate written");
    Ok(path)
}

fn write_file(dir: &Utf8Path, file_name: &str, contents: &[u8]) -> Result<(), String> {
    let handle =
        Dir::open_ambient_dir(dir, ambient_authority()).map_err(|err| err.to_string())?;
    handle
        .write(file_name, contents)
        .map_err(|err| err.to_string())
}
