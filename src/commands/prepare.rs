//! Turns a completed stack record into creation parameters and install
//! settings.

use std::future::Future;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::info;

use crate::backend::{BackendFuture, StackParameter};
use crate::cloudformation::{CloudFormationBackend, CloudFormationError, NetworkSelection};
use crate::command::CommandRunner;
use crate::config_store::{
    ObjectStore, SharedConfig, StackConfig, TemplateData, render_template, resolve_source,
};
use crate::pipeline::InstallSettings;
use crate::remote::expand_tilde;

use super::OpsError;

/// Root volume size in GiB.
pub const VOLUME_SIZE_GIB: u32 = 50;

/// Instance name tag set by the template.
pub const INSTANCE_NAME: &str = "orion-ptt-system";

/// Account lookups that resolve the creation parameters.
pub trait AccountLookups: ObjectStore {
    /// Newest AMI owned by `owner` whose name matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns the lookup failure.
    fn image_id<'a>(
        &'a self,
        owner: &'a str,
        pattern: &'a str,
    ) -> BackendFuture<'a, String, CloudFormationError>;

    /// VPC and subnet for the first usable subnet.
    ///
    /// # Errors
    ///
    /// Returns the lookup failure.
    fn network<'a>(
        &'a self,
        subnet_ids: &'a [String],
    ) -> BackendFuture<'a, NetworkSelection, CloudFormationError>;

    /// Hosted zone id for `domain`.
    ///
    /// # Errors
    ///
    /// Returns the lookup failure.
    fn zone_id<'a>(&'a self, domain: &'a str) -> BackendFuture<'a, String, CloudFormationError>;
}

impl<R: CommandRunner> AccountLookups for CloudFormationBackend<R> {
    fn image_id<'a>(
        &'a self,
        owner: &'a str,
        pattern: &'a str,
    ) -> BackendFuture<'a, String, CloudFormationError> {
        Box::pin(async move {
            let image = self.latest_image(owner, pattern).await?;
            Ok(image.image_id)
        })
    }

    fn network<'a>(
        &'a self,
        subnet_ids: &'a [String],
    ) -> BackendFuture<'a, NetworkSelection, CloudFormationError> {
        Box::pin(self.network_for_subnets(subnet_ids))
    }

    fn zone_id<'a>(&'a self, domain: &'a str) -> BackendFuture<'a, String, CloudFormationError> {
        Box::pin(self.hosted_zone_id(domain))
    }
}

/// Resolves the shared network config, hosted zone and AMI, and returns the
/// template parameters in template order.
///
/// # Errors
///
/// Returns [`OpsError::Source`] when the shared config cannot be resolved
/// and [`OpsError::Lookup`] when any account lookup fails.
pub async fn creation_parameters<E>(
    lookups: &impl AccountLookups,
    ami_owner: &str,
    config: &StackConfig,
) -> Result<Vec<StackParameter>, OpsError<E>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let shared = resolve_source(&config.shared_config, "shared config", lookups).await?;
    let subnet_ids = SharedConfig::parse(&shared)?.subnet_ids;
    let network = lookups.network(&subnet_ids).await?;
    info!(vpc = %network.vpc_id, subnet = %network.subnet_id, "network selected");
    let zone_id = lookups.zone_id(&config.dns_domain).await?;
    let ami_id = lookups.image_id(ami_owner, &config.ami_name).await?;
    info!(ami = %ami_id, zone = %zone_id, "creation lookups resolved");

    Ok(vec![
        StackParameter::new("ExistingVpcID", network.vpc_id),
        StackParameter::new("ExistingPublicSubnet", network.subnet_id),
        StackParameter::new("KeyName", config.key_name.clone()),
        StackParameter::new("AmiId", ami_id),
        StackParameter::new("InstanceType", config.instance_type.clone()),
        StackParameter::new("VolumeSize", VOLUME_SIZE_GIB.to_string()),
        StackParameter::new("InstanceName", INSTANCE_NAME),
        StackParameter::new("CreateDNS", "true"),
        StackParameter::new("CreateDNSZoneID", zone_id),
        StackParameter::new("CreateDNSDomain", config.dns_domain.clone()),
    ])
}

/// Reads the licence and renders the install config for `config`.
///
/// # Errors
///
/// Returns [`OpsError::Io`] when the licence cannot be read and
/// [`OpsError::Source`] when the template cannot be resolved or rendered.
pub async fn install_settings<E>(
    config: &StackConfig,
    store: &impl ObjectStore,
) -> Result<InstallSettings, OpsError<E>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let license = read_local(&expand_tilde(&config.license_file))?;
    let template = resolve_source(&config.config_template, "config template", store).await?;
    let rendered = render_template(&template, &TemplateData::for_config(config)?)?;
    Ok(InstallSettings {
        user_name: config.user_name.clone(),
        shared_password: config.shared_password().to_owned(),
        license,
        config: rendered.into_bytes(),
    })
}

/// Creation parameters and install settings resolved ahead of `create`.
#[derive(Debug)]
pub struct ProvisionPlan {
    /// Template parameters in template order.
    pub parameters: Vec<StackParameter>,
    /// Licence, rendered config and account details for the installer.
    pub install: InstallSettings,
}

/// Reads the licence, renders the install config and resolves the creation
/// parameters.
///
/// # Errors
///
/// Returns the first failure from [`install_settings`] or
/// [`creation_parameters`].
pub async fn plan_provision<E>(
    lookups: &impl AccountLookups,
    ami_owner: &str,
    config: &StackConfig,
) -> Result<ProvisionPlan, OpsError<E>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let install = install_settings(config, lookups).await?;
    let parameters = creation_parameters(lookups, ami_owner, config).await?;
    Ok(ProvisionPlan {
        parameters,
        install,
    })
}

/// Plans the replacement stack and only then runs `teardown` on the old one.
///
/// A missing licence or unreadable template leaves the running stack alone.
///
/// # Errors
///
/// Returns the planning failure without calling `teardown`, or whatever
/// `teardown` returns.
pub async fn plan_then_teardown<E, D, F, Fut>(
    lookups: &impl AccountLookups,
    ami_owner: &str,
    config: &StackConfig,
    teardown: F,
) -> Result<ProvisionPlan, D>
where
    E: std::error::Error + Send + Sync + 'static,
    D: From<OpsError<E>>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), D>>,
{
    let plan = plan_provision::<E>(lookups, ami_owner, config).await?;
    teardown().await?;
    Ok(plan)
}

fn read_local<E>(path: &str) -> Result<Vec<u8>, OpsError<E>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let file = Utf8Path::new(path);
    let parent = file
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let name = file.file_name().ok_or_else(|| OpsError::Io {
        path: file.to_owned(),
        message: String::from("licence path has no file name"),
    })?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| OpsError::io(file, &err))?;
    dir.read(name).map_err(|err| OpsError::io(file, &err))
}
