//! Account lookups that resolve creation parameters and auxiliary data.

use crate::command::CommandRunner;

use super::types::{
    CallerIdentity, DescribeImagesResponse, DescribeSubnetsResponse, ListHostedZonesResponse,
    TemplateSummary,
};
use super::{CloudFormationBackend, CloudFormationError};

const HOSTED_ZONE_PREFIX: &str = "/hostedzone/";

/// AMI chosen for the instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageSelection {
    /// AMI identifier.
    pub image_id: String,
    /// AMI name.
    pub name: Option<String>,
}

/// VPC and subnet the instance is launched into.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkSelection {
    /// VPC identifier.
    pub vpc_id: String,
    /// Public subnet identifier.
    pub subnet_id: String,
}

impl<R: CommandRunner> CloudFormationBackend<R> {
    /// Newest AMI owned by `owner` whose name matches the `pattern` glob.
    ///
    /// # Errors
    ///
    /// Returns [`CloudFormationError::NotFound`] when nothing matches, or
    /// any CLI or parse failure.
    pub async fn latest_image(
        &self,
        owner: &str,
        pattern: &str,
    ) -> Result<ImageSelection, CloudFormationError> {
        let args = [
            String::from("describe-images"),
            String::from("--owners"),
            owner.to_owned(),
            String::from("--filters"),
            format!("Name=name,Values={pattern}"),
        ];
        let response: DescribeImagesResponse = self.run_json("ec2", &args, "images").await?;
        response
            .images
            .into_iter()
            .max_by(|a, b| a.creation_date.cmp(&b.creation_date))
            .map(|image| ImageSelection {
                image_id: image.image_id,
                name: image.name,
            })
            .ok_or_else(|| CloudFormationError::NotFound {
                resource: String::from("AMI"),
                query: format!("owner {owner} name {pattern}"),
            })
    }

    /// VPC and subnet of the first subnet in `subnet_ids` that exists.
    ///
    /// # Errors
    ///
    /// Returns [`CloudFormationError::NotFound`] when the list is empty or no
    /// subnet is visible.
    pub async fn network_for_subnets(
        &self,
        subnet_ids: &[String],
    ) -> Result<NetworkSelection, CloudFormationError> {
        let not_found = || CloudFormationError::NotFound {
            resource: String::from("subnet"),
            query: subnet_ids.join(", "),
        };
        if subnet_ids.is_empty() {
            return Err(not_found());
        }

        let mut args = vec![String::from("describe-subnets"), String::from("--subnet-ids")];
        args.extend(subnet_ids.iter().cloned());
        let response: DescribeSubnetsResponse = self.run_json("ec2", &args, "subnets").await?;

        subnet_ids
            .iter()
            .find_map(|wanted| {
                response
                    .subnets
                    .iter()
                    .find(|subnet| &subnet.subnet_id == wanted)
            })
            .map(|subnet| NetworkSelection {
                vpc_id: subnet.vpc_id.clone(),
                subnet_id: subnet.subnet_id.clone(),
            })
            .ok_or_else(not_found)
    }

    /// Route53 hosted zone id for `domain`, without the `/hostedzone/`
    /// prefix.
    ///
    /// # Errors
    ///
    /// Returns [`CloudFormationError::NotFound`] when no zone matches.
    pub async fn hosted_zone_id(&self, domain: &str) -> Result<String, CloudFormationError> {
        let wanted = format!("{}.", domain.trim_end_matches('.'));
        let args = [String::from("list-hosted-zones")];
        let response: ListHostedZonesResponse = self.run_json("route53", &args, "hosted zones").await?;
        response
            .hosted_zones
            .into_iter()
            .find(|zone| zone.name == wanted)
            .map(|zone| {
                zone.id
                    .strip_prefix(HOSTED_ZONE_PREFIX)
                    .map_or_else(|| zone.id.clone(), str::to_owned)
            })
            .ok_or_else(|| CloudFormationError::NotFound {
                resource: String::from("hosted zone"),
                query: wanted,
            })
    }

    /// Account number of the configured credentials.
    ///
    /// # Errors
    ///
    /// Returns any CLI or parse failure.
    pub async fn caller_account(&self) -> Result<String, CloudFormationError> {
        let args = [String::from("get-caller-identity")];
        let identity: CallerIdentity = self.run_json("sts", &args, "caller identity").await?;
        Ok(identity.account)
    }

    /// `Description` declared by the template at `template_url`.
    ///
    /// # Errors
    ///
    /// Returns [`CloudFormationError::NotFound`] when the template has no
    /// description.
    pub async fn template_description(&self, template_url: &str) -> Result<String, CloudFormationError> {
        let args = [
            String::from("get-template-summary"),
            String::from("--template-url"),
            template_url.to_owned(),
        ];
        let summary: TemplateSummary = self.run_json("cloudformation", &args, "template summary").await?;
        summary
            .description
            .ok_or_else(|| CloudFormationError::NotFound {
                resource: String::from("template description"),
                query: template_url.to_owned(),
            })
    }

    /// Downloads `s3://bucket/key` and returns it as text.
    ///
    /// # Errors
    ///
    /// Returns any CLI failure, such as a missing object.
    pub async fn fetch_s3_object(&self, bucket: &str, key: &str) -> Result<String, CloudFormationError> {
        let args = [
            String::from("cp"),
            format!("s3://{bucket}/{key}"),
            String::from("-"),
        ];
        self.run_raw("s3", &args, false).await
    }
}
