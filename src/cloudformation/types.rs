//! JSON shapes emitted by `aws ... --output json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::{StackParameter, StackRecord};

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DescribeStacksResponse {
    #[serde(default)]
    pub(super) stacks: Vec<AwsStack>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AwsStack {
    pub(super) stack_id: String,
    pub(super) stack_name: String,
    pub(super) stack_status: String,
    #[serde(default)]
    pub(super) description: Option<String>,
    #[serde(default)]
    pub(super) parameters: Vec<AwsParameter>,
    #[serde(default)]
    pub(super) outputs: Vec<AwsOutput>,
    #[serde(default)]
    pub(super) creation_time: Option<DateTime<Utc>>,
}

impl From<AwsStack> for StackRecord {
    fn from(stack: AwsStack) -> Self {
        Self {
            id: stack.stack_id,
            name: stack.stack_name,
            status: stack.stack_status,
            description: stack.description,
            outputs: stack
                .outputs
                .into_iter()
                .map(|output| (output.output_key, output.output_value))
                .collect(),
            parameters: stack
                .parameters
                .into_iter()
                .map(|param| (param.parameter_key, param.parameter_value))
                .collect(),
            creation_time: stack.creation_time,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AwsParameter {
    pub(super) parameter_key: String,
    #[serde(default)]
    pub(super) parameter_value: String,
}

impl From<&StackParameter> for AwsParameter {
    fn from(param: &StackParameter) -> Self {
        Self {
            parameter_key: param.key.clone(),
            parameter_value: param.value.clone(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AwsOutput {
    pub(super) output_key: String,
    #[serde(default)]
    pub(super) output_value: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct CreateStackResponse {
    pub(super) stack_id: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct TemplateSummary {
    #[serde(default)]
    pub(super) description: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DescribeImagesResponse {
    #[serde(default)]
    pub(super) images: Vec<AwsImage>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AwsImage {
    pub(super) image_id: String,
    #[serde(default)]
    pub(super) name: Option<String>,
    /// ISO-8601 text; lexical order matches chronological order.
    #[serde(default)]
    pub(super) creation_date: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DescribeSubnetsResponse {
    #[serde(default)]
    pub(super) subnets: Vec<AwsSubnet>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AwsSubnet {
    pub(super) subnet_id: String,
    pub(super) vpc_id: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct ListHostedZonesResponse {
    #[serde(default)]
    pub(super) hosted_zones: Vec<AwsHostedZone>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AwsHostedZone {
    pub(super) id: String,
    pub(super) name: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct CallerIdentity {
    pub(super) account: String,
}
