//! AWS collaborators: cluster version, node groups and SSM parameters
//!
//! SDK responses are turned into plain JSON records and descriptions by free
//! functions, so that conversion can be tested without AWS.

use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_eks::types::{Nodegroup, Taint};
use aws_sdk_ssm::error::DisplayErrorContext;
use aws_types::region::Region;
use serde_json::{Map, Value, json};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::changelog::types::{AmiFamily, AmiType, Architecture};
use crate::config::DEFAULT_AWS_REGION;
use crate::nodegroup::draft::is_graviton_instance;
use crate::nodegroup::error::AwsError;
use crate::nodegroup::extract::NodegroupDescription;
use crate::version::catalog;
use crate::version::error::LookupError;
use crate::version::release::{BuildIdLookup, release_parameter_path, ssm_parameter_path};

/// SSM parameter leaf holding the full `releaseVersion` of the recommended AMI
pub const RELEASE_VERSION_PARAMETER: &str = "release_version";

/// SSM parameter leaf holding the AMI id of a release
pub const IMAGE_ID_PARAMETER: &str = "image_id";

/// Kubernetes version of a running cluster
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ClusterVersionSource: Send + Sync {
    async fn cluster_version(&self, cluster_name: &str) -> Result<String, AwsError>;
}

pub struct AwsClient {
    config: SdkConfig,
    eks: aws_sdk_eks::Client,
    ssm: aws_sdk_ssm::Client,
    region: String,
}

impl AwsClient {
    /// Load credentials for `profile`, or the default chain, in `region`
    pub async fn new(profile: Option<&str>, region: &str) -> Self {
        debug!("Loading AWS config (profile={:?}, region={})", profile, region);
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        Self::from_config(loader.load().await)
    }

    pub fn from_config(config: SdkConfig) -> Self {
        let region = config
            .region()
            .map(|region| region.as_ref().to_string())
            .unwrap_or_else(|| DEFAULT_AWS_REGION.to_string());
        Self {
            eks: aws_sdk_eks::Client::new(&config),
            ssm: aws_sdk_ssm::Client::new(&config),
            config,
            region,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// SSM client for `region`; SSM parameters are regional
    fn ssm_in(&self, region: &str) -> aws_sdk_ssm::Client {
        if region == self.region {
            return self.ssm.clone();
        }
        let config = aws_sdk_ssm::config::Builder::from(&self.config)
            .region(Region::new(region.to_string()))
            .build();
        aws_sdk_ssm::Client::from_conf(config)
    }

    /// Describe a node group and derive its Kubernetes version and architecture.
    pub async fn describe_nodegroup(
        &self,
        cluster_name: &str,
        nodegroup_name: &str,
    ) -> Result<NodegroupDescription, AwsError> {
        const OPERATION: &str = "eks:DescribeNodegroup";
        debug!("Describing node group {}/{}", cluster_name, nodegroup_name);

        let output = self
            .eks
            .describe_nodegroup()
            .cluster_name(cluster_name)
            .nodegroup_name(nodegroup_name)
            .send()
            .await
            .map_err(|e| service_error(OPERATION, e))?;
        let nodegroup = output
            .nodegroup
            .ok_or_else(|| malformed(OPERATION, "missing nodegroup"))?;
        nodegroup_description(nodegroup_record(&nodegroup))
    }

    /// Names of every node group in a cluster
    pub async fn list_nodegroups(&self, cluster_name: &str) -> Result<Vec<String>, AwsError> {
        const OPERATION: &str = "eks:ListNodegroups";

        let mut names = Vec::new();
        let mut next_token = None;
        loop {
            let output = self
                .eks
                .list_nodegroups()
                .cluster_name(cluster_name)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| service_error(OPERATION, e))?;
            names.extend(output.nodegroups.unwrap_or_default());
            next_token = output.next_token;
            if next_token.is_none() {
                break;
            }
        }
        debug!("Cluster {} has {} node groups", cluster_name, names.len());
        Ok(names)
    }

    /// Read an SSM parameter; `None` when the parameter does not exist.
    pub async fn get_parameter(&self, name: &str, region: &str) -> Result<Option<String>, AwsError> {
        const OPERATION: &str = "ssm:GetParameter";

        match self.ssm_in(region).get_parameter().name(name).send().await {
            Ok(output) => output
                .parameter
                .and_then(|parameter| parameter.value)
                .map(|value| Some(value.trim().to_string()))
                .ok_or_else(|| malformed(OPERATION, "missing Parameter.Value")),
            Err(err) => {
                let err = err.into_service_error();
                if err.is_parameter_not_found() {
                    debug!("SSM parameter {} not found in {}", name, region);
                    Ok(None)
                } else {
                    Err(service_error(OPERATION, err))
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl ClusterVersionSource for AwsClient {
    async fn cluster_version(&self, cluster_name: &str) -> Result<String, AwsError> {
        const OPERATION: &str = "eks:DescribeCluster";

        let output = self
            .eks
            .describe_cluster()
            .name(cluster_name)
            .send()
            .await
            .map_err(|e| service_error(OPERATION, e))?;
        output
            .cluster
            .and_then(|cluster| cluster.version)
            .ok_or_else(|| malformed(OPERATION, "missing cluster.version"))
    }
}

#[async_trait::async_trait]
impl BuildIdLookup for AwsClient {
    async fn recommended_build(
        &self,
        kubernetes_version: &str,
        architecture: Architecture,
        family: AmiFamily,
        region: &str,
    ) -> Result<Option<String>, LookupError> {
        let path = ssm_parameter_path(
            kubernetes_version,
            family,
            architecture,
            RELEASE_VERSION_PARAMETER,
        );
        self.get_parameter(&path, region)
            .await
            .map_err(LookupError::new)
    }

    /// The release parameter holds an AMI id, so the build id comes from the tag
    async fn release_build(
        &self,
        kubernetes_version: &str,
        architecture: Architecture,
        family: AmiFamily,
        release_tag: &str,
        region: &str,
    ) -> Result<Option<String>, LookupError> {
        let path = release_parameter_path(
            kubernetes_version,
            family,
            architecture,
            release_tag,
            IMAGE_ID_PARAMETER,
        );
        let image_id = self
            .get_parameter(&path, region)
            .await
            .map_err(LookupError::new)?;
        Ok(image_id.and_then(|_| catalog::build_id(release_tag).map(str::to_string)))
    }
}

fn service_error(operation: &'static str, err: impl std::error::Error) -> AwsError {
    AwsError::Service {
        operation,
        message: DisplayErrorContext(&err).to_string(),
    }
}

fn malformed(operation: &'static str, reason: impl Into<String>) -> AwsError {
    AwsError::MalformedResponse {
        operation,
        reason: reason.into(),
    }
}

/// JSON object of the fields that are present
fn object<const N: usize>(fields: [(&str, Option<Value>); N]) -> Value {
    Value::Object(
        fields
            .into_iter()
            .filter_map(|(key, value)| value.map(|value| (key.to_string(), value)))
            .collect(),
    )
}

fn string(value: &Option<String>) -> Option<Value> {
    value.clone().map(Value::from)
}

fn taint_record(taint: &Taint) -> Value {
    object([
        ("key", string(&taint.key)),
        ("value", string(&taint.value)),
        ("effect", taint.effect.as_ref().map(|e| e.as_str().into())),
    ])
}

/// The node group as the EKS API spells it, server-assigned fields included
pub fn nodegroup_record(nodegroup: &Nodegroup) -> Map<String, Value> {
    let record = object([
        ("nodegroupName", string(&nodegroup.nodegroup_name)),
        ("nodegroupArn", string(&nodegroup.nodegroup_arn)),
        ("clusterName", string(&nodegroup.cluster_name)),
        ("version", string(&nodegroup.version)),
        ("releaseVersion", string(&nodegroup.release_version)),
        ("status", nodegroup.status.as_ref().map(|s| s.as_str().into())),
        (
            "capacityType",
            nodegroup.capacity_type.as_ref().map(|c| c.as_str().into()),
        ),
        ("amiType", nodegroup.ami_type.as_ref().map(|t| t.as_str().into())),
        ("nodeRole", string(&nodegroup.node_role)),
        ("instanceTypes", nodegroup.instance_types.clone().map(Value::from)),
        ("subnets", nodegroup.subnets.clone().map(Value::from)),
        ("diskSize", nodegroup.disk_size.map(Value::from)),
        (
            "scalingConfig",
            nodegroup.scaling_config.as_ref().map(|scaling| {
                object([
                    ("minSize", scaling.min_size.map(Value::from)),
                    ("maxSize", scaling.max_size.map(Value::from)),
                    ("desiredSize", scaling.desired_size.map(Value::from)),
                ])
            }),
        ),
        (
            "updateConfig",
            nodegroup.update_config.as_ref().map(|update| {
                object([
                    ("maxUnavailable", update.max_unavailable.map(Value::from)),
                    (
                        "maxUnavailablePercentage",
                        update.max_unavailable_percentage.map(Value::from),
                    ),
                ])
            }),
        ),
        (
            "remoteAccess",
            nodegroup.remote_access.as_ref().map(|remote| {
                object([
                    ("ec2SshKey", string(&remote.ec2_ssh_key)),
                    (
                        "sourceSecurityGroups",
                        remote.source_security_groups.clone().map(Value::from),
                    ),
                ])
            }),
        ),
        (
            "launchTemplate",
            nodegroup.launch_template.as_ref().map(|template| {
                object([
                    ("id", string(&template.id)),
                    ("name", string(&template.name)),
                    ("version", string(&template.version)),
                ])
            }),
        ),
        ("labels", nodegroup.labels.as_ref().map(|labels| json!(labels))),
        (
            "taints",
            nodegroup
                .taints
                .as_ref()
                .map(|taints| Value::Array(taints.iter().map(taint_record).collect())),
        ),
        ("tags", nodegroup.tags.as_ref().map(|tags| json!(tags))),
    ]);
    match record {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Architecture from the AMI type, or from the instance types for other AMIs
fn nodegroup_architecture(nodegroup: &Map<String, Value>) -> Option<Architecture> {
    let ami_type = nodegroup
        .get("amiType")
        .and_then(Value::as_str)
        .and_then(|value| value.parse::<AmiType>().ok());
    if let Some(ami_type) = ami_type {
        return Some(ami_type.architecture());
    }

    let first = nodegroup
        .get("instanceTypes")
        .and_then(Value::as_array)
        .and_then(|types| types.iter().find_map(Value::as_str))?;
    Some(if is_graviton_instance(first) {
        Architecture::Arm64
    } else {
        Architecture::X86_64
    })
}

/// Turn a node-group record into a description.
///
/// The driver version is not part of the node-group record and is left unset.
pub fn nodegroup_description(config: Map<String, Value>) -> Result<NodegroupDescription, AwsError> {
    const OPERATION: &str = "eks:DescribeNodegroup";

    let field = |name: &str| {
        config
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| malformed(OPERATION, format!("missing nodegroup.{name}")))
    };
    let architecture = nodegroup_architecture(&config).ok_or_else(|| {
        malformed(
            OPERATION,
            "cannot determine architecture from amiType or instanceTypes",
        )
    })?;

    Ok(NodegroupDescription {
        cluster_name: field("clusterName")?,
        nodegroup_name: field("nodegroupName")?,
        kubernetes_version: field("version")?,
        architecture,
        driver_version: None,
        config,
    })
}
