//! `aws eks create-nodegroup --cli-input-json` documents
//!
//! Input configurations come from templates or from `describe-nodegroup`,
//! which also returns server-assigned fields (`nodegroupArn`, `status`,
//! `health`, `updateConfig.updateStrategy`, ...) that `create-nodegroup`
//! rejects. Only keys on the allow-lists below survive.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::changelog::types::{AmiType, Architecture};
use crate::nodegroup::error::DraftError;
use crate::version::catalog::ReleaseEntry;
use crate::version::error::AlignmentError;
use crate::version::release::validate_release_version;
use crate::version::resolver::ResolvedAlignment;

/// Top-level keys accepted by `create-nodegroup`
pub const CREATE_NODEGROUP_FIELDS: &[&str] = &[
    "clusterName",
    "nodegroupName",
    "scalingConfig",
    "diskSize",
    "subnets",
    "instanceTypes",
    "amiType",
    "remoteAccess",
    "nodeRole",
    "labels",
    "taints",
    "tags",
    "launchTemplate",
    "updateConfig",
    "nodeRepairConfig",
    "capacityType",
    "version",
    "releaseVersion",
];

/// Keys accepted inside `updateConfig`
pub const UPDATE_CONFIG_FIELDS: &[&str] = &["maxUnavailable", "maxUnavailablePercentage"];

/// Instance family prefixes that run on Graviton (arm64)
const ARM64_INSTANCE_PREFIXES: &[&str] = &["g5g.", "c6g.", "m6g.", "r6g.", "t4g."];

/// Instance types that have no GPU
const CPU_INSTANCE_TYPES: &[&str] = &["t3.micro", "t3.small", "t3.medium", "m5.large"];

/// Whether an instance type runs on Graviton (arm64)
pub fn is_graviton_instance(instance_type: &str) -> bool {
    ARM64_INSTANCE_PREFIXES
        .iter()
        .any(|prefix| instance_type.starts_with(prefix))
}

const PLACEHOLDER_MARKERS: &[&str] = &["YOUR-CLUSTER-NAME", "YOUR_ACCOUNT_ID", "YOUR_SUBNET"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapacityType {
    OnDemand,
    Spot,
    CapacityBlock,
}

impl std::str::FromStr for CapacityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "ON_DEMAND" => Ok(CapacityType::OnDemand),
            "SPOT" => Ok(CapacityType::Spot),
            "CAPACITY_BLOCK" => Ok(CapacityType::CapacityBlock),
            other => Err(format!(
                "unknown capacity type: {other} (expected ON_DEMAND, SPOT or CAPACITY_BLOCK)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingConfig {
    pub min_size: i64,
    pub max_size: i64,
    pub desired_size: i64,
}

impl ScalingConfig {
    /// Require min <= desired <= max, checking min against max first.
    pub fn validate(&self) -> Result<(), AlignmentError> {
        let invalid = |reason: &str| AlignmentError::InvalidScalingConfig {
            min: self.min_size,
            max: self.max_size,
            desired: self.desired_size,
            reason: reason.to_string(),
        };
        if self.min_size > self.max_size {
            return Err(invalid("minSize cannot be greater than maxSize"));
        }
        if self.desired_size < self.min_size {
            return Err(invalid("desiredSize cannot be less than minSize"));
        }
        if self.desired_size > self.max_size {
            return Err(invalid("desiredSize cannot be greater than maxSize"));
        }
        if self.min_size < 0 {
            return Err(invalid("minSize cannot be negative"));
        }
        Ok(())
    }
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 10,
            desired_size: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable_percentage: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAccess {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec2_ssh_key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_security_groups: Vec<String>,
}

impl RemoteAccess {
    fn is_empty(&self) -> bool {
        self.ec2_ssh_key.is_none() && self.source_security_groups.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub effect: String,
}

/// A node-group configuration ready for `create-nodegroup`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodegroupConfigDraft {
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub nodegroup_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_role: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ami_type: Option<AmiType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_type: Option<CapacityType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling_config: Option<ScalingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_access: Option<RemoteAccess>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_version: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub labels: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub tags: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_config: Option<UpdateConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_template: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_repair_config: Option<Value>,
}

/// Keep only allow-listed keys, at the top level and inside `updateConfig`.
///
/// Returns the filtered object and the dropped key paths.
pub fn retain_create_fields(config: &Map<String, Value>) -> (Map<String, Value>, Vec<String>) {
    let mut kept = Map::new();
    let mut dropped = Vec::new();

    for (key, value) in config {
        if !CREATE_NODEGROUP_FIELDS.contains(&key.as_str()) {
            dropped.push(key.clone());
            continue;
        }
        // describe-nodegroup reports null for unset optional fields
        if value.is_null() {
            continue;
        }
        let value = match (key.as_str(), value) {
            ("updateConfig", Value::Object(update)) => {
                let mut nested = Map::new();
                for (inner, inner_value) in update {
                    if UPDATE_CONFIG_FIELDS.contains(&inner.as_str()) {
                        nested.insert(inner.clone(), inner_value.clone());
                    } else {
                        dropped.push(format!("updateConfig.{inner}"));
                    }
                }
                Value::Object(nested)
            }
            _ => value.clone(),
        };
        kept.insert(key.clone(), value);
    }

    (kept, dropped)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl NodegroupConfigDraft {
    /// Build a draft from a template or described configuration, dropping
    /// every key `create-nodegroup` does not accept.
    pub fn from_template(template: &Value) -> Result<Self, DraftError> {
        let Value::Object(config) = template else {
            return Err(DraftError::NotAnObject(json_type_name(template)));
        };
        Self::from_config(config)
    }

    pub fn from_config(config: &Map<String, Value>) -> Result<Self, DraftError> {
        let (kept, dropped) = retain_create_fields(config);
        if !dropped.is_empty() {
            debug!("Dropped fields not accepted by create-nodegroup: {}", dropped.join(", "));
        }
        let mut draft: Self = serde_json::from_value(Value::Object(kept))?;
        if draft.remote_access.as_ref().is_some_and(RemoteAccess::is_empty) {
            draft.remote_access = None;
        }
        Ok(draft)
    }

    /// Default GPU node-group template for an architecture
    pub fn sample(architecture: Architecture) -> Self {
        let instance_type = match architecture {
            Architecture::X86_64 => "g4dn.xlarge",
            Architecture::Arm64 => "g5g.xlarge",
        };
        let labels = IndexMap::from([
            (
                "kubernetes.io/arch".to_string(),
                architecture.kubernetes_label().to_string(),
            ),
            ("node-type".to_string(), "gpu-worker".to_string()),
            ("nvidia.com/gpu".to_string(), "true".to_string()),
        ]);
        let tags = IndexMap::from([
            ("NodeType".to_string(), "GPU".to_string()),
            ("Architecture".to_string(), architecture.as_str().to_string()),
            ("ManagedBy".to_string(), "nvidia-align".to_string()),
        ]);

        Self {
            cluster_name: "YOUR-CLUSTER-NAME".to_string(),
            nodegroup_name: format!("gpu-workers-{}", architecture.as_str()),
            node_role: Some("arn:aws:iam::YOUR_ACCOUNT_ID:role/EKSNodeInstanceRole".to_string()),
            subnets: vec![
                "subnet-YOUR_SUBNET_1".to_string(),
                "subnet-YOUR_SUBNET_2".to_string(),
            ],
            instance_types: vec![instance_type.to_string()],
            ami_type: Some(architecture.recommended_ami_type()),
            capacity_type: Some(CapacityType::OnDemand),
            scaling_config: Some(ScalingConfig::default()),
            disk_size: Some(50),
            update_config: Some(UpdateConfig {
                max_unavailable: Some(1),
                max_unavailable_percentage: None,
            }),
            labels,
            tags,
            ..Default::default()
        }
    }

    /// Point the draft at a resolved release: only `amiType`, `version` and
    /// `releaseVersion` change.
    pub fn apply_release(&mut self, entry: &ReleaseEntry, release_version: &str) -> Result<(), AlignmentError> {
        validate_release_version(release_version)?;
        self.ami_type = Some(entry.ami_type);
        self.version = Some(entry.kubernetes_version.clone());
        self.release_version = Some(release_version.to_string());
        Ok(())
    }

    /// `apply_release` plus the `kubernetes.io/arch` label, for generated templates
    pub fn apply_alignment(
        &mut self,
        resolved: &ResolvedAlignment,
        release_version: &str,
    ) -> Result<(), AlignmentError> {
        self.apply_release(&resolved.entry, release_version)?;
        self.labels.insert(
            "kubernetes.io/arch".to_string(),
            resolved.entry.architecture.kubernetes_label().to_string(),
        );
        Ok(())
    }

    /// Check the invariants `create-nodegroup` enforces before anything is emitted.
    pub fn validate(&self) -> Result<(), AlignmentError> {
        if let Some(scaling) = &self.scaling_config {
            scaling.validate()?;
        }
        if let Some(release_version) = &self.release_version {
            validate_release_version(release_version)?;
        }
        Ok(())
    }

    /// Non-fatal problems worth telling the user about
    pub fn warnings(&self, architecture: Architecture) -> Vec<String> {
        let mut warnings = Vec::new();

        for instance_type in &self.instance_types {
            if is_graviton_instance(instance_type) != (architecture == Architecture::Arm64) {
                warnings.push(format!(
                    "Instance type {} does not match architecture {}",
                    instance_type,
                    architecture.display_name()
                ));
            }
            if CPU_INSTANCE_TYPES.contains(&instance_type.as_str()) {
                warnings.push(format!("Instance type {} has no GPU", instance_type));
            }
        }

        let placeholders = std::iter::once(self.cluster_name.as_str())
            .chain(self.node_role.as_deref())
            .chain(self.subnets.iter().map(String::as_str));
        for value in placeholders {
            if PLACEHOLDER_MARKERS.iter().any(|marker| value.contains(marker)) {
                warnings.push(format!("Placeholder value left in configuration: {value}"));
            }
        }

        for warning in &warnings {
            warn!("{}", warning);
        }
        warnings
    }

    /// Serialize as `--cli-input-json` input
    pub fn to_cli_input_json(&self) -> Result<String, DraftError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Values given on the command line that replace template values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodegroupOverrides {
    pub cluster_name: Option<String>,
    pub nodegroup_name: Option<String>,
    pub node_role: Option<String>,
    pub subnets: Option<Vec<String>>,
    pub instance_types: Option<Vec<String>>,
    pub capacity_type: Option<CapacityType>,
    pub disk_size: Option<u32>,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    pub desired_size: Option<i64>,
}

impl NodegroupOverrides {
    pub fn apply(&self, draft: &mut NodegroupConfigDraft) {
        if let Some(name) = &self.cluster_name {
            draft.cluster_name = name.clone();
        }
        if let Some(name) = &self.nodegroup_name {
            draft.nodegroup_name = name.clone();
        }
        if let Some(role) = &self.node_role {
            draft.node_role = Some(role.clone());
        }
        if let Some(subnets) = &self.subnets {
            draft.subnets = subnets.clone();
        }
        if let Some(instance_types) = &self.instance_types {
            draft.instance_types = instance_types.clone();
        }
        if let Some(capacity_type) = self.capacity_type {
            draft.capacity_type = Some(capacity_type);
        }
        if let Some(disk_size) = self.disk_size {
            draft.disk_size = Some(disk_size);
        }
        if self.min_size.is_some() || self.max_size.is_some() || self.desired_size.is_some() {
            let scaling = draft.scaling_config.get_or_insert_with(ScalingConfig::default);
            if let Some(min) = self.min_size {
                scaling.min_size = min;
            }
            if let Some(max) = self.max_size {
                scaling.max_size = max;
            }
            if let Some(desired) = self.desired_size {
                scaling.desired_size = desired;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn described() -> Value {
        json!({
            "nodegroupName": "gpu-workers",
            "nodegroupArn": "arn:aws:eks:eu-west-1:123456789012:nodegroup/prod/gpu-workers/abc",
            "clusterName": "prod",
            "version": "1.31",
            "releaseVersion": "1.31.4-20241121",
            "createdAt": "2024-11-21T10:00:00Z",
            "status": "ACTIVE",
            "capacityType": "ON_DEMAND",
            "scalingConfig": { "minSize": 1, "maxSize": 4, "desiredSize": 2 },
            "instanceTypes": ["g4dn.xlarge"],
            "subnets": ["subnet-aaa", "subnet-bbb"],
            "remoteAccess": null,
            "amiType": "AL2_x86_64_GPU",
            "nodeRole": "arn:aws:iam::123456789012:role/EKSNodeRole",
            "labels": { "team": "ml" },
            "resources": { "autoScalingGroups": [{ "name": "eks-gpu" }] },
            "diskSize": 80,
            "health": { "issues": [] },
            "updateConfig": { "maxUnavailable": 1, "updateStrategy": "DEFAULT" },
            "tags": { "env": "prod" }
        })
    }

    #[test]
    fn retain_create_fields_drops_server_fields_at_every_depth() {
        let Value::Object(config) = described() else {
            unreachable!()
        };

        let (kept, mut dropped) = retain_create_fields(&config);
        dropped.sort();

        assert_eq!(
            dropped,
            vec![
                "createdAt",
                "health",
                "nodegroupArn",
                "resources",
                "status",
                "updateConfig.updateStrategy",
            ]
        );
        assert_eq!(kept["updateConfig"], json!({ "maxUnavailable": 1 }));
        assert!(!kept.contains_key("remoteAccess"));
    }

    #[test]
    fn from_template_round_trips_into_cli_input_json() {
        let draft = NodegroupConfigDraft::from_template(&described()).unwrap();

        assert_eq!(draft.cluster_name, "prod");
        assert_eq!(draft.ami_type, Some(AmiType::Al2X86_64Gpu));
        assert_eq!(draft.capacity_type, Some(CapacityType::OnDemand));
        assert_eq!(draft.disk_size, Some(80));

        let json: Value = serde_json::from_str(&draft.to_cli_input_json().unwrap()).unwrap();
        assert!(json.get("updateStrategy").is_none());
        assert!(json["updateConfig"].get("updateStrategy").is_none());
        assert!(json.get("status").is_none());
        assert_eq!(json["labels"]["team"], "ml");
    }

    #[test]
    fn from_template_rejects_non_objects() {
        let err = NodegroupConfigDraft::from_template(&json!(["not", "an", "object"])).unwrap_err();
        assert!(matches!(err, DraftError::NotAnObject("an array")));
    }

    #[test]
    fn from_template_reports_wrong_field_types() {
        let err = NodegroupConfigDraft::from_template(&json!({ "diskSize": "large" })).unwrap_err();
        assert!(matches!(err, DraftError::Json(_)));
    }

    #[rstest]
    #[case(5, 3, 4, "minSize cannot be greater than maxSize")]
    #[case(2, 4, 1, "desiredSize cannot be less than minSize")]
    #[case(0, 4, 5, "desiredSize cannot be greater than maxSize")]
    #[case(-1, 4, 0, "minSize cannot be negative")]
    fn scaling_validation_reports_first_violation(
        #[case] min: i64,
        #[case] max: i64,
        #[case] desired: i64,
        #[case] reason: &str,
    ) {
        let scaling = ScalingConfig {
            min_size: min,
            max_size: max,
            desired_size: desired,
        };

        assert_eq!(
            scaling.validate().unwrap_err(),
            AlignmentError::InvalidScalingConfig {
                min,
                max,
                desired,
                reason: reason.to_string(),
            }
        );
    }

    #[test]
    fn validate_rejects_release_version_without_patch() {
        let draft = NodegroupConfigDraft {
            release_version: Some("1.32-20250610".to_string()),
            ..Default::default()
        };

        assert_eq!(
            draft.validate().unwrap_err(),
            AlignmentError::InvalidReleaseVersion("1.32-20250610".to_string())
        );
    }

    #[rstest]
    #[case(Architecture::X86_64, "g4dn.xlarge", "amd64", AmiType::Al2023X86_64Nvidia)]
    #[case(Architecture::Arm64, "g5g.xlarge", "arm64", AmiType::Al2023Arm64Nvidia)]
    fn sample_uses_architecture_defaults(
        #[case] architecture: Architecture,
        #[case] instance_type: &str,
        #[case] label: &str,
        #[case] ami_type: AmiType,
    ) {
        let draft = NodegroupConfigDraft::sample(architecture);

        assert_eq!(draft.instance_types, vec![instance_type]);
        assert_eq!(draft.labels["kubernetes.io/arch"], label);
        assert_eq!(draft.ami_type, Some(ami_type));
        assert_eq!(draft.disk_size, Some(50));
        assert_eq!(draft.scaling_config, Some(ScalingConfig::default()));
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn warnings_flag_architecture_mismatch_and_placeholders() {
        let mut draft = NodegroupConfigDraft::sample(Architecture::X86_64);
        draft.instance_types = vec!["g5g.2xlarge".to_string(), "m5.large".to_string()];

        let warnings = draft.warnings(Architecture::X86_64);

        assert!(warnings.contains(&"Instance type g5g.2xlarge does not match architecture x86_64".to_string()));
        assert!(warnings.contains(&"Instance type m5.large has no GPU".to_string()));
        assert!(warnings.iter().any(|w| w.contains("YOUR-CLUSTER-NAME")));
        assert!(warnings.iter().any(|w| w.contains("subnet-YOUR_SUBNET_2")));
    }

    #[test]
    fn overrides_replace_only_given_values() {
        let mut draft = NodegroupConfigDraft::sample(Architecture::Arm64);
        let overrides = NodegroupOverrides {
            cluster_name: Some("staging".to_string()),
            subnets: Some(vec!["subnet-123".to_string()]),
            capacity_type: Some(CapacityType::Spot),
            desired_size: Some(3),
            ..Default::default()
        };

        overrides.apply(&mut draft);

        assert_eq!(draft.cluster_name, "staging");
        assert_eq!(draft.subnets, vec!["subnet-123"]);
        assert_eq!(draft.capacity_type, Some(CapacityType::Spot));
        assert_eq!(
            draft.scaling_config,
            Some(ScalingConfig {
                min_size: 0,
                max_size: 10,
                desired_size: 3
            })
        );
        assert_eq!(draft.instance_types, vec!["g5g.xlarge"]);
    }

    #[rstest]
    #[case("on-demand", Ok(CapacityType::OnDemand))]
    #[case("SPOT", Ok(CapacityType::Spot))]
    #[case("capacity-block", Ok(CapacityType::CapacityBlock))]
    #[case("reserved", Err("unknown capacity type: RESERVED (expected ON_DEMAND, SPOT or CAPACITY_BLOCK)".to_string()))]
    fn capacity_type_from_str(#[case] input: &str, #[case] expected: Result<CapacityType, String>) {
        assert_eq!(input.parse::<CapacityType>(), expected);
    }
}
