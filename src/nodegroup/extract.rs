//! Rewrite an existing node group against a freshly resolved release
//!
//! ```text
//! describe-nodegroup ──▶ NodegroupDescription ──▶ AlignmentRequest
//!                                                       │
//!                                                       ▼
//!            draft ◀── allow-list ◀── releaseVersion ◀── ResolvedAlignment
//! ```
//!
//! Only `amiType`, `version` and `releaseVersion` are ever changed.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::changelog::types::Architecture;
use crate::nodegroup::aws::ClusterVersionSource;
use crate::nodegroup::draft::NodegroupConfigDraft;
use crate::nodegroup::error::ExtractError;
use crate::version::error::AlignmentError;
use crate::version::kubernetes;
use crate::version::release::ReleaseVersionFormatter;
use crate::version::resolver::{AlignmentRequest, AlignmentResolver, ResolvedAlignment, Strategy};

/// An existing node group as reported by `describe-nodegroup`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodegroupDescription {
    pub cluster_name: String,
    pub nodegroup_name: String,
    pub kubernetes_version: String,
    pub architecture: Architecture,
    /// Driver version of the workload containers, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_version: Option<String>,
    /// The full node-group record, server-assigned fields included
    pub config: Map<String, Value>,
}

impl NodegroupDescription {
    pub fn alignment_request(&self, strategy: Strategy) -> Result<AlignmentRequest, ExtractError> {
        match strategy {
            Strategy::AmiFirst => Ok(AlignmentRequest::AmiFirst {
                kubernetes_version: self.kubernetes_version.clone(),
                architecture: self.architecture,
                ami_type: None,
            }),
            Strategy::ContainerFirst => {
                let driver_version =
                    self.driver_version
                        .clone()
                        .ok_or_else(|| ExtractError::MissingDriverVersion {
                            nodegroup: self.nodegroup_name.clone(),
                        })?;
                Ok(AlignmentRequest::ContainerFirst {
                    driver_version,
                    architecture: self.architecture,
                    kubernetes_version: Some(self.kubernetes_version.clone()),
                })
            }
        }
    }
}

/// Result of rewriting one node group
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    pub nodegroup_name: String,
    pub resolved: ResolvedAlignment,
    pub release_version: String,
    pub draft: NodegroupConfigDraft,
    pub warnings: Vec<String>,
}

/// Use an explicit Kubernetes version, or ask the cluster for one.
///
/// Patch versions are reduced to `major.minor`, the granularity of the changelog.
pub async fn resolve_kubernetes_version(
    explicit: Option<&str>,
    cluster_name: Option<&str>,
    clusters: &dyn ClusterVersionSource,
) -> Result<String, ExtractError> {
    let version = match explicit {
        Some(version) => version.trim().to_string(),
        None => {
            let cluster_name = cluster_name.ok_or(AlignmentError::MissingKubernetesVersion)?;
            let version = clusters.cluster_version(cluster_name).await?;
            info!("Cluster {} runs Kubernetes {}", cluster_name, version);
            version
        }
    };
    Ok(kubernetes::minor_version(&version).unwrap_or(version))
}

pub struct NodegroupExtractor<'a> {
    resolver: &'a AlignmentResolver<'a>,
    releases: &'a ReleaseVersionFormatter<'a>,
}

impl<'a> NodegroupExtractor<'a> {
    pub fn new(resolver: &'a AlignmentResolver<'a>, releases: &'a ReleaseVersionFormatter<'a>) -> Self {
        Self { resolver, releases }
    }

    pub async fn extract(
        &self,
        description: &NodegroupDescription,
        strategy: Strategy,
    ) -> Result<Extraction, ExtractError> {
        let request = description.alignment_request(strategy)?;
        let resolved = self.resolver.resolve(&request)?;
        let release_version = self.releases.release_version(&resolved.entry).await?;

        // The resolved release replaces the AMI type, which may be CUSTOM or a non-GPU type
        let mut config = description.config.clone();
        if let Some(previous) = config.remove("amiType") {
            debug!(
                "Replacing amiType {} of node group {}",
                previous, description.nodegroup_name
            );
        }
        let mut draft = NodegroupConfigDraft::from_config(&config)?;
        if draft.cluster_name.is_empty() {
            draft.cluster_name = description.cluster_name.clone();
        }
        if draft.nodegroup_name.is_empty() {
            draft.nodegroup_name = description.nodegroup_name.clone();
        }
        draft.apply_release(&resolved.entry, &release_version)?;
        draft.validate()?;

        let warnings = draft.warnings(resolved.entry.architecture);
        info!(
            "Node group {} aligned to {} ({})",
            description.nodegroup_name, release_version, resolved.entry.ami_type
        );

        Ok(Extraction {
            nodegroup_name: description.nodegroup_name.clone(),
            resolved,
            release_version,
            draft,
            warnings,
        })
    }
}
