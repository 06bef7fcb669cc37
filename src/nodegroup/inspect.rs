//! Report which NVIDIA driver a running node group ships
//!
//! ```text
//! describe-nodegroup ──▶ (version, amiType, releaseVersion) ──▶ catalog ──▶ Inspection
//! ```

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::changelog::types::AmiType;
use crate::nodegroup::extract::NodegroupDescription;
use crate::version::catalog::ReleaseCatalog;
use crate::version::driver_package::{ContainerDriver, DriverPackageFormatter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inspection {
    pub cluster_name: String,
    pub nodegroup_name: String,
    pub kubernetes_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ami_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerDriver>,
    /// Newest release of the same AMI type, when it differs from the running one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newer_release_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Look up the running release of a node group in the catalog.
///
/// Never fails: node groups without an NVIDIA AMI or with a release the
/// changelog does not list are reported with a note.
pub fn inspect(
    description: &NodegroupDescription,
    catalog: &ReleaseCatalog,
    packages: &DriverPackageFormatter,
) -> Inspection {
    let field = |name: &str| {
        description
            .config
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let mut inspection = Inspection {
        cluster_name: description.cluster_name.clone(),
        nodegroup_name: description.nodegroup_name.clone(),
        kubernetes_version: description.kubernetes_version.clone(),
        ami_type: field("amiType"),
        release_version: field("releaseVersion"),
        release_tag: None,
        driver_version: None,
        container: None,
        newer_release_tag: None,
        note: None,
    };

    let Some(ami_type) = inspection
        .ami_type
        .as_deref()
        .and_then(|ami_type| ami_type.parse::<AmiType>().ok())
    else {
        inspection.note = Some(match &inspection.ami_type {
            Some(ami_type) => format!("amiType {ami_type} does not ship an NVIDIA driver"),
            None => "node group has no amiType".to_string(),
        });
        return inspection;
    };
    let Some(release_version) = inspection.release_version.clone() else {
        inspection.note = Some("node group has no releaseVersion".to_string());
        return inspection;
    };

    let kubernetes_version = &description.kubernetes_version;
    let Some(entry) = catalog.find_by_release(kubernetes_version, &release_version, ami_type)
    else {
        inspection.note = Some(format!(
            "release {release_version} is not listed for Kubernetes {kubernetes_version} {ami_type}"
        ));
        return inspection;
    };
    debug!(
        "Node group {} runs {} with driver {}",
        description.nodegroup_name, entry.release_tag, entry.driver_version_raw
    );

    inspection.newer_release_tag = catalog
        .find_by_version(kubernetes_version, ami_type.architecture(), Some(ami_type))
        .first()
        .filter(|newest| newest.release_date > entry.release_date)
        .map(|newest| newest.release_tag.clone());
    inspection.release_tag = Some(entry.release_tag.clone());
    inspection.driver_version = Some(entry.driver_version_raw.clone());
    inspection.container = Some(packages.container_driver(&entry.driver_version, entry.architecture));
    inspection
}
