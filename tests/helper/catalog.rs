//! Catalog test utilities

use std::collections::HashMap;

use nvidia_align::changelog::types::{AmiFamily, Architecture, RawReleaseRow};
use nvidia_align::version::error::LookupError;
use nvidia_align::version::release::BuildIdLookup;

/// Build a raw row; the architecture follows the AMI type
pub fn row(tag: &str, k8s: &str, ami_type: &str, driver: &str, date: &str) -> RawReleaseRow {
    let architecture = if ami_type.contains("ARM_64") {
        "arm64"
    } else {
        "x86_64"
    };
    RawReleaseRow {
        release_tag: tag.to_string(),
        kubernetes_version: k8s.to_string(),
        architecture: architecture.to_string(),
        ami_type: ami_type.to_string(),
        driver_version: driver.to_string(),
        release_date: date.to_string(),
        kubelet_version: None,
    }
}

/// Regional build lookup answering from fixed tables
#[derive(Default)]
pub struct FixedBuildLookup {
    recommended: HashMap<(String, Architecture, AmiFamily), String>,
    releases: HashMap<String, String>,
}

impl FixedBuildLookup {
    pub fn with_build(
        mut self,
        k8s: &str,
        architecture: Architecture,
        family: AmiFamily,
        build: &str,
    ) -> Self {
        self.recommended
            .insert((k8s.to_string(), architecture, family), build.to_string());
        self
    }

    /// Publish an older release next to the recommended one
    pub fn with_release(mut self, release_tag: &str, build: &str) -> Self {
        self.releases
            .insert(release_tag.to_string(), build.to_string());
        self
    }
}

#[async_trait::async_trait]
impl BuildIdLookup for FixedBuildLookup {
    async fn recommended_build(
        &self,
        kubernetes_version: &str,
        architecture: Architecture,
        family: AmiFamily,
        _region: &str,
    ) -> Result<Option<String>, LookupError> {
        Ok(self
            .recommended
            .get(&(kubernetes_version.to_string(), architecture, family))
            .cloned())
    }

    async fn release_build(
        &self,
        _kubernetes_version: &str,
        _architecture: Architecture,
        _family: AmiFamily,
        release_tag: &str,
        _region: &str,
    ) -> Result<Option<String>, LookupError> {
        Ok(self.releases.get(release_tag).cloned())
    }
}

/// Release notes body in the `<details>` layout used by the EKS AMI changelog
pub fn release_body(k8s: &str, kubelet: &str, x86_driver: &str, arm_driver: &str) -> String {
    format!(
        r#"<details>
<summary><b>Kubernetes {k8s}</b></summary>
<table>
<tr><th>Package</th><th>AL2023_x86_64_STANDARD</th><th>AL2023_x86_64_NVIDIA</th><th>AL2023_ARM_64_NVIDIA</th></tr>
<tr><td>kubelet</td><td colspan="3">{kubelet}</td></tr>
<tr><td>kmod-nvidia-latest-dkms</td><td>&mdash;</td><td>{x86_driver}</td><td>{arm_driver}</td></tr>
</table>
</details>"#
    )
}
