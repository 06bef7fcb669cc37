//! EKS `releaseVersion` rendering
//!
//! EKS rejects a node-group `releaseVersion` that lacks the Kubernetes patch
//! segment, so the patch always comes from a regional lookup or from the
//! kubelet version recorded in the changelog, never from a guess.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::changelog::types::{AmiFamily, Architecture};
use crate::version::catalog::{self, ReleaseEntry};
use crate::version::error::{AlignmentError, LookupError};
use crate::version::kubernetes;

static RELEASE_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+-\d{8}$").unwrap());

static FULL_BUILD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v?(\d+\.\d+)\.(\d+)-(\d{8})$").unwrap());

static BUILD_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^v?(\d{8})$").unwrap());

/// Regional build lookup, usually backed by the EKS optimized AMI SSM parameters.
///
/// Each answer is either a full release version ("1.32.3-20250610") or a bare
/// build id ("20250610"). `Ok(None)` means the region publishes no such build.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait BuildIdLookup: Send + Sync {
    /// Build of the recommended, newest AMI for the coordinates
    async fn recommended_build(
        &self,
        kubernetes_version: &str,
        architecture: Architecture,
        family: AmiFamily,
        region: &str,
    ) -> Result<Option<String>, LookupError>;

    /// Build of one specific release
    async fn release_build(
        &self,
        kubernetes_version: &str,
        architecture: Architecture,
        family: AmiFamily,
        release_tag: &str,
        region: &str,
    ) -> Result<Option<String>, LookupError>;
}

/// `/aws/service/eks/optimized-ami/{k8s}/{family}/{arch}/nvidia/recommended/{leaf}`
pub fn ssm_parameter_path(
    kubernetes_version: &str,
    family: AmiFamily,
    architecture: Architecture,
    leaf: &str,
) -> String {
    format!(
        "/aws/service/eks/optimized-ami/{}/{}/{}/nvidia/recommended/{}",
        kubernetes_version,
        family.ssm_segment(),
        architecture.as_str(),
        leaf
    )
}

/// AMI name of one release, e.g. `amazon-eks-node-al2023-x86_64-nvidia-1.31-v20250224`
pub fn release_image_name(
    kubernetes_version: &str,
    family: AmiFamily,
    architecture: Architecture,
    release_tag: &str,
) -> String {
    match family {
        AmiFamily::Al2023 => format!(
            "amazon-eks-node-al2023-{}-nvidia-{}-{}",
            architecture.as_str(),
            kubernetes_version,
            release_tag
        ),
        AmiFamily::Al2 => format!("amazon-eks-gpu-node-{}-{}", kubernetes_version, release_tag),
    }
}

/// SSM parameter of one release rather than the recommended one
pub fn release_parameter_path(
    kubernetes_version: &str,
    family: AmiFamily,
    architecture: Architecture,
    release_tag: &str,
    leaf: &str,
) -> String {
    let image_name = release_image_name(kubernetes_version, family, architecture, release_tag);
    match family {
        AmiFamily::Al2023 => format!(
            "/aws/service/eks/optimized-ami/{}/{}/{}/nvidia/{}/{}",
            kubernetes_version,
            family.ssm_segment(),
            architecture.as_str(),
            image_name,
            leaf
        ),
        AmiFamily::Al2 => format!(
            "/aws/service/eks/optimized-ami/{}/{}/{}/{}",
            kubernetes_version,
            family.ssm_segment(),
            image_name,
            leaf
        ),
    }
}

pub fn is_valid_release_version(value: &str) -> bool {
    RELEASE_VERSION.is_match(value)
}

/// Fail with `InvalidReleaseVersion` unless `value` is `<major>.<minor>.<patch>-<YYYYMMDD>`.
pub fn validate_release_version(value: &str) -> Result<(), AlignmentError> {
    if is_valid_release_version(value) {
        Ok(())
    } else {
        Err(AlignmentError::InvalidReleaseVersion(value.to_string()))
    }
}

/// Render `{k8s}.{patch}-{buildId}` for an entry and a regional build value.
///
/// `build` may be a full release version, in which case its patch is used,
/// or a bare build id, in which case the entry's Kubernetes patch is used.
/// The build id must be the one in the entry's release tag.
pub fn format_release_version(
    entry: &ReleaseEntry,
    build: &str,
    region: &str,
) -> Result<String, AlignmentError> {
    let unresolvable = |reason: String| AlignmentError::UnresolvableRegionalBuild {
        kubernetes_version: entry.kubernetes_version.clone(),
        architecture: entry.architecture,
        ami_type: entry.ami_type,
        region: region.to_string(),
        reason,
    };
    let build = build.trim();
    let expected = entry.build_id().ok_or_else(|| {
        unresolvable(format!("release tag {} carries no build id", entry.release_tag))
    })?;
    if catalog::build_id(build) != Some(expected) {
        return Err(unresolvable(format!(
            "regional build {build} is not release {}",
            entry.release_tag
        )));
    }

    let formatted = if let Some(caps) = FULL_BUILD.captures(build) {
        let minor = &caps[1];
        if kubernetes::compare_versions(minor, &entry.kubernetes_version).is_ne() {
            return Err(unresolvable(format!(
                "regional build {build} is for Kubernetes {minor}"
            )));
        }
        format!("{}.{}-{}", entry.kubernetes_version, &caps[2], &caps[3])
    } else if let Some(caps) = BUILD_ID.captures(build) {
        let patch = entry.kubernetes_patch.ok_or_else(|| {
            unresolvable(format!(
                "build id {build} carries no Kubernetes patch and the changelog lists no kubelet version"
            ))
        })?;
        format!("{}.{}-{}", entry.kubernetes_version, patch, &caps[1])
    } else {
        return Err(unresolvable(format!("unrecognized build value {build:?}")));
    };

    validate_release_version(&formatted)?;
    Ok(formatted)
}

pub struct ReleaseVersionFormatter<'a> {
    lookup: &'a dyn BuildIdLookup,
    region: String,
}

impl<'a> ReleaseVersionFormatter<'a> {
    pub fn new(lookup: &'a dyn BuildIdLookup, region: impl Into<String>) -> Self {
        Self {
            lookup,
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Look up the regional build of the entry's own release and render its `releaseVersion`.
    ///
    /// The recommended build is used when it is the entry's release; otherwise
    /// the release's own parameter is read. A build of any other release is
    /// never used.
    pub async fn release_version(&self, entry: &ReleaseEntry) -> Result<String, AlignmentError> {
        let family = entry.ami_family();
        let recommended = self
            .lookup
            .recommended_build(
                &entry.kubernetes_version,
                entry.architecture,
                family,
                &self.region,
            )
            .await
            .map_err(|e| self.lookup_failed(e))?;
        if let Some(build) = recommended {
            if entry.build_id().is_some() && catalog::build_id(&build) == entry.build_id() {
                debug!(
                    "Recommended build for {} {} in {}: {}",
                    entry.kubernetes_version, entry.ami_type, self.region, build
                );
                return format_release_version(entry, &build, &self.region);
            }
            debug!(
                "Recommended build {} in {} is not release {}",
                build, self.region, entry.release_tag
            );
        }

        let build = self
            .lookup
            .release_build(
                &entry.kubernetes_version,
                entry.architecture,
                family,
                &entry.release_tag,
                &self.region,
            )
            .await
            .map_err(|e| self.lookup_failed(e))?
            .ok_or_else(|| AlignmentError::UnresolvableRegionalBuild {
                kubernetes_version: entry.kubernetes_version.clone(),
                architecture: entry.architecture,
                ami_type: entry.ami_type,
                region: self.region.clone(),
                reason: format!("release {} is not published in the region", entry.release_tag),
            })?;
        debug!(
            "Build of release {} in {}: {}",
            entry.release_tag, self.region, build
        );
        format_release_version(entry, &build, &self.region)
    }

    fn lookup_failed(&self, error: LookupError) -> AlignmentError {
        AlignmentError::RegionalLookupFailed {
            region: self.region.clone(),
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::types::RawReleaseRow;
    use crate::version::catalog::ReleaseCatalog;
    use crate::version::catalog::tests::row;
    use rstest::rstest;

    fn entry_for(tag: &str, kubelet: Option<&str>) -> ReleaseEntry {
        let catalog = ReleaseCatalog::build(&[RawReleaseRow {
            kubelet_version: kubelet.map(str::to_string),
            ..row(tag, "1.32", "AL2023_x86_64_NVIDIA", "570.148.08", "2025-06-10")
        }]);
        catalog.entries()[0].clone()
    }

    fn entry(kubelet: Option<&str>) -> ReleaseEntry {
        entry_for("v20250610", kubelet)
    }

    #[test]
    fn bare_build_id_uses_embedded_patch() {
        let entry = entry(Some("1.32.3-eks-473151a"));
        assert_eq!(
            format_release_version(&entry, "20250610", "eu-west-1").unwrap(),
            "1.32.3-20250610"
        );
    }

    #[rstest]
    #[case("1.32.5-20250610", "1.32.5-20250610")]
    #[case("v1.32.5-20250610", "1.32.5-20250610")]
    fn full_build_value_supplies_patch(#[case] build: &str, #[case] expected: &str) {
        assert_eq!(
            format_release_version(&entry(None), build, "eu-west-1").unwrap(),
            expected
        );
    }

    #[rstest]
    #[case(None, "20250610")]
    #[case(Some("1.32.3"), "1.31.3-20250610")]
    #[case(Some("1.32.3"), "2025061")]
    #[case(Some("1.32.3"), "ami-0123456789abcdef0")]
    #[case(Some("1.32.3"), "20250715")]
    #[case(Some("1.32.3"), "1.32.5-20250715")]
    fn unusable_build_values_are_unresolvable(#[case] kubelet: Option<&str>, #[case] build: &str) {
        let err = format_release_version(&entry(kubelet), build, "us-east-1").unwrap_err();
        let AlignmentError::UnresolvableRegionalBuild { region, .. } = &err else {
            panic!("expected UnresolvableRegionalBuild, got {err:?}");
        };
        assert_eq!(region, "us-east-1");
    }

    #[test]
    fn tag_without_build_id_is_unresolvable() {
        let entry = entry_for("release-2025-06", Some("1.32.3"));

        let err = format_release_version(&entry, "20250610", "us-east-1").unwrap_err();

        assert!(matches!(
            err,
            AlignmentError::UnresolvableRegionalBuild { ref reason, .. }
                if reason == "release tag release-2025-06 carries no build id"
        ));
    }

    #[rstest]
    #[case("1.32.3-20250610", true)]
    #[case("1.32-20250610", false)]
    #[case("1.32.3-2025061", false)]
    #[case("1.32.3-20250610 ", false)]
    fn test_is_valid_release_version(#[case] value: &str, #[case] expected: bool) {
        assert_eq!(is_valid_release_version(value), expected);
    }

    #[test]
    fn ssm_parameter_path_uses_family_segment() {
        assert_eq!(
            ssm_parameter_path("1.32", AmiFamily::Al2023, Architecture::Arm64, "image_id"),
            "/aws/service/eks/optimized-ami/1.32/amazon-linux-2023/arm64/nvidia/recommended/image_id"
        );
        assert_eq!(
            ssm_parameter_path("1.31", AmiFamily::Al2, Architecture::X86_64, "release_version"),
            "/aws/service/eks/optimized-ami/1.31/amazon-linux-2-gpu/x86_64/nvidia/recommended/release_version"
        );
    }

    #[test]
    fn release_parameter_path_names_the_release_image() {
        assert_eq!(
            release_parameter_path("1.31", AmiFamily::Al2023, Architecture::X86_64, "v20250224", "image_id"),
            "/aws/service/eks/optimized-ami/1.31/amazon-linux-2023/x86_64/nvidia/amazon-eks-node-al2023-x86_64-nvidia-1.31-v20250224/image_id"
        );
        assert_eq!(
            release_parameter_path("1.31", AmiFamily::Al2, Architecture::X86_64, "v20241121", "image_id"),
            "/aws/service/eks/optimized-ami/1.31/amazon-linux-2-gpu/amazon-eks-gpu-node-1.31-v20241121/image_id"
        );
    }

    #[tokio::test]
    async fn formatter_uses_recommended_build_of_the_same_release() {
        let mut lookup = MockBuildIdLookup::new();
        lookup
            .expect_recommended_build()
            .withf(|k8s, arch, family, region| {
                k8s == "1.32"
                    && *arch == Architecture::X86_64
                    && *family == AmiFamily::Al2023
                    && region == "eu-west-1"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(Some("20250610".to_string())));
        lookup.expect_release_build().never();

        let formatter = ReleaseVersionFormatter::new(&lookup, "eu-west-1");
        let entry = entry(Some("1.32.3-eks-473151a"));

        assert_eq!(formatter.release_version(&entry).await.unwrap(), "1.32.3-20250610");
    }

    #[tokio::test]
    async fn formatter_reads_release_build_when_recommended_is_newer() {
        let mut lookup = MockBuildIdLookup::new();
        lookup
            .expect_recommended_build()
            .returning(|_, _, _, _| Ok(Some("1.32.7-20250715".to_string())));
        lookup
            .expect_release_build()
            .withf(|k8s, _, _, tag, region| k8s == "1.32" && tag == "v20250610" && region == "eu-west-1")
            .times(1)
            .returning(|_, _, _, _, _| Ok(Some("20250610".to_string())));

        let formatter = ReleaseVersionFormatter::new(&lookup, "eu-west-1");
        let entry = entry(Some("1.32.3-eks-473151a"));

        assert_eq!(formatter.release_version(&entry).await.unwrap(), "1.32.3-20250610");
    }

    #[tokio::test]
    async fn formatter_never_borrows_another_release_build() {
        let mut lookup = MockBuildIdLookup::new();
        lookup
            .expect_recommended_build()
            .returning(|_, _, _, _| Ok(Some("1.32.7-20250715".to_string())));
        lookup
            .expect_release_build()
            .returning(|_, _, _, _, _| Ok(None));

        let formatter = ReleaseVersionFormatter::new(&lookup, "eu-west-1");
        let err = formatter
            .release_version(&entry(Some("1.32.3")))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AlignmentError::UnresolvableRegionalBuild { ref reason, .. }
                if reason == "release v20250610 is not published in the region"
        ));
    }

    #[tokio::test]
    async fn formatter_fails_closed_when_region_has_no_build() {
        let mut lookup = MockBuildIdLookup::new();
        lookup
            .expect_recommended_build()
            .returning(|_, _, _, _| Ok(None));
        lookup
            .expect_release_build()
            .returning(|_, _, _, _, _| Ok(None));

        let formatter = ReleaseVersionFormatter::new(&lookup, "ap-south-2");
        let err = formatter
            .release_version(&entry(Some("1.32.3")))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AlignmentError::UnresolvableRegionalBuild { ref region, .. } if region == "ap-south-2"
        ));
    }

    #[tokio::test]
    async fn formatter_reports_lookup_failures_separately() {
        let mut lookup = MockBuildIdLookup::new();
        lookup
            .expect_recommended_build()
            .returning(|_, _, _, _| Err(LookupError::new("ExpiredTokenException: token expired")));

        let formatter = ReleaseVersionFormatter::new(&lookup, "eu-west-1");
        let err = formatter
            .release_version(&entry(Some("1.32.3")))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AlignmentError::RegionalLookupFailed {
                region: "eu-west-1".to_string(),
                reason: "ExpiredTokenException: token expired".to_string(),
            }
        );
    }
}
