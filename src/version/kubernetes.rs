use std::cmp::Ordering;

use semver::Version;

use crate::config::AL2_LAST_KUBERNETES_VERSION;

/// Parse a Kubernetes version string into a semver::Version, normalizing partial versions.
///
/// Handles partial versions like "1" or "1.32" by padding with zeros.
/// A leading 'v' is accepted ("v1.32.3" from `kubectl version`).
///
/// Examples:
/// - "1.32" -> Version(1, 32, 0)
/// - "1.32.3" -> Version(1, 32, 3)
pub fn parse_version(version: &str) -> Option<Version> {
    let version = version.trim().trim_start_matches('v');
    let parts: Vec<&str> = version.split('.').collect();
    let normalized = match parts.len() {
        1 => format!("{}.0.0", parts[0]),
        2 => format!("{}.{}.0", parts[0], parts[1]),
        _ => version.to_string(),
    };
    Version::parse(&normalized).ok()
}

/// Order two Kubernetes versions numerically, falling back to string order
/// when either side does not parse.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        _ => a.cmp(b),
    }
}

/// Whether EKS still publishes AL2 GPU AMIs for this Kubernetes version
pub fn is_al2_supported(kubernetes_version: &str) -> bool {
    match (
        parse_version(kubernetes_version),
        parse_version(AL2_LAST_KUBERNETES_VERSION),
    ) {
        (Some(version), Some(last)) => (version.major, version.minor) <= (last.major, last.minor),
        _ => false,
    }
}

/// Extract the patch number from a kubelet package version.
///
/// Returns `None` when the kubelet version belongs to another minor release.
///
/// Examples:
/// - ("1.32", "1.32.3-eks-473151a") -> Some(3)
/// - ("1.32", "v1.32.3") -> Some(3)
/// - ("1.31", "1.32.3") -> None
pub fn kubelet_patch(kubernetes_version: &str, kubelet_version: &str) -> Option<u32> {
    let kubelet = kubelet_version.trim().trim_start_matches('v');
    let rest = kubelet.strip_prefix(kubernetes_version.trim())?.strip_prefix('.')?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Reduce "1.32.3" (or "v1.32.3-eks-...") to the "1.32" form used by the changelog.
pub fn minor_version(version: &str) -> Option<String> {
    let version = version.trim().trim_start_matches('v');
    let mut parts = version.split(['.', '-']);
    let major: u64 = parts.next()?.parse().ok()?;
    let minor: u64 = parts.next()?.parse().ok()?;
    Some(format!("{major}.{minor}"))
}
