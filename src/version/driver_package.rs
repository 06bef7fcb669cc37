//! Container-side NVIDIA userspace packages for a kernel driver version

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::changelog::types::Architecture;
use crate::config::{DEFAULT_NVIDIA_REPO_URL, DEFAULT_OS_TAG, DEFAULT_UBUNTU_VERSION};
use crate::version::token::VersionToken;

/// Userspace libraries that must match the node's kernel module
pub const USERSPACE_PACKAGES: [&str; 3] =
    ["libnvidia-compute", "libnvidia-encode", "libnvidia-decode"];

/// Render `{major}_{numeric}-{osTag}`, e.g. `570_570.124.06-0ubuntu1`.
pub fn format_container_tag(driver: &VersionToken, os_tag: &str) -> String {
    format!("{}_{}-{}", driver.major(), driver.to_display_string(), os_tag)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPackage {
    pub name: String,
    pub file_name: String,
    pub url: String,
}

/// Everything a Dockerfile needs to install the matching userspace driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDriver {
    pub tag: String,
    pub package_version: String,
    pub packages: Vec<ContainerPackage>,
    /// Packages the repository listing does not carry; empty when unchecked
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_packages: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DriverPackageFormatter {
    ubuntu_version: String,
    os_tag: String,
    base_url: String,
}

impl DriverPackageFormatter {
    pub fn new(ubuntu_version: impl Into<String>, os_tag: impl Into<String>) -> Self {
        Self {
            ubuntu_version: ubuntu_version.into(),
            os_tag: os_tag.into(),
            base_url: DEFAULT_NVIDIA_REPO_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn os_tag(&self) -> &str {
        &self.os_tag
    }

    pub fn ubuntu_version(&self) -> &str {
        &self.ubuntu_version
    }

    /// Directory of the repository holding packages for an architecture
    pub fn repository_url(&self, architecture: Architecture) -> String {
        format!(
            "{}/{}/{}/",
            self.base_url.trim_end_matches('/'),
            self.ubuntu_version,
            architecture.nvidia_repo_path()
        )
    }

    /// Debian package version, e.g. `570.124.06-0ubuntu1`
    pub fn package_version(&self, driver: &VersionToken) -> String {
        format!("{}-{}", driver.to_display_string(), self.os_tag)
    }

    pub fn deb_file_name(
        &self,
        package: &str,
        driver: &VersionToken,
        architecture: Architecture,
    ) -> String {
        format!(
            "{}-{}_{}_{}.deb",
            package,
            driver.major(),
            self.package_version(driver),
            architecture.deb_suffix()
        )
    }

    pub fn deb_url(&self, package: &str, driver: &VersionToken, architecture: Architecture) -> String {
        format!(
            "{}{}",
            self.repository_url(architecture),
            self.deb_file_name(package, driver, architecture)
        )
    }

    pub fn container_driver(&self, driver: &VersionToken, architecture: Architecture) -> ContainerDriver {
        if driver.components().len() < 3 {
            warn!(
                "Driver version {} has fewer than three components; NVIDIA packages for it are unlikely to exist",
                driver
            );
        }

        let packages = USERSPACE_PACKAGES
            .iter()
            .map(|name| ContainerPackage {
                name: format!("{}-{}", name, driver.major()),
                file_name: self.deb_file_name(name, driver, architecture),
                url: self.deb_url(name, driver, architecture),
            })
            .collect();

        ContainerDriver {
            tag: format_container_tag(driver, &self.os_tag),
            package_version: self.package_version(driver),
            packages,
            missing_packages: Vec::new(),
        }
    }

    /// Like [`Self::container_driver`], with package versions read from a
    /// repository directory listing.
    ///
    /// The Debian revision is the one the repository actually publishes.
    /// Packages absent from the listing are reported in `missing_packages`.
    pub fn container_driver_from_listing(
        &self,
        driver: &VersionToken,
        architecture: Architecture,
        listing: &str,
    ) -> ContainerDriver {
        let mut packages = Vec::new();
        let mut missing_packages = Vec::new();
        let mut package_version: Option<String> = None;

        for name in USERSPACE_PACKAGES {
            let Some(version) = listed_versions(listing, name, driver, architecture).pop() else {
                missing_packages.push(format!("{}-{}", name, driver.major()));
                continue;
            };
            let file_name = format!(
                "{}-{}_{}_{}.deb",
                name,
                driver.major(),
                version,
                architecture.deb_suffix()
            );
            packages.push(ContainerPackage {
                name: format!("{}-{}", name, driver.major()),
                url: format!("{}{}", self.repository_url(architecture), file_name),
                file_name,
            });
            if package_version.is_none() {
                package_version = Some(version);
            }
        }

        let Some(package_version) = package_version else {
            warn!(
                "No userspace packages for driver {} in {}",
                driver,
                self.repository_url(architecture)
            );
            let mut unverified = self.container_driver(driver, architecture);
            unverified.missing_packages = unverified.packages.drain(..).map(|p| p.name).collect();
            return unverified;
        };
        debug!(
            "Repository publishes driver {} as {} ({} missing)",
            driver,
            package_version,
            missing_packages.len()
        );

        ContainerDriver {
            tag: format!("{}_{}", driver.major(), package_version),
            package_version,
            packages,
            missing_packages,
        }
    }
}

/// Package versions of `package` for a driver in a repository listing, lowest first.
///
/// `libnvidia-compute-570_570.86.15-0ubuntu1_amd64.deb` yields `570.86.15-0ubuntu1`.
pub fn listed_versions(
    listing: &str,
    package: &str,
    driver: &VersionToken,
    architecture: Architecture,
) -> Vec<String> {
    let pattern = format!(
        r"{}-{}_({}-[0-9a-z.~+]+)_{}\.deb",
        regex::escape(package),
        driver.major(),
        regex::escape(&driver.to_display_string()),
        regex::escape(architecture.deb_suffix())
    );
    let Ok(regex) = Regex::new(&pattern) else {
        return Vec::new();
    };
    let mut versions: Vec<String> = regex
        .captures_iter(listing)
        .map(|caps| caps[1].to_string())
        .collect();
    versions.sort();
    versions.dedup();
    versions
}

impl Default for DriverPackageFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_UBUNTU_VERSION, DEFAULT_OS_TAG)
    }
}
