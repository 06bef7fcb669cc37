//! NVIDIA CUDA apt repository listings
//!
//! The repository publishes one directory per Ubuntu release and
//! architecture. Its HTML index is enough to tell which Debian revision of
//! each userspace package exists for a driver.

use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use tracing::{debug, warn};

use crate::changelog::error::SourceError;
use crate::changelog::types::Architecture;
use crate::config::{DEFAULT_NVIDIA_REPO_URL, FETCH_TIMEOUT_MS};
use crate::version::driver_package::{ContainerDriver, DriverPackageFormatter};
use crate::version::token::VersionToken;

/// Source of repository directory listings
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait PackageListing: Send + Sync {
    /// Raw index of `{ubuntu_version}/{arch}/`
    async fn listing(
        &self,
        ubuntu_version: &str,
        architecture: Architecture,
    ) -> Result<String, SourceError>;
}

/// Package listing backed by the NVIDIA CUDA repository over HTTP
pub struct NvidiaRepository {
    client: reqwest::Client,
    base_url: String,
}

impl NvidiaRepository {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("nvidia-align")
                .timeout(Duration::from_millis(FETCH_TIMEOUT_MS))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for NvidiaRepository {
    fn default() -> Self {
        Self::new(DEFAULT_NVIDIA_REPO_URL)
    }
}

#[async_trait::async_trait]
impl PackageListing for NvidiaRepository {
    async fn listing(
        &self,
        ubuntu_version: &str,
        architecture: Architecture,
    ) -> Result<String, SourceError> {
        let url = format!(
            "{}/{}/{}/",
            self.base_url,
            ubuntu_version,
            architecture.nvidia_repo_path()
        );
        debug!("Fetching {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(url));
        }

        if !status.is_success() {
            warn!("NVIDIA repository returned status {}: {}", status, url);
            return Err(SourceError::InvalidResponse(format!(
                "Unexpected status: {}",
                status
            )));
        }

        Ok(response.text().await?)
    }
}

/// Container driver whose package versions were checked against the repository
pub async fn verified_container_driver(
    repository: &dyn PackageListing,
    formatter: &DriverPackageFormatter,
    driver: &VersionToken,
    architecture: Architecture,
) -> Result<ContainerDriver, SourceError> {
    let listing = repository
        .listing(formatter.ubuntu_version(), architecture)
        .await?;
    let container = formatter.container_driver_from_listing(driver, architecture, &listing);
    if !container.missing_packages.is_empty() {
        warn!(
            "Repository lacks {} for driver {}",
            container.missing_packages.join(", "),
            driver
        );
    }
    Ok(container)
}
