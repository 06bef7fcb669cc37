//! Changelog source trait for fetching AMI release notes

#[cfg(test)]
use mockall::automock;
use serde::Deserialize;

use crate::changelog::error::SourceError;

/// One published AMI release with its raw release notes
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublishedRelease {
    pub tag_name: String,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
}

impl PublishedRelease {
    /// Drafts and prereleases never ship to EKS
    pub fn is_published(&self) -> bool {
        !self.draft && !self.prerelease
    }
}

/// Trait for fetching AMI releases from a changelog provider
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ChangelogSource: Send + Sync {
    /// Fetches releases for a repository
    ///
    /// # Arguments
    /// * `repository` - Repository in owner/name form (e.g., "awslabs/amazon-eks-ami")
    ///
    /// # Returns
    /// * `Ok(Vec<PublishedRelease>)` - Releases, ordered from newest to oldest
    /// * `Err(SourceError)` - If the fetch fails
    async fn fetch_releases(&self, repository: &str) -> Result<Vec<PublishedRelease>, SourceError>;
}
