//! GitHub Releases API changelog source

use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::changelog::error::SourceError;
use crate::changelog::source::{ChangelogSource, PublishedRelease};
use crate::config::{DEFAULT_RELEASES_PER_PAGE, FETCH_TIMEOUT_MS};

/// Default base URL for GitHub API
const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// Changelog source backed by the GitHub Releases API
pub struct GitHubChangelogSource {
    client: reqwest::Client,
    base_url: String,
    per_page: u32,
    pages: u32,
    token: Option<String>,
}

impl GitHubChangelogSource {
    /// Creates a new GitHubChangelogSource with a custom base URL
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("nvidia-align")
                .timeout(Duration::from_millis(FETCH_TIMEOUT_MS))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            per_page: DEFAULT_RELEASES_PER_PAGE,
            pages: 1,
            token: None,
        }
    }

    pub fn with_paging(mut self, per_page: u32, pages: u32) -> Self {
        self.per_page = per_page.max(1);
        self.pages = pages.max(1);
        self
    }

    /// Authenticate requests to raise the API rate limit
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    async fn fetch_page(
        &self,
        repository: &str,
        page: u32,
    ) -> Result<Vec<PublishedRelease>, SourceError> {
        let url = format!(
            "{}/repos/{}/releases?per_page={}&page={}",
            self.base_url, repository, self.per_page, page
        );
        debug!("Fetching {}", url);

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(repository.to_string()));
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || (status == reqwest::StatusCode::FORBIDDEN
                && response
                    .headers()
                    .get("x-ratelimit-remaining")
                    .is_some_and(|v| v == "0"))
        {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(SourceError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !status.is_success() {
            warn!("GitHub API returned status {}: {}", status, url);
            return Err(SourceError::InvalidResponse(format!(
                "Unexpected status: {}",
                status
            )));
        }

        response.json().await.map_err(|e| {
            warn!("Failed to parse GitHub releases response: {}", e);
            SourceError::InvalidResponse(e.to_string())
        })
    }
}

impl Default for GitHubChangelogSource {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

#[async_trait::async_trait]
impl ChangelogSource for GitHubChangelogSource {
    async fn fetch_releases(&self, repository: &str) -> Result<Vec<PublishedRelease>, SourceError> {
        let pages = join_all((1..=self.pages).map(|page| self.fetch_page(repository, page))).await;

        let mut releases = Vec::new();
        for page in pages {
            let page = page?;
            let exhausted = page.len() < self.per_page as usize;
            releases.extend(page);
            if exhausted {
                break;
            }
        }

        debug!("Fetched {} releases from {}", releases.len(), repository);
        Ok(releases)
    }
}
