//! AMI changelog ingestion
//!
//! Release notes are fetched from a [`ChangelogSource`], tokenized into
//! [`RawReleaseRow`]s by [`ReleaseBodyParser`], and kept in a [`ReleaseCache`]
//! so repeated invocations do not hit the GitHub API.
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Source    │────▶│ BodyParser  │────▶│    Cache    │
//! │  (GitHub)   │     │ (HTML rows) │     │  (SQLite)   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                                │
//!                                                ▼
//!                                         ReleaseCatalog
//! ```

pub mod body;
pub mod cache;
pub mod error;
pub mod source;
pub mod sources;
pub mod types;

use tracing::{info, warn};

pub use body::ReleaseBodyParser;
pub use cache::ReleaseCache;
pub use error::LoadError;
pub use source::ChangelogSource;
pub use types::RawReleaseRow;

/// Where a set of rows came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrigin {
    Cache,
    Source,
    /// The source failed and a stale snapshot was used instead
    StaleCache,
}

/// Load changelog rows, preferring a fresh cached snapshot.
///
/// A failed fetch falls back to whatever the cache holds; the error is only
/// returned when there is nothing cached.
pub async fn load_rows(
    source: &dyn ChangelogSource,
    cache: Option<&ReleaseCache>,
    parser: &ReleaseBodyParser,
    repository: &str,
    force_refresh: bool,
) -> Result<(Vec<RawReleaseRow>, RowOrigin), LoadError> {
    if let Some(cache) = cache {
        if !force_refresh && !cache.is_stale(repository)? {
            let rows = cache.get_rows(repository)?;
            if !rows.is_empty() {
                info!("Using {} cached changelog rows for {}", rows.len(), repository);
                return Ok((rows, RowOrigin::Cache));
            }
        }
    }

    match source.fetch_releases(repository).await {
        Ok(releases) => {
            let rows = parser.parse_releases(&releases);
            info!(
                "Parsed {} changelog rows from {} releases of {}",
                rows.len(),
                releases.len(),
                repository
            );
            if let Some(cache) = cache {
                cache.replace_rows(repository, &rows)?;
            }
            Ok((rows, RowOrigin::Source))
        }
        Err(e) => {
            let cached = match cache {
                Some(cache) => cache.get_rows(repository)?,
                None => Vec::new(),
            };
            if cached.is_empty() {
                return Err(e.into());
            }
            warn!(
                "Failed to refresh changelog for {}: {}; using {} cached rows",
                repository,
                e,
                cached.len()
            );
            Ok((cached, RowOrigin::StaleCache))
        }
    }
}
