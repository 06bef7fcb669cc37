//! Changelog source implementations

pub mod github;

pub use github::GitHubChangelogSource;
