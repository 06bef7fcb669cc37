use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const APP_NAME: &str = "nvidia-align";

// =============================================================================
// Time-related constants
// =============================================================================

/// Default changelog refresh interval in milliseconds (6 hours)
pub const DEFAULT_REFRESH_INTERVAL_MS: i64 = 6 * 60 * 60 * 1000;

/// Timeout for changelog fetch requests in milliseconds (30 seconds)
pub const FETCH_TIMEOUT_MS: u64 = 30_000;

// =============================================================================
// Amazon Linux 2 support window
// =============================================================================

/// Date after which AL2 GPU AMIs are deprecated
pub const AL2_EOL_DATE: &str = "2024-11-26";

/// Last Kubernetes minor version that ships AL2 GPU AMIs
pub const AL2_LAST_KUBERNETES_VERSION: &str = "1.32";

// =============================================================================
// Defaults
// =============================================================================

pub const DEFAULT_AWS_PROFILE: &str = "default";
pub const DEFAULT_AWS_REGION: &str = "eu-west-1";
pub const DEFAULT_UBUNTU_VERSION: &str = "ubuntu2204";
pub const DEFAULT_OS_TAG: &str = "0ubuntu1";
pub const DEFAULT_NVIDIA_REPO_URL: &str = "https://developer.download.nvidia.com/compute/cuda/repos";
pub const DEFAULT_CHANGELOG_REPOSITORY: &str = "awslabs/amazon-eks-ami";
pub const DEFAULT_RELEASES_PER_PAGE: u32 = 50;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Top-level configuration, read from `config.json`
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AlignConfig {
    pub aws: AwsConfig,
    pub container: ContainerConfig,
    pub changelog: ChangelogConfig,
}

/// AWS profile and region used for EKS and SSM calls
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AwsConfig {
    pub profile: String,
    pub region: String,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            profile: DEFAULT_AWS_PROFILE.to_string(),
            region: DEFAULT_AWS_REGION.to_string(),
        }
    }
}

/// Container image settings for userspace driver packages
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerConfig {
    /// NVIDIA CUDA repository distribution, e.g. "ubuntu2204"
    pub ubuntu_version: String,
    /// Debian revision appended to the driver version when the repository is not consulted
    pub os_tag: String,
    /// NVIDIA CUDA repository root holding the `.deb` packages
    pub repository_url: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            ubuntu_version: DEFAULT_UBUNTU_VERSION.to_string(),
            os_tag: DEFAULT_OS_TAG.to_string(),
            repository_url: DEFAULT_NVIDIA_REPO_URL.to_string(),
        }
    }
}

/// Where AMI release notes come from and how long they stay fresh
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ChangelogConfig {
    /// GitHub repository in owner/name form
    pub repository: String,
    pub per_page: u32,
    /// Number of release pages fetched per refresh
    pub pages: u32,
    /// Cache refresh interval in milliseconds
    pub refresh_interval: i64,
}

impl Default for ChangelogConfig {
    fn default() -> Self {
        Self {
            repository: DEFAULT_CHANGELOG_REPOSITORY.to_string(),
            per_page: DEFAULT_RELEASES_PER_PAGE,
            pages: 1,
            refresh_interval: DEFAULT_REFRESH_INTERVAL_MS,
        }
    }
}

impl AlignConfig {
    /// Load configuration from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Returns the path to the data directory for nvidia-align.
/// Uses $XDG_DATA_HOME/nvidia-align if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/nvidia-align,
/// or ./nvidia-align if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the release cache database.
pub fn db_path() -> PathBuf {
    data_dir().join("releases.db")
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("nvidia-align.log")
}

/// Returns the path to config.json under $XDG_CONFIG_HOME (or ~/.config).
pub fn config_path() -> PathBuf {
    config_dir_with_env(std::env::var("XDG_CONFIG_HOME").ok(), dirs::home_dir())
        .join("config.json")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join(APP_NAME)
}

fn config_dir_with_env(xdg_config_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let config_dir = xdg_config_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));

    config_dir.join(APP_NAME)
}
