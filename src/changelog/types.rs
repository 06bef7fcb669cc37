//! Common types for changelog ingestion

use serde::{Deserialize, Serialize};

/// CPU architecture of an EKS GPU node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "arm64")]
    Arm64,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "arm64",
        }
    }

    /// Human readable name used in summaries
    pub fn display_name(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "ARM64",
        }
    }

    /// Value of the `kubernetes.io/arch` node label
    pub fn kubernetes_label(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "amd64",
            Architecture::Arm64 => "arm64",
        }
    }

    /// Directory of the NVIDIA CUDA apt repository
    pub fn nvidia_repo_path(&self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Arm64 => "sbsa",
        }
    }

    /// Debian package architecture
    pub fn deb_suffix(&self) -> &'static str {
        self.kubernetes_label()
    }

    /// AMI types that publish an NVIDIA driver for this architecture,
    /// in preference order.
    pub fn ami_types(&self) -> &'static [AmiType] {
        match self {
            Architecture::X86_64 => &[AmiType::Al2023X86_64Nvidia, AmiType::Al2X86_64Gpu],
            Architecture::Arm64 => &[AmiType::Al2023Arm64Nvidia],
        }
    }

    pub fn recommended_ami_type(&self) -> AmiType {
        self.ami_types()[0]
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" => Ok(Architecture::X86_64),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            other => Err(format!("unsupported architecture: {other}")),
        }
    }
}

/// Amazon Linux generation behind an AMI type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AmiFamily {
    #[serde(rename = "AL2023")]
    Al2023,
    /// Deprecated after 2024-11-26
    #[serde(rename = "AL2")]
    Al2,
}

impl AmiFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            AmiFamily::Al2023 => "AL2023",
            AmiFamily::Al2 => "AL2",
        }
    }

    /// Path segment used by the EKS optimized AMI SSM parameters
    pub fn ssm_segment(&self) -> &'static str {
        match self {
            AmiFamily::Al2023 => "amazon-linux-2023",
            AmiFamily::Al2 => "amazon-linux-2-gpu",
        }
    }

    /// Ordering key where AL2023 sorts ahead of AL2
    pub(crate) fn preference(&self) -> u8 {
        match self {
            AmiFamily::Al2023 => 0,
            AmiFamily::Al2 => 1,
        }
    }
}

/// EKS GPU AMI type, spelled exactly as in the EKS API and the AMI changelog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AmiType {
    #[serde(rename = "AL2023_x86_64_NVIDIA")]
    Al2023X86_64Nvidia,
    #[serde(rename = "AL2023_ARM_64_NVIDIA")]
    Al2023Arm64Nvidia,
    #[serde(rename = "AL2_x86_64_GPU")]
    Al2X86_64Gpu,
}

impl AmiType {
    pub const ALL: [AmiType; 3] = [
        AmiType::Al2023X86_64Nvidia,
        AmiType::Al2023Arm64Nvidia,
        AmiType::Al2X86_64Gpu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AmiType::Al2023X86_64Nvidia => "AL2023_x86_64_NVIDIA",
            AmiType::Al2023Arm64Nvidia => "AL2023_ARM_64_NVIDIA",
            AmiType::Al2X86_64Gpu => "AL2_x86_64_GPU",
        }
    }

    pub fn architecture(&self) -> Architecture {
        match self {
            AmiType::Al2023X86_64Nvidia | AmiType::Al2X86_64Gpu => Architecture::X86_64,
            AmiType::Al2023Arm64Nvidia => Architecture::Arm64,
        }
    }

    pub fn family(&self) -> AmiFamily {
        match self {
            AmiType::Al2023X86_64Nvidia | AmiType::Al2023Arm64Nvidia => AmiFamily::Al2023,
            AmiType::Al2X86_64Gpu => AmiFamily::Al2,
        }
    }
}

impl std::fmt::Display for AmiType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AmiType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        AmiType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unsupported AMI type: {s}"))
    }
}

/// One tokenized changelog row: the NVIDIA driver shipped by one AMI type
/// for one Kubernetes version in one AMI release.
///
/// Fields are kept as strings; validation happens when the catalog is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReleaseRow {
    /// Release tag, e.g. "v20241121"
    pub release_tag: String,
    /// Kubernetes minor version, e.g. "1.32"
    pub kubernetes_version: String,
    pub architecture: String,
    pub ami_type: String,
    /// kmod-nvidia-latest-dkms version, e.g. "570.124.06-1.amzn2023"
    pub driver_version: String,
    /// ISO 8601 date or RFC 3339 timestamp
    pub release_date: String,
    /// kubelet package version when the changelog lists one, e.g. "1.32.3-eks-473151a"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubelet_version: Option<String>,
}
