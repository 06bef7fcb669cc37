use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::changelog::types::{AmiType, Architecture};
use crate::version::resolver::Strategy;

/// Parameters of the resolution request that failed.
///
/// Attached to resolution errors so the caller can print guidance that
/// names what was asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub strategy: Option<Strategy>,
    pub kubernetes_version: Option<String>,
    pub architecture: Option<Architecture>,
    pub ami_type: Option<AmiType>,
    pub requested_driver: Option<String>,
}

impl RequestContext {
    pub fn for_driver(requested: &str) -> Self {
        Self {
            requested_driver: Some(requested.to_string()),
            ..Default::default()
        }
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(strategy) = self.strategy {
            parts.push(format!("strategy={strategy}"));
        }
        if let Some(k8s) = &self.kubernetes_version {
            parts.push(format!("kubernetes={k8s}"));
        }
        if let Some(arch) = self.architecture {
            parts.push(format!("architecture={arch}"));
        }
        if let Some(ami_type) = self.ami_type {
            parts.push(format!("amiType={ami_type}"));
        }
        if let Some(driver) = &self.requested_driver {
            parts.push(format!("driver={driver}"));
        }
        if parts.is_empty() {
            f.write_str("<empty request>")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlignmentError {
    #[error("Malformed version: {input:?}")]
    MalformedVersion { input: String },

    #[error("No AMI release found ({request})")]
    NoReleaseForVersion { request: RequestContext },

    #[error("No compatible AMI release found ({request})")]
    NoCompatibleRelease { request: RequestContext },

    #[error(
        "Cannot resolve regional build for Kubernetes {kubernetes_version} {architecture} {ami_type} in {region}: {reason}"
    )]
    UnresolvableRegionalBuild {
        kubernetes_version: String,
        architecture: Architecture,
        ami_type: AmiType,
        region: String,
        reason: String,
    },

    #[error("Regional build lookup failed in {region}: {reason}")]
    RegionalLookupFailed { region: String, reason: String },

    #[error("Invalid scaling config (min={min}, max={max}, desired={desired}): {reason}")]
    InvalidScalingConfig {
        min: i64,
        max: i64,
        desired: i64,
        reason: String,
    },

    #[error("Invalid release version {0:?}: expected <major>.<minor>.<patch>-<YYYYMMDD>")]
    InvalidReleaseVersion(String),

    #[error("Kubernetes version is required: pass it explicitly or name a cluster")]
    MissingKubernetesVersion,
}

impl AlignmentError {
    /// Replace the request parameters carried by resolution errors.
    pub fn with_context(self, context: RequestContext) -> Self {
        match self {
            AlignmentError::NoReleaseForVersion { .. } => {
                AlignmentError::NoReleaseForVersion { request: context }
            }
            AlignmentError::NoCompatibleRelease { .. } => {
                AlignmentError::NoCompatibleRelease { request: context }
            }
            other => other,
        }
    }

    pub fn request(&self) -> Option<&RequestContext> {
        match self {
            AlignmentError::NoReleaseForVersion { request }
            | AlignmentError::NoCompatibleRelease { request } => Some(request),
            _ => None,
        }
    }
}

/// A regional build lookup that could not be answered.
///
/// A build that simply does not exist is `Ok(None)`, not this error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct LookupError(pub String);

impl LookupError {
    pub fn new(reason: impl fmt::Display) -> Self {
        Self(reason.to_string())
    }
}

/// Why a raw changelog row did not make it into the catalog
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("malformed driver version {0:?}")]
    MalformedVersion(String),

    #[error("malformed Kubernetes version {0:?}")]
    MalformedKubernetesVersion(String),

    #[error("malformed release date {0:?}")]
    MalformedDate(String),

    #[error("unknown architecture {0:?}")]
    UnknownArchitecture(String),

    #[error("unknown AMI type {0:?}")]
    UnknownAmiType(String),

    #[error("AMI type {ami_type} does not run on {architecture}")]
    ArchitectureMismatch {
        ami_type: AmiType,
        architecture: Architecture,
    },
}
