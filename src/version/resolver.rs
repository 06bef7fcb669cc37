//! Alignment resolution
//!
//! Two strategies pick one AMI release from the catalog:
//! - AMI-first: the newest release for a Kubernetes version dictates the driver
//! - Container-first: an existing container driver dictates which release to use
//!
//! Resolution is a pure function of the catalog and the request.

use serde::Serialize;
use tracing::{debug, warn};

use crate::changelog::types::{AmiFamily, AmiType, Architecture};
use crate::version::catalog::{ReleaseCatalog, ReleaseEntry};
use crate::version::driver_package::{ContainerDriver, DriverPackageFormatter};
use crate::version::error::{AlignmentError, RequestContext};
use crate::version::matcher::{MatchKind, MatchMode, VersionMatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    AmiFirst,
    ContainerFirst,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::AmiFirst => f.write_str("ami-first"),
            Strategy::ContainerFirst => f.write_str("container-first"),
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ami-first" | "ami_first" => Ok(Strategy::AmiFirst),
            "container-first" | "container_first" => Ok(Strategy::ContainerFirst),
            other => Err(format!(
                "unknown strategy: {other} (expected ami-first or container-first)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlignmentRequest {
    AmiFirst {
        kubernetes_version: String,
        architecture: Architecture,
        ami_type: Option<AmiType>,
    },
    ContainerFirst {
        driver_version: String,
        architecture: Architecture,
        kubernetes_version: Option<String>,
    },
}

impl AlignmentRequest {
    pub fn strategy(&self) -> Strategy {
        match self {
            AlignmentRequest::AmiFirst { .. } => Strategy::AmiFirst,
            AlignmentRequest::ContainerFirst { .. } => Strategy::ContainerFirst,
        }
    }

    pub fn context(&self) -> RequestContext {
        match self {
            AlignmentRequest::AmiFirst {
                kubernetes_version,
                architecture,
                ami_type,
            } => RequestContext {
                strategy: Some(Strategy::AmiFirst),
                kubernetes_version: Some(kubernetes_version.clone()),
                architecture: Some(*architecture),
                ami_type: *ami_type,
                requested_driver: None,
            },
            AlignmentRequest::ContainerFirst {
                driver_version,
                architecture,
                kubernetes_version,
            } => RequestContext {
                strategy: Some(Strategy::ContainerFirst),
                kubernetes_version: kubernetes_version.clone(),
                architecture: Some(*architecture),
                ami_type: None,
                requested_driver: Some(driver_version.clone()),
            },
        }
    }
}

/// The chosen AMI release and the container driver that pairs with it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAlignment {
    pub entry: ReleaseEntry,
    pub strategy: Strategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_driver_version: Option<String>,
    pub matched_driver_version: String,
    pub match_kind: MatchKind,
    pub container: ContainerDriver,
    pub al2_deprecation_warning: bool,
    pub candidates_considered: usize,
}

pub struct AlignmentResolver<'a> {
    catalog: &'a ReleaseCatalog,
    matcher: VersionMatcher,
    packages: DriverPackageFormatter,
}

impl<'a> AlignmentResolver<'a> {
    pub fn new(catalog: &'a ReleaseCatalog, packages: DriverPackageFormatter) -> Self {
        Self {
            catalog,
            matcher: VersionMatcher,
            packages,
        }
    }

    pub fn resolve(&self, request: &AlignmentRequest) -> Result<ResolvedAlignment, AlignmentError> {
        let result = match request {
            AlignmentRequest::AmiFirst {
                kubernetes_version,
                architecture,
                ami_type,
            } => self.ami_first(kubernetes_version, *architecture, *ami_type),
            AlignmentRequest::ContainerFirst {
                driver_version,
                architecture,
                kubernetes_version,
            } => self.container_first(driver_version, *architecture, kubernetes_version.as_deref()),
        };
        result.map_err(|e| e.with_context(request.context()))
    }

    /// Pick the newest release for the Kubernetes version and take its driver.
    pub fn ami_first(
        &self,
        kubernetes_version: &str,
        architecture: Architecture,
        ami_type: Option<AmiType>,
    ) -> Result<ResolvedAlignment, AlignmentError> {
        let candidates = self
            .catalog
            .find_by_version(kubernetes_version, architecture, ami_type);
        let entry = candidates.first().ok_or_else(|| {
            AlignmentError::NoReleaseForVersion {
                request: RequestContext {
                    strategy: Some(Strategy::AmiFirst),
                    kubernetes_version: Some(kubernetes_version.to_string()),
                    architecture: Some(architecture),
                    ami_type,
                    requested_driver: None,
                },
            }
        })?;

        debug!(
            "AMI-first picked {} ({}) for Kubernetes {} {}",
            entry.release_tag, entry.ami_type, kubernetes_version, architecture
        );
        Ok(self.finish(
            entry,
            Strategy::AmiFirst,
            None,
            MatchKind::Exact,
            candidates.len(),
        ))
    }

    /// Pick the newest release whose driver best matches an existing container driver.
    pub fn container_first(
        &self,
        driver_version: &str,
        architecture: Architecture,
        kubernetes_version: Option<&str>,
    ) -> Result<ResolvedAlignment, AlignmentError> {
        let candidates = match kubernetes_version {
            Some(k8s) => self.catalog.find_by_version(k8s, architecture, None),
            None => self.catalog.find_by_architecture(architecture, None),
        };

        let context = RequestContext {
            strategy: Some(Strategy::ContainerFirst),
            kubernetes_version: kubernetes_version.map(str::to_string),
            architecture: Some(architecture),
            ami_type: None,
            requested_driver: Some(driver_version.to_string()),
        };
        let ranked = self
            .matcher
            .match_candidates(driver_version, &candidates, MatchMode::Fuzzy)
            .map_err(|e| e.with_context(context.clone()))?;
        let (entry, kind) = ranked
            .first()
            .copied()
            .ok_or(AlignmentError::NoCompatibleRelease { request: context })?;

        if kind != MatchKind::Exact {
            warn!(
                "Driver {} has no exact AMI match; using {} ({} match)",
                driver_version, entry.driver_version_raw, kind
            );
        }
        if entry.ami_family() == AmiFamily::Al2 {
            warn!(
                "Best match for driver {} is an AL2 AMI ({}); no AL2023 release matched",
                driver_version, entry.release_tag
            );
        }

        Ok(self.finish(
            entry,
            Strategy::ContainerFirst,
            Some(driver_version.to_string()),
            kind,
            ranked.len(),
        ))
    }

    fn finish(
        &self,
        entry: &ReleaseEntry,
        strategy: Strategy,
        requested_driver_version: Option<String>,
        match_kind: MatchKind,
        candidates_considered: usize,
    ) -> ResolvedAlignment {
        ResolvedAlignment {
            entry: entry.clone(),
            strategy,
            requested_driver_version,
            matched_driver_version: entry.driver_version_raw.clone(),
            match_kind,
            container: self
                .packages
                .container_driver(&entry.driver_version, entry.architecture),
            al2_deprecation_warning: entry.ami_family() == AmiFamily::Al2,
            candidates_considered,
        }
    }
}
