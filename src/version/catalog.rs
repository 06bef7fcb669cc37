//! In-memory index of EKS GPU AMI releases
//!
//! The catalog is built once from raw changelog rows and never mutated
//! afterwards. Every query returns entries in the same deterministic order:
//! release date descending, AL2023 ahead of AL2, then insertion order.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use tracing::{debug, warn};

use crate::changelog::types::{AmiFamily, AmiType, Architecture, RawReleaseRow};
use crate::version::error::RowError;
use crate::version::kubernetes::{self, kubelet_patch};
use crate::version::token::VersionToken;

/// One AMI release for one (Kubernetes version, architecture, AMI type)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseEntry {
    pub release_tag: String,
    pub kubernetes_version: String,
    pub architecture: Architecture,
    pub ami_type: AmiType,
    pub driver_version: VersionToken,
    pub driver_version_raw: String,
    pub release_date: NaiveDate,
    /// Kubernetes patch shipped in this release, when the changelog lists kubelet
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubernetes_patch: Option<u32>,
    /// Insertion order in the catalog
    #[serde(skip)]
    pub sequence: usize,
}

impl ReleaseEntry {
    pub fn ami_family(&self) -> AmiFamily {
        self.ami_type.family()
    }

    /// Build id encoded in the release tag, `v20250224` -> `20250224`
    pub fn build_id(&self) -> Option<&str> {
        build_id(&self.release_tag)
    }

    fn identity(&self) -> (&str, &str, Architecture, AmiType) {
        (
            &self.release_tag,
            &self.kubernetes_version,
            self.architecture,
            self.ami_type,
        )
    }

    fn from_row(row: &RawReleaseRow) -> Result<Self, RowError> {
        let architecture: Architecture = row
            .architecture
            .parse()
            .map_err(|_| RowError::UnknownArchitecture(row.architecture.clone()))?;
        let ami_type: AmiType = row
            .ami_type
            .parse()
            .map_err(|_| RowError::UnknownAmiType(row.ami_type.clone()))?;
        if ami_type.architecture() != architecture {
            return Err(RowError::ArchitectureMismatch {
                ami_type,
                architecture,
            });
        }

        let kubernetes_version = row.kubernetes_version.trim().to_string();
        if kubernetes::parse_version(&kubernetes_version).is_none() {
            return Err(RowError::MalformedKubernetesVersion(
                row.kubernetes_version.clone(),
            ));
        }

        let driver_version = VersionToken::parse(&row.driver_version)
            .map_err(|_| RowError::MalformedVersion(row.driver_version.clone()))?;
        let release_date = parse_release_date(&row.release_date)
            .ok_or_else(|| RowError::MalformedDate(row.release_date.clone()))?;
        let kubernetes_patch = row
            .kubelet_version
            .as_deref()
            .and_then(|kubelet| kubelet_patch(&kubernetes_version, kubelet));

        Ok(Self {
            release_tag: row.release_tag.trim().to_string(),
            kubernetes_version,
            architecture,
            ami_type,
            driver_version,
            driver_version_raw: row.driver_version.trim().to_string(),
            release_date,
            kubernetes_patch,
            sequence: 0,
        })
    }
}

/// Trailing 8-digit build id of a release tag or `releaseVersion`.
///
/// `v20250224`, `20250224` and `1.31.5-20250224` all yield `20250224`.
pub fn build_id(release: &str) -> Option<&str> {
    let release = release.trim();
    let last = release.rsplit('-').next().unwrap_or(release);
    let id = last.strip_prefix('v').unwrap_or(last);
    (id.len() == 8 && id.bytes().all(|b| b.is_ascii_digit())).then_some(id)
}

/// Accepts "2024-11-21" as well as RFC 3339 timestamps from the GitHub API
fn parse_release_date(input: &str) -> Option<NaiveDate> {
    let input = input.trim();
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(input).ok().map(|dt| dt.date_naive()))
}

/// Ordering shared by every catalog query and by the matcher
pub fn rank(a: &ReleaseEntry, b: &ReleaseEntry) -> Ordering {
    b.release_date
        .cmp(&a.release_date)
        .then_with(|| a.ami_family().preference().cmp(&b.ami_family().preference()))
        .then_with(|| a.sequence.cmp(&b.sequence))
}

/// A raw row that was left out of the catalog, with the reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    pub row: RawReleaseRow,
    pub error: RowError,
}

type VersionKey = (String, Architecture, AmiType);

#[derive(Debug, Default)]
pub struct ReleaseCatalog {
    entries: Vec<ReleaseEntry>,
    by_version: HashMap<VersionKey, Vec<usize>>,
    by_architecture: HashMap<Architecture, Vec<usize>>,
    skipped: Vec<SkippedRow>,
}

impl ReleaseCatalog {
    /// Build a catalog from raw changelog rows.
    ///
    /// Rows that fail to parse are skipped and recorded. When two rows share
    /// (tag, Kubernetes version, architecture, AMI type), the more recently
    /// dated one wins; on equal dates the later row wins. The winner takes
    /// the slot of the first occurrence.
    pub fn build<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a RawReleaseRow>,
    {
        let mut entries: Vec<ReleaseEntry> = Vec::new();
        let mut slots: HashMap<(String, String, Architecture, AmiType), usize> = HashMap::new();
        let mut skipped = Vec::new();

        for row in rows {
            let entry = match ReleaseEntry::from_row(row) {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(
                        "Skipping changelog row {} k8s={} ami={}: {}",
                        row.release_tag, row.kubernetes_version, row.ami_type, error
                    );
                    skipped.push(SkippedRow {
                        row: row.clone(),
                        error,
                    });
                    continue;
                }
            };

            let (tag, k8s, arch, ami_type) = entry.identity();
            let key = (tag.to_string(), k8s.to_string(), arch, ami_type);
            match slots.get(&key) {
                Some(&slot) => {
                    let existing = &mut entries[slot];
                    if entry.release_date >= existing.release_date {
                        debug!(
                            "Replacing duplicate release {} k8s={} {}",
                            entry.release_tag, entry.kubernetes_version, entry.ami_type
                        );
                        *existing = ReleaseEntry {
                            sequence: slot,
                            ..entry
                        };
                    }
                }
                None => {
                    let slot = entries.len();
                    slots.insert(key, slot);
                    entries.push(ReleaseEntry {
                        sequence: slot,
                        ..entry
                    });
                }
            }
        }

        let mut by_version: HashMap<VersionKey, Vec<usize>> = HashMap::new();
        let mut by_architecture: HashMap<Architecture, Vec<usize>> = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            by_version
                .entry((
                    entry.kubernetes_version.clone(),
                    entry.architecture,
                    entry.ami_type,
                ))
                .or_default()
                .push(idx);
            by_architecture
                .entry(entry.architecture)
                .or_default()
                .push(idx);
        }
        for indices in by_version.values_mut().chain(by_architecture.values_mut()) {
            indices.sort_by(|&a, &b| rank(&entries[a], &entries[b]));
        }

        debug!(
            "Built release catalog: {} entries, {} skipped rows",
            entries.len(),
            skipped.len()
        );

        Self {
            entries,
            by_version,
            by_architecture,
            skipped,
        }
    }

    pub fn entries(&self) -> &[ReleaseEntry] {
        &self.entries
    }

    pub fn skipped(&self) -> &[SkippedRow] {
        &self.skipped
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries for one Kubernetes version and architecture, most recent first.
    ///
    /// Without an AMI type filter both AL2023 and AL2 entries are returned.
    pub fn find_by_version(
        &self,
        kubernetes_version: &str,
        architecture: Architecture,
        ami_type: Option<AmiType>,
    ) -> Vec<&ReleaseEntry> {
        let kubernetes_version = kubernetes_version.trim();
        let types: Vec<AmiType> = match ami_type {
            Some(t) => vec![t],
            None => architecture.ami_types().to_vec(),
        };
        let mut found: Vec<&ReleaseEntry> = types
            .into_iter()
            .filter_map(|t| {
                self.by_version
                    .get(&(kubernetes_version.to_string(), architecture, t))
            })
            .flatten()
            .map(|&idx| &self.entries[idx])
            .collect();
        found.sort_by(|a, b| rank(a, b));
        found
    }

    /// Entries for an architecture across every Kubernetes version
    pub fn find_by_architecture(
        &self,
        architecture: Architecture,
        ami_type: Option<AmiType>,
    ) -> Vec<&ReleaseEntry> {
        self.by_architecture
            .get(&architecture)
            .into_iter()
            .flatten()
            .map(|&idx| &self.entries[idx])
            .filter(|entry| ami_type.is_none_or(|t| entry.ami_type == t))
            .collect()
    }

    pub fn latest_for(
        &self,
        kubernetes_version: &str,
        architecture: Architecture,
    ) -> Option<&ReleaseEntry> {
        self.find_by_version(kubernetes_version, architecture, None)
            .into_iter()
            .next()
    }

    /// The entry a node group runs, from its `releaseVersion`.
    ///
    /// `release` may be a full release version, a bare build id or a tag.
    pub fn find_by_release(
        &self,
        kubernetes_version: &str,
        release: &str,
        ami_type: AmiType,
    ) -> Option<&ReleaseEntry> {
        let build = build_id(release)?;
        self.find_by_version(kubernetes_version, ami_type.architecture(), Some(ami_type))
            .into_iter()
            .find(|entry| entry.build_id() == Some(build))
    }

    /// Distinct Kubernetes versions, oldest first
    pub fn list_known_kubernetes_versions(&self) -> Vec<String> {
        let mut versions: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.kubernetes_version.clone())
            .collect();
        versions.sort_by(|a, b| kubernetes::compare_versions(a, b));
        versions.dedup();
        versions
    }

    /// Distinct driver versions for an architecture, lowest first
    pub fn list_known_driver_versions(&self, architecture: Architecture) -> Vec<String> {
        let mut drivers: Vec<&ReleaseEntry> = self
            .entries
            .iter()
            .filter(|e| e.architecture == architecture)
            .collect();
        drivers.sort_by(|a, b| {
            a.driver_version
                .cmp(&b.driver_version)
                .then_with(|| a.driver_version_raw.cmp(&b.driver_version_raw))
        });
        let mut versions: Vec<String> = drivers
            .into_iter()
            .map(|e| e.driver_version_raw.clone())
            .collect();
        versions.dedup();
        versions
    }
}
