//! Driver version matching against catalog entries

use std::cmp::Ordering;

use serde::Serialize;

use crate::version::catalog::{ReleaseEntry, rank};
use crate::version::error::{AlignmentError, RequestContext};
use crate::version::token::{Precision, VersionToken};

/// How a requested driver version is compared to candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Full numeric sequence must match
    Exact,
    /// Requested components must be a prefix of the candidate ("570" matches "570.124.06")
    MajorOnly,
    /// Exact, then major.minor, then major
    Fuzzy,
}

impl std::str::FromStr for MatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "exact" => Ok(MatchMode::Exact),
            "major-only" | "major" => Ok(MatchMode::MajorOnly),
            "fuzzy" => Ok(MatchMode::Fuzzy),
            other => Err(format!(
                "unknown match mode: {other} (expected exact, major-only or fuzzy)"
            )),
        }
    }
}

/// Precision at which a candidate matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchKind {
    Exact,
    MajorMinor,
    Major,
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MatchKind::Exact => "exact",
            MatchKind::MajorMinor => "major.minor",
            MatchKind::Major => "major",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VersionMatcher;

impl VersionMatcher {
    /// Rank the candidates that match `requested`.
    ///
    /// Exact and MajorOnly return an empty list when nothing matches. Fuzzy
    /// tries each precision in turn and fails with `NoCompatibleRelease` when
    /// no candidate shares even the major component.
    pub fn match_candidates<'a>(
        &self,
        requested: &str,
        candidates: &[&'a ReleaseEntry],
        mode: MatchMode,
    ) -> Result<Vec<(&'a ReleaseEntry, MatchKind)>, AlignmentError> {
        let token = VersionToken::parse(requested)?;

        let matched = match mode {
            MatchMode::Exact => filter(candidates, MatchKind::Exact, |c| {
                token.compare(c, Precision::Full) == Ordering::Equal
            }),
            MatchMode::MajorOnly => {
                filter(candidates, MatchKind::Major, |c| token.is_prefix_of(c))
            }
            MatchMode::Fuzzy => {
                let mut stages: Vec<(MatchKind, Precision)> =
                    vec![(MatchKind::Exact, Precision::Full)];
                if token.components().len() >= 2 {
                    stages.push((MatchKind::MajorMinor, Precision::MajorMinor));
                }
                stages.push((MatchKind::Major, Precision::Major));

                let found = stages.into_iter().find_map(|(kind, precision)| {
                    let matched = filter(candidates, kind, |c| {
                        token.compare(c, precision) == Ordering::Equal
                    });
                    (!matched.is_empty()).then_some(matched)
                });
                found.ok_or_else(|| AlignmentError::NoCompatibleRelease {
                    request: RequestContext::for_driver(requested),
                })?
            }
        };

        Ok(matched)
    }
}

fn filter<'a>(
    candidates: &[&'a ReleaseEntry],
    kind: MatchKind,
    predicate: impl Fn(&VersionToken) -> bool,
) -> Vec<(&'a ReleaseEntry, MatchKind)> {
    let mut matched: Vec<(&ReleaseEntry, MatchKind)> = candidates
        .iter()
        .copied()
        .filter(|entry| predicate(&entry.driver_version))
        .map(|entry| (entry, kind))
        .collect();
    matched.sort_by(|(a, _), (b, _)| rank(a, b));
    matched
}
