//! Dotted numeric version tokens
//!
//! Driver module versions arrive in several notations
//! (`570.124.06`, `570.124.06-1.amzn2023`, `570`). A [`VersionToken`] keeps the
//! numeric components for comparison and the rest verbatim for display.

use std::cmp::Ordering;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::version::error::AlignmentError;

/// How many leading components take part in a comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Major,
    MajorMinor,
    Full,
}

#[derive(Debug, Clone)]
pub struct VersionToken {
    components: Vec<u64>,
    /// Numeric prefix exactly as written, leading zeros included
    numeric: String,
    suffix: Option<String>,
}

impl VersionToken {
    /// Parse a version string.
    ///
    /// Examples:
    /// - "570.124.06" -> [570, 124, 6]
    /// - "570.124.06-1.amzn2023" -> [570, 124, 6], suffix "-1.amzn2023"
    /// - "570.rc1" -> [570], suffix ".rc1"
    pub fn parse(input: &str) -> Result<Self, AlignmentError> {
        let trimmed = input.trim();
        let malformed = || AlignmentError::MalformedVersion {
            input: input.to_string(),
        };

        let mut components = Vec::new();
        let mut pos = 0;
        let mut numeric_end = 0;

        loop {
            let rest = &trimmed[pos..];
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            if digits == 0 {
                break;
            }
            let value: u64 = rest[..digits].parse().map_err(|_| malformed())?;
            components.push(value);
            numeric_end = pos + digits;

            let after = &trimmed[numeric_end..];
            let continues = after.starts_with('.')
                && after[1..].bytes().next().is_some_and(|b| b.is_ascii_digit());
            if !continues {
                break;
            }
            pos = numeric_end + 1;
        }

        if components.is_empty() {
            return Err(malformed());
        }

        let suffix = &trimmed[numeric_end..];
        Ok(Self {
            components,
            numeric: trimmed[..numeric_end].to_string(),
            suffix: (!suffix.is_empty()).then(|| suffix.to_string()),
        })
    }

    pub fn components(&self) -> &[u64] {
        &self.components
    }

    pub fn major(&self) -> u64 {
        self.components[0]
    }

    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    /// Compare the first 1, 2 or all components; missing components count as 0.
    pub fn compare(&self, other: &VersionToken, precision: Precision) -> Ordering {
        let len = match precision {
            Precision::Major => 1,
            Precision::MajorMinor => 2,
            Precision::Full => self.components.len().max(other.components.len()),
        };
        (0..len)
            .map(|i| {
                let a = self.components.get(i).copied().unwrap_or(0);
                let b = other.components.get(i).copied().unwrap_or(0);
                a.cmp(&b)
            })
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// True if every component of `self` appears at the start of `other`.
    pub fn is_prefix_of(&self, other: &VersionToken) -> bool {
        other.components.starts_with(&self.components)
    }

    /// The numeric prefix as written, without the suffix
    pub fn to_display_string(&self) -> String {
        self.numeric.clone()
    }
}

impl PartialEq for VersionToken {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other, Precision::Full) == Ordering::Equal
    }
}

impl Eq for VersionToken {}

impl PartialOrd for VersionToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionToken {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other, Precision::Full)
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.numeric, self.suffix.as_deref().unwrap_or(""))
    }
}

impl std::str::FromStr for VersionToken {
    type Err = AlignmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for VersionToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("570.124.06", &[570, 124, 6], "570.124.06", None)]
    #[case("570.124.06-1.amzn2023", &[570, 124, 6], "570.124.06", Some("-1.amzn2023"))]
    #[case("  535.230.02  ", &[535, 230, 2], "535.230.02", None)]
    #[case("570", &[570], "570", None)]
    #[case("570.rc1", &[570], "570", Some(".rc1"))]
    #[case("1.32", &[1, 32], "1.32", None)]
    #[case("570.86.10-0ubuntu1", &[570, 86, 10], "570.86.10", Some("-0ubuntu1"))]
    fn parse_splits_numeric_prefix_from_suffix(
        #[case] input: &str,
        #[case] components: &[u64],
        #[case] display: &str,
        #[case] suffix: Option<&str>,
    ) {
        let token = VersionToken::parse(input).unwrap();
        assert_eq!(token.components(), components);
        assert_eq!(token.to_display_string(), display);
        assert_eq!(token.suffix(), suffix);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("latest")]
    #[case("v570.124.06")]
    #[case("99999999999999999999999")]
    fn parse_rejects_input_without_numeric_prefix(#[case] input: &str) {
        assert_eq!(
            VersionToken::parse(input).unwrap_err(),
            AlignmentError::MalformedVersion {
                input: input.to_string()
            }
        );
    }

    #[rstest]
    #[case("570.124.06", "570.124.6", Precision::Full, Ordering::Equal)]
    #[case("570", "570.0.0", Precision::Full, Ordering::Equal)]
    #[case("570", "570.124.06", Precision::Full, Ordering::Less)]
    #[case("570.124.06", "570.86.10", Precision::Full, Ordering::Greater)]
    #[case("570.124.06", "570.86.10", Precision::Major, Ordering::Equal)]
    #[case("570.124.06", "570.124.99", Precision::MajorMinor, Ordering::Equal)]
    #[case("570.124.06", "570.86.10", Precision::MajorMinor, Ordering::Greater)]
    #[case("569.0.0", "570.124.06", Precision::Major, Ordering::Less)]
    fn compare_respects_precision(
        #[case] a: &str,
        #[case] b: &str,
        #[case] precision: Precision,
        #[case] expected: Ordering,
    ) {
        let a = VersionToken::parse(a).unwrap();
        let b = VersionToken::parse(b).unwrap();
        assert_eq!(a.compare(&b, precision), expected);
    }

    #[rstest]
    #[case("570", "570.124.6", true)]
    #[case("571", "570.124.6", false)]
    #[case("570.124", "570.124.06", true)]
    #[case("570.124.06", "570.124.06", true)]
    #[case("570.124.06", "570.124", false)]
    fn is_prefix_of_matches_leading_components(
        #[case] prefix: &str,
        #[case] full: &str,
        #[case] expected: bool,
    ) {
        let prefix = VersionToken::parse(prefix).unwrap();
        let full = VersionToken::parse(full).unwrap();
        assert_eq!(prefix.is_prefix_of(&full), expected);
    }

    #[test]
    fn equality_ignores_suffix_but_display_keeps_it() {
        let a = VersionToken::parse("570.124.06-1.amzn2023").unwrap();
        let b = VersionToken::parse("570.124.06").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "570.124.06-1.amzn2023");
        assert_eq!(serde_json::to_value(&a).unwrap(), "570.124.06-1.amzn2023");
    }

    #[test]
    fn display_string_round_trips_numeric_input() {
        for input in ["1", "1.2", "570.124.06", "0.0.0", "007.08"] {
            assert_eq!(VersionToken::parse(input).unwrap().to_display_string(), input);
        }
    }
}
