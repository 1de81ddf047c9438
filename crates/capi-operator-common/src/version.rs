//! Semantic version parsing and ordering
//!
//! Provider versions are release tags (`v1.5.3`, `v0.4.0-rc.1`). Every
//! comparison goes through [`SemanticVersion`] so that ordering follows
//! semver precedence rather than string order. A leading `v` is optional
//! and preserved for display.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// A parsed semantic version that remembers how it was written
#[derive(Clone, Debug)]
pub struct SemanticVersion {
    raw: String,
    version: semver::Version,
}

impl SemanticVersion {
    /// Parse a version string, accepting an optional leading `v`
    pub fn parse(s: &str) -> Result<Self, Error> {
        let trimmed = s.trim();
        let unprefixed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let version = semver::Version::parse(unprefixed)
            .map_err(|e| Error::invalid_version(s, format!("invalid semantic version: {}", e)))?;
        Ok(Self {
            raw: trimmed.to_string(),
            version,
        })
    }

    /// Major component
    pub fn major(&self) -> u64 {
        self.version.major
    }

    /// Minor component
    pub fn minor(&self) -> u64 {
        self.version.minor
    }

    /// Patch component
    pub fn patch(&self) -> u64 {
        self.version.patch
    }

    /// Whether this is a pre-release (`-alpha.1`, `-rc.0`, ...)
    pub fn is_prerelease(&self) -> bool {
        !self.version.pre.is_empty()
    }

    /// The version exactly as it was written (including any `v` prefix)
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Precedence comparison; build metadata is ignored
    pub fn compare(&self, other: &Self) -> Ordering {
        self.version.cmp_precedence(&other.version)
    }

    /// Strictly-less-than by semver precedence
    pub fn less_than(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Less
    }
}

impl PartialEq for SemanticVersion {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for SemanticVersion {}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for SemanticVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parse a version string
pub fn parse(s: &str) -> Result<SemanticVersion, Error> {
    SemanticVersion::parse(s)
}

/// Compare two parsed versions by precedence
pub fn compare(a: &SemanticVersion, b: &SemanticVersion) -> Ordering {
    a.compare(b)
}

/// Strict precedence ordering between two parsed versions
pub fn less_than(a: &SemanticVersion, b: &SemanticVersion) -> bool {
    a.less_than(b)
}
