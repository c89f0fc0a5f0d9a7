//! Plugin version parsing and ordering

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::error::LifecycleError;

/// Plugin version information
///
/// Ordered by `major.minor.patch`, then pre-release (a pre-release sorts
/// below the release it precedes). Build metadata is ignored for equality
/// and ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Pre-release tag (e.g., "alpha", "beta.2")
    pub prerelease: Option<String>,
    /// Build metadata
    pub build: Option<String>,
}

impl PluginVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Parse from string (e.g., "1.2", "v1.2.3-beta.1+build123")
    pub fn parse(version: &str) -> Result<Self, LifecycleError> {
        let invalid = |reason: String| LifecycleError::InvalidVersion {
            version: version.to_string(),
            reason,
        };

        let trimmed = version.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

        let (version_pre, build) = match trimmed.split_once('+') {
            Some((head, build)) => (head, Some(build.to_string())),
            None => (trimmed, None),
        };

        let (version_core, prerelease) = match version_pre.split_once('-') {
            Some((core, pre)) if pre.is_empty() => {
                return Err(invalid(format!("empty pre-release in {core}")));
            }
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (version_pre, None),
        };

        let parts: Vec<&str> = version_core.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(invalid("expected major.minor[.patch]".to_string()));
        }

        let number = |part: &str, name: &str| {
            part.parse::<u32>()
                .map_err(|_| invalid(format!("invalid {name} component {part:?}")))
        };
        let major = number(parts[0], "major")?;
        let minor = number(parts[1], "minor")?;
        let patch = match parts.get(2) {
            Some(part) => number(*part, "patch")?,
            None => 0,
        };

        Ok(Self {
            major,
            minor,
            patch,
            prerelease,
            build,
        })
    }

    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    /// Check if this version is compatible with another (same major version)
    pub fn is_compatible(&self, other: &PluginVersion) -> bool {
        self.major == other.major
    }

    pub fn is_newer_than(&self, other: &PluginVersion) -> bool {
        self > other
    }
}

fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let order = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    // Numeric identifiers sort below alphanumeric ones.
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if order != Ordering::Equal {
                    return order;
                }
            }
        }
    }
}

impl Ord for PluginVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            })
    }
}

impl PartialOrd for PluginVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PluginVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PluginVersion {}

impl FromStr for PluginVersion {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.prerelease {
            write!(f, "-{}", pre)?;
        }
        if let Some(ref build) = self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl Default for PluginVersion {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        let v = PluginVersion::parse("1.2.3").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));

        let v = PluginVersion::parse("v1.2").unwrap();
        assert_eq!(v, PluginVersion::new(1, 2, 0));

        let v = PluginVersion::parse("2.0.0-beta.1+build.7").unwrap();
        assert_eq!(v.prerelease.as_deref(), Some("beta.1"));
        assert_eq!(v.build.as_deref(), Some("build.7"));
        assert_eq!(v.to_string(), "2.0.0-beta.1+build.7");
    }

    #[test]
    fn test_version_parse_errors() {
        for bad in ["1", "1.2.3.4", "a.b.c", "1.2.x", "1.0.0-", ""] {
            assert!(
                matches!(
                    PluginVersion::parse(bad),
                    Err(LifecycleError::InvalidVersion { .. })
                ),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn test_version_ordering() {
        let parse = |s: &str| s.parse::<PluginVersion>().unwrap();

        assert!(parse("2.0.0") > parse("1.9.9"));
        assert!(parse("1.10.0") > parse("1.9.0"));
        assert!(parse("1.0.0") > parse("1.0.0-rc.1"));
        assert!(parse("1.0.0-beta.2") < parse("1.0.0-beta.11"));
        assert!(parse("1.0.0-alpha") < parse("1.0.0-alpha.1"));
        assert!(parse("1.0.0-1") < parse("1.0.0-alpha"));
        assert_eq!(parse("1.0.0+a"), parse("1.0.0+b"));

        let mut versions = vec![parse("1.1.0"), parse("1.0.0"), parse("1.1.0-rc.1")];
        versions.sort();
        let sorted: Vec<String> = versions.iter().map(ToString::to_string).collect();
        assert_eq!(sorted, vec!["1.0.0", "1.1.0-rc.1", "1.1.0"]);
    }

    #[test]
    fn test_version_compatibility() {
        let v1 = PluginVersion::new(1, 0, 0);
        assert!(v1.is_compatible(&PluginVersion::new(1, 5, 0)));
        assert!(!v1.is_compatible(&PluginVersion::new(2, 0, 0)));
        assert!(PluginVersion::new(1, 0, 1).is_newer_than(&v1));
    }
}
