//! API version values.
//!
//! Endpoint versions use the Kubernetes-style API form (`v1`, `v1beta2`,
//! `v1alpha1`) and optionally the dotted form (`v1.2`, `1.2.0-rc.1`).
//! Parsing maps every accepted string onto a [`semver::Version`], whose
//! precedence rules give the ordering we need: numeric tuple first, then a
//! pre-release ranks below the release, then `alpha < beta < rc`, then the
//! qualifier number.

use crate::error::{ProxyError, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?(\d+)(?:\.(\d+)(?:\.(\d+))?)?(?:-?(alpha|beta|rc)(?:\.?(\d+))?)?$")
        .expect("version regex must compile")
});

/// Pre-release qualifier, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Qualifier {
    Alpha,
    Beta,
    Rc,
}

impl Qualifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Qualifier::Alpha => "alpha",
            Qualifier::Beta => "beta",
            Qualifier::Rc => "rc",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "alpha" => Some(Qualifier::Alpha),
            "beta" => Some(Qualifier::Beta),
            "rc" => Some(Qualifier::Rc),
            _ => None,
        }
    }
}

/// An immutable, totally ordered API version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    inner: semver::Version,
}

impl Version {
    /// A stable version `major.minor.patch`.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            inner: semver::Version::new(major, minor, patch),
        }
    }

    /// Parse a version string.
    pub fn parse(input: &str) -> Result<Self> {
        let parse_error = |message: &str| ProxyError::Parse {
            input: input.to_string(),
            message: message.to_string(),
        };

        let caps = VERSION_PATTERN
            .captures(input.trim())
            .ok_or_else(|| parse_error("expected v<major>[.<minor>[.<patch>]][alpha|beta|rc[N]]"))?;

        let number = |idx: usize| -> Result<u64> {
            match caps.get(idx) {
                Some(m) => m
                    .as_str()
                    .parse::<u64>()
                    .map_err(|_| parse_error("numeric component out of range")),
                None => Ok(0),
            }
        };

        let mut inner = semver::Version::new(number(1)?, number(2)?, number(3)?);

        if let Some(token) = caps.get(4) {
            let qualifier =
                Qualifier::from_token(token.as_str()).ok_or_else(|| parse_error("unknown qualifier"))?;
            // Re-rendering the number drops leading zeros, which semver rejects.
            let pre = match caps.get(5) {
                Some(_) => format!("{}.{}", qualifier.as_str(), number(5)?),
                None => qualifier.as_str().to_string(),
            };
            inner.pre = semver::Prerelease::new(&pre).map_err(|e| parse_error(&e.to_string()))?;
        }

        Ok(Self { inner })
    }

    pub fn major(&self) -> u64 {
        self.inner.major
    }

    pub fn minor(&self) -> u64 {
        self.inner.minor
    }

    pub fn patch(&self) -> u64 {
        self.inner.patch
    }

    /// The pre-release qualifier and its number, if any.
    pub fn qualifier(&self) -> Option<(Qualifier, Option<u64>)> {
        if self.inner.pre.is_empty() {
            return None;
        }
        let mut parts = self.inner.pre.as_str().splitn(2, '.');
        let qualifier = parts.next().and_then(Qualifier::from_token)?;
        let number = parts.next().and_then(|n| n.parse().ok());
        Some((qualifier, number))
    }

    /// True for versions without a pre-release qualifier.
    pub fn is_stable(&self) -> bool {
        self.inner.pre.is_empty()
    }

    /// Three-way comparison: negative, zero or positive.
    pub fn compare(&self, other: &Version) -> i32 {
        match self.cmp(other) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }

    /// Whether this version satisfies a `minimum` floor.
    pub fn at_least(&self, minimum: &Version) -> bool {
        self >= minimum
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner.cmp(&other.inner)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.inner.major)?;
        if self.inner.minor != 0 || self.inner.patch != 0 {
            write!(f, ".{}", self.inner.minor)?;
        }
        if self.inner.patch != 0 {
            write!(f, ".{}", self.inner.patch)?;
        }
        if let Some((qualifier, number)) = self.qualifier() {
            f.write_str(qualifier.as_str())?;
            if let Some(n) = number {
                write!(f, "{}", n)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_api_forms() {
        let beta = v("v1beta2");
        assert_eq!(beta.major(), 1);
        assert_eq!(beta.qualifier(), Some((Qualifier::Beta, Some(2))));
        assert!(!beta.is_stable());

        let stable = v("v1");
        assert_eq!((stable.major(), stable.minor(), stable.patch()), (1, 0, 0));
        assert!(stable.is_stable());
    }

    #[test]
    fn test_parse_dotted_forms() {
        assert_eq!(v("1.2.0-rc.1"), v("v1.2rc1"));
        assert_eq!(v("v2.1.3").patch(), 3);
        assert_eq!(v("v1alpha"), v("1-alpha"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "v", "beta1", "v1gamma1", "v1.2.3.4", "v-1", "1.x", "v1 beta1"] {
            let err = Version::parse(bad).unwrap_err();
            assert!(matches!(err, ProxyError::Parse { .. }), "{bad} should not parse");
        }
    }

    #[test]
    fn test_parse_rejects_overflow() {
        assert!(Version::parse("v99999999999999999999999").is_err());
    }

    #[test]
    fn test_leading_zero_qualifier_number_normalizes() {
        assert_eq!(v("v1beta02"), v("v1beta2"));
    }

    #[test]
    fn test_display_roundtrips() {
        for s in [
            "v1", "v1alpha1", "v1beta3", "v2rc1", "v1.2", "v1.0.3", "v3.1.4beta", "1.2.0-rc.7",
            "v0alpha0",
        ] {
            let parsed = v(s);
            assert_eq!(v(&parsed.to_string()), parsed, "roundtrip of {s}");
        }
        assert_eq!(v("v1beta3").to_string(), "v1beta3");
        assert_eq!(v("1.0.0").to_string(), "v1");
        assert_eq!(v("1.2.0-rc.1").to_string(), "v1.2rc1");
    }

    #[test]
    fn test_total_order() {
        let ordered: Vec<Version> = [
            "v1alpha", "v1alpha1", "v1alpha2", "v1beta1", "v1beta10", "v1rc1", "v1", "v1.0.1",
            "v1.1alpha1", "v1.1", "v2alpha1", "v2",
        ]
        .iter()
        .map(|s| v(s))
        .collect();

        for (i, a) in ordered.iter().enumerate() {
            for (j, b) in ordered.iter().enumerate() {
                assert_eq!(a.cmp(b), i.cmp(&j), "{a} vs {b}");
                assert_eq!(a.compare(b), -b.compare(a), "antisymmetry {a} {b}");
            }
        }
    }

    #[test]
    fn test_prerelease_below_stable() {
        for q in ["alpha", "beta", "rc"] {
            for n in ["", "1", "9"] {
                let pre = v(&format!("v4{q}{n}"));
                assert!(pre < v("v4"));
                assert!(pre > v("v3.9.9"));
            }
        }
    }

    #[test]
    fn test_at_least() {
        assert!(v("v1alpha2").at_least(&v("v1alpha2")));
        assert!(v("v1").at_least(&v("v1alpha2")));
        assert!(!v("v1alpha1").at_least(&v("v1alpha2")));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&v("v1beta1")).unwrap();
        assert_eq!(json, "\"v1beta1\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("v1beta1"));
        assert!(serde_json::from_str::<Version>("\"nope\"").is_err());
    }
}
