//! Engine schema versions.
//!
//! Version strings look like `3.4.2.8029` (major, minor, fix, build) and
//! may omit the fix and build parts. Ordering and equality only consider
//! the (major, minor, fix) triple; the build number is informational.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::InterchangeError;

#[derive(Debug, Clone, Copy)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub fix: u32,
    pub build: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, fix: u32) -> Self {
        Version {
            major,
            minor,
            fix,
            build: 0,
        }
    }

    fn triple(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.fix)
    }
}

impl FromStr for Version {
    type Err = InterchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InterchangeError::InvalidVersion(s.to_string());
        let trimmed = s.trim().trim_start_matches(['v', 'V']);
        let mut parts = trimmed.split('.');

        let major = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(invalid)?;
        // the minor number is mandatory, fix and build are not
        let minor = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(invalid)?;
        let mut optional = || -> Result<u32, InterchangeError> {
            match parts.next() {
                None | Some("") => Ok(0),
                Some(p) => leading_number(p).ok_or_else(invalid),
            }
        };
        let fix = optional()?;
        let build = optional()?;

        Ok(Version {
            major,
            minor,
            fix,
            build,
        })
    }
}

/// Numeric prefix of a segment such as `8029-SNAPSHOT`.
fn leading_number(segment: &str) -> Option<u32> {
    let digits: String = segment.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

impl fmt::Display for Version {
    /// API form: `major.minor.fix`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.fix)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.triple() == other.triple()
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.triple().cmp(&other.triple())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_and_short_forms() {
        let v: Version = "3.4.2.8029".parse().unwrap();
        assert_eq!((v.major, v.minor, v.fix, v.build), (3, 4, 2, 8029));
        let short: Version = "3.4".parse().unwrap();
        assert_eq!((short.major, short.minor, short.fix, short.build), (3, 4, 0, 0));
        assert_eq!(short.to_string(), "3.4.0");
    }

    #[test]
    fn build_number_does_not_affect_ordering() {
        let a: Version = "3.9.1.100".parse().unwrap();
        let b: Version = "3.9.1.200".parse().unwrap();
        assert_eq!(a, b);
        assert!(Version::new(3, 10, 0) > Version::new(3, 9, 1));
        assert!(Version::new(3, 4, 0) < Version::new(3, 4, 1));
    }

    #[test]
    fn rejects_garbage() {
        assert!("three.four".parse::<Version>().is_err());
        assert!("3".parse::<Version>().is_err());
    }
}
