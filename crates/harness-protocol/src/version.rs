//! Structured protocol version parsing and compatibility checks.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::PROTOCOL_VERSION;

/// Errors parsing or comparing protocol versions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    /// The string was not of the form `"harness/vMAJOR.MINOR"`.
    #[error("invalid version format (expected \"harness/vMAJOR.MINOR\")")]
    InvalidFormat,
    /// The major component was not a valid integer.
    #[error("invalid major version component")]
    InvalidMajor,
    /// The minor component was not a valid integer.
    #[error("invalid minor version component")]
    InvalidMinor,
}

/// A parsed `"harness/vMAJOR.MINOR"` protocol version.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    /// Major version component; an event vocabulary change bumps this.
    pub major: u32,
    /// Minor version component; additive fields bump this.
    pub minor: u32,
}

impl ProtocolVersion {
    /// Parse a version string of the form `"harness/vMAJOR.MINOR"`.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError`] if the string does not match the expected format.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let rest = s.strip_prefix("harness/v").ok_or(VersionError::InvalidFormat)?;
        let (major_str, minor_str) = rest.split_once('.').ok_or(VersionError::InvalidFormat)?;
        let major = major_str.parse::<u32>().map_err(|_| VersionError::InvalidMajor)?;
        let minor = minor_str.parse::<u32>().map_err(|_| VersionError::InvalidMinor)?;
        Ok(Self { major, minor })
    }

    /// Two versions are compatible when they share the same major component.
    #[must_use]
    pub fn is_compatible(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }

    /// The [`ProtocolVersion`] corresponding to [`PROTOCOL_VERSION`].
    ///
    /// # Panics
    ///
    /// Panics if [`PROTOCOL_VERSION`] is not itself a valid version string,
    /// which would indicate a programming error in this crate.
    #[must_use]
    pub fn current() -> Self {
        Self::parse(PROTOCOL_VERSION).expect("PROTOCOL_VERSION must be a valid version string")
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "harness/v{}.{}", self.major, self.minor)
    }
}

/// Parse a version string into `(major, minor)`, or `None` if malformed.
#[must_use]
pub fn parse_version(version: &str) -> Option<(u32, u32)> {
    ProtocolVersion::parse(version).ok().map(|v| (v.major, v.minor))
}

/// Two versions are compatible when they share the same major component.
/// Returns `false` if either string cannot be parsed.
#[must_use]
pub fn is_compatible_version(their_version: &str, our_version: &str) -> bool {
    match (ProtocolVersion::parse(their_version), ProtocolVersion::parse(our_version)) {
        (Ok(theirs), Ok(ours)) => theirs.is_compatible(&ours),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_version() {
        assert_eq!(ProtocolVersion::parse("harness/v1.0"), Ok(ProtocolVersion { major: 1, minor: 0 }));
    }

    #[test]
    fn rejects_malformed_version() {
        assert_eq!(ProtocolVersion::parse("v1.0"), Err(VersionError::InvalidFormat));
        assert_eq!(ProtocolVersion::parse("harness/v1"), Err(VersionError::InvalidFormat));
        assert_eq!(ProtocolVersion::parse("harness/vx.0"), Err(VersionError::InvalidMajor));
    }

    #[test]
    fn compatibility_requires_matching_major() {
        assert!(is_compatible_version("harness/v1.0", "harness/v1.3"));
        assert!(!is_compatible_version("harness/v2.0", "harness/v1.0"));
        assert!(!is_compatible_version("garbage", "harness/v1.0"));
    }

    #[test]
    fn current_matches_protocol_version_const() {
        assert_eq!(ProtocolVersion::current(), ProtocolVersion::parse(PROTOCOL_VERSION).unwrap());
    }
}
