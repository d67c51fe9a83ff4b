use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Client protocol version, `major.minor[.patch][-suffix]`.
///
/// Parsing is lenient: a leading `v` and any `-suffix` are dropped, and
/// trailing garbage after the digits of a component is ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl ProtocolVersion {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Compares major and minor only. Patch releases are always compatible.
    pub fn cmp_minor(&self, other: &ProtocolVersion) -> Ordering {
        (self.major, self.minor).cmp(&(other.major, other.minor))
    }

    pub fn is_supported_by(&self, minimum: &ProtocolVersion) -> bool {
        self.cmp_minor(minimum) != Ordering::Less
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.patch == 0 {
            write!(fmt, "{}.{}", self.major, self.minor)
        } else {
            write!(fmt, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVersionError(pub String);

impl fmt::Display for ParseVersionError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "invalid protocol version: {}", self.0)
    }
}

impl std::error::Error for ParseVersionError {}

fn leading_number(part: &str) -> Option<u8> {
    let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

impl FromStr for ProtocolVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseVersionError(s.to_owned());
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);
        let core = trimmed.split('-').next().unwrap_or_default();

        let mut parts = core.splitn(3, '.');
        let major = parts.next().and_then(leading_number).ok_or_else(err)?;
        let minor = parts.next().and_then(leading_number).ok_or_else(err)?;
        let patch = match parts.next() {
            Some(part) => leading_number(part).ok_or_else(err)?,
            None => 0,
        };
        let version = ProtocolVersion::new(major, minor, patch);
        if version == ProtocolVersion::default() {
            return Err(err());
        }
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lenient_forms() {
        let parse = |text: &str| text.parse::<ProtocolVersion>().unwrap();
        assert_eq!(parse("0.15"), ProtocolVersion::new(0, 15, 0));
        assert_eq!(parse("v1.2.3-rc1"), ProtocolVersion::new(1, 2, 3));
        assert_eq!(parse("1.1beta"), ProtocolVersion::new(1, 1, 0));
    }

    #[test]
    fn rejects_missing_minor_and_zero() {
        assert!("1".parse::<ProtocolVersion>().is_err());
        assert!("0.0".parse::<ProtocolVersion>().is_err());
        assert!("".parse::<ProtocolVersion>().is_err());
        assert!("abc".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn comparison_ignores_patch() {
        let minimum = ProtocolVersion::new(1, 1, 0);
        assert!(ProtocolVersion::new(1, 1, 9).is_supported_by(&minimum));
        assert!(ProtocolVersion::new(2, 0, 0).is_supported_by(&minimum));
        assert!(!ProtocolVersion::new(1, 0, 9).is_supported_by(&minimum));
    }
}
