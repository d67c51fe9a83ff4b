use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// How strongly a session has been authenticated. Levels are ordered, so a
/// check for "at least authenticated" is `level >= AuthLevel::Auth`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AuthLevel {
    #[default]
    None,
    Anon,
    Auth,
    Root,
}

impl fmt::Display for AuthLevel {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthLevel::None => write!(fmt, ""),
            AuthLevel::Anon => write!(fmt, "anon"),
            AuthLevel::Auth => write!(fmt, "auth"),
            AuthLevel::Root => write!(fmt, "root"),
        }
    }
}

impl FromStr for AuthLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(AuthLevel::None),
            "anon" => Ok(AuthLevel::Anon),
            "auth" => Ok(AuthLevel::Auth),
            "root" => Ok(AuthLevel::Root),
            other => Err(format!("unknown auth level: {other}")),
        }
    }
}

impl Serialize for AuthLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AuthLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(AuthLevel::Root > AuthLevel::Auth);
        assert!(AuthLevel::Auth > AuthLevel::Anon);
        assert!(AuthLevel::Anon > AuthLevel::None);
    }

    #[test]
    fn parses_wire_names() {
        assert_eq!("".parse::<AuthLevel>(), Ok(AuthLevel::None));
        assert_eq!("ROOT".parse::<AuthLevel>(), Ok(AuthLevel::Root));
        assert!("admin".parse::<AuthLevel>().is_err());
    }
}
