use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::str::FromStr;

/// Permission bits a user holds on a topic. Rendered on the wire as a string
/// of letters from `JRWPASDO`, or `N` for no access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AccessMode(u32);

const LETTERS: [(char, u32); 8] = [
    ('J', AccessMode::JOIN.0),
    ('R', AccessMode::READ.0),
    ('W', AccessMode::WRITE.0),
    ('P', AccessMode::PRES.0),
    ('A', AccessMode::APPROVE.0),
    ('S', AccessMode::SHARE.0),
    ('D', AccessMode::DELETE.0),
    ('O', AccessMode::OWNER.0),
];

impl AccessMode {
    pub const NONE: AccessMode = AccessMode(0);
    pub const JOIN: AccessMode = AccessMode(0x01);
    pub const READ: AccessMode = AccessMode(0x02);
    pub const WRITE: AccessMode = AccessMode(0x04);
    pub const PRES: AccessMode = AccessMode(0x08);
    pub const APPROVE: AccessMode = AccessMode(0x10);
    pub const SHARE: AccessMode = AccessMode(0x20);
    pub const DELETE: AccessMode = AccessMode(0x40);
    pub const OWNER: AccessMode = AccessMode(0x80);

    /// Default grant for authenticated users on a public group topic.
    pub const C_PUBLIC: AccessMode = AccessMode(0x01 | 0x02 | 0x04 | 0x08 | 0x20);
    /// Read-only grant.
    pub const C_READ_ONLY: AccessMode = AccessMode(0x01 | 0x02);
    /// Grant each side of a peer-to-peer topic receives.
    pub const C_P2P: AccessMode = AccessMode(0x01 | 0x02 | 0x04 | 0x08 | 0x10);
    /// Everything, held by a topic owner.
    pub const C_FULL: AccessMode = AccessMode(0xff);

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: AccessMode) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_joiner(&self) -> bool {
        self.contains(Self::JOIN)
    }

    pub fn is_reader(&self) -> bool {
        self.contains(Self::READ)
    }

    pub fn is_writer(&self) -> bool {
        self.contains(Self::WRITE)
    }

    pub fn is_presencer(&self) -> bool {
        self.contains(Self::PRES)
    }

    pub fn is_admin(&self) -> bool {
        self.contains(Self::APPROVE) || self.is_owner()
    }

    pub fn is_deleter(&self) -> bool {
        self.contains(Self::DELETE)
    }

    pub fn is_owner(&self) -> bool {
        self.contains(Self::OWNER)
    }
}

impl BitAnd for AccessMode {
    type Output = AccessMode;

    fn bitand(self, rhs: Self) -> Self::Output {
        AccessMode(self.0 & rhs.0)
    }
}

impl BitOr for AccessMode {
    type Output = AccessMode;

    fn bitor(self, rhs: Self) -> Self::Output {
        AccessMode(self.0 | rhs.0)
    }
}

impl Not for AccessMode {
    type Output = AccessMode;

    fn not(self) -> Self::Output {
        AccessMode(!self.0 & Self::C_FULL.0)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return write!(fmt, "N");
        }
        for (letter, bit) in LETTERS {
            if self.0 & bit != 0 {
                write!(fmt, "{letter}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAccessModeError(pub String);

impl fmt::Display for ParseAccessModeError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "invalid access mode: {}", self.0)
    }
}

impl std::error::Error for ParseAccessModeError {}

impl FromStr for AccessMode {
    type Err = ParseAccessModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseAccessModeError(s.to_owned()));
        }
        let mut mode = 0;
        for ch in s.chars() {
            match ch.to_ascii_uppercase() {
                'N' => return Ok(AccessMode::NONE),
                upper => {
                    let (_, bit) = LETTERS
                        .iter()
                        .find(|(letter, _)| *letter == upper)
                        .ok_or_else(|| ParseAccessModeError(s.to_owned()))?;
                    mode |= bit;
                }
            }
        }
        Ok(AccessMode(mode))
    }
}

impl Serialize for AccessMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AccessMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Default access granted to new subscribers of a topic, split by how the
/// subscriber authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultAccess {
    pub auth: AccessMode,
    pub anon: AccessMode,
}

impl Default for DefaultAccess {
    fn default() -> Self {
        Self {
            auth: AccessMode::C_PUBLIC,
            anon: AccessMode::NONE,
        }
    }
}
