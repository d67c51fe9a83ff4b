use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const USER_PREFIX: &str = "usr";
const FND_PREFIX: &str = "fnd";
const P2P_PREFIX: &str = "p2p";

/// Opaque 64-bit user identifier. The zero value means "no user".
///
/// On the wire a user is addressed as `usr` followed by the url-safe base64
/// rendering of the id's big-endian bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(u64);

impl Uid {
    pub const ZERO: Uid = Uid(0);

    pub const fn new(raw: u64) -> Self {
        Uid(raw)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Wire name of the user, also the name of the user's `me` topic.
    pub fn user_id(&self) -> String {
        if self.is_zero() {
            return String::new();
        }
        format!("{USER_PREFIX}{self}")
    }

    /// Name of the user's `fnd` topic.
    pub fn fnd_name(&self) -> String {
        format!("{FND_PREFIX}{self}")
    }

    /// Parses a `usr...` name. Returns `None` for anything else, including the empty string.
    pub fn parse_user_id(name: &str) -> Option<Uid> {
        name.strip_prefix(USER_PREFIX)?.parse().ok()
    }

    /// Name of the peer-to-peer topic between two users. The name does not
    /// depend on which side asks for it.
    pub fn p2p_name(&self, other: Uid) -> String {
        let (lo, hi) = if self.0 < other.0 {
            (self.0, other.0)
        } else {
            (other.0, self.0)
        };
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&lo.to_be_bytes());
        bytes[8..].copy_from_slice(&hi.to_be_bytes());
        format!("{P2P_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Splits a `p2p...` topic name into its two participants.
    pub fn parse_p2p(name: &str) -> Option<(Uid, Uid)> {
        let encoded = name.strip_prefix(P2P_PREFIX)?;
        let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        if bytes.len() != 16 {
            return None;
        }
        let lo = u64::from_be_bytes(bytes[..8].try_into().ok()?);
        let hi = u64::from_be_bytes(bytes[8..].try_into().ok()?);
        if lo == 0 || hi == 0 {
            return None;
        }
        Some((Uid(lo), Uid(hi)))
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", URL_SAFE_NO_PAD.encode(self.0.to_be_bytes()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseUidError;

impl fmt::Display for ParseUidError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "invalid user id")
    }
}

impl std::error::Error for ParseUidError {}

impl FromStr for Uid {
    type Err = ParseUidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = URL_SAFE_NO_PAD.decode(s).map_err(|_| ParseUidError)?;
        let raw: [u8; 8] = bytes.try_into().map_err(|_| ParseUidError)?;
        Ok(Uid(u64::from_be_bytes(raw)))
    }
}

impl Serialize for Uid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.user_id())
    }
}

impl<'de> Deserialize<'de> for Uid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        if name.is_empty() {
            return Ok(Uid::ZERO);
        }
        Uid::parse_user_id(&name).ok_or_else(|| serde::de::Error::custom("invalid user id"))
    }
}
