use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle state of a user or topic record.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjState {
    #[default]
    Ok,
    Suspended,
    Deleted,
}

impl std::fmt::Display for ObjState {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjState::Ok => write!(fmt, "ok"),
            ObjState::Suspended => write!(fmt, "suspended"),
            ObjState::Deleted => write!(fmt, "deleted"),
        }
    }
}

impl FromStr for ObjState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" | "normal" => Ok(ObjState::Ok),
            "susp" | "suspended" => Ok(ObjState::Suspended),
            "del" | "deleted" => Ok(ObjState::Deleted),
            other => Err(format!("unknown object state: {other}")),
        }
    }
}
