use crate::{AuthLevel, Uid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Credential stored by an authentication scheme.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Scheme-qualified unique value, e.g. `basic:alice`.
    pub unique: String,
    pub user: Uid,
    pub scheme: String,
    pub auth_level: AuthLevel,
    #[serde(skip_serializing)]
    pub secret: Vec<u8>,
    pub expires: Option<DateTime<Utc>>,
}
