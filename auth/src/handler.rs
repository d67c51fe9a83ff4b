//! Authentication scheme trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entity::{AuthLevel, Uid};

use crate::error::Error;

/// Outcome of a successful authentication or credential registration.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthResult {
    pub uid: Uid,
    pub level: AuthLevel,
    pub expires: Option<DateTime<Utc>>,
}

/// A pluggable authentication scheme, looked up by name in the
/// [`Registry`](crate::Registry).
///
/// Secrets arrive as the raw bytes the client sent; each scheme decides how
/// to interpret them.
#[async_trait]
pub trait AuthHandler: Send + Sync {
    /// Scheme name used on the wire, e.g. `basic`.
    fn scheme(&self) -> &'static str;

    /// Stores a credential for a freshly created account.
    async fn add_record(&self, uid: Uid, secret: &[u8], level: AuthLevel)
        -> Result<AuthResult, Error>;

    /// Replaces the credential of an existing account.
    async fn update_record(&self, uid: Uid, secret: &[u8]) -> Result<(), Error>;

    /// Checks a credential and resolves it to an account.
    async fn authenticate(&self, secret: &[u8], remote_addr: &str) -> Result<AuthResult, Error>;

    /// Returns true when no account holds this credential yet.
    async fn is_unique(&self, secret: &[u8]) -> Result<bool, Error>;
}
