//! Anonymous accounts. The scheme only registers accounts; it cannot be used
//! to log back in.

use async_trait::async_trait;
use entity::{AuthLevel, Uid};

use crate::error::{Error, SchemeErrorKind};
use crate::handler::{AuthHandler, AuthResult};

pub const SCHEME: &str = "anonymous";

#[derive(Debug, Default)]
pub struct AnonAuth;

#[async_trait]
impl AuthHandler for AnonAuth {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    async fn add_record(
        &self,
        uid: Uid,
        _secret: &[u8],
        _level: AuthLevel,
    ) -> Result<AuthResult, Error> {
        Ok(AuthResult {
            uid,
            level: AuthLevel::Anon,
            expires: None,
        })
    }

    async fn update_record(&self, _uid: Uid, _secret: &[u8]) -> Result<(), Error> {
        Err(Error::scheme(SchemeErrorKind::Unsupported))
    }

    async fn authenticate(&self, _secret: &[u8], _remote_addr: &str) -> Result<AuthResult, Error> {
        Err(Error::scheme(SchemeErrorKind::Unsupported))
    }

    async fn is_unique(&self, _secret: &[u8]) -> Result<bool, Error> {
        Ok(true)
    }
}
