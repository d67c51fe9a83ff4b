//! Login and password authentication.
//!
//! The secret is the UTF-8 string `login:password`. Passwords are stored as
//! PHC hash strings produced by `password-auth`.

use std::sync::Arc;

use async_trait::async_trait;
use entity::{auth_records, AuthLevel, Uid};
use log::*;
use secrecy::{ExposeSecret, SecretString};
use store::Store;

use crate::error::{CredentialErrorKind, Error};
use crate::handler::{AuthHandler, AuthResult};

pub const SCHEME: &str = "basic";

const MIN_LOGIN_LENGTH: usize = 2;
const MAX_LOGIN_LENGTH: usize = 32;
const MIN_PASSWORD_LENGTH: usize = 3;

pub struct BasicAuth {
    store: Arc<dyn Store>,
}

struct Credential {
    login: String,
    password: SecretString,
}

impl BasicAuth {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    fn parse_secret(secret: &[u8]) -> Result<Credential, Error> {
        let text = std::str::from_utf8(secret)
            .map_err(|_| Error::credential(CredentialErrorKind::Malformed))?;
        let (login, password) = text
            .split_once(':')
            .ok_or_else(|| Error::credential(CredentialErrorKind::Malformed))?;
        let login = login.to_lowercase();
        if !(MIN_LOGIN_LENGTH..=MAX_LOGIN_LENGTH).contains(&login.chars().count())
            || !login
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            debug!("Rejecting malformed basic login");
            return Err(Error::credential(CredentialErrorKind::Malformed));
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(Error::credential(CredentialErrorKind::Malformed));
        }
        Ok(Credential {
            login,
            password: SecretString::new(password.to_owned()),
        })
    }

    fn unique(login: &str) -> String {
        format!("{SCHEME}:{login}")
    }
}

#[async_trait]
impl AuthHandler for BasicAuth {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    async fn add_record(
        &self,
        uid: Uid,
        secret: &[u8],
        level: AuthLevel,
    ) -> Result<AuthResult, Error> {
        let credential = Self::parse_secret(secret)?;
        let hash = password_auth::generate_hash(credential.password.expose_secret());
        let record = auth_records::Model {
            unique: Self::unique(&credential.login),
            user: uid,
            scheme: SCHEME.to_owned(),
            auth_level: level,
            secret: hash.into_bytes(),
            expires: None,
        };
        self.store.add_auth_record(record).await?;
        Ok(AuthResult {
            uid,
            level,
            expires: None,
        })
    }

    async fn update_record(&self, uid: Uid, secret: &[u8]) -> Result<(), Error> {
        let credential = Self::parse_secret(secret)?;
        let existing = self.store.find_auth_record_by_user(uid, SCHEME).await?;
        let hash = password_auth::generate_hash(credential.password.expose_secret());
        let record = auth_records::Model {
            unique: Self::unique(&credential.login),
            secret: hash.into_bytes(),
            ..existing.clone()
        };
        self.store
            .update_auth_record(&existing.unique, record)
            .await?;
        Ok(())
    }

    async fn authenticate(&self, secret: &[u8], remote_addr: &str) -> Result<AuthResult, Error> {
        let credential = Self::parse_secret(secret)?;
        let record = match self
            .store
            .find_auth_record(&Self::unique(&credential.login))
            .await
        {
            Ok(record) => record,
            Err(err) if err.is_not_found() => {
                info!("Basic login failed for unknown login from {remote_addr}");
                return Err(Error::credential(CredentialErrorKind::Failed));
            }
            Err(err) => return Err(err.into()),
        };

        let hash = String::from_utf8_lossy(&record.secret);
        if password_auth::verify_password(credential.password.expose_secret(), &hash).is_err() {
            info!("Basic login failed for a known login from {remote_addr}");
            return Err(Error::credential(CredentialErrorKind::Failed));
        }
        if let Some(expires) = record.expires {
            if expires < chrono::Utc::now() {
                return Err(Error::credential(CredentialErrorKind::Expired));
            }
        }

        Ok(AuthResult {
            uid: record.user,
            level: record.auth_level,
            expires: record.expires,
        })
    }

    async fn is_unique(&self, secret: &[u8]) -> Result<bool, Error> {
        let credential = Self::parse_secret(secret)?;
        match self
            .store
            .find_auth_record(&Self::unique(&credential.login))
            .await
        {
            Ok(_) => Ok(false),
            Err(err) if err.is_not_found() => Ok(true),
            Err(err) => Err(err.into()),
        }
    }
}
