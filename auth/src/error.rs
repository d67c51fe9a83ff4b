//! Error types for the `auth` crate.
//!
//! A root Error struct carrying an error kind and an optional source.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of authentication errors.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Scheme(SchemeErrorKind),
    Credential(CredentialErrorKind),
    Storage,
}

/// Errors about the authentication scheme itself.
#[derive(Debug, PartialEq)]
pub enum SchemeErrorKind {
    /// No handler registered under the requested name.
    Unknown,
    /// The scheme does not support the requested operation.
    Unsupported,
}

/// Errors about the presented credential.
#[derive(Debug, PartialEq)]
pub enum CredentialErrorKind {
    Malformed,
    Failed,
    Duplicate,
    Expired,
    NotFound,
}

impl Error {
    pub fn new(error_kind: ErrorKind) -> Self {
        Self {
            source: None,
            error_kind,
        }
    }

    pub fn credential(kind: CredentialErrorKind) -> Self {
        Self::new(ErrorKind::Credential(kind))
    }

    pub fn scheme(kind: SchemeErrorKind) -> Self {
        Self::new(ErrorKind::Scheme(kind))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Scheme(kind) => write!(f, "Auth scheme error: {:?}", kind),
            ErrorKind::Credential(kind) => write!(f, "Credential error: {:?}", kind),
            ErrorKind::Storage => write!(f, "Credential storage error"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<store::Error> for Error {
    fn from(err: store::Error) -> Self {
        let error_kind = match err.error_kind {
            store::StoreErrorKind::RecordNotFound => {
                ErrorKind::Credential(CredentialErrorKind::NotFound)
            }
            store::StoreErrorKind::DuplicateRecord => {
                ErrorKind::Credential(CredentialErrorKind::Duplicate)
            }
            _ => ErrorKind::Storage,
        };
        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}
