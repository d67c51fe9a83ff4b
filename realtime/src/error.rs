//! Error types for the realtime core.
//!
//! Every kind except the fatal ones maps to a [`Status`], so a failed
//! request is always answered with a ctrl envelope.

use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, Utc};
use protocol::{ServerComMessage, Status};

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Protocol(ProtocolErrorKind),
    Authorization(AuthorizationErrorKind),
    Resource(ResourceErrorKind),
    Capacity(CapacityErrorKind),
    Fatal(FatalErrorKind),
    Internal,
}

/// The request itself is wrong. The connection stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    Malformed,
    OutOfSequence,
    VersionNotSupported,
    NotImplemented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationErrorKind {
    AuthRequired,
    AuthFailed,
    UnknownScheme,
    PermissionDenied,
    AlreadyAuthenticated,
    DuplicateCredential,
    OperationNotAllowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceErrorKind {
    TopicNotFound,
    UserNotFound,
    SessionNotFound,
    NotFound,
    AlreadyExists,
    AttachFirst,
    Gone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityErrorKind {
    QueueFull,
    TooLarge,
    Unavailable,
}

/// Broken invariants. `UnsupportedTransport` ends the session being
/// created; `DuplicateSessionId` ends the process (see [`Error::aborts_process`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalErrorKind {
    DuplicateSessionId,
    UnsupportedTransport,
}

impl Error {
    pub fn new(error_kind: ErrorKind) -> Self {
        Self {
            source: None,
            error_kind,
        }
    }

    pub fn protocol(kind: ProtocolErrorKind) -> Self {
        Self::new(ErrorKind::Protocol(kind))
    }

    pub fn authorization(kind: AuthorizationErrorKind) -> Self {
        Self::new(ErrorKind::Authorization(kind))
    }

    pub fn resource(kind: ResourceErrorKind) -> Self {
        Self::new(ErrorKind::Resource(kind))
    }

    pub fn capacity(kind: CapacityErrorKind) -> Self {
        Self::new(ErrorKind::Capacity(kind))
    }

    pub fn fatal(kind: FatalErrorKind) -> Self {
        Self::new(ErrorKind::Fatal(kind))
    }

    pub fn internal(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            source: Some(source.into()),
            error_kind: ErrorKind::Internal,
        }
    }

    /// Translates a failed store lookup, reporting a missing record as `missing`.
    pub fn lookup(err: store::Error, missing: ResourceErrorKind) -> Self {
        if err.is_not_found() {
            Self {
                source: Some(Box::new(err)),
                error_kind: ErrorKind::Resource(missing),
            }
        } else {
            err.into()
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.error_kind, ErrorKind::Fatal(_))
    }

    /// Two sessions sharing one id means the registry is corrupt; the
    /// transport layer exits instead of answering.
    pub fn aborts_process(&self) -> bool {
        matches!(
            self.error_kind,
            ErrorKind::Fatal(FatalErrorKind::DuplicateSessionId)
        )
    }

    pub fn status(&self) -> Status {
        match self.error_kind {
            ErrorKind::Protocol(kind) => match kind {
                ProtocolErrorKind::Malformed => Status::Malformed,
                ProtocolErrorKind::OutOfSequence => Status::CommandOutOfSequence,
                ProtocolErrorKind::VersionNotSupported => Status::VersionNotSupported,
                ProtocolErrorKind::NotImplemented => Status::NotImplemented,
            },
            ErrorKind::Authorization(kind) => match kind {
                AuthorizationErrorKind::AuthRequired => Status::AuthRequired,
                AuthorizationErrorKind::AuthFailed => Status::AuthFailed,
                AuthorizationErrorKind::UnknownScheme => Status::UnknownScheme,
                AuthorizationErrorKind::PermissionDenied => Status::PermissionDenied,
                AuthorizationErrorKind::AlreadyAuthenticated => Status::AlreadyAuthenticated,
                AuthorizationErrorKind::DuplicateCredential => Status::DuplicateCredential,
                AuthorizationErrorKind::OperationNotAllowed => Status::OperationNotAllowed,
            },
            ErrorKind::Resource(kind) => match kind {
                ResourceErrorKind::TopicNotFound => Status::TopicNotFound,
                ResourceErrorKind::UserNotFound => Status::UserNotFound,
                ResourceErrorKind::SessionNotFound => Status::SessionNotFound,
                ResourceErrorKind::NotFound => Status::NotFound,
                ResourceErrorKind::AlreadyExists => Status::AlreadyExists,
                ResourceErrorKind::AttachFirst => Status::AttachFirst,
                ResourceErrorKind::Gone => Status::Gone,
            },
            ErrorKind::Capacity(kind) => match kind {
                CapacityErrorKind::QueueFull | CapacityErrorKind::Unavailable => {
                    Status::ServiceUnavailable
                }
                CapacityErrorKind::TooLarge => Status::TooLarge,
            },
            ErrorKind::Fatal(_) | ErrorKind::Internal => Status::Unknown,
        }
    }

    /// Ctrl envelope answering the request `id` on `topic`.
    pub fn to_ctrl(&self, id: &str, topic: &str, ts: DateTime<Utc>) -> ServerComMessage {
        ServerComMessage::ctrl(self.status(), id, topic, ts)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Protocol(kind) => write!(f, "Protocol error: {:?}", kind),
            ErrorKind::Authorization(kind) => write!(f, "Authorization error: {:?}", kind),
            ErrorKind::Resource(kind) => write!(f, "Resource error: {:?}", kind),
            ErrorKind::Capacity(kind) => write!(f, "Capacity error: {:?}", kind),
            ErrorKind::Fatal(kind) => write!(f, "Fatal error: {:?}", kind),
            ErrorKind::Internal => write!(f, "Internal error"),
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
            store::StoreErrorKind::RecordNotFound => ErrorKind::Resource(ResourceErrorKind::NotFound),
            store::StoreErrorKind::DuplicateRecord => {
                ErrorKind::Resource(ResourceErrorKind::AlreadyExists)
            }
            store::StoreErrorKind::InvalidQueryTerm => {
                ErrorKind::Protocol(ProtocolErrorKind::Malformed)
            }
            store::StoreErrorKind::RecordNotUpdated | store::StoreErrorKind::SystemError => {
                ErrorKind::Internal
            }
        };
        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<auth::Error> for Error {
    fn from(err: auth::Error) -> Self {
        use auth::{CredentialErrorKind, SchemeErrorKind};

        let error_kind = match &err.error_kind {
            auth::ErrorKind::Scheme(SchemeErrorKind::Unknown) => {
                ErrorKind::Authorization(AuthorizationErrorKind::UnknownScheme)
            }
            auth::ErrorKind::Scheme(SchemeErrorKind::Unsupported) => {
                ErrorKind::Authorization(AuthorizationErrorKind::OperationNotAllowed)
            }
            auth::ErrorKind::Credential(CredentialErrorKind::Malformed) => {
                ErrorKind::Protocol(ProtocolErrorKind::Malformed)
            }
            auth::ErrorKind::Credential(CredentialErrorKind::Duplicate) => {
                ErrorKind::Authorization(AuthorizationErrorKind::DuplicateCredential)
            }
            auth::ErrorKind::Credential(
                CredentialErrorKind::Failed
                | CredentialErrorKind::Expired
                | CredentialErrorKind::NotFound,
            ) => ErrorKind::Authorization(AuthorizationErrorKind::AuthFailed),
            auth::ErrorKind::Storage => ErrorKind::Internal,
        };
        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<protocol::Error> for Error {
    fn from(err: protocol::Error) -> Self {
        let error_kind = match err.error_kind {
            protocol::ErrorKind::SelfTopic => {
                ErrorKind::Authorization(AuthorizationErrorKind::PermissionDenied)
            }
            protocol::ErrorKind::Malformed
            | protocol::ErrorKind::PayloadCount(_)
            | protocol::ErrorKind::InvalidTopic => ErrorKind::Protocol(ProtocolErrorKind::Malformed),
        };
        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}
