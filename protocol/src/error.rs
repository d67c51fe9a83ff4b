//! Error types for envelope decoding and topic-name handling.

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bytes are not valid JSON or do not fit the envelope schema.
    Malformed,
    /// The envelope has zero or several top-level payloads.
    PayloadCount(usize),
    /// Topic name matches no known category.
    InvalidTopic,
    /// A peer-to-peer topic addressed to the requesting user.
    SelfTopic,
}

impl Error {
    pub fn new(error_kind: ErrorKind) -> Self {
        Self {
            source: None,
            error_kind,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.error_kind {
            ErrorKind::Malformed => write!(f, "malformed envelope"),
            ErrorKind::PayloadCount(count) => {
                write!(f, "envelope must carry exactly one payload, found {count}")
            }
            ErrorKind::InvalidTopic => write!(f, "invalid topic name"),
            ErrorKind::SelfTopic => write!(f, "peer-to-peer topic with self"),
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

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Malformed,
        }
    }
}
