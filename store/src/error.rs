//! Error types for the persistence layer
use std::error::Error as StdError;
use std::fmt;

use serde::Serialize;

/// Errors while reading or writing records.
/// Errors fall into two groups:
///  * Errors related to data. Ex StoreErrorKind::RecordNotFound
///  * Errors related to the backing store itself. Ex StoreErrorKind::SystemError
#[derive(Debug)]
pub struct Error {
    // Underlying error emitted by the backend, if any
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    // Enum representing which category of error
    pub error_kind: StoreErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StoreErrorKind {
    // Invalid search term
    InvalidQueryTerm,
    // Record not found
    RecordNotFound,
    // A record with the same key already exists
    DuplicateRecord,
    // Record not updated
    RecordNotUpdated,
    // Errors related to the backend itself
    SystemError,
}

impl Error {
    pub fn new(error_kind: StoreErrorKind) -> Self {
        Self {
            source: None,
            error_kind,
        }
    }

    pub fn not_found() -> Self {
        Self::new(StoreErrorKind::RecordNotFound)
    }

    pub fn duplicate() -> Self {
        Self::new(StoreErrorKind::DuplicateRecord)
    }

    pub fn is_not_found(&self) -> bool {
        self.error_kind == StoreErrorKind::RecordNotFound
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Store Error: {:?}", self.error_kind)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}
