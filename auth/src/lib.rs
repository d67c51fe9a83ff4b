//! # auth
//!
//! Authentication schemes for the chat server:
//! - `basic`: login and password, hashed at rest
//! - `anonymous`: throwaway accounts without a reusable credential
//!
//! Sessions look schemes up by name through a [`Registry`].

pub mod anon;
pub mod basic;
pub mod error;
pub mod handler;
pub mod registry;

pub use anon::AnonAuth;
pub use basic::BasicAuth;
pub use error::{CredentialErrorKind, Error, ErrorKind, SchemeErrorKind};
pub use handler::{AuthHandler, AuthResult};
pub use registry::Registry;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use store::MemoryStore;

    #[test]
    fn registry_lookup_ignores_case() {
        let registry = Registry::new()
            .with_handler(Arc::new(BasicAuth::new(Arc::new(MemoryStore::new()))))
            .with_handler(Arc::new(AnonAuth));

        assert!(registry.handler("BASIC").is_some());
        assert!(registry.handler("token").is_none());
        assert_eq!(registry.schemes(), vec!["anonymous", "basic"]);
    }
}
