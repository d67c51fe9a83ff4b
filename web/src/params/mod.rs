//! Typed query parameters of the transport endpoints.

pub(crate) mod channel;
