//! Wire protocol of the chat server.
//!
//! # Architecture
//!
//! - **ClientComMessage** / **ServerComMessage**: JSON envelopes carrying
//!   exactly one payload, plus a routing context that never reaches the wire
//! - **Status**: the control response taxonomy with stable codes and texts
//! - **topic_name**: topic categories and expansion of `me`, `fnd` and
//!   peer-to-peer aliases
//! - **ProtocolVersion**: lenient client version parsing
//!
//! This crate depends only on `entity`, so both the realtime core and the
//! transport layer can use it.

pub mod client;
pub mod error;
pub mod meta_what;
pub mod routing;
pub mod server;
pub mod status;
pub mod topic_name;
pub mod version;

pub use client::{ClientComMessage, ClientPayload};
pub use error::{Error, ErrorKind};
pub use meta_what::MetaWhat;
pub use routing::{DeliveryFilters, Routing, ServerRouting};
pub use server::{ServerComMessage, ServerPayload};
pub use status::Status;
pub use topic_name::TopicCategory;
pub use version::ProtocolVersion;

/// Protocol version this server speaks.
pub const CURRENT_VERSION: ProtocolVersion = ProtocolVersion::new(1, 2, 0);

/// Server build identifier reported in the handshake.
pub const BUILD: &str = concat!("rust:", env!("CARGO_PKG_VERSION"));
