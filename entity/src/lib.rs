//! Value types and persisted records shared by every layer of the chat server.

// Value types
pub mod access_mode;
pub mod auth_level;
pub mod obj_state;
pub mod uid;

// Records
pub mod auth_records;
pub mod messages;
pub mod subscriptions;
pub mod topics;
pub mod users;

pub use access_mode::{AccessMode, DefaultAccess};
pub use auth_level::AuthLevel;
pub use obj_state::ObjState;
pub use uid::Uid;
