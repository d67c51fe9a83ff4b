//! Routing context threaded alongside envelopes. Never serialized.

use chrono::{DateTime, Utc};
use entity::{AccessMode, AuthLevel, Uid};

use crate::meta_what::MetaWhat;

/// Stamped onto every inbound envelope by the receiving session before it
/// is routed anywhere.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Routing {
    /// Client-assigned message id, echoed in the response.
    pub id: String,
    /// Topic name as the client wrote it.
    pub original: String,
    /// Expanded topic name the message is routed to.
    pub rcpt_to: String,
    pub as_user: Uid,
    pub auth_lvl: AuthLevel,
    pub meta_what: MetaWhat,
    /// Server receipt time.
    pub timestamp: DateTime<Utc>,
}

/// Delivery filters applied by a topic when it fans a message out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryFilters {
    /// Deliver only to subscribers holding at least one of these bits.
    pub filter_in: AccessMode,
    /// Skip subscribers holding any of these bits.
    pub filter_out: AccessMode,
    /// Skip sessions already attached to this topic.
    pub skip_topic: Option<String>,
    /// Deliver only to sessions of this user.
    pub single_user: Option<Uid>,
    /// Deliver to everyone except sessions of this user.
    pub exclude_user: Option<Uid>,
}

/// Routing data of an outbound envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerRouting {
    /// Id of the client message this one answers, if any.
    pub id: String,
    /// Expanded name of the topic the message belongs to.
    pub rcpt_to: String,
    pub as_user: Uid,
    /// Time the server built the message.
    pub timestamp: DateTime<Utc>,
    /// Session that caused the message.
    pub origin_sid: Option<String>,
    /// Session that must not receive the message.
    pub skip_sid: Option<String>,
    pub filters: DeliveryFilters,
}
