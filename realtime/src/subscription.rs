//! Channels that wire a session to a topic.

use std::sync::Arc;

use entity::{ObjState, Uid};
use protocol::{ClientComMessage, ServerComMessage};
use tokio::sync::{mpsc, oneshot};

use crate::session::Session;

/// Detach or unsubscribe notice. `pkt` is `None` when the session went away
/// without asking.
pub struct SessionLeave {
    pub pkt: Option<ClientComMessage>,
    pub sess: Arc<Session>,
}

/// Metadata request: `get`, `set` or `del`.
pub struct MetaReq {
    pub pkt: ClientComMessage,
    pub sess: Arc<Session>,
    /// User the request acts for.
    pub for_user: Uid,
    /// Only objects in this state are considered.
    pub state: ObjState,
}

/// A session moved from background to foreground.
pub struct SessionUpdate {
    pub sess: Arc<Session>,
}

/// Request to attach a session to a topic. The topic answers the client
/// itself and hands the channel bundle back through `reply`; `None` means
/// the join was refused.
pub struct JoinReq {
    pub pkt: ClientComMessage,
    pub sess: Arc<Session>,
    /// The topic was created for this request.
    pub created: bool,
    pub reply: oneshot::Sender<Option<Joined>>,
}

/// Successful attachment.
#[derive(Debug)]
pub struct Joined {
    /// Expanded topic name, which differs from the requested one for new topics.
    pub topic: String,
    pub sub: Subscription,
}

/// The channel bundle a session holds for one attached topic.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// `data`, `pres` and `info` into the topic for fan-out.
    pub broadcast: mpsc::Sender<ServerComMessage>,
    /// Leave notices.
    pub done: mpsc::Sender<SessionLeave>,
    pub meta: mpsc::Sender<MetaReq>,
    /// Presence-relevant session changes.
    pub supd: mpsc::Sender<SessionUpdate>,
}
