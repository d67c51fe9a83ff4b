//! Realtime core of the chat server: sessions, topics and the hub that
//! connects them.
//!
//! # Architecture
//!
//! - **Session**: one per client connection. Decodes inbound envelopes,
//!   enforces handshake and authentication ordering, and owns a bounded
//!   outbound queue drained by the transport.
//! - **SessionStore**: process-wide registry of sessions. Long-poll sessions
//!   are additionally tracked by last activity and evicted when idle.
//! - **Hub**: address book of live topics. Spins topic actors up on demand
//!   and routes requests for topics a session is not attached to.
//! - **Topic**: one task per live conversation and the single serialization
//!   point for its state: sequence ids, subscribers, presence.
//! - **Subscription**: the four channels a session holds into a topic it is
//!   attached to. The only contact surface between the two.
//!
//! # Message Flow
//!
//! 1. The transport hands raw bytes to [`Session::dispatch_raw`]
//! 2. The session stamps routing data and checks ordering and auth
//! 3. Attach requests go through the hub, which finds or starts the topic
//! 4. The topic answers the client directly on the session's outbound queue
//!    and returns the [`Subscription`] to the session
//! 5. Later `pub`, `note`, `get`, `set`, `del` and `leave` travel over the
//!    subscription; fan-out comes back through each session's outbound queue
//!
//! Every send into a session waits at most `Limits::send_timeout`, so a slow
//! client can lose messages but never stall a topic.

pub mod context;
mod dispatch;
pub mod error;
pub mod hub;
pub mod limits;
pub mod session;
pub mod session_store;
pub mod subscription;
pub mod topic;
pub mod transport;

pub use context::Context;
pub use error::{Error, ErrorKind};
pub use hub::Hub;
pub use limits::Limits;
pub use session::{Session, SessionState};
pub use session_store::SessionStore;
pub use subscription::Subscription;
pub use transport::{SessionProto, SessionSink};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use async_trait::async_trait;
    use auth::{AnonAuth, BasicAuth, Registry};
    use store::{MemoryStore, Store};
    use tokio::sync::mpsc;

    use crate::context::Context;
    use crate::error::Error;
    use crate::limits::Limits;
    use crate::session::Session;
    use crate::subscription::{MetaReq, SessionLeave, SessionUpdate, Subscription};
    use crate::transport::{SessionProto, SessionSink};

    pub fn context() -> Arc<Context> {
        context_with(Limits::default())
    }

    pub fn context_with(limits: Limits) -> Arc<Context> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::with_seed(1000));
        let auth = Registry::new()
            .with_handler(Arc::new(BasicAuth::new(store.clone())))
            .with_handler(Arc::new(AnonAuth));
        Context::new(limits, store, auth)
    }

    static NEXT_SID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

    pub fn session(ctx: &Arc<Context>, proto: SessionProto) -> Arc<Session> {
        let n = NEXT_SID.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Session::new(format!("test-sid-{n}"), proto, ctx.clone())
    }

    /// Receiving side of a subscription built by [`subscription`].
    pub struct Inbox {
        pub broadcast: mpsc::Receiver<protocol::ServerComMessage>,
        pub done: mpsc::Receiver<SessionLeave>,
        pub meta: mpsc::Receiver<MetaReq>,
        pub supd: mpsc::Receiver<SessionUpdate>,
    }

    pub fn subscription() -> (Subscription, Inbox) {
        let (broadcast, broadcast_rx) = mpsc::channel(8);
        let (done, done_rx) = mpsc::channel(8);
        let (meta, meta_rx) = mpsc::channel(8);
        let (supd, supd_rx) = mpsc::channel(8);
        (
            Subscription {
                broadcast,
                done,
                meta,
                supd,
            },
            Inbox {
                broadcast: broadcast_rx,
                done: done_rx,
                meta: meta_rx,
                supd: supd_rx,
            },
        )
    }

    /// Sink that forwards every written frame to a channel.
    pub struct RecordingSink {
        frames: mpsc::UnboundedSender<String>,
    }

    impl RecordingSink {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
            let (frames, rx) = mpsc::unbounded_channel();
            (Self { frames }, rx)
        }
    }

    #[async_trait]
    impl SessionSink for RecordingSink {
        async fn send_text(&mut self, text: String) -> Result<(), Error> {
            self.frames
                .send(text)
                .map_err(|err| Error::internal(err.to_string()))
        }

        async fn close(&mut self) {}
    }
}
