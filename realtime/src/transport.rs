use std::fmt;

use async_trait::async_trait;

use crate::error::Error;

/// Kind of connection a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionProto {
    /// Not set. Sessions cannot be created with it.
    None,
    WebSocket,
    LongPoll,
    Grpc,
    Proxy,
    Multiplex,
}

impl SessionProto {
    /// Transports whose liveness is driven by polling rather than an open
    /// connection. Only these are tracked for idle expiry.
    pub fn is_stateless(&self) -> bool {
        matches!(self, SessionProto::LongPoll)
    }
}

impl fmt::Display for SessionProto {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionProto::None => write!(fmt, "none"),
            SessionProto::WebSocket => write!(fmt, "ws"),
            SessionProto::LongPoll => write!(fmt, "lp"),
            SessionProto::Grpc => write!(fmt, "grpc"),
            SessionProto::Proxy => write!(fmt, "proxy"),
            SessionProto::Multiplex => write!(fmt, "multiplex"),
        }
    }
}

/// Outbound half of a persistent transport. The session's writer loop
/// pushes encoded envelopes into it.
#[async_trait]
pub trait SessionSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), Error>;

    async fn close(&mut self);
}
