use std::time::Duration;

use protocol::ProtocolVersion;

/// Extra outbound slots on top of `send_queue_limit`.
pub const SEND_QUEUE_SLACK: usize = 32;
/// Capacity of a session's detach queue.
pub const DETACH_QUEUE_LEN: usize = 64;

/// Tunables of the realtime core.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Handshakes below this version are refused with 505.
    pub min_supported_version: ProtocolVersion,
    /// Bounded wait for one send into a session's outbound queue.
    pub send_timeout: Duration,
    pub send_queue_limit: usize,
    /// How long a background session stays invisible to presence.
    pub deferred_notifications: Duration,
    /// Idle lifetime of a long-poll session.
    pub long_poll_lifetime: Duration,
    /// How long one long-poll request waits for outbound data.
    pub long_poll_wait: Duration,
    /// A topic with no attached sessions shuts down after this long.
    pub topic_idle: Duration,
    pub topic_queue_limit: usize,
    /// Largest inbound envelope accepted, in bytes.
    pub max_message_size: usize,
}

impl Limits {
    pub fn outbound_capacity(&self) -> usize {
        self.send_queue_limit + SEND_QUEUE_SLACK
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            min_supported_version: ProtocolVersion::new(1, 1, 0),
            send_timeout: Duration::from_millis(7),
            send_queue_limit: 128,
            deferred_notifications: Duration::from_secs(5),
            long_poll_lifetime: Duration::from_secs(55),
            long_poll_wait: Duration::from_secs(50),
            topic_idle: Duration::from_secs(5),
            topic_queue_limit: 256,
            max_message_size: 262_144,
        }
    }
}
